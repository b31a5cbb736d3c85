//! Ranked-submission sub-game nested inside a room: phase machine, active round,
//! session ledger and the cancelable timers driving the round.

pub mod machine;
pub mod round;

use std::time::Duration;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use tokio::{task::AbortHandle, time::Instant};
use uuid::Uuid;

use crate::config::SequenceConfig;

pub use self::machine::{InvalidTransition, SequenceEvent, SequenceMachine, SequencePhase};
pub use self::round::{Question, RankedRound, RoundOutcome, SubmissionResult, SubmitError};

/// Running score of one player for the sub-game session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub name: String,
    pub score: i32,
}

/// Row of a sorted ledger snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub player_id: String,
    pub name: String,
    pub score: i32,
}

/// Pending timer tasks of the active round.
#[derive(Debug, Default)]
pub struct SequenceTimers {
    animation: Option<AbortHandle>,
    deadline: Option<AbortHandle>,
}

impl SequenceTimers {
    pub fn arm_animation(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.animation.replace(handle) {
            previous.abort();
        }
    }

    pub fn arm_deadline(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.deadline.replace(handle) {
            previous.abort();
        }
    }

    /// Forget the animation handle without aborting it. Used by the task itself once it fires.
    pub fn disarm_animation(&mut self) {
        self.animation = None;
    }

    /// Forget the deadline handle without aborting it.
    pub fn disarm_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.animation.is_some() || self.deadline.is_some()
    }

    pub fn cancel_all(&mut self) {
        if let Some(handle) = self.animation.take() {
            handle.abort();
        }
        if let Some(handle) = self.deadline.take() {
            handle.abort();
        }
    }
}

impl Drop for SequenceTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Per-room state of the ranked-submission sub-game.
#[derive(Debug, Default)]
pub struct SequenceGame {
    machine: SequenceMachine,
    round: Option<RankedRound>,
    ledger: IndexMap<String, LedgerEntry>,
    timers: SequenceTimers,
}

impl SequenceGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SequencePhase {
        self.machine.phase()
    }

    pub fn round(&self) -> Option<&RankedRound> {
        self.round.as_ref()
    }

    pub fn timers_mut(&mut self) -> &mut SequenceTimers {
        &mut self.timers
    }

    /// Track every player not yet in the ledger, starting from their current score.
    pub fn seed_ledger<'a, I>(&mut self, players: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str, i32)>,
    {
        for (player_id, name, score) in players {
            self.ledger
                .entry(player_id.to_string())
                .or_insert_with(|| LedgerEntry {
                    name: name.to_string(),
                    score,
                });
        }
    }

    /// Make sure `player_id` has a ledger entry and carries its latest name.
    pub fn ensure_tracked(&mut self, player_id: &str, name: &str) {
        self.ledger
            .entry(player_id.to_string())
            .and_modify(|entry| entry.name = name.to_string())
            .or_insert_with(|| LedgerEntry {
                name: name.to_string(),
                score: 0,
            });
    }

    pub fn ledger_score(&self, player_id: &str) -> Option<i32> {
        self.ledger.get(player_id).map(|entry| entry.score)
    }

    /// Replace the active round with a fresh one and enter the animation phase.
    ///
    /// When no display order is supplied the expected order is shuffled.
    pub fn start_question(&mut self, mut question: Question) -> Result<Uuid, InvalidTransition> {
        self.machine.apply(SequenceEvent::StartQuestion)?;
        self.timers.cancel_all();

        if question.items.is_empty() {
            let mut items = question.correct_order.clone();
            items.shuffle(&mut rand::rng());
            question.items = items;
        }

        let round = RankedRound::new(question);
        let id = round.id;
        self.round = Some(round);
        Ok(id)
    }

    /// Open answering for `round_id` once its animation elapsed.
    ///
    /// Returns `None` when the round was superseded or the phase moved on.
    pub fn begin_answering(
        &mut self,
        round_id: Uuid,
        now: Instant,
        duration: Duration,
    ) -> Option<Instant> {
        let round = self.round.as_mut().filter(|round| round.id == round_id)?;
        if !self.machine.accepts(SequenceEvent::AnimationFinished) {
            return None;
        }
        self.machine.apply(SequenceEvent::AnimationFinished).ok()?;
        Some(round.open(now, duration))
    }

    pub fn submit(
        &mut self,
        player_id: &str,
        sequence: Vec<String>,
        now: Instant,
    ) -> Result<Duration, SubmitError> {
        if self.machine.phase() != SequencePhase::Answering {
            return Err(SubmitError::NotAnswering);
        }
        let round = self.round.as_mut().ok_or(SubmitError::NotAnswering)?;
        round.submit(player_id, sequence, now)
    }

    /// Close answering and score the round, crediting the ledger.
    ///
    /// `expected_round` lets a timer bail out when its round was replaced. A second call
    /// for the same round yields `None`.
    pub fn reveal(
        &mut self,
        expected_round: Option<Uuid>,
        scoring: &SequenceConfig,
    ) -> Option<RoundOutcome> {
        let round = self.round.as_mut()?;
        if expected_round.is_some_and(|id| id != round.id) {
            return None;
        }
        if !self.machine.accepts(SequenceEvent::Reveal) {
            return None;
        }

        self.timers.cancel_all();
        let outcome = round.reveal(scoring.correct_points, scoring.winner_bonus)?;
        self.machine.apply(SequenceEvent::Reveal).ok()?;

        for result in outcome.results.iter().filter(|result| result.points != 0) {
            if let Some(entry) = self.ledger.get_mut(&result.player_id) {
                entry.score = entry.score.saturating_add(result.points);
            } else {
                self.ledger.insert(
                    result.player_id.clone(),
                    LedgerEntry {
                        name: String::new(),
                        score: result.points,
                    },
                );
            }
        }
        Some(outcome)
    }

    pub fn show_leaderboard(&mut self) -> Result<Vec<Standing>, InvalidTransition> {
        self.machine.apply(SequenceEvent::ShowLeaderboard)?;
        Ok(self.leaderboard())
    }

    /// Terminal broadcast of the ledger. Only `reset` leaves the resulting phase.
    pub fn end_game(&mut self) -> Vec<Standing> {
        self.timers.cancel_all();
        // EndGame is accepted from every phase.
        let _ = self.machine.apply(SequenceEvent::EndGame);
        self.leaderboard()
    }

    /// Back to the lobby, keeping the ledger.
    pub fn reset(&mut self) {
        self.timers.cancel_all();
        self.round = None;
        let _ = self.machine.apply(SequenceEvent::Reset);
    }

    pub fn reset_scores(&mut self) {
        self.ledger.clear();
    }

    /// Ledger sorted by descending score; equal scores keep tracking order.
    pub fn leaderboard(&self) -> Vec<Standing> {
        let mut standings: Vec<Standing> = self
            .ledger
            .iter()
            .map(|(player_id, entry)| Standing {
                player_id: player_id.clone(),
                name: entry.name.clone(),
                score: entry.score,
            })
            .collect();
        standings.sort_by(|a, b| b.score.cmp(&a.score));
        standings
    }
}
