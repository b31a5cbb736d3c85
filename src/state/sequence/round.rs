use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Question parameters supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub prompt: String,
    /// Items as displayed to players.
    pub items: Vec<String>,
    /// Expected ordering of `items`.
    pub correct_order: Vec<String>,
    pub index: usize,
    pub total: usize,
}

/// A single accepted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub sequence: Vec<String>,
    /// Time since the answering phase opened.
    pub elapsed: Duration,
}

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("answers are not being accepted right now")]
    NotAnswering,
    #[error("the answering deadline has passed")]
    DeadlinePassed,
    #[error("a submission was already recorded for this round")]
    AlreadySubmitted,
}

impl SubmitError {
    /// Short machine-readable reason sent to the player.
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::NotAnswering => "notAnswering",
            SubmitError::DeadlinePassed => "deadlinePassed",
            SubmitError::AlreadySubmitted => "alreadySubmitted",
        }
    }
}

/// Scored outcome of one player's submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub player_id: String,
    pub correct: bool,
    /// 1-based rank among correct submissions.
    pub rank: Option<usize>,
    pub points: i32,
    pub is_winner: bool,
    pub elapsed: Duration,
    pub sequence: Vec<String>,
}

/// Results of a revealed round, correct submissions first in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoundOutcome {
    pub results: Vec<SubmissionResult>,
    pub winner: Option<String>,
}

impl RoundOutcome {
    pub fn result_for(&self, player_id: &str) -> Option<&SubmissionResult> {
        self.results.iter().find(|result| result.player_id == player_id)
    }
}

/// State of the active question.
#[derive(Debug, Clone)]
pub struct RankedRound {
    pub id: Uuid,
    pub question: Question,
    answering_started: Option<Instant>,
    deadline: Option<Instant>,
    submissions: IndexMap<String, Submission>,
    revealed: bool,
}

impl RankedRound {
    pub fn new(question: Question) -> Self {
        Self {
            id: Uuid::new_v4(),
            question,
            answering_started: None,
            deadline: None,
            submissions: IndexMap::new(),
            revealed: false,
        }
    }

    /// Open the answering window at `now` for `duration`, returning the deadline.
    pub fn open(&mut self, now: Instant, duration: Duration) -> Instant {
        let deadline = now + duration;
        self.answering_started = Some(now);
        self.deadline = Some(deadline);
        deadline
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn submissions(&self) -> &IndexMap<String, Submission> {
        &self.submissions
    }

    /// Record the first submission of `player_id`; later ones are refused.
    pub fn submit(
        &mut self,
        player_id: &str,
        sequence: Vec<String>,
        now: Instant,
    ) -> Result<Duration, SubmitError> {
        let (Some(started), Some(deadline)) = (self.answering_started, self.deadline) else {
            return Err(SubmitError::NotAnswering);
        };
        if self.revealed {
            return Err(SubmitError::NotAnswering);
        }
        if now > deadline {
            return Err(SubmitError::DeadlinePassed);
        }
        if self.submissions.contains_key(player_id) {
            return Err(SubmitError::AlreadySubmitted);
        }

        let elapsed = now.saturating_duration_since(started);
        self.submissions
            .insert(player_id.to_string(), Submission { sequence, elapsed });
        Ok(elapsed)
    }

    /// Flip the round to revealed and score it. `None` when already revealed.
    pub fn reveal(&mut self, correct_points: i32, winner_bonus: i32) -> Option<RoundOutcome> {
        if self.revealed {
            return None;
        }
        self.revealed = true;
        Some(self.score(correct_points, winner_bonus))
    }

    fn score(&self, correct_points: i32, winner_bonus: i32) -> RoundOutcome {
        let (mut correct, incorrect): (Vec<_>, Vec<_>) = self
            .submissions
            .iter()
            .partition(|(_, submission)| submission.sequence == self.question.correct_order);

        // Stable sort keeps acceptance order for equal elapsed times.
        correct.sort_by_key(|(_, submission)| submission.elapsed);

        let winner = correct.first().map(|(player_id, _)| (*player_id).clone());
        let mut results = Vec::with_capacity(self.submissions.len());

        for (index, (player_id, submission)) in correct.into_iter().enumerate() {
            let is_winner = index == 0;
            let bonus = if is_winner { winner_bonus } else { 0 };
            results.push(SubmissionResult {
                player_id: player_id.clone(),
                correct: true,
                rank: Some(index + 1),
                points: correct_points + bonus,
                is_winner,
                elapsed: submission.elapsed,
                sequence: submission.sequence.clone(),
            });
        }

        for (player_id, submission) in incorrect {
            results.push(SubmissionResult {
                player_id: player_id.clone(),
                correct: false,
                rank: None,
                points: 0,
                is_winner: false,
                elapsed: submission.elapsed,
                sequence: submission.sequence.clone(),
            });
        }

        RoundOutcome { results, winner }
    }
}
