use serde::Serialize;
use thiserror::Error;

/// Phases of the ranked-submission sub-game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SequencePhase {
    /// Waiting for the host to start a question.
    Lobby,
    /// Prompt is being animated on screens; answers are not accepted yet.
    AnimatedReveal,
    /// Players may submit their ordering until the deadline.
    Answering,
    /// The correct order and the round results are shown.
    Result,
    /// Session ledger is displayed between questions.
    Leaderboard,
    /// Final standings; only a reset leaves this phase.
    GameComplete,
}

/// Events that can be applied to the sub-game machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    /// Host starts (or restarts) a question.
    StartQuestion,
    /// Reveal animation elapsed.
    AnimationFinished,
    /// Answers are closed and scored.
    Reveal,
    /// Host shows the session ledger.
    ShowLeaderboard,
    /// Host ends the sub-game.
    EndGame,
    /// Back to the lobby, keeping the ledger.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the invalid event was received.
    pub from: SequencePhase,
    /// The event that cannot be applied from this phase.
    pub event: SequenceEvent,
}

/// Phase tracker with a version bumped on each applied transition.
#[derive(Debug, Clone)]
pub struct SequenceMachine {
    phase: SequencePhase,
    version: usize,
}

impl Default for SequenceMachine {
    fn default() -> Self {
        Self {
            phase: SequencePhase::Lobby,
            version: 0,
        }
    }
}

impl SequenceMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SequencePhase {
        self.phase
    }

    pub fn version(&self) -> usize {
        self.version
    }

    /// Validate and apply `event`, returning the new phase.
    pub fn apply(&mut self, event: SequenceEvent) -> Result<SequencePhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    /// Whether `event` would be accepted from the current phase.
    pub fn accepts(&self, event: SequenceEvent) -> bool {
        self.compute_transition(event).is_ok()
    }

    fn compute_transition(&self, event: SequenceEvent) -> Result<SequencePhase, InvalidTransition> {
        use SequenceEvent as E;
        use SequencePhase as P;

        let next = match (self.phase, event) {
            (P::GameComplete, E::StartQuestion) => {
                return Err(InvalidTransition {
                    from: self.phase,
                    event,
                });
            }
            (_, E::StartQuestion) => P::AnimatedReveal,
            (P::AnimatedReveal, E::AnimationFinished) => P::Answering,
            (P::Answering, E::Reveal) => P::Result,
            (P::Lobby | P::Result | P::Leaderboard, E::ShowLeaderboard) => P::Leaderboard,
            (_, E::EndGame) => P::GameComplete,
            (_, E::Reset) => P::Lobby,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
