//! Buzzer lock and the ordered queue of players who buzzed during the current unlock cycle.

use std::collections::HashSet;

/// Result of a buzz attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzOutcome {
    /// Appended to the queue at this 1-based position.
    Accepted { position: usize },
    /// The buzzer is locked.
    Locked,
    /// The player already holds a position in this cycle.
    AlreadyQueued,
    /// The player was passed on the current question.
    Passed,
}

/// Lock flag, queue and per-question pass list of a room.
#[derive(Debug, Clone)]
pub struct BuzzerState {
    locked: bool,
    queue: Vec<String>,
    passed: HashSet<String>,
    current_question: Option<String>,
}

impl Default for BuzzerState {
    fn default() -> Self {
        Self {
            locked: true,
            queue: Vec::new(),
            passed: HashSet::new(),
            current_question: None,
        }
    }
}

impl BuzzerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Player identities in buzz order.
    pub fn queue(&self) -> &[String] {
        &self.queue
    }

    pub fn current_question(&self) -> Option<&str> {
        self.current_question.as_deref()
    }

    /// Open the buzzer and start a fresh cycle.
    ///
    /// A new question also lifts every pass restriction.
    pub fn unlock(&mut self, new_question: bool, question_id: Option<String>) {
        self.locked = false;
        self.queue.clear();
        if new_question {
            self.passed.clear();
            self.current_question = question_id;
        } else if question_id.is_some() {
            self.current_question = question_id;
        }
    }

    /// Close the buzzer. The queue survives unless `reset` is requested.
    pub fn lock(&mut self, reset: bool) {
        self.locked = true;
        if reset {
            self.queue.clear();
        }
    }

    /// Clear the queue without touching the lock.
    pub fn reset(&mut self) {
        self.queue.clear();
    }

    /// Exclude `player_id` until the next question, then reopen the buzzer for everyone else.
    pub fn pass(&mut self, player_id: &str) {
        self.passed.insert(player_id.to_string());
        self.unlock(false, None);
    }

    pub fn is_passed(&self, player_id: &str) -> bool {
        self.passed.contains(player_id)
    }

    /// Whether a buzz from `player_id` would currently be accepted.
    pub fn can_buzz(&self, player_id: &str) -> bool {
        !self.locked && !self.is_passed(player_id) && !self.queue.iter().any(|id| id == player_id)
    }

    pub fn buzz(&mut self, player_id: &str) -> BuzzOutcome {
        if self.locked {
            return BuzzOutcome::Locked;
        }
        if self.is_passed(player_id) {
            return BuzzOutcome::Passed;
        }
        if self.queue.iter().any(|id| id == player_id) {
            return BuzzOutcome::AlreadyQueued;
        }
        self.queue.push(player_id.to_string());
        BuzzOutcome::Accepted {
            position: self.queue.len(),
        }
    }

    /// Drop a player that left the room from the queue and the pass list.
    pub fn forget(&mut self, player_id: &str) {
        self.queue.retain(|id| id != player_id);
        self.passed.remove(player_id);
    }
}
