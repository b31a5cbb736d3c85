use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Lifecycle status of a persisted session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session can be joined or restored.
    Active,
    /// Terminal state; the code no longer resolves to a room.
    Ended,
}

/// Game mode recorded alongside the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionModeEntity {
    /// Waiting room, nothing selected yet.
    Lobby,
    /// Classic board with the buzzer queue.
    Buzzer,
    /// Ranked-submission sub-game.
    Sequence,
}

/// Durable counterpart of a live room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Opaque session identifier shared with the live room.
    pub id: Uuid,
    /// Four character room code.
    pub code: String,
    /// Identity of the host that created the session.
    pub host_id: String,
    /// Whether the session can still be restored.
    pub status: SessionStatus,
    /// Board currently selected by the host.
    pub board_id: Option<String>,
    /// Game mode the room was in at the last update.
    pub mode: SessionModeEntity,
    /// Question identifiers already played on the current board.
    pub completed_questions: Vec<String>,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Last time the session row was updated.
    pub updated_at: SystemTime,
}

impl SessionEntity {
    /// Build a fresh active session row for `code`.
    pub fn new(code: String, host_id: String) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            code,
            host_id,
            status: SessionStatus::Active,
            board_id: None,
            mode: SessionModeEntity::Lobby,
            completed_questions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(board_id) = update.board_id {
            self.board_id = board_id;
        }
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(host_id) = update.host_id {
            self.host_id = host_id;
        }
        self.updated_at = SystemTime::now();
    }
}

/// Partial session update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub board_id: Option<Option<String>>,
    pub mode: Option<SessionModeEntity>,
    pub host_id: Option<String>,
}

/// Player row attached to a persisted session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPlayerEntity {
    /// Session the player belongs to.
    pub session_id: Uuid,
    /// Stable identity token of the player.
    pub player_id: String,
    /// Display name chosen by the player.
    pub name: String,
    /// Avatar selector.
    pub avatar: String,
    /// Durable score.
    pub score: i32,
    /// Secret issued on first join, required to reclaim the identity.
    pub reconnect_token: String,
    /// Whether a socket was attached at the last update.
    pub is_connected: bool,
    /// Last time this row was updated.
    pub updated_at: SystemTime,
}
