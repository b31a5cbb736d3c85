use serde::Serialize;
use uuid::Uuid;

use crate::state::{
    room::{GameMode, Player},
    sequence::{SequencePhase, Standing, SubmissionResult},
};

/// Public view of a player carried in roster and score payloads.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub player_id: String,
    pub name: String,
    pub avatar: String,
    pub score: i32,
    pub connected: bool,
}

impl From<&Player> for PlayerSummary {
    fn from(player: &Player) -> Self {
        Self {
            player_id: player.id.clone(),
            name: player.name.clone(),
            avatar: player.avatar.clone(),
            score: player.score,
            connected: player.is_connected(),
        }
    }
}

/// Row of a sorted score table.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub player_id: String,
    pub name: String,
    pub score: i32,
}

impl From<Standing> for LeaderboardEntry {
    fn from(standing: Standing) -> Self {
        Self {
            player_id: standing.player_id,
            name: standing.name,
            score: standing.score,
        }
    }
}

/// Full room state sent to a host on join.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    pub session_id: Uuid,
    pub host_id: String,
    pub players: Vec<PlayerSummary>,
    pub locked: bool,
    pub board_id: Option<String>,
    pub mode: GameMode,
    pub completed_questions: Vec<String>,
    pub buzz_queue: Vec<String>,
    pub game_ended: bool,
    pub sequence_phase: SequencePhase,
}

/// Per-submission line of the host breakdown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionBreakdown {
    pub player_id: String,
    pub name: String,
    pub sequence: Vec<String>,
    pub correct: bool,
    pub rank: Option<usize>,
    pub points: i32,
    pub is_winner: bool,
    pub elapsed_ms: u64,
}

impl SubmissionBreakdown {
    pub fn new(result: &SubmissionResult, name: String) -> Self {
        Self {
            player_id: result.player_id.clone(),
            name,
            sequence: result.sequence.clone(),
            correct: result.correct,
            rank: result.rank,
            points: result.points,
            is_winner: result.is_winner,
            elapsed_ms: duration_millis(result.elapsed),
        }
    }
}

/// Whole milliseconds of `duration`, saturating on overflow.
pub fn duration_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
