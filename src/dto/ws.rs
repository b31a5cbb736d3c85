//! JSON envelopes exchanged over the room WebSocket. Every frame carries a `type`
//! discriminator and camelCase fields.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dto::{
        room::{LeaderboardEntry, PlayerSummary, RoomSnapshot, SubmissionBreakdown},
        validation::validate_display_name,
    },
    state::{room::GameMode, sequence::SequencePhase},
};

/// `player:join` payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinRequest {
    pub code: String,
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub reconnect_token: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// `sequence:startQuestion` payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartQuestionRequest {
    pub prompt: String,
    #[validate(custom(function = "validate_ordering"))]
    pub correct_order: Vec<String>,
    /// Display order; shuffled from `correct_order` when omitted.
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub total: usize,
}

fn validate_ordering(order: &[String]) -> Result<(), ValidationError> {
    if order.is_empty() {
        let mut err = ValidationError::new("ordering_empty");
        err.message = Some("Expected ordering must contain at least one item".into());
        return Err(err);
    }
    Ok(())
}

/// Messages accepted from host and player clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "host:create")]
    HostCreate {
        #[serde(default)]
        host_id: Option<String>,
    },
    #[serde(rename = "host:join")]
    HostJoin {
        code: String,
        #[serde(default)]
        host_id: Option<String>,
    },
    #[serde(rename = "host:unlock")]
    Unlock {
        #[serde(default)]
        new_question: bool,
        #[serde(default)]
        question_id: Option<String>,
    },
    #[serde(rename = "host:lock")]
    Lock {
        #[serde(default)]
        reset: bool,
    },
    #[serde(rename = "host:resetBuzzer")]
    ResetBuzzer,
    #[serde(rename = "host:passPlayer")]
    PassPlayer { player_id: String },
    #[serde(rename = "host:feedback")]
    Feedback {
        player_id: String,
        correct: bool,
        #[serde(default)]
        points: Option<i32>,
    },
    #[serde(rename = "host:updateScore")]
    UpdateScore { player_id: String, points: i32 },
    #[serde(rename = "host:kickPlayer")]
    KickPlayer { player_id: String },
    #[serde(rename = "host:kick")]
    Kick { player_id: String },
    #[serde(rename = "host:setBoard")]
    SetBoard {
        #[serde(default)]
        board_id: Option<String>,
    },
    #[serde(rename = "host:setMode")]
    SetMode { mode: GameMode },
    #[serde(rename = "host:completeQuestion")]
    CompleteQuestion { question_id: String },
    #[serde(rename = "host:resetBoard")]
    ResetBoard,
    #[serde(rename = "host:getScores")]
    GetScores,
    #[serde(rename = "host:sync")]
    Sync,
    #[serde(rename = "host:closeRoom")]
    CloseRoom {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "host:endGame")]
    EndGame,
    #[serde(rename = "host:startNextGrid")]
    StartNextGrid,
    #[serde(rename = "player:join")]
    PlayerJoin(PlayerJoinRequest),
    #[serde(rename = "player:buzz")]
    Buzz,
    #[serde(rename = "player:leave")]
    Leave,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "sequence:switchMode")]
    SequenceSwitchMode,
    #[serde(rename = "sequence:startQuestion")]
    SequenceStartQuestion(StartQuestionRequest),
    #[serde(rename = "sequence:reveal")]
    SequenceReveal,
    #[serde(rename = "sequence:showLeaderboard")]
    SequenceShowLeaderboard,
    #[serde(rename = "sequence:endGame")]
    SequenceEndGame,
    #[serde(rename = "sequence:reset")]
    SequenceReset,
    #[serde(rename = "sequence:resetScores")]
    SequenceResetScores,
    #[serde(rename = "sequence:submit")]
    SequenceSubmit { sequence: Vec<String> },
    #[serde(other)]
    Unknown,
}

/// Which side of a room an inbound message is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Accepted before the connection identified itself.
    Handshake,
    Host,
    Player,
    Any,
}

impl ClientMessage {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Role a connection must hold for this message to be handled.
    pub fn audience(&self) -> Audience {
        match self {
            Self::HostCreate { .. } | Self::HostJoin { .. } | Self::PlayerJoin(_) => {
                Audience::Handshake
            }
            Self::Buzz | Self::Leave | Self::SequenceSubmit { .. } => Audience::Player,
            Self::Ping | Self::Unknown => Audience::Any,
            _ => Audience::Host,
        }
    }
}

/// Messages pushed to host and player clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "room:created")]
    RoomCreated {
        code: String,
        session_id: Uuid,
        host_id: String,
    },
    #[serde(rename = "room:joined")]
    RoomJoined(RoomSnapshot),
    #[serde(rename = "joined")]
    Joined {
        player_id: String,
        reconnect_token: String,
        name: String,
        avatar: String,
        score: i32,
        locked: bool,
        mode: GameMode,
    },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "player:joined")]
    PlayerJoined {
        player_id: String,
        name: String,
        avatar: String,
        score: i32,
        reconnected: bool,
    },
    #[serde(rename = "players:updated")]
    PlayersUpdated { players: Vec<PlayerSummary> },
    #[serde(rename = "buzzer:unlocked")]
    BuzzerUnlocked { new_question: bool, can_buzz: bool },
    #[serde(rename = "buzzer:locked")]
    BuzzerLocked { reset: bool },
    #[serde(rename = "buzzer:reset")]
    BuzzerReset,
    #[serde(rename = "buzz:confirmed")]
    BuzzConfirmed { position: usize },
    #[serde(rename = "player:buzzed")]
    PlayerBuzzed {
        player_id: String,
        name: String,
        avatar: String,
        position: usize,
        timestamp: i64,
    },
    #[serde(rename = "score:updated")]
    ScoreUpdated {
        player_id: String,
        score: i32,
        delta: i32,
    },
    #[serde(rename = "scores:sync")]
    ScoresSync { scores: Vec<PlayerSummary> },
    #[serde(rename = "feedback")]
    Feedback {
        correct: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        points: Option<i32>,
    },
    #[serde(rename = "game:ended")]
    GameEnded {
        leaderboard: Vec<LeaderboardEntry>,
        already_ended: bool,
    },
    #[serde(rename = "grid:started")]
    GridStarted,
    #[serde(rename = "board:selected")]
    BoardSelected { board_id: Option<String> },
    #[serde(rename = "board:reset")]
    BoardReset,
    #[serde(rename = "mode:changed")]
    ModeChanged { mode: GameMode },
    #[serde(rename = "question:completed")]
    QuestionCompleted { question_id: String },
    #[serde(rename = "host:synced")]
    HostSynced { player_count: usize, locked: bool },
    #[serde(rename = "player:disconnected")]
    PlayerDisconnected { player_id: String },
    #[serde(rename = "player:left")]
    PlayerLeft { player_id: String, reason: String },
    #[serde(rename = "kicked")]
    Kicked,
    #[serde(rename = "room:closed")]
    RoomClosed { reason: String },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "sequence:modeActivated")]
    SequenceModeActivated {
        phase: SequencePhase,
        leaderboard: Vec<LeaderboardEntry>,
    },
    /// Animation notice. Players only get the counters; the host also gets the content.
    #[serde(rename = "sequence:animating")]
    SequenceAnimating {
        index: usize,
        total: usize,
        item_count: usize,
        animation_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        items: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        correct_order: Option<Vec<String>>,
    },
    #[serde(rename = "sequence:answering")]
    SequenceAnswering {
        prompt: String,
        items: Vec<String>,
        deadline: i64,
        duration_ms: u64,
    },
    #[serde(rename = "sequence:submitted")]
    SequenceSubmitted { elapsed_ms: u64 },
    #[serde(rename = "sequence:submissionRejected")]
    SequenceSubmissionRejected { reason: String },
    #[serde(rename = "sequence:playerSubmitted")]
    SequencePlayerSubmitted {
        player_id: String,
        name: String,
        elapsed_ms: u64,
        submitted_count: usize,
    },
    /// Personalised outcome for one player.
    #[serde(rename = "sequence:result")]
    SequenceResult {
        correct: bool,
        rank: Option<usize>,
        is_winner: bool,
        points: i32,
        score: i32,
        correct_order: Vec<String>,
        top: Vec<LeaderboardEntry>,
    },
    /// Full breakdown for the host.
    #[serde(rename = "sequence:results")]
    SequenceResults {
        correct_order: Vec<String>,
        results: Vec<SubmissionBreakdown>,
        winner: Option<String>,
        leaderboard: Vec<LeaderboardEntry>,
    },
    #[serde(rename = "sequence:leaderboard")]
    SequenceLeaderboard { leaderboard: Vec<LeaderboardEntry> },
    #[serde(rename = "sequence:gameComplete")]
    SequenceGameComplete { leaderboard: Vec<LeaderboardEntry> },
    #[serde(rename = "sequence:reset")]
    SequenceReset,
    #[serde(rename = "sequence:scoresReset")]
    SequenceScoresReset,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn player_join_fields_are_camel_case() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"player:join","code":"AB2C","name":"Alice","playerId":"p1","reconnectToken":"t"}"#,
        )
        .unwrap();
        let ClientMessage::PlayerJoin(request) = message else {
            panic!("unexpected variant");
        };
        assert_eq!(request.player_id.as_deref(), Some("p1"));
        assert_eq!(request.reconnect_token.as_deref(), Some("t"));
        assert!(request.avatar.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn blank_name_fails_validation() {
        let message =
            ClientMessage::from_json_str(r#"{"type":"player:join","code":"AB2C","name":"  "}"#)
                .unwrap();
        let ClientMessage::PlayerJoin(request) = message else {
            panic!("unexpected variant");
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let message = ClientMessage::from_json_str(r#"{"type":"host:dance","style":"tango"}"#)
            .unwrap();
        assert!(matches!(message, ClientMessage::Unknown));
        assert_eq!(message.audience(), Audience::Any);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(ClientMessage::from_json_str("not json").is_err());
        assert!(ClientMessage::from_json_str(r#"{"type":"host:updateScore"}"#).is_err());
    }

    #[test]
    fn kick_aliases_decode_separately() {
        let long = ClientMessage::from_json_str(r#"{"type":"host:kickPlayer","playerId":"a"}"#)
            .unwrap();
        let short =
            ClientMessage::from_json_str(r#"{"type":"host:kick","playerId":"a"}"#).unwrap();
        assert!(matches!(long, ClientMessage::KickPlayer { .. }));
        assert!(matches!(short, ClientMessage::Kick { .. }));
        assert_eq!(short.audience(), Audience::Host);
    }

    #[test]
    fn outbound_envelopes_carry_type_and_camel_case_fields() {
        let value = serde_json::to_value(ServerMessage::PlayerBuzzed {
            player_id: "p1".into(),
            name: "Alice".into(),
            avatar: "cat".into(),
            position: 1,
            timestamp: 42,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "player:buzzed",
                "playerId": "p1",
                "name": "Alice",
                "avatar": "cat",
                "position": 1,
                "timestamp": 42
            })
        );

        let value = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(value, json!({ "type": "pong" }));
    }

    #[test]
    fn player_animation_notice_omits_content() {
        let value = serde_json::to_value(ServerMessage::SequenceAnimating {
            index: 0,
            total: 3,
            item_count: 4,
            animation_ms: 3000,
            prompt: None,
            items: None,
            correct_order: None,
        })
        .unwrap();
        assert!(value.get("correctOrder").is_none());
        assert!(value.get("prompt").is_none());
        assert_eq!(value["itemCount"], 4);
    }
}
