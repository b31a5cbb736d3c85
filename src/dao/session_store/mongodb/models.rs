use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{
    SessionEntity, SessionModeEntity, SessionPlayerEntity, SessionStatus, SessionUpdate,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    code: String,
    host_id: String,
    status: SessionStatus,
    board_id: Option<String>,
    mode: SessionModeEntity,
    #[serde(default)]
    completed_questions: Vec<String>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            code: value.code,
            host_id: value.host_id,
            status: value.status,
            board_id: value.board_id,
            mode: value.mode,
            completed_questions: value.completed_questions,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|_| MongoDaoError::MalformedDocument {
            id: value.id.clone(),
            reason: "session id is not a UUID",
        })?;
        Ok(Self {
            id,
            code: value.code,
            host_id: value.host_id,
            status: value.status,
            board_id: value.board_id,
            mode: value.mode,
            completed_questions: value.completed_questions,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    session_id: String,
    player_id: String,
    name: String,
    avatar: String,
    score: i32,
    reconnect_token: String,
    is_connected: bool,
    updated_at: DateTime,
}

impl From<SessionPlayerEntity> for MongoPlayerDocument {
    fn from(value: SessionPlayerEntity) -> Self {
        Self {
            session_id: value.session_id.to_string(),
            player_id: value.player_id,
            name: value.name,
            avatar: value.avatar,
            score: value.score,
            reconnect_token: value.reconnect_token,
            is_connected: value.is_connected,
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoPlayerDocument> for SessionPlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> Result<Self, Self::Error> {
        let session_id =
            Uuid::parse_str(&value.session_id).map_err(|_| MongoDaoError::MalformedDocument {
                id: value.player_id.clone(),
                reason: "player session id is not a UUID",
            })?;
        Ok(Self {
            session_id,
            player_id: value.player_id,
            name: value.name,
            avatar: value.avatar,
            score: value.score,
            reconnect_token: value.reconnect_token,
            is_connected: value.is_connected,
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

pub fn session_filter(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

pub fn player_filter(session_id: Uuid, player_id: &str) -> Document {
    doc! { "session_id": session_id.to_string(), "player_id": player_id }
}

fn status_value(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Ended => "ended",
    }
}

fn mode_value(mode: SessionModeEntity) -> &'static str {
    match mode {
        SessionModeEntity::Lobby => "lobby",
        SessionModeEntity::Buzzer => "buzzer",
        SessionModeEntity::Sequence => "sequence",
    }
}

/// Translate a partial update into a `$set` document.
pub fn session_update_document(update: SessionUpdate) -> Document {
    let mut set = doc! { "updated_at": DateTime::now() };
    if let Some(status) = update.status {
        set.insert("status", status_value(status));
    }
    if let Some(board_id) = update.board_id {
        set.insert("board_id", board_id);
    }
    if let Some(mode) = update.mode {
        set.insert("mode", mode_value(mode));
    }
    if let Some(host_id) = update.host_id {
        set.insert("host_id", host_id);
    }
    doc! { "$set": set }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_only_sets_provided_fields() {
        let update = SessionUpdate {
            status: Some(SessionStatus::Ended),
            board_id: Some(None),
            ..SessionUpdate::default()
        };
        let document = session_update_document(update);
        let set = document.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "ended");
        assert!(set.contains_key("board_id"));
        assert!(!set.contains_key("mode"));
        assert!(!set.contains_key("host_id"));
    }

    #[test]
    fn malformed_session_id_is_rejected() {
        let mut document = MongoSessionDocument::from(SessionEntity::new(
            "ABCD".into(),
            "host".into(),
        ));
        document.id = "not-a-uuid".into();
        assert!(SessionEntity::try_from(document).is_err());
    }
}
