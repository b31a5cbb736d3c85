use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures that can occur while interacting with MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save session `{id}`")]
    SaveSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load session `{key}`")]
    LoadSession {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save player `{player_id}` of session `{session_id}`")]
    SavePlayer {
        session_id: Uuid,
        player_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load players of session `{session_id}`")]
    LoadPlayers {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("stored session document `{id}` is malformed: {reason}")]
    MalformedDocument { id: String, reason: &'static str },
}
