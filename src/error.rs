use thiserror::Error;

use crate::{dao::storage::StorageError, state::sequence::InvalidTransition};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Display name rejected by validation.
    #[error("invalid display name: {0}")]
    InvalidName(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested room was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A host action referenced a player that is not in the room.
    #[error("player `{0}` not found")]
    PlayerNotFound(String),
    /// A known identity was claimed without its matching secret.
    #[error("reconnect token mismatch for player `{0}`")]
    InvalidReconnectToken(String),
    /// No free room code could be drawn.
    #[error("room code space exhausted after {0} attempts")]
    CodeSpaceExhausted(usize),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl ServiceError {
    /// Message carried by the `error` envelope sent back to the client.
    pub fn client_message(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::CodeSpaceExhausted(_) => "Failed to create room",
            ServiceError::InvalidName(_) => "Invalid name",
            ServiceError::InvalidInput(_) => "Invalid input",
            ServiceError::InvalidState(_) => "Invalid mode transition",
            ServiceError::NotFound(_) => "Room not found",
            ServiceError::PlayerNotFound(_) => "Player not found",
            ServiceError::InvalidReconnectToken(_) => "Invalid reconnect token",
        }
    }
}
