use std::error::Error;
use thiserror::Error;

/// Result alias for session store calls.
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend-agnostic failure of a session store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The store was switched off on purpose (tests and drills).
    #[error("session store offline")]
    Offline,
    /// A player row referenced a session that was never written.
    #[error("session `{0}` does not exist")]
    UnknownSession(String),
}

impl StorageError {
    /// Wrap a driver error together with what the store was doing.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
