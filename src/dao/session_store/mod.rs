pub mod in_memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{SessionEntity, SessionPlayerEntity, SessionUpdate},
    storage::StorageResult,
};

pub use self::in_memory::InMemorySessionStore;

/// Abstraction over the persistence layer for sessions and their players.
///
/// Every call is independently failable; the live rooms stay the source of
/// truth while a session is running.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Most recent session registered under `code`, whatever its status.
    fn get_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn get_session_with_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<(SessionEntity, Vec<SessionPlayerEntity>)>>>;
    fn update_session(
        &self,
        session_id: Uuid,
        update: SessionUpdate,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Insert or replace the player row keyed by `(session_id, player_id)`.
    fn add_player_to_session(
        &self,
        player: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Add `delta` to the durable score and return the updated row.
    fn update_player_score(
        &self,
        session_id: Uuid,
        player_id: String,
        delta: i32,
    ) -> BoxFuture<'static, StorageResult<Option<SessionPlayerEntity>>>;
    fn update_player_connection(
        &self,
        session_id: Uuid,
        player_id: String,
        is_connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn remove_player_from_session(
        &self,
        session_id: Uuid,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn mark_question_completed(
        &self,
        session_id: Uuid,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn get_completed_questions(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    fn reset_completed_questions(&self, session_id: Uuid)
    -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
