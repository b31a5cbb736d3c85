//! Process-local [`SessionStore`] used when no database is configured.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::SessionStore;
use crate::dao::{
    models::{SessionEntity, SessionPlayerEntity, SessionUpdate},
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
struct Inner {
    sessions: IndexMap<Uuid, SessionEntity>,
    players: IndexMap<(Uuid, String), SessionPlayerEntity>,
}

/// Session store keeping every row in memory. Data does not survive a restart.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<RwLock<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, simulating a lost backend.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Offline);
        }
        Ok(())
    }

    fn run<T, F>(&self, work: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> StorageResult<T> + Send + 'static,
    {
        let store = self.clone();
        Box::pin(async move {
            store.check_online()?;
            let mut guard = store.inner.write().await;
            work(&mut guard)
        })
    }
}

impl SessionStore for InMemorySessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |inner| {
            inner.sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn get_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.run(move |inner| {
            Ok(inner
                .sessions
                .values()
                .filter(|session| session.code == code)
                .max_by_key(|session| session.created_at)
                .cloned())
        })
    }

    fn get_session_with_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<(SessionEntity, Vec<SessionPlayerEntity>)>>> {
        self.run(move |inner| {
            let Some(session) = inner.sessions.get(&session_id).cloned() else {
                return Ok(None);
            };
            let players = inner
                .players
                .values()
                .filter(|player| player.session_id == session_id)
                .cloned()
                .collect();
            Ok(Some((session, players)))
        })
    }

    fn update_session(
        &self,
        session_id: Uuid,
        update: SessionUpdate,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |inner| {
            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| StorageError::UnknownSession(session_id.to_string()))?;
            session.apply(update);
            Ok(())
        })
    }

    fn add_player_to_session(
        &self,
        player: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |inner| {
            if !inner.sessions.contains_key(&player.session_id) {
                return Err(StorageError::UnknownSession(player.session_id.to_string()));
            }
            inner
                .players
                .insert((player.session_id, player.player_id.clone()), player);
            Ok(())
        })
    }

    fn update_player_score(
        &self,
        session_id: Uuid,
        player_id: String,
        delta: i32,
    ) -> BoxFuture<'static, StorageResult<Option<SessionPlayerEntity>>> {
        self.run(move |inner| {
            let Some(player) = inner.players.get_mut(&(session_id, player_id)) else {
                return Ok(None);
            };
            player.score = player.score.saturating_add(delta);
            player.updated_at = SystemTime::now();
            Ok(Some(player.clone()))
        })
    }

    fn update_player_connection(
        &self,
        session_id: Uuid,
        player_id: String,
        is_connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |inner| {
            if let Some(player) = inner.players.get_mut(&(session_id, player_id)) {
                player.is_connected = is_connected;
                player.updated_at = SystemTime::now();
            }
            Ok(())
        })
    }

    fn remove_player_from_session(
        &self,
        session_id: Uuid,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |inner| {
            inner.players.shift_remove(&(session_id, player_id));
            Ok(())
        })
    }

    fn mark_question_completed(
        &self,
        session_id: Uuid,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |inner| {
            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| StorageError::UnknownSession(session_id.to_string()))?;
            if !session.completed_questions.contains(&question_id) {
                session.completed_questions.push(question_id);
                session.updated_at = SystemTime::now();
            }
            Ok(())
        })
    }

    fn get_completed_questions(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        self.run(move |inner| {
            Ok(inner
                .sessions
                .get(&session_id)
                .map(|session| session.completed_questions.clone())
                .unwrap_or_default())
        })
    }

    fn reset_completed_questions(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |inner| {
            if let Some(session) = inner.sessions.get_mut(&session_id) {
                session.completed_questions.clear();
                session.updated_at = SystemTime::now();
            }
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_online() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::SessionStatus;

    fn player(session_id: Uuid, id: &str, score: i32) -> SessionPlayerEntity {
        SessionPlayerEntity {
            session_id,
            player_id: id.into(),
            name: id.to_uppercase(),
            avatar: "cat".into(),
            score,
            reconnect_token: format!("token-{id}"),
            is_connected: true,
            updated_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn score_updates_accumulate_deltas() {
        let store = InMemorySessionStore::new();
        let session = SessionEntity::new("ABCD".into(), "host".into());
        let id = session.id;
        store.create_session(session).await.unwrap();
        store.add_player_to_session(player(id, "p1", 5)).await.unwrap();

        let row = store
            .update_player_score(id, "p1".into(), 7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.score, 12);

        let row = store
            .update_player_score(id, "p1".into(), -20)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.score, -8);
    }

    #[tokio::test]
    async fn lookup_by_code_prefers_latest_session() {
        let store = InMemorySessionStore::new();
        let mut old = SessionEntity::new("WXYZ".into(), "host".into());
        old.status = SessionStatus::Ended;
        old.created_at = SystemTime::UNIX_EPOCH;
        let fresh = SessionEntity::new("WXYZ".into(), "host".into());
        let fresh_id = fresh.id;
        store.create_session(old).await.unwrap();
        store.create_session(fresh).await.unwrap();

        let found = store.get_session_by_code("WXYZ".into()).await.unwrap().unwrap();
        assert_eq!(found.id, fresh_id);
        assert_eq!(found.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn completed_questions_are_deduplicated_and_resettable() {
        let store = InMemorySessionStore::new();
        let session = SessionEntity::new("QQQQ".into(), "host".into());
        let id = session.id;
        store.create_session(session).await.unwrap();

        store.mark_question_completed(id, "q1".into()).await.unwrap();
        store.mark_question_completed(id, "q1".into()).await.unwrap();
        store.mark_question_completed(id, "q2".into()).await.unwrap();
        assert_eq!(
            store.get_completed_questions(id).await.unwrap(),
            vec!["q1".to_string(), "q2".to_string()]
        );

        store.reset_completed_questions(id).await.unwrap();
        assert!(store.get_completed_questions(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = InMemorySessionStore::new();
        store.set_unavailable(true);
        let session = SessionEntity::new("ABCD".into(), "host".into());
        assert!(store.create_session(session).await.is_err());
        assert!(store.health_check().await.is_err());

        store.set_unavailable(false);
        assert!(store.health_check().await.is_ok());
    }
}
