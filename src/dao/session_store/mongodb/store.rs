use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::{DateTime, doc},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoPlayerDocument, MongoSessionDocument, player_filter, session_filter,
        session_update_document,
    },
};
use crate::dao::{
    models::{SessionEntity, SessionPlayerEntity, SessionUpdate},
    session_store::SessionStore,
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const PLAYER_COLLECTION_NAME: &str = "session_players";

/// [`SessionStore`] backed by two MongoDB collections (sessions and their players).
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        self.state.write().await.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_, database) = establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { database }),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let code_index = mongodb::IndexModel::builder()
            .keys(doc! { "code": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name(Some("session_code_idx".to_owned()))
                    .build(),
            )
            .build();
        self.sessions()
            .await
            .create_index(code_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "code,created_at",
                source,
            })?;

        let player_index = mongodb::IndexModel::builder()
            .keys(doc! { "session_id": 1, "player_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("session_player_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        self.players()
            .await
            .create_index(player_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PLAYER_COLLECTION_NAME,
                index: "session_id,player_id",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.state.read().await.database.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database()
            .await
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        self.database()
            .await
            .collection::<MongoPlayerDocument>(PLAYER_COLLECTION_NAME)
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document: MongoSessionDocument = session.into();
        self.sessions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(())
    }

    async fn find_by_code(&self, code: String) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc! { "code": &code })
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                key: code.clone(),
                source,
            })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn find_with_players(
        &self,
        session_id: Uuid,
    ) -> MongoResult<Option<(SessionEntity, Vec<SessionPlayerEntity>)>> {
        let Some(document) = self
            .sessions()
            .await
            .find_one(session_filter(session_id))
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                key: session_id.to_string(),
                source,
            })?
        else {
            return Ok(None);
        };

        let player_documents: Vec<MongoPlayerDocument> = self
            .players()
            .await
            .find(doc! { "session_id": session_id.to_string() })
            .await
            .map_err(|source| MongoDaoError::LoadPlayers { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadPlayers { session_id, source })?;

        let session = SessionEntity::try_from(document)?;
        let players = player_documents
            .into_iter()
            .map(SessionPlayerEntity::try_from)
            .collect::<MongoResult<Vec<_>>>()?;
        Ok(Some((session, players)))
    }

    async fn patch_session(&self, session_id: Uuid, update: SessionUpdate) -> MongoResult<()> {
        self.sessions()
            .await
            .update_one(session_filter(session_id), session_update_document(update))
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                id: session_id,
                source,
            })?;
        Ok(())
    }

    async fn upsert_player(&self, player: SessionPlayerEntity) -> MongoResult<()> {
        let session_id = player.session_id;
        let player_id = player.player_id.clone();
        let document: MongoPlayerDocument = player.into();
        self.players()
            .await
            .replace_one(player_filter(session_id, &player_id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePlayer {
                session_id,
                player_id,
                source,
            })?;
        Ok(())
    }

    async fn increment_score(
        &self,
        session_id: Uuid,
        player_id: String,
        delta: i32,
    ) -> MongoResult<Option<SessionPlayerEntity>> {
        let document = self
            .players()
            .await
            .find_one_and_update(
                player_filter(session_id, &player_id),
                doc! {
                    "$inc": { "score": delta },
                    "$set": { "updated_at": DateTime::now() },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::SavePlayer {
                session_id,
                player_id,
                source,
            })?;
        document.map(SessionPlayerEntity::try_from).transpose()
    }

    async fn set_player_connection(
        &self,
        session_id: Uuid,
        player_id: String,
        is_connected: bool,
    ) -> MongoResult<()> {
        self.players()
            .await
            .update_one(
                player_filter(session_id, &player_id),
                doc! { "$set": { "is_connected": is_connected, "updated_at": DateTime::now() } },
            )
            .await
            .map_err(|source| MongoDaoError::SavePlayer {
                session_id,
                player_id,
                source,
            })?;
        Ok(())
    }

    async fn delete_player(&self, session_id: Uuid, player_id: String) -> MongoResult<()> {
        self.players()
            .await
            .delete_one(player_filter(session_id, &player_id))
            .await
            .map_err(|source| MongoDaoError::SavePlayer {
                session_id,
                player_id,
                source,
            })?;
        Ok(())
    }

    async fn add_completed_question(&self, session_id: Uuid, question_id: String) -> MongoResult<()> {
        self.sessions()
            .await
            .update_one(
                session_filter(session_id),
                doc! {
                    "$addToSet": { "completed_questions": question_id },
                    "$set": { "updated_at": DateTime::now() },
                },
            )
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                id: session_id,
                source,
            })?;
        Ok(())
    }

    async fn completed_questions(&self, session_id: Uuid) -> MongoResult<Vec<String>> {
        Ok(self
            .find_with_players(session_id)
            .await?
            .map(|(session, _)| session.completed_questions)
            .unwrap_or_default())
    }

    async fn clear_completed_questions(&self, session_id: Uuid) -> MongoResult<()> {
        self.sessions()
            .await
            .update_one(
                session_filter(session_id),
                doc! { "$set": { "completed_questions": [], "updated_at": DateTime::now() } },
            )
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                id: session_id,
                source,
            })?;
        Ok(())
    }
}

impl SessionStore for MongoSessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn get_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_by_code(code).await.map_err(Into::into) })
    }

    fn get_session_with_players(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<(SessionEntity, Vec<SessionPlayerEntity>)>>> {
        let store = self.clone();
        Box::pin(async move { store.find_with_players(session_id).await.map_err(Into::into) })
    }

    fn update_session(
        &self,
        session_id: Uuid,
        update: SessionUpdate,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .patch_session(session_id, update)
                .await
                .map_err(Into::into)
        })
    }

    fn add_player_to_session(
        &self,
        player: SessionPlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_player(player).await.map_err(Into::into) })
    }

    fn update_player_score(
        &self,
        session_id: Uuid,
        player_id: String,
        delta: i32,
    ) -> BoxFuture<'static, StorageResult<Option<SessionPlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .increment_score(session_id, player_id, delta)
                .await
                .map_err(Into::into)
        })
    }

    fn update_player_connection(
        &self,
        session_id: Uuid,
        player_id: String,
        is_connected: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .set_player_connection(session_id, player_id, is_connected)
                .await
                .map_err(Into::into)
        })
    }

    fn remove_player_from_session(
        &self,
        session_id: Uuid,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_player(session_id, player_id)
                .await
                .map_err(Into::into)
        })
    }

    fn mark_question_completed(
        &self,
        session_id: Uuid,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .add_completed_question(session_id, question_id)
                .await
                .map_err(Into::into)
        })
    }

    fn get_completed_questions(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        Box::pin(async move { store.completed_questions(session_id).await.map_err(Into::into) })
    }

    fn reset_completed_questions(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .clear_completed_questions(session_id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
