//! Single FIFO writer that applies room-side persistence effects in the order rooms emit them.
//!
//! Rooms never await these writes. Failures are logged and the live state keeps going.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{SessionPlayerEntity, SessionUpdate},
        session_store::SessionStore,
        storage::StorageResult,
    },
    state::StoreSlot,
};

/// A write queued by a room.
#[derive(Debug)]
pub enum PersistCommand {
    UpsertPlayer(SessionPlayerEntity),
    ScoreDelta {
        session_id: Uuid,
        player_id: String,
        delta: i32,
    },
    Connection {
        session_id: Uuid,
        player_id: String,
        connected: bool,
    },
    RemovePlayer {
        session_id: Uuid,
        player_id: String,
    },
    UpdateSession {
        session_id: Uuid,
        update: SessionUpdate,
    },
    CompleteQuestion {
        session_id: Uuid,
        question_id: String,
    },
    ResetCompletedQuestions {
        session_id: Uuid,
    },
    /// Acknowledged once every earlier command has been applied.
    Flush(oneshot::Sender<()>),
}

impl PersistCommand {
    fn label(&self) -> &'static str {
        match self {
            PersistCommand::UpsertPlayer(_) => "upsert_player",
            PersistCommand::ScoreDelta { .. } => "score_delta",
            PersistCommand::Connection { .. } => "player_connection",
            PersistCommand::RemovePlayer { .. } => "remove_player",
            PersistCommand::UpdateSession { .. } => "update_session",
            PersistCommand::CompleteQuestion { .. } => "complete_question",
            PersistCommand::ResetCompletedQuestions { .. } => "reset_completed_questions",
            PersistCommand::Flush(_) => "flush",
        }
    }
}

/// Sending side of the writer queue.
#[derive(Clone, Debug)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl PersistenceHandle {
    /// Queue a write without waiting for it.
    pub fn submit(&self, command: PersistCommand) {
        if let Err(err) = self.tx.send(command) {
            warn!(command = err.0.label(), "persistence writer stopped; dropping write");
        }
    }

    /// Wait until every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(PersistCommand::Flush(done_tx));
        let _ = done_rx.await;
    }
}

/// Spawn the writer task draining commands against whatever store is installed in `slot`.
pub fn spawn_writer(slot: StoreSlot) -> PersistenceHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(slot, rx));
    PersistenceHandle { tx }
}

async fn run_writer(slot: StoreSlot, mut rx: mpsc::UnboundedReceiver<PersistCommand>) {
    while let Some(command) = rx.recv().await {
        if let PersistCommand::Flush(done) = command {
            let _ = done.send(());
            continue;
        }

        let label = command.label();
        let store = slot.read().await.clone();
        let Some(store) = store else {
            debug!(command = label, "no storage installed; dropping write");
            continue;
        };

        if let Err(err) = apply(store.as_ref(), command).await {
            warn!(command = label, error = %err, "persistence write failed");
        }
    }
    debug!("persistence writer stopped");
}

async fn apply(store: &dyn SessionStore, command: PersistCommand) -> StorageResult<()> {
    match command {
        PersistCommand::UpsertPlayer(player) => store.add_player_to_session(player).await,
        PersistCommand::ScoreDelta {
            session_id,
            player_id,
            delta,
        } => {
            let updated = store
                .update_player_score(session_id, player_id.clone(), delta)
                .await?;
            if updated.is_none() {
                debug!(session_id = %session_id, player_id = %player_id, "score delta for unknown player row");
            }
            Ok(())
        }
        PersistCommand::Connection {
            session_id,
            player_id,
            connected,
        } => {
            store
                .update_player_connection(session_id, player_id, connected)
                .await
        }
        PersistCommand::RemovePlayer {
            session_id,
            player_id,
        } => store.remove_player_from_session(session_id, player_id).await,
        PersistCommand::UpdateSession { session_id, update } => {
            store.update_session(session_id, update).await
        }
        PersistCommand::CompleteQuestion {
            session_id,
            question_id,
        } => store.mark_question_completed(session_id, question_id).await,
        PersistCommand::ResetCompletedQuestions { session_id } => {
            store.reset_completed_questions(session_id).await
        }
        PersistCommand::Flush(done) => {
            let _ = done.send(());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use tokio::sync::RwLock;

    use super::*;
    use crate::dao::{models::SessionEntity, session_store::InMemorySessionStore};

    fn row(session_id: Uuid) -> SessionPlayerEntity {
        SessionPlayerEntity {
            session_id,
            player_id: "p1".into(),
            name: "Alice".into(),
            avatar: "cat".into(),
            score: 0,
            reconnect_token: "t".into(),
            is_connected: true,
            updated_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn writes_apply_in_submission_order() {
        let store = Arc::new(InMemorySessionStore::new());
        let session = SessionEntity::new("AB2C".into(), "host".into());
        let session_id = session.id;
        store.create_session(session).await.unwrap();

        let slot: StoreSlot = Arc::new(RwLock::new(Some(store.clone() as Arc<dyn SessionStore>)));
        let handle = spawn_writer(slot);

        handle.submit(PersistCommand::UpsertPlayer(row(session_id)));
        for delta in [5, -2, 10] {
            handle.submit(PersistCommand::ScoreDelta {
                session_id,
                player_id: "p1".into(),
                delta,
            });
        }
        handle.flush().await;

        let (_, players) = store
            .get_session_with_players(session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(players[0].score, 13);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_writer() {
        let store = Arc::new(InMemorySessionStore::new());
        let session = SessionEntity::new("AB2C".into(), "host".into());
        let session_id = session.id;
        store.create_session(session).await.unwrap();

        let slot: StoreSlot = Arc::new(RwLock::new(Some(store.clone() as Arc<dyn SessionStore>)));
        let handle = spawn_writer(slot);

        store.set_unavailable(true);
        handle.submit(PersistCommand::UpsertPlayer(row(session_id)));
        handle.flush().await;

        store.set_unavailable(false);
        handle.submit(PersistCommand::UpsertPlayer(row(session_id)));
        handle.flush().await;

        let (_, players) = store
            .get_session_with_players(session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(players.len(), 1);
    }

    #[tokio::test]
    async fn writes_without_store_are_dropped() {
        let slot: StoreSlot = Arc::new(RwLock::new(None));
        let handle = spawn_writer(slot);
        handle.submit(PersistCommand::ResetCompletedQuestions {
            session_id: Uuid::new_v4(),
        });
        handle.flush().await;
    }
}
