//! Process-wide map from room code to live room.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use rand::Rng;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{SessionEntity, SessionStatus},
        session_store::SessionStore,
    },
    dto::validation::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN},
    error::ServiceError,
    state::room::{Connection, Room},
};

/// Shared handle to a live room. All mutations go through its mutex.
pub type RoomHandle = Arc<Mutex<Room>>;

/// Upper bound on code draws before giving up on room creation.
const MAX_CODE_ATTEMPTS: usize = 64;
/// Attempts at locking a room that keeps being replaced under us.
const MAX_LOCK_ATTEMPTS: usize = 3;

/// Registry of live rooms keyed by their code.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.get(code).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Point-in-time copy of every registered room.
    pub fn handles(&self) -> Vec<(String, RoomHandle)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Remove `code` whatever room it maps to. Idempotent.
    pub fn remove(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.remove(code).map(|(_, handle)| handle)
    }

    /// Remove `code` only while it still maps to `handle`.
    pub fn remove_if_same(&self, code: &str, handle: &RoomHandle) -> bool {
        self.rooms
            .remove_if(code, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// Draw a fresh code, create its durable session and register the room.
    ///
    /// The room enters the map with `host` already attached, so a concurrent sweep never
    /// sees it abandoned.
    pub async fn create_room(
        &self,
        store: &dyn SessionStore,
        host_id: String,
        host: Connection,
    ) -> Result<(String, RoomHandle), ServiceError> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = generate_room_code();
            if self.rooms.contains_key(&code) {
                debug!(code = %code, attempt, "room code collides with a live room");
                continue;
            }
            let existing = store.get_session_by_code(code.clone()).await?;
            if existing.is_some_and(|session| session.status == SessionStatus::Active) {
                debug!(code = %code, attempt, "room code belongs to an active session");
                continue;
            }

            let session = SessionEntity::new(code.clone(), host_id.clone());
            let session_id = session.id;
            store.create_session(session).await?;

            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => {
                    warn!(code = %code, session_id = %session_id, "room code taken while creating session; retrying");
                    continue;
                }
                Entry::Vacant(slot) => {
                    let now = Instant::now();
                    let mut room = Room::new(code.clone(), session_id, host_id, now);
                    room.attach_host(host, now);
                    let handle = Arc::new(Mutex::new(room));
                    slot.insert(handle.clone());
                    info!(code = %code, session_id = %session_id, "room created");
                    return Ok((code, handle));
                }
            }
        }

        Err(ServiceError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
    }

    /// Return the live room for `code`, rebuilding it from storage when needed.
    ///
    /// Ended sessions, missing sessions and storage failures all resolve to not found.
    pub async fn find_or_restore(
        &self,
        store: Option<Arc<dyn SessionStore>>,
        code: &str,
    ) -> Result<RoomHandle, ServiceError> {
        if let Some(handle) = self.get(code) {
            return Ok(handle);
        }

        let not_found = || ServiceError::NotFound(format!("room `{code}`"));
        let store = store.ok_or_else(not_found)?;

        let session = match store.get_session_by_code(code.to_string()).await {
            Ok(Some(session)) if session.status == SessionStatus::Active => session,
            Ok(_) => return Err(not_found()),
            Err(err) => {
                warn!(code = %code, error = %err, "failed to look up persisted session");
                return Err(not_found());
            }
        };

        let (session, players) = match store.get_session_with_players(session.id).await {
            Ok(Some(found)) => found,
            Ok(None) => return Err(not_found()),
            Err(err) => {
                warn!(code = %code, error = %err, "failed to load persisted players");
                return Err(not_found());
            }
        };

        let completed = store
            .get_completed_questions(session.id)
            .await
            .unwrap_or_else(|err| {
                warn!(code = %code, error = %err, "failed to load completed questions");
                Vec::new()
            });

        let session_id = session.id;
        let player_count = players.len();
        let room = Room::from_persisted(session, players, completed, Instant::now());

        let handle = match self.rooms.entry(code.to_string()) {
            // Another connection restored it first.
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let handle = Arc::new(Mutex::new(room));
                slot.insert(handle.clone());
                info!(code = %code, session_id = %session_id, players = player_count, "room restored from storage");
                handle
            }
        };
        Ok(handle)
    }

    /// Lock the room registered under `code`, if it is still live once the lock is held.
    pub async fn lock_live(&self, code: &str) -> Option<(RoomHandle, OwnedMutexGuard<Room>)> {
        let handle = self.get(code)?;
        let guard = handle.clone().lock_owned().await;
        self.is_current(code, &handle).then_some((handle, guard))
    }

    /// Like [`Self::find_or_restore`], returning the room locked.
    ///
    /// Retries when the room was torn down while waiting for its lock.
    pub async fn lock_or_restore(
        &self,
        store: Option<Arc<dyn SessionStore>>,
        code: &str,
    ) -> Result<(RoomHandle, OwnedMutexGuard<Room>), ServiceError> {
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let handle = self.find_or_restore(store.clone(), code).await?;
            let guard = handle.clone().lock_owned().await;
            if self.is_current(code, &handle) {
                return Ok((handle, guard));
            }
            debug!(code = %code, "room replaced while waiting for its lock; retrying");
        }
        Err(ServiceError::NotFound(format!("room `{code}`")))
    }

    fn is_current(&self, code: &str, handle: &RoomHandle) -> bool {
        self.get(code)
            .is_some_and(|current| Arc::ptr_eq(&current, handle))
    }
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}
