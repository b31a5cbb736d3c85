pub mod buzzer;
pub mod registry;
pub mod room;
pub mod sequence;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::session_store::SessionStore,
    error::ServiceError,
    services::persistence::{self, PersistCommand, PersistenceHandle},
};

pub use self::registry::{RoomHandle, RoomRegistry};

pub type SharedState = Arc<AppState>;

/// Installed session store, shared with the persistence writer.
pub type StoreSlot = Arc<RwLock<Option<Arc<dyn SessionStore>>>>;

/// Central application state: configuration, live rooms and the storage handle.
pub struct AppState {
    config: Arc<AppConfig>,
    session_store: StoreSlot,
    degraded: watch::Sender<bool>,
    rooms: RoomRegistry,
    persistence: PersistenceHandle,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    /// Must be called from within a Tokio runtime since it spawns the persistence writer.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let session_store: StoreSlot = Arc::new(RwLock::new(None));
        let persistence = persistence::spawn_writer(session_store.clone());
        Arc::new(Self {
            config: Arc::new(config),
            session_store,
            degraded: degraded_tx,
            rooms: RoomRegistry::new(),
            persistence,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current session store or [`ServiceError::Degraded`].
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Registry of live rooms.
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Queue a fire-and-forget persistence write.
    pub fn persist(&self, command: PersistCommand) {
        self.persistence.submit(command);
    }

    pub fn persistence(&self) -> &PersistenceHandle {
        &self.persistence
    }
}
