use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a session store installed, flipping degraded mode while the backend is unreachable.
///
/// Live rooms keep running in either case; only room creation needs the store.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_session_store(store.clone()).await;
                info!("session store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                if !watch_health(&state, store.as_ref()).await {
                    state.clear_session_store().await;
                    warn!("dropping session store after failed reconnects");
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "session store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll `store` until it fails and cannot be revived. Returns `false` at that point.
async fn watch_health(state: &SharedState, store: &dyn SessionStore) -> bool {
    loop {
        if store.health_check().await.is_ok() {
            if state.is_degraded() {
                info!("session store healthy again; leaving degraded mode");
                state.update_degraded(false);
            }
            sleep(HEALTH_POLL_INTERVAL).await;
            continue;
        }

        let mut reconnect_delay = INITIAL_DELAY;
        let mut reconnected = false;
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            match store.try_reconnect().await {
                Ok(()) => {
                    info!(attempt, "session store reconnected after failed health check");
                    reconnected = true;
                    break;
                }
                Err(err) => {
                    if attempt == 0 {
                        warn!(attempt, error = %err, "session store reconnect failed; entering degraded mode");
                        state.update_degraded(true);
                    } else {
                        warn!(attempt, error = %err, "session store reconnect attempt failed");
                    }
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                }
            }
        }

        if !reconnected {
            warn!("exhausted session store reconnect attempts; staying in degraded mode");
            return false;
        }
        state.update_degraded(false);
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::InMemorySessionStore, state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn installs_store_and_tracks_outages() {
        let state = AppState::new(AppConfig::default());
        let store = InMemorySessionStore::new();
        let handle = store.clone();
        let mut degraded = state.degraded_watcher();
        assert!(state.is_degraded());

        let supervisor = tokio::spawn(run(state.clone(), move || {
            let store = store.clone();
            async move { Ok::<_, StorageError>(Arc::new(store) as Arc<dyn SessionStore>) }
        }));

        degraded.changed().await.unwrap();
        assert!(!state.is_degraded());
        assert!(state.session_store().await.is_some());

        handle.set_unavailable(true);
        degraded.changed().await.unwrap();
        assert!(state.is_degraded());

        handle.set_unavailable(false);
        degraded.changed().await.unwrap();
        assert!(!state.is_degraded());

        supervisor.abort();
    }
}
