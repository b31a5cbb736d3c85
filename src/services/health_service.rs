use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage health and the number of live rooms.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_session_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    HealthResponse::new(state.is_degraded(), state.rooms().len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dto::health::HealthStatus;
    use crate::{
        config::AppConfig,
        dao::session_store::InMemorySessionStore,
        state::{AppState, room::tests::test_connection},
    };

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);

        let store = Arc::new(InMemorySessionStore::new());
        state.install_session_store(store.clone()).await;
        state
            .rooms()
            .create_room(store.as_ref(), "host".into(), test_connection().0)
            .await
            .unwrap();

        let health = health_status(&state).await;
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.rooms, 1);
    }
}
