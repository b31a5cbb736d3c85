//! trivia-room-back binary entrypoint wiring the WebSocket gateway, liveness monitor and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivia_room_back::{
    config::AppConfig,
    dao::session_store::{InMemorySessionStore, SessionStore},
    routes,
    services::liveness::LivenessMonitor,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(AppConfig::load());
    start_storage(&app_state).await;
    tokio::spawn(LivenessMonitor::new(app_state.clone()).run());

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    // Drain queued score and roster writes before exiting.
    app_state.persistence().flush().await;
    info!("server stopped");
    Ok(())
}

/// Install the session store: MongoDB when `MONGO_URI` is set, process memory otherwise.
async fn start_storage(state: &SharedState) {
    if let Ok(uri) = env::var("MONGO_URI") {
        if spawn_mongo_supervisor(state, uri) {
            return;
        }
        warn!("MONGO_URI set but MongoDB support is not compiled in");
    }

    warn!("sessions are kept in process memory only");
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    state.install_session_store(store).await;
}

#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: &SharedState, uri: String) -> bool {
    use trivia_room_back::{
        dao::{
            session_store::mongodb::{MongoConfig, MongoSessionStore},
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    let db_name = env::var("MONGO_DB").ok();
    info!("using MongoDB session store");
    tokio::spawn(storage_supervisor::run(state.clone(), move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoSessionStore::connect(config).await?;
            Ok::<_, StorageError>(Arc::new(store) as Arc<dyn SessionStore>)
        }
    }));
    true
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(_state: &SharedState, _uri: String) -> bool {
    false
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
