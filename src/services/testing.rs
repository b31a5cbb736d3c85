//! Room fixture shared by the service tests.

use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    config::AppConfig,
    dao::session_store::InMemorySessionStore,
    dto::ws::{ClientMessage, PlayerJoinRequest},
    error::ServiceError,
    services::{host_service, player_service, websocket_service::Role},
    state::{
        AppState, SharedState,
        room::{Connection, tests::test_connection},
    },
};

/// A joined player and the frames pushed to its socket.
pub(crate) struct Member {
    pub connection: Connection,
    pub rx: UnboundedReceiver<Message>,
    pub player_id: String,
    pub token: String,
    pub name: String,
}

/// A live room created through `host:create` on an in-memory store.
pub(crate) struct Harness {
    pub state: SharedState,
    pub store: Arc<InMemorySessionStore>,
    pub code: String,
    pub host: Connection,
    pub host_rx: UnboundedReceiver<Message>,
}

impl Harness {
    pub async fn new() -> Self {
        let state = AppState::new(AppConfig::default());
        let store = Arc::new(InMemorySessionStore::new());
        state.install_session_store(store.clone()).await;

        let (host, mut host_rx) = test_connection();
        let role = host_service::create_room(&state, &host, Some("host-1".into()))
            .await
            .expect("room creation");
        let Role::Host { code } = role else {
            panic!("expected host role, got {role:?}");
        };
        drain(&mut host_rx);

        Self {
            state,
            store,
            code,
            host,
            host_rx,
        }
    }

    pub async fn join(&self, name: &str) -> Member {
        let (connection, mut rx) = test_connection();
        let role = player_service::join(&self.state, &connection, join_request(&self.code, name))
            .await
            .expect("player join");
        let Role::Player { player_id, .. } = role else {
            panic!("expected player role, got {role:?}");
        };

        let frames = drain(&mut rx);
        let joined = of_type(&frames, "joined")
            .first()
            .map(|frame| (*frame).clone())
            .expect("joined reply");
        Member {
            connection,
            rx,
            player_id,
            token: joined["reconnectToken"].as_str().unwrap_or_default().to_string(),
            name: joined["name"].as_str().unwrap_or_default().to_string(),
        }
    }

    pub async fn host(&self, message: ClientMessage) -> Result<(), ServiceError> {
        host_service::handle(&self.state, &self.host, &self.code, message).await
    }

    pub async fn player(&self, member: &Member, message: ClientMessage) {
        player_service::handle(
            &self.state,
            &member.connection,
            &self.code,
            &member.player_id,
            message,
        )
        .await;
    }
}

pub(crate) fn join_request(code: &str, name: &str) -> PlayerJoinRequest {
    PlayerJoinRequest {
        code: code.to_string(),
        name: name.to_string(),
        player_id: None,
        reconnect_token: None,
        avatar: None,
    }
}

/// Every JSON frame queued so far. Control frames are skipped.
pub(crate) fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            if let Ok(value) = serde_json::from_str(text.as_str()) {
                frames.push(value);
            }
        }
    }
    frames
}

pub(crate) fn of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|frame| frame["type"] == kind).collect()
}
