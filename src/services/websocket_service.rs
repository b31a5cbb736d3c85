//! Connection gateway: owns one WebSocket, tracks which room role it holds and routes
//! every decoded envelope to the host, player or sub-game handlers.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{Audience, ClientMessage, ServerMessage},
    services::{host_service, liveness, persistence::PersistCommand, player_service},
    state::{SharedState, room::Connection},
};

/// Error returned when the writer side of a socket is gone.
#[derive(Debug, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Room role a connection identified itself with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unidentified,
    Host {
        code: String,
    },
    Player {
        code: String,
        player_id: String,
    },
}

/// Handle the full lifecycle of a single client WebSocket.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let connection = Connection::new(Uuid::new_v4(), outbound_tx.clone());
    let mut role = Role::Unidentified;
    debug!(connection_id = %connection.id, "websocket connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(message) => dispatch(&state, &connection, &mut role, message).await,
                Err(err) => {
                    debug!(connection_id = %connection.id, error = %err, "dropping malformed envelope");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
                touch(&state, &connection, &role).await;
            }
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection.id, "websocket closed by peer");
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection.id, error = %err, "websocket error");
                break;
            }
        }
    }

    disconnect(&state, &connection, &role).await;
    drop(connection);
    finalize(writer_task, outbound_tx).await;
}

/// Route one decoded envelope according to its audience and the connection role.
///
/// Messages for a role the connection does not hold are dropped without a reply.
pub async fn dispatch(
    state: &SharedState,
    connection: &Connection,
    role: &mut Role,
    message: ClientMessage,
) {
    touch(state, connection, role).await;

    match message.audience() {
        Audience::Any => {
            if matches!(message, ClientMessage::Ping) {
                let _ = connection.send(&ServerMessage::Pong);
            } else {
                debug!(connection_id = %connection.id, "ignoring unknown envelope type");
            }
        }
        Audience::Handshake => {
            if *role != Role::Unidentified {
                disconnect(state, connection, role).await;
                *role = Role::Unidentified;
            }
            let result = match message {
                ClientMessage::HostCreate { host_id } => {
                    host_service::create_room(state, connection, host_id).await
                }
                ClientMessage::HostJoin { code, host_id } => {
                    host_service::join_room(state, connection, &code, host_id).await
                }
                ClientMessage::PlayerJoin(request) => {
                    player_service::join(state, connection, request).await
                }
                _ => return,
            };
            match result {
                Ok(new_role) => *role = new_role,
                Err(err) => {
                    info!(connection_id = %connection.id, error = %err, "join rejected");
                    connection.send(&ServerMessage::error(err.client_message()));
                }
            }
        }
        Audience::Host => {
            let Role::Host { code } = &*role else {
                debug!(connection_id = %connection.id, "ignoring host message from non-host connection");
                return;
            };
            if let Err(err) = host_service::handle(state, connection, code, message).await {
                debug!(connection_id = %connection.id, code = %code, error = %err, "host action rejected");
                connection.send(&ServerMessage::error(err.client_message()));
            }
        }
        Audience::Player => {
            let Role::Player { code, player_id } = &*role else {
                debug!(connection_id = %connection.id, "ignoring player message from non-player connection");
                return;
            };
            let leaving = matches!(message, ClientMessage::Leave);
            player_service::handle(state, connection, code, player_id, message).await;
            if leaving {
                *role = Role::Unidentified;
            }
        }
    }
}

/// Refresh the liveness timestamp of whichever room member this socket currently is.
async fn touch(state: &SharedState, connection: &Connection, role: &Role) {
    let now = Instant::now();
    match role {
        Role::Unidentified => {}
        Role::Host { code } => {
            let Some((_, mut room)) = state.rooms().lock_live(code).await else {
                return;
            };
            if room.host.as_ref().is_some_and(|host| host.id == connection.id) {
                room.touch_host(now);
            }
        }
        Role::Player { code, player_id } => {
            let Some((_, mut room)) = state.rooms().lock_live(code).await else {
                return;
            };
            if let Some(player) = room.players.get_mut(player_id) {
                let current = player
                    .connection
                    .as_ref()
                    .is_some_and(|attached| attached.id == connection.id);
                if current {
                    player.last_seen = now;
                }
            }
        }
    }
}

/// Detach this socket from its room, leaving the logical member in place.
///
/// A socket that was already replaced by a newer one has nothing to detach.
pub async fn disconnect(state: &SharedState, connection: &Connection, role: &Role) {
    match role {
        Role::Unidentified => {}
        Role::Host { code } => {
            let Some((handle, mut room)) = state.rooms().lock_live(code).await else {
                return;
            };
            if room.detach_host(connection.id) {
                info!(code = %code, "host disconnected");
                liveness::release_if_abandoned(state, code, &handle, &mut room);
            }
        }
        Role::Player { code, player_id } => {
            let Some((_, mut room)) = state.rooms().lock_live(code).await else {
                return;
            };
            let session_id = room.session_id;
            let Some(player) = room.players.get_mut(player_id) else {
                return;
            };
            if !player
                .connection
                .as_ref()
                .is_some_and(|current| current.id == connection.id)
            {
                return;
            }
            player.connection = None;
            info!(code = %code, player_id = %player_id, "player disconnected");

            state.persist(PersistCommand::Connection {
                session_id,
                player_id: player_id.clone(),
                connected: false,
            });
            room.send_to_host(&ServerMessage::PlayerDisconnected {
                player_id: player_id.clone(),
            });
            room.broadcast_roster();
        }
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed since retrying cannot help.
pub fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), ConnectionClosed>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
///
/// A room may still hold a clone of the sender, so the writer is told to stop explicitly.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    let _ = outbound_tx.send(Message::Close(None));
    drop(outbound_tx);
    let _ = writer_task.await;
}
