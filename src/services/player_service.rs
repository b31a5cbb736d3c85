//! Player-side handlers: joining and reconnecting, buzzing, leaving.

use std::sync::Arc;

use indexmap::IndexSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{models::SessionPlayerEntity, session_store::SessionStore},
    dto::{
        now_millis,
        validation::normalize_room_code,
        ws::{ClientMessage, PlayerJoinRequest, ServerMessage},
    },
    error::ServiceError,
    services::{
        liveness, persistence::PersistCommand, sequence_service, websocket_service::Role,
    },
    state::{
        RoomHandle, SharedState,
        buzzer::BuzzOutcome,
        room::{Connection, GameMode, Player, Room},
    },
};

/// How the joining identity was resolved.
enum Resolution {
    /// Same identity already live in the room; only the socket changes.
    Reattached,
    /// Identity rebuilt from its durable row.
    Restored(Player),
    /// Brand new participant.
    Fresh(Player),
}

/// `player:join`: validate, resolve identity and attach this connection to the room.
pub async fn join(
    state: &SharedState,
    connection: &Connection,
    request: PlayerJoinRequest,
) -> Result<Role, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidName(err.to_string()))?;

    let code = normalize_room_code(&request.code);
    let name = request.name.trim().to_string();
    let store = state.session_store().await;
    let (_, mut room) = state.rooms().lock_or_restore(store.clone(), &code).await?;
    let now = Instant::now();

    let persisted = match &store {
        Some(store) => load_rows(store, &room).await,
        None => None,
    };
    let claimed = request
        .player_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let token = request.reconnect_token.as_deref();

    let resolution = match claimed {
        Some(player_id) if room.players.contains_key(&player_id) => {
            reattach(&mut room, &player_id, token, connection, now)?;
            (player_id, Resolution::Reattached)
        }
        Some(player_id) => {
            match persisted.as_ref().map(|rows| rows.iter().find(|row| row.player_id == player_id)) {
                Some(Some(row)) if Some(row.reconnect_token.as_str()) == token => {
                    let mut player = Player::from_entity(row.clone(), now);
                    player.connection = Some(connection.clone());
                    (player_id, Resolution::Restored(player))
                }
                Some(Some(_)) => {
                    return Err(ServiceError::InvalidReconnectToken(player_id));
                }
                Some(None) => {
                    let player = fresh_player(state, player_id.clone(), &name, &request.avatar, connection, now);
                    (player_id, Resolution::Fresh(player))
                }
                // Without the durable rows the claim cannot be checked; hand out a new identity.
                None => {
                    let player_id = Uuid::new_v4().to_string();
                    let player = fresh_player(state, player_id.clone(), &name, &request.avatar, connection, now);
                    (player_id, Resolution::Fresh(player))
                }
            }
        }
        None => {
            let player_id = Uuid::new_v4().to_string();
            let player = fresh_player(state, player_id.clone(), &name, &request.avatar, connection, now);
            (player_id, Resolution::Fresh(player))
        }
    };

    let (player_id, resolution) = resolution;
    let reconnected = !matches!(resolution, Resolution::Fresh(_));
    match resolution {
        Resolution::Reattached => {}
        Resolution::Restored(player) | Resolution::Fresh(player) => {
            room.players.insert(player_id.clone(), player);
        }
    }

    let Some(player) = room.players.get(&player_id) else {
        return Err(ServiceError::PlayerNotFound(player_id));
    };
    let joined_name = player.name.clone();
    remove_stale_namesakes(state, &mut room, &player_id, &joined_name, persisted.as_deref());

    let session_id = room.session_id;
    let Some(player) = room.players.get(&player_id) else {
        return Err(ServiceError::PlayerNotFound(player_id));
    };
    state.persist(PersistCommand::UpsertPlayer(player.to_entity(session_id)));
    let joined = ServerMessage::Joined {
        player_id: player.id.clone(),
        reconnect_token: player.reconnect_token.clone(),
        name: player.name.clone(),
        avatar: player.avatar.clone(),
        score: player.score,
        locked: room.buzzer.is_locked(),
        mode: room.mode,
    };
    let arrival = ServerMessage::PlayerJoined {
        player_id: player.id.clone(),
        name: player.name.clone(),
        avatar: player.avatar.clone(),
        score: player.score,
        reconnected,
    };

    if room.mode == GameMode::Sequence {
        room.seed_sequence_ledger();
    }

    connection.send(&joined);
    room.broadcast_roster();
    room.send_to_host(&arrival);
    info!(code = %code, player_id = %player_id, reconnected, "player joined");

    Ok(Role::Player { code, player_id })
}

/// Apply a player-scoped message. Messages from a replaced socket are ignored.
pub async fn handle(
    state: &SharedState,
    connection: &Connection,
    code: &str,
    player_id: &str,
    message: ClientMessage,
) {
    let Some((handle, mut room)) = state.rooms().lock_live(code).await else {
        debug!(code = %code, player_id = %player_id, "room is gone; dropping player message");
        return;
    };
    let attached = room
        .players
        .get(player_id)
        .and_then(|player| player.connection.as_ref())
        .is_some_and(|current| current.id == connection.id);
    if !attached {
        debug!(code = %code, player_id = %player_id, "ignoring message from a detached player socket");
        return;
    }

    match message {
        ClientMessage::Buzz => buzz(&mut room, player_id),
        ClientMessage::Leave => leave(state, code, &handle, &mut room, player_id),
        ClientMessage::SequenceSubmit { sequence } => {
            sequence_service::submit(&mut room, player_id, sequence)
        }
        other => {
            debug!(code = %code, message = ?other, "message is not a player action");
        }
    }
}

fn buzz(room: &mut Room, player_id: &str) {
    match room.buzzer.buzz(player_id) {
        BuzzOutcome::Accepted { position } => {
            room.send_to_player(player_id, &ServerMessage::BuzzConfirmed { position });
            let Some(player) = room.players.get(player_id) else {
                return;
            };
            room.send_to_host(&ServerMessage::PlayerBuzzed {
                player_id: player.id.clone(),
                name: player.name.clone(),
                avatar: player.avatar.clone(),
                position,
                timestamp: now_millis(),
            });
            debug!(code = %room.code, player_id = %player_id, position, "buzz accepted");
        }
        outcome => {
            debug!(code = %room.code, player_id = %player_id, ?outcome, "buzz ignored");
        }
    }
}

fn leave(state: &SharedState, code: &str, handle: &RoomHandle, room: &mut Room, player_id: &str) {
    if room.remove_player(player_id).is_none() {
        return;
    }
    info!(code = %code, player_id = %player_id, "player left");

    state.persist(PersistCommand::RemovePlayer {
        session_id: room.session_id,
        player_id: player_id.to_string(),
    });
    room.send_to_host(&ServerMessage::PlayerLeft {
        player_id: player_id.to_string(),
        reason: "left".into(),
    });
    room.broadcast_roster();
    liveness::release_if_abandoned(state, code, handle, room);
}

/// Swap the socket of a live player after checking their secret.
fn reattach(
    room: &mut Room,
    player_id: &str,
    token: Option<&str>,
    connection: &Connection,
    now: Instant,
) -> Result<(), ServiceError> {
    let Some(player) = room.players.get_mut(player_id) else {
        return Err(ServiceError::PlayerNotFound(player_id.to_string()));
    };
    if token != Some(player.reconnect_token.as_str()) {
        warn!(code = %room.code, player_id = %player_id, "reconnect token mismatch");
        return Err(ServiceError::InvalidReconnectToken(player_id.to_string()));
    }

    let replaced = player
        .connection
        .replace(connection.clone())
        .filter(|previous| previous.id != connection.id);
    if let Some(previous) = replaced {
        previous.close("replaced by a new connection");
    }
    player.last_seen = now;
    Ok(())
}

fn fresh_player(
    state: &SharedState,
    player_id: String,
    name: &str,
    avatar: &Option<String>,
    connection: &Connection,
    now: Instant,
) -> Player {
    Player {
        id: player_id,
        name: name.to_string(),
        avatar: state.config().resolve_avatar(avatar.as_deref()),
        score: 0,
        reconnect_token: Uuid::new_v4().simple().to_string(),
        connection: Some(connection.clone()),
        last_seen: now,
    }
}

/// Durable player rows of the room's session, or `None` when they cannot be read.
async fn load_rows(store: &Arc<dyn SessionStore>, room: &Room) -> Option<Vec<SessionPlayerEntity>> {
    match store.get_session_with_players(room.session_id).await {
        Ok(Some((_, rows))) => Some(rows),
        Ok(None) => Some(Vec::new()),
        Err(err) => {
            warn!(code = %room.code, error = %err, "failed to load persisted players");
            None
        }
    }
}

/// Drop disconnected entries sharing `name` under another identity, live and durable.
fn remove_stale_namesakes(
    state: &SharedState,
    room: &mut Room,
    player_id: &str,
    name: &str,
    persisted: Option<&[SessionPlayerEntity]>,
) {
    let wanted = name.trim().to_lowercase();
    let same_name = |candidate_id: &str, candidate_name: &str| {
        candidate_id != player_id && candidate_name.trim().to_lowercase() == wanted
    };

    let mut stale: IndexSet<String> = room
        .players
        .values()
        .filter(|player| !player.is_connected() && same_name(&player.id, &player.name))
        .map(|player| player.id.clone())
        .collect();
    for row in persisted.unwrap_or_default() {
        let live_and_connected = room
            .players
            .get(&row.player_id)
            .is_some_and(Player::is_connected);
        if !live_and_connected && same_name(&row.player_id, &row.name) {
            stale.insert(row.player_id.clone());
        }
    }

    for stale_id in stale {
        room.remove_player(&stale_id);
        debug!(code = %room.code, player_id = %stale_id, "removed stale entry with the same name");
        state.persist(PersistCommand::RemovePlayer {
            session_id: room.session_id,
            player_id: stale_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{
        services::testing::{Harness, drain, join_request, of_type},
        state::room::tests::test_connection,
    };

    #[tokio::test]
    async fn blank_or_long_names_are_rejected() {
        let harness = Harness::new().await;
        let (conn, _rx) = test_connection();

        let err = join(&harness.state, &conn, join_request(&harness.code, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Invalid name");

        let err = join(&harness.state, &conn, join_request(&harness.code, &"x".repeat(21)))
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Invalid name");
    }

    #[tokio::test]
    async fn unknown_room_is_reported() {
        let harness = Harness::new().await;
        let (conn, _rx) = test_connection();
        let err = join(&harness.state, &conn, join_request("ZZZZ", "Alice"))
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Room not found");
    }

    #[tokio::test]
    async fn join_replies_broadcasts_and_notifies_host() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        drain(&mut harness.host_rx);

        let bob = harness.join("  Bob ").await;
        assert_eq!(bob.name, "Bob");

        let roster = drain(&mut alice.rx);
        let updates = of_type(&roster, "players:updated");
        assert_eq!(updates[0]["players"].as_array().map(Vec::len), Some(2));

        let host = drain(&mut harness.host_rx);
        let arrival = of_type(&host, "player:joined");
        assert_eq!(arrival[0]["playerId"], Value::String(bob.player_id.clone()));
        assert_eq!(arrival[0]["reconnected"], false);
    }

    #[tokio::test]
    async fn reconnect_keeps_score_and_closes_old_socket() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        harness
            .host(ClientMessage::UpdateScore {
                player_id: alice.player_id.clone(),
                points: 40,
            })
            .await
            .unwrap();
        drain(&mut alice.rx);

        let (conn, mut rx) = test_connection();
        let mut request = join_request(&harness.code, "Mallory");
        request.player_id = Some(alice.player_id.clone());
        request.reconnect_token = Some(alice.token.clone());
        let role = join(&harness.state, &conn, request).await.unwrap();
        assert_eq!(
            role,
            Role::Player {
                code: harness.code.clone(),
                player_id: alice.player_id.clone()
            }
        );

        let joined = drain(&mut rx);
        let reply = of_type(&joined, "joined")[0];
        assert_eq!(reply["score"], 40);
        assert_eq!(reply["name"], "Alice");

        let mut closed = false;
        while let Ok(message) = alice.rx.try_recv() {
            closed |= matches!(message, axum::extract::ws::Message::Close(_));
        }
        assert!(closed, "previous socket should be closed");

        let host = drain(&mut harness.host_rx);
        assert_eq!(of_type(&host, "player:joined").last().map(|m| m["reconnected"].clone()), Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn wrong_or_missing_token_is_rejected() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        harness
            .host(ClientMessage::UpdateScore {
                player_id: alice.player_id.clone(),
                points: 40,
            })
            .await
            .unwrap();
        drain(&mut alice.rx);
        drain(&mut harness.host_rx);
        let (conn, mut rx) = test_connection();

        let mut request = join_request(&harness.code, "Mallory");
        request.player_id = Some(alice.player_id.clone());
        request.reconnect_token = Some("guessed".into());
        let err = join(&harness.state, &conn, request.clone()).await.unwrap_err();
        assert_eq!(err.client_message(), "Invalid reconnect token");

        request.reconnect_token = None;
        let err = join(&harness.state, &conn, request).await.unwrap_err();
        assert_eq!(err.client_message(), "Invalid reconnect token");

        {
            let (_, room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
            let player = &room.players[&alice.player_id];
            assert_eq!(player.score, 40);
            assert_eq!(player.name, "Alice");
            assert_eq!(player.reconnect_token, alice.token);
            assert_eq!(
                player.connection.as_ref().map(|c| c.id),
                Some(alice.connection.id)
            );
            assert_eq!(room.players.len(), 1);
        }

        // The original socket is neither closed nor told anything.
        assert!(alice.rx.try_recv().is_err());
        assert!(rx.try_recv().is_err());
        assert!(of_type(&drain(&mut harness.host_rx), "player:joined").is_empty());
    }

    #[tokio::test]
    async fn evicted_player_is_restored_from_storage() {
        let harness = Harness::new().await;
        let alice = harness.join("Alice").await;
        harness
            .host(ClientMessage::UpdateScore {
                player_id: alice.player_id.clone(),
                points: 25,
            })
            .await
            .unwrap();
        harness.state.persistence().flush().await;

        // Simulate eviction: live entry gone, durable row kept.
        {
            let (_, mut room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
            room.remove_player(&alice.player_id);
        }

        let (conn, mut rx) = test_connection();
        let mut request = join_request(&harness.code, "Alice");
        request.player_id = Some(alice.player_id.clone());
        request.reconnect_token = Some(alice.token.clone());
        join(&harness.state, &conn, request).await.unwrap();

        let joined = drain(&mut rx);
        assert_eq!(of_type(&joined, "joined")[0]["score"], 25);
    }

    #[tokio::test]
    async fn rejoining_under_a_new_identity_drops_the_stale_namesake() {
        let harness = Harness::new().await;
        let alice = harness.join("Alice").await;
        crate::services::websocket_service::disconnect(
            &harness.state,
            &alice.connection,
            &Role::Player {
                code: harness.code.clone(),
                player_id: alice.player_id.clone(),
            },
        )
        .await;

        let again = harness.join("alice").await;
        assert_ne!(again.player_id, alice.player_id);
        harness.state.persistence().flush().await;

        let (_, room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
        assert!(!room.players.contains_key(&alice.player_id));
        let session_id = room.session_id;
        drop(room);

        let (_, rows) = harness
            .store
            .get_session_with_players(session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player_id, again.player_id);
    }

    #[tokio::test]
    async fn duplicate_buzz_keeps_a_single_position() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        let mut bob = harness.join("Bob").await;
        harness
            .host(ClientMessage::Unlock {
                new_question: true,
                question_id: Some("q1".into()),
            })
            .await
            .unwrap();
        drain(&mut harness.host_rx);

        harness.player(&bob, ClientMessage::Buzz).await;
        harness.player(&alice, ClientMessage::Buzz).await;
        harness.player(&bob, ClientMessage::Buzz).await;

        let bob_msgs = drain(&mut bob.rx);
        let confirmations = of_type(&bob_msgs, "buzz:confirmed");
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0]["position"], 1);
        assert_eq!(of_type(&drain(&mut alice.rx), "buzz:confirmed")[0]["position"], 2);

        let host = drain(&mut harness.host_rx);
        let buzzed = of_type(&host, "player:buzzed");
        assert_eq!(buzzed.len(), 2);
        assert_eq!(buzzed[0]["playerId"], Value::String(bob.player_id.clone()));
        assert!(buzzed[0]["timestamp"].as_i64().is_some_and(|ts| ts > 0));
    }

    #[tokio::test]
    async fn buzz_while_locked_is_ignored() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        drain(&mut harness.host_rx);

        harness.player(&alice, ClientMessage::Buzz).await;
        assert!(of_type(&drain(&mut alice.rx), "buzz:confirmed").is_empty());
        assert!(of_type(&drain(&mut harness.host_rx), "player:buzzed").is_empty());
    }

    #[tokio::test]
    async fn leave_removes_player_and_notifies_host() {
        let mut harness = Harness::new().await;
        let alice = harness.join("Alice").await;
        drain(&mut harness.host_rx);

        harness.player(&alice, ClientMessage::Leave).await;

        let host = drain(&mut harness.host_rx);
        let left = of_type(&host, "player:left");
        assert_eq!(left[0]["reason"], "left");
        let (_, room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
        assert!(room.players.is_empty());
    }
}
