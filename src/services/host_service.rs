//! Host-side handlers: room creation and rejoin, buzzer control and room management.

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{SessionStatus, SessionUpdate},
    dto::{validation::normalize_room_code, ws::{ClientMessage, ServerMessage}},
    error::ServiceError,
    services::{persistence::PersistCommand, sequence_service, websocket_service::Role},
    state::{RoomHandle, SharedState, room::{Connection, GameMode, Room}},
};

/// Reason sent to players when the host closes the room without giving one.
const DEFAULT_CLOSE_REASON: &str = "Host closed the room";

/// `host:create`: register a new room with this connection as its host.
pub async fn create_room(
    state: &SharedState,
    connection: &Connection,
    host_id: Option<String>,
) -> Result<Role, ServiceError> {
    let store = state.require_session_store().await?;
    let host_id = host_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (code, handle) = state
        .rooms()
        .create_room(store.as_ref(), host_id.clone(), connection.clone())
        .await?;

    let session_id = handle.lock().await.session_id;
    connection.send(&ServerMessage::RoomCreated {
        code: code.clone(),
        session_id,
        host_id,
    });

    Ok(Role::Host { code })
}

/// `host:join`: attach this connection as host of a live or restorable room.
pub async fn join_room(
    state: &SharedState,
    connection: &Connection,
    code: &str,
    host_id: Option<String>,
) -> Result<Role, ServiceError> {
    let code = normalize_room_code(code);
    let (_, mut room) = state
        .rooms()
        .lock_or_restore(state.session_store().await, &code)
        .await?;

    let replaced = room
        .attach_host(connection.clone(), Instant::now())
        .filter(|previous| previous.id != connection.id);
    if let Some(previous) = replaced {
        previous.close("replaced by a new host connection");
    }
    if let Some(host_id) = host_id.filter(|id| *id != room.host_id) {
        debug!(code = %code, claimed = %host_id, host_id = %room.host_id, "host joined with a different identity");
    }
    info!(code = %code, players = room.players.len(), "host attached");

    connection.send(&ServerMessage::RoomJoined(room.snapshot()));
    Ok(Role::Host { code })
}

/// Apply a host-scoped message to room `code`.
///
/// Messages from a socket that is no longer the room's host are ignored.
pub async fn handle(
    state: &SharedState,
    connection: &Connection,
    code: &str,
    message: ClientMessage,
) -> Result<(), ServiceError> {
    let Some((handle, mut room)) = state.rooms().lock_live(code).await else {
        return Err(ServiceError::NotFound(format!("room `{code}`")));
    };
    if !room.host.as_ref().is_some_and(|host| host.id == connection.id) {
        debug!(code = %code, "ignoring host message from a replaced socket");
        return Ok(());
    }

    match message {
        ClientMessage::Unlock {
            new_question,
            question_id,
        } => {
            room.buzzer.unlock(new_question, question_id);
            broadcast_unlocked(&room, new_question);
        }
        ClientMessage::Lock { reset } => {
            room.buzzer.lock(reset);
            room.broadcast_players(&ServerMessage::BuzzerLocked { reset });
        }
        ClientMessage::ResetBuzzer => {
            room.buzzer.reset();
            room.broadcast_players(&ServerMessage::BuzzerReset);
            room.send_to_host(&ServerMessage::BuzzerReset);
        }
        ClientMessage::PassPlayer { player_id } => {
            require_player(&room, &player_id)?;
            room.buzzer.pass(&player_id);
            debug!(code = %code, player_id = %player_id, "player passed on current question");
            broadcast_unlocked(&room, false);
        }
        ClientMessage::Feedback {
            player_id,
            correct,
            points,
        } => {
            require_player(&room, &player_id)?;
            room.send_to_player(&player_id, &ServerMessage::Feedback { correct, points });
        }
        ClientMessage::UpdateScore { player_id, points } => {
            update_score(state, &mut room, &player_id, points)?;
        }
        ClientMessage::KickPlayer { player_id } | ClientMessage::Kick { player_id } => {
            kick(state, &mut room, &player_id)?;
        }
        ClientMessage::SetBoard { board_id } => {
            room.board_id = board_id.clone();
            state.persist(PersistCommand::UpdateSession {
                session_id: room.session_id,
                update: SessionUpdate {
                    board_id: Some(board_id.clone()),
                    ..SessionUpdate::default()
                },
            });
            let notice = ServerMessage::BoardSelected { board_id };
            room.broadcast_players(&notice);
            room.send_to_host(&notice);
        }
        ClientMessage::SetMode { mode } => {
            set_mode(state, &mut room, mode);
        }
        ClientMessage::CompleteQuestion { question_id } => {
            room.completed_questions.insert(question_id.clone());
            state.persist(PersistCommand::CompleteQuestion {
                session_id: room.session_id,
                question_id: question_id.clone(),
            });
            let notice = ServerMessage::QuestionCompleted { question_id };
            room.broadcast_players(&notice);
            room.send_to_host(&notice);
        }
        ClientMessage::ResetBoard => {
            room.completed_questions.clear();
            state.persist(PersistCommand::ResetCompletedQuestions {
                session_id: room.session_id,
            });
            room.broadcast_players(&ServerMessage::BoardReset);
            room.send_to_host(&ServerMessage::BoardReset);
        }
        ClientMessage::GetScores => {
            room.send_to_host(&ServerMessage::ScoresSync {
                scores: room.roster(),
            });
        }
        ClientMessage::Sync => {
            if room.buzzer.is_locked() {
                room.broadcast_players(&ServerMessage::BuzzerLocked { reset: false });
            } else {
                broadcast_unlocked(&room, false);
            }
            room.send_to_host(&ServerMessage::HostSynced {
                player_count: room.players.len(),
                locked: room.buzzer.is_locked(),
            });
        }
        ClientMessage::CloseRoom { reason } => {
            let reason = reason
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CLOSE_REASON.to_string());
            close_room(state, code, &handle, &mut room, &reason);
        }
        ClientMessage::EndGame => {
            end_game(state, &mut room);
        }
        ClientMessage::StartNextGrid => {
            room.game_ended = false;
            state.persist(PersistCommand::UpdateSession {
                session_id: room.session_id,
                update: SessionUpdate {
                    status: Some(SessionStatus::Active),
                    ..SessionUpdate::default()
                },
            });
            room.broadcast_players(&ServerMessage::GridStarted);
            room.send_to_host(&ServerMessage::GridStarted);
        }
        ClientMessage::SequenceSwitchMode
        | ClientMessage::SequenceStartQuestion(_)
        | ClientMessage::SequenceReveal
        | ClientMessage::SequenceShowLeaderboard
        | ClientMessage::SequenceEndGame
        | ClientMessage::SequenceReset
        | ClientMessage::SequenceResetScores => {
            sequence_service::handle_host(state, &handle, &mut room, message)?;
        }
        other => {
            debug!(code = %code, message = ?other, "message is not a host action");
        }
    }

    Ok(())
}

fn require_player(room: &Room, player_id: &str) -> Result<(), ServiceError> {
    if room.players.contains_key(player_id) {
        Ok(())
    } else {
        Err(ServiceError::PlayerNotFound(player_id.to_string()))
    }
}

/// Tell every connected player the buzzer is open, and whether they personally may buzz.
fn broadcast_unlocked(room: &Room, new_question: bool) {
    for player in room.players.values() {
        if let Some(connection) = &player.connection {
            connection.send(&ServerMessage::BuzzerUnlocked {
                new_question,
                can_buzz: room.buzzer.can_buzz(&player.id),
            });
        }
    }
}

/// Bounded manual score change. Out-of-range deltas are dropped without any broadcast.
fn update_score(
    state: &SharedState,
    room: &mut Room,
    player_id: &str,
    points: i32,
) -> Result<(), ServiceError> {
    let max = state.config().max_score_delta;
    if points.checked_abs().is_none_or(|magnitude| magnitude > max) {
        warn!(code = %room.code, player_id = %player_id, points, max, "rejecting out-of-range score delta");
        return Ok(());
    }

    let session_id = room.session_id;
    let player = room
        .players
        .get_mut(player_id)
        .ok_or_else(|| ServiceError::PlayerNotFound(player_id.to_string()))?;
    player.score = player.score.saturating_add(points);
    let score = player.score;

    state.persist(PersistCommand::ScoreDelta {
        session_id,
        player_id: player_id.to_string(),
        delta: points,
    });

    let notice = ServerMessage::ScoreUpdated {
        player_id: player_id.to_string(),
        score,
        delta: points,
    };
    room.broadcast_players(&notice);
    room.send_to_host(&notice);
    Ok(())
}

fn kick(state: &SharedState, room: &mut Room, player_id: &str) -> Result<(), ServiceError> {
    let player = room
        .remove_player(player_id)
        .ok_or_else(|| ServiceError::PlayerNotFound(player_id.to_string()))?;
    if let Some(connection) = player.connection {
        connection.send(&ServerMessage::Kicked);
        connection.close("kicked");
    }
    info!(code = %room.code, player_id = %player_id, "player kicked");

    // Only the live seat goes; the durable row keeps its score.
    state.persist(PersistCommand::Connection {
        session_id: room.session_id,
        player_id: player_id.to_string(),
        connected: false,
    });
    room.send_to_host(&ServerMessage::PlayerLeft {
        player_id: player_id.to_string(),
        reason: "kicked".into(),
    });
    room.broadcast_roster();
    Ok(())
}

fn set_mode(state: &SharedState, room: &mut Room, mode: GameMode) {
    if room.mode == GameMode::Sequence && mode != GameMode::Sequence {
        room.sequence.reset();
    }
    if mode == GameMode::Sequence {
        room.seed_sequence_ledger();
    }
    room.mode = mode;
    state.persist(PersistCommand::UpdateSession {
        session_id: room.session_id,
        update: SessionUpdate {
            mode: Some(mode.into()),
            ..SessionUpdate::default()
        },
    });
    let notice = ServerMessage::ModeChanged { mode };
    room.broadcast_players(&notice);
    room.send_to_host(&notice);
}

fn close_room(
    state: &SharedState,
    code: &str,
    handle: &RoomHandle,
    room: &mut Room,
    reason: &str,
) {
    info!(code = %code, reason = %reason, "host closed room");
    room.sequence.reset();

    room.close_players(reason);
    room.players.clear();
    room.send_to_host(&ServerMessage::RoomClosed {
        reason: reason.to_string(),
    });

    state.persist(PersistCommand::UpdateSession {
        session_id: room.session_id,
        update: SessionUpdate {
            status: Some(SessionStatus::Ended),
            ..SessionUpdate::default()
        },
    });
    state.rooms().remove_if_same(code, handle);
}

/// First call ends the game for everyone; later calls only report `alreadyEnded`.
fn end_game(state: &SharedState, room: &mut Room) {
    let leaderboard = room.leaderboard();
    if room.game_ended {
        room.send_to_host(&ServerMessage::GameEnded {
            leaderboard,
            already_ended: true,
        });
        return;
    }

    room.game_ended = true;
    room.buzzer.lock(false);
    state.persist(PersistCommand::UpdateSession {
        session_id: room.session_id,
        update: SessionUpdate {
            status: Some(SessionStatus::Ended),
            ..SessionUpdate::default()
        },
    });
    info!(code = %room.code, "game ended");

    let notice = ServerMessage::GameEnded {
        leaderboard,
        already_ended: false,
    };
    room.broadcast_players(&notice);
    room.send_to_host(&notice);
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message;
    use serde_json::Value;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::SessionStore,
        services::testing::{Harness, drain, of_type},
        state::{AppState, room::tests::test_connection},
    };

    #[tokio::test]
    async fn create_fails_without_storage() {
        let state = AppState::new(AppConfig::default());
        let (host, mut rx) = test_connection();

        let err = create_room(&state, &host, None).await.unwrap_err();
        assert_eq!(err.client_message(), "Failed to create room");
        assert!(state.rooms().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn create_replies_with_code_and_minted_host() {
        let state = AppState::new(AppConfig::default());
        state
            .install_session_store(std::sync::Arc::new(
                crate::dao::session_store::InMemorySessionStore::new(),
            ))
            .await;
        let (host, mut rx) = test_connection();

        let Role::Host { code } = create_room(&state, &host, None).await.unwrap() else {
            panic!("expected host role");
        };
        let frames = drain(&mut rx);
        let created = of_type(&frames, "room:created")[0];
        assert_eq!(created["code"], Value::String(code.clone()));
        assert!(created["hostId"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(code.len(), 4);
    }

    #[tokio::test]
    async fn host_rejoin_gets_snapshot_and_replaces_socket() {
        let mut harness = Harness::new().await;
        harness.join("Alice").await;
        harness
            .host(ClientMessage::CompleteQuestion {
                question_id: "q1".into(),
            })
            .await
            .unwrap();

        let (second, mut rx) = test_connection();
        join_room(&harness.state, &second, &harness.code.to_lowercase(), None)
            .await
            .unwrap();

        let frames = drain(&mut rx);
        let snapshot = of_type(&frames, "room:joined")[0];
        assert_eq!(snapshot["players"].as_array().map(Vec::len), Some(1));
        assert_eq!(snapshot["completedQuestions"], serde_json::json!(["q1"]));
        assert_eq!(snapshot["locked"], true);

        let mut closed = false;
        while let Ok(message) = harness.host_rx.try_recv() {
            closed |= matches!(message, Message::Close(_));
        }
        assert!(closed);

        // The replaced socket no longer drives the room.
        harness
            .host(ClientMessage::Unlock {
                new_question: true,
                question_id: None,
            })
            .await
            .unwrap();
        let (_, room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
        assert!(room.buzzer.is_locked());
    }

    #[tokio::test]
    async fn join_unknown_room_is_not_found() {
        let harness = Harness::new().await;
        let (conn, _rx) = test_connection();
        let err = join_room(&harness.state, &conn, "QQQQ", None)
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Room not found");
    }

    #[tokio::test]
    async fn passed_player_waits_for_the_next_question() {
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
        harness.player(&alice, ClientMessage::Buzz).await;
        harness
            .host(ClientMessage::PassPlayer {
                player_id: alice.player_id.clone(),
            })
            .await
            .unwrap();
        drain(&mut harness.host_rx);

        let alice_frames = drain(&mut alice.rx);
        let unlocked = of_type(&alice_frames, "buzzer:unlocked");
        assert_eq!(unlocked.last().map(|m| m["canBuzz"].clone()), Some(Value::Bool(false)));
        assert_eq!(
            of_type(&drain(&mut bob.rx), "buzzer:unlocked").last().map(|m| m["canBuzz"].clone()),
            Some(Value::Bool(true))
        );

        harness.player(&alice, ClientMessage::Buzz).await;
        harness.player(&bob, ClientMessage::Buzz).await;
        let host = drain(&mut harness.host_rx);
        let buzzed = of_type(&host, "player:buzzed");
        assert_eq!(buzzed.len(), 1);
        assert_eq!(buzzed[0]["playerId"], Value::String(bob.player_id.clone()));
        assert_eq!(buzzed[0]["position"], 1);

        harness
            .host(ClientMessage::Unlock {
                new_question: true,
                question_id: Some("q2".into()),
            })
            .await
            .unwrap();
        harness.player(&alice, ClientMessage::Buzz).await;
        assert_eq!(
            of_type(&drain(&mut alice.rx), "buzz:confirmed").len(),
            1
        );
    }

    #[tokio::test]
    async fn lock_keeps_queue_until_reset() {
        let harness = Harness::new().await;
        let alice = harness.join("Alice").await;
        harness
            .host(ClientMessage::Unlock {
                new_question: true,
                question_id: None,
            })
            .await
            .unwrap();
        harness.player(&alice, ClientMessage::Buzz).await;

        harness.host(ClientMessage::Lock { reset: false }).await.unwrap();
        {
            let (_, room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
            assert_eq!(room.buzzer.queue(), [alice.player_id.clone()]);
        }
        harness.host(ClientMessage::ResetBuzzer).await.unwrap();
        let (_, room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
        assert!(room.buzzer.queue().is_empty());
        assert!(room.buzzer.is_locked());
    }

    #[tokio::test]
    async fn score_updates_are_bounded() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        drain(&mut harness.host_rx);

        harness
            .host(ClientMessage::UpdateScore {
                player_id: alice.player_id.clone(),
                points: 10_001,
            })
            .await
            .unwrap();
        assert!(of_type(&drain(&mut alice.rx), "score:updated").is_empty());
        assert!(of_type(&drain(&mut harness.host_rx), "score:updated").is_empty());

        harness
            .host(ClientMessage::UpdateScore {
                player_id: alice.player_id.clone(),
                points: -300,
            })
            .await
            .unwrap();
        let frames = drain(&mut alice.rx);
        let update = of_type(&frames, "score:updated")[0];
        assert_eq!(update["score"], -300);
        assert_eq!(update["delta"], -300);

        harness.state.persistence().flush().await;
        let session_id = harness
            .state
            .rooms()
            .lock_live(&harness.code)
            .await
            .unwrap()
            .1
            .session_id;
        let (_, rows) = harness
            .store
            .get_session_with_players(session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rows[0].score, -300);
    }

    #[tokio::test]
    async fn unknown_player_is_reported_to_the_host() {
        let harness = Harness::new().await;
        let err = harness
            .host(ClientMessage::UpdateScore {
                player_id: "ghost".into(),
                points: 5,
            })
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Player not found");
    }

    #[tokio::test]
    async fn end_game_is_idempotent_until_next_grid() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        drain(&mut harness.host_rx);

        harness.host(ClientMessage::EndGame).await.unwrap();
        harness.host(ClientMessage::EndGame).await.unwrap();

        let host = drain(&mut harness.host_rx);
        let ended = of_type(&host, "game:ended");
        assert_eq!(ended.len(), 2);
        assert_eq!(ended[0]["alreadyEnded"], false);
        assert_eq!(ended[1]["alreadyEnded"], true);
        assert_eq!(of_type(&drain(&mut alice.rx), "game:ended").len(), 1);

        harness.host(ClientMessage::StartNextGrid).await.unwrap();
        harness.host(ClientMessage::EndGame).await.unwrap();
        let host = drain(&mut harness.host_rx);
        assert_eq!(of_type(&host, "game:ended")[0]["alreadyEnded"], false);
    }

    #[tokio::test]
    async fn kick_closes_the_socket_and_updates_roster() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        let mut bob = harness.join("Bob").await;
        drain(&mut harness.host_rx);
        drain(&mut bob.rx);

        harness
            .host(ClientMessage::Kick {
                player_id: alice.player_id.clone(),
            })
            .await
            .unwrap();

        let mut kicked = false;
        let mut closed = false;
        while let Ok(message) = alice.rx.try_recv() {
            match message {
                Message::Text(text) => kicked |= text.as_str().contains("\"kicked\""),
                Message::Close(_) => closed = true,
                _ => {}
            }
        }
        assert!(kicked && closed);

        let left = drain(&mut harness.host_rx);
        assert_eq!(of_type(&left, "player:left")[0]["reason"], "kicked");
        let roster = drain(&mut bob.rx);
        assert_eq!(
            of_type(&roster, "players:updated")[0]["players"]
                .as_array()
                .map(Vec::len),
            Some(1)
        );
    }

    #[tokio::test]
    async fn kicked_player_keeps_its_stored_score() {
        let harness = Harness::new().await;
        let alice = harness.join("Alice").await;
        harness
            .host(ClientMessage::UpdateScore {
                player_id: alice.player_id.clone(),
                points: 40,
            })
            .await
            .unwrap();
        let session_id = harness
            .state
            .rooms()
            .lock_live(&harness.code)
            .await
            .unwrap()
            .1
            .session_id;

        harness
            .host(ClientMessage::Kick {
                player_id: alice.player_id.clone(),
            })
            .await
            .unwrap();
        harness.state.persistence().flush().await;

        let (_, rows) = harness
            .store
            .get_session_with_players(session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player_id, alice.player_id);
        assert_eq!(rows[0].score, 40);
        assert!(!rows[0].is_connected);

        let (_, room) = harness.state.rooms().lock_live(&harness.code).await.unwrap();
        assert!(room.players.is_empty());
    }

    #[tokio::test]
    async fn close_room_ends_session_and_unregisters() {
        let harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;

        harness
            .host(ClientMessage::CloseRoom { reason: None })
            .await
            .unwrap();
        assert!(harness.state.rooms().get(&harness.code).is_none());

        let frames = drain(&mut alice.rx);
        assert_eq!(
            of_type(&frames, "room:closed")[0]["reason"],
            DEFAULT_CLOSE_REASON
        );

        harness.state.persistence().flush().await;
        let session = harness
            .store
            .get_session_by_code(harness.code.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Ended);

        let (conn, _rx) = test_connection();
        let err = join_room(&harness.state, &conn, &harness.code, None)
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Room not found");
    }

    #[tokio::test]
    async fn board_and_mode_changes_are_broadcast_and_persisted() {
        let mut harness = Harness::new().await;
        let mut alice = harness.join("Alice").await;
        drain(&mut harness.host_rx);

        harness
            .host(ClientMessage::SetBoard {
                board_id: Some("board-9".into()),
            })
            .await
            .unwrap();
        harness
            .host(ClientMessage::SetMode {
                mode: GameMode::Buzzer,
            })
            .await
            .unwrap();
        harness.host(ClientMessage::Sync).await.unwrap();

        let frames = drain(&mut alice.rx);
        assert_eq!(of_type(&frames, "board:selected")[0]["boardId"], "board-9");
        assert_eq!(of_type(&frames, "mode:changed")[0]["mode"], "buzzer");
        assert_eq!(of_type(&frames, "buzzer:locked").len(), 1);

        let host = drain(&mut harness.host_rx);
        assert_eq!(of_type(&host, "host:synced")[0]["playerCount"], 1);

        harness.state.persistence().flush().await;
        let session = harness
            .store
            .get_session_by_code(harness.code.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.board_id.as_deref(), Some("board-9"));
    }
}
