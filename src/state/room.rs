//! Live state of one game room: host and player connections, roster, buzzer and sub-game.

use std::time::SystemTime;

use axum::extract::ws::{CloseFrame, Message, close_code};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::Instant};
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionModeEntity, SessionPlayerEntity},
    dto::{
        room::{LeaderboardEntry, PlayerSummary, RoomSnapshot},
        ws::ServerMessage,
    },
    services::websocket_service::send_message_to_websocket,
    state::{buzzer::BuzzerState, sequence::SequenceGame},
};

/// Game mode the room is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum GameMode {
    #[default]
    Lobby,
    Buzzer,
    Sequence,
}

impl From<SessionModeEntity> for GameMode {
    fn from(mode: SessionModeEntity) -> Self {
        match mode {
            SessionModeEntity::Lobby => GameMode::Lobby,
            SessionModeEntity::Buzzer => GameMode::Buzzer,
            SessionModeEntity::Sequence => GameMode::Sequence,
        }
    }
}

impl From<GameMode> for SessionModeEntity {
    fn from(mode: GameMode) -> Self {
        match mode {
            GameMode::Lobby => SessionModeEntity::Lobby,
            GameMode::Buzzer => SessionModeEntity::Buzzer,
            GameMode::Sequence => SessionModeEntity::Sequence,
        }
    }
}

#[derive(Clone, Debug)]
/// Handle used to push messages to one WebSocket.
pub struct Connection {
    pub id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub fn new(id: Uuid, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, tx }
    }

    /// Queue `message` on the socket. Returns `false` once the writer is gone.
    pub fn send(&self, message: &ServerMessage) -> bool {
        send_message_to_websocket(&self.tx, message).is_ok()
    }

    /// Ask the writer to close the socket with a normal close code.
    pub fn close(&self, reason: &str) {
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: reason.into(),
        })));
    }
}

/// A participant of a room.
#[derive(Debug)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub score: i32,
    pub reconnect_token: String,
    pub connection: Option<Connection>,
    pub last_seen: Instant,
}

impl Player {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Durable row for this player.
    pub fn to_entity(&self, session_id: Uuid) -> SessionPlayerEntity {
        SessionPlayerEntity {
            session_id,
            player_id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            score: self.score,
            reconnect_token: self.reconnect_token.clone(),
            is_connected: self.is_connected(),
            updated_at: SystemTime::now(),
        }
    }

    /// Rebuild a player from its durable row, without a socket.
    pub fn from_entity(entity: SessionPlayerEntity, now: Instant) -> Self {
        Self {
            id: entity.player_id,
            name: entity.name,
            avatar: entity.avatar,
            score: entity.score,
            reconnect_token: entity.reconnect_token,
            connection: None,
            last_seen: now,
        }
    }
}

/// One live game instance.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub session_id: Uuid,
    pub host_id: String,
    pub host: Option<Connection>,
    pub last_host_activity: Instant,
    pub mode: GameMode,
    pub board_id: Option<String>,
    pub completed_questions: IndexSet<String>,
    pub buzzer: BuzzerState,
    pub players: IndexMap<String, Player>,
    /// Set by `host:endGame`, cleared by `host:startNextGrid`.
    pub game_ended: bool,
    pub sequence: SequenceGame,
}

impl Room {
    pub fn new(code: String, session_id: Uuid, host_id: String, now: Instant) -> Self {
        Self {
            code,
            session_id,
            host_id,
            host: None,
            last_host_activity: now,
            mode: GameMode::Lobby,
            board_id: None,
            completed_questions: IndexSet::new(),
            buzzer: BuzzerState::new(),
            players: IndexMap::new(),
            game_ended: false,
            sequence: SequenceGame::new(),
        }
    }

    /// Rebuild a room from its persisted session. Players come back without sockets.
    pub fn from_persisted(
        session: SessionEntity,
        players: Vec<SessionPlayerEntity>,
        completed_questions: Vec<String>,
        now: Instant,
    ) -> Self {
        let mut room = Self::new(session.code, session.id, session.host_id, now);
        room.mode = session.mode.into();
        room.board_id = session.board_id;
        room.completed_questions = session
            .completed_questions
            .into_iter()
            .chain(completed_questions)
            .collect();
        room.players = players
            .into_iter()
            .map(|entity| (entity.player_id.clone(), Player::from_entity(entity, now)))
            .collect();
        if room.mode == GameMode::Sequence {
            room.seed_sequence_ledger();
        }
        room
    }

    pub fn touch_host(&mut self, now: Instant) {
        self.last_host_activity = now;
    }

    /// Install `connection` as the host socket, returning the one it replaces.
    pub fn attach_host(&mut self, connection: Connection, now: Instant) -> Option<Connection> {
        self.last_host_activity = now;
        self.host.replace(connection)
    }

    /// Drop the host socket if it is still `connection_id`.
    pub fn detach_host(&mut self, connection_id: Uuid) -> bool {
        if self.host.as_ref().is_some_and(|host| host.id == connection_id) {
            self.host = None;
            return true;
        }
        false
    }

    /// Neither a host socket nor any player left.
    pub fn is_abandoned(&self) -> bool {
        self.host.is_none() && self.players.is_empty()
    }

    pub fn connected_players(&self) -> usize {
        self.players.values().filter(|p| p.is_connected()).count()
    }

    /// Remove a player from the live roster and from the buzzer bookkeeping.
    pub fn remove_player(&mut self, player_id: &str) -> Option<Player> {
        let player = self.players.shift_remove(player_id)?;
        self.buzzer.forget(player_id);
        Some(player)
    }

    /// Track every live player in the sub-game ledger.
    pub fn seed_sequence_ledger(&mut self) {
        let Self {
            players, sequence, ..
        } = self;
        sequence.seed_ledger(
            players
                .values()
                .map(|p| (p.id.as_str(), p.name.as_str(), p.score)),
        );
    }

    pub fn roster(&self) -> Vec<PlayerSummary> {
        self.players.values().map(PlayerSummary::from).collect()
    }

    /// Live scores sorted descending.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .players
            .values()
            .map(|player| LeaderboardEntry {
                player_id: player.id.clone(),
                name: player.name.clone(),
                score: player.score,
            })
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            session_id: self.session_id,
            host_id: self.host_id.clone(),
            players: self.roster(),
            locked: self.buzzer.is_locked(),
            board_id: self.board_id.clone(),
            mode: self.mode,
            completed_questions: self.completed_questions.iter().cloned().collect(),
            buzz_queue: self.buzzer.queue().to_vec(),
            game_ended: self.game_ended,
            sequence_phase: self.sequence.phase(),
        }
    }

    pub fn send_to_host(&self, message: &ServerMessage) {
        if let Some(host) = &self.host {
            host.send(message);
        }
    }

    /// Returns `false` when the player is unknown or has no socket.
    pub fn send_to_player(&self, player_id: &str, message: &ServerMessage) -> bool {
        self.players
            .get(player_id)
            .and_then(|player| player.connection.as_ref())
            .is_some_and(|connection| connection.send(message))
    }

    pub fn broadcast_players(&self, message: &ServerMessage) {
        for connection in self.players.values().filter_map(|p| p.connection.as_ref()) {
            connection.send(message);
        }
    }

    /// Push the current roster to every connected player.
    pub fn broadcast_roster(&self) {
        self.broadcast_players(&ServerMessage::PlayersUpdated {
            players: self.roster(),
        });
    }

    /// Notify every player socket that the room is closing, then close it.
    ///
    /// Players stay in the roster, detached. The host socket is left alone.
    pub fn close_players(&mut self, reason: &str) {
        let notice = ServerMessage::RoomClosed {
            reason: reason.to_string(),
        };
        for player in self.players.values_mut() {
            if let Some(connection) = player.connection.take() {
                connection.send(&notice);
                connection.close(reason);
            }
        }
    }

    /// Send a closing notice to every socket of the room and close them.
    pub fn close_all(&mut self, reason: &str) {
        self.close_players(reason);
        if let Some(host) = self.host.take() {
            let notice = ServerMessage::RoomClosed {
                reason: reason.to_string(),
            };
            host.send(&notice);
            host.close(reason);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dao::models::SessionStatus;

    /// Connection whose outbound frames land in the returned receiver.
    pub(crate) fn test_connection() -> (Connection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(Uuid::new_v4(), tx), rx)
    }

    fn player(id: &str, score: i32) -> Player {
        Player {
            id: id.into(),
            name: id.to_uppercase(),
            avatar: "cat".into(),
            score,
            reconnect_token: format!("token-{id}"),
            connection: None,
            last_seen: Instant::now(),
        }
    }

    #[test]
    fn restored_players_have_no_socket() {
        let mut session = SessionEntity::new("AB2C".into(), "host".into());
        session.mode = SessionModeEntity::Buzzer;
        session.status = SessionStatus::Active;
        let id = session.id;
        let rows = vec![SessionPlayerEntity {
            session_id: id,
            player_id: "p1".into(),
            name: "Alice".into(),
            avatar: "fox".into(),
            score: 12,
            reconnect_token: "secret".into(),
            is_connected: true,
            updated_at: SystemTime::now(),
        }];

        let room = Room::from_persisted(session, rows, vec!["q1".into()], Instant::now());
        assert_eq!(room.mode, GameMode::Buzzer);
        assert_eq!(room.players["p1"].score, 12);
        assert!(!room.players["p1"].is_connected());
        assert!(room.completed_questions.contains("q1"));
        assert!(room.buzzer.is_locked());
    }

    #[test]
    fn detach_ignores_replaced_host_socket() {
        let mut room = Room::new("AB2C".into(), Uuid::new_v4(), "host".into(), Instant::now());
        let (first, _rx1) = test_connection();
        let (second, _rx2) = test_connection();
        let first_id = first.id;

        room.attach_host(first, Instant::now());
        let replaced = room.attach_host(second, Instant::now());
        assert_eq!(replaced.map(|c| c.id), Some(first_id));

        assert!(!room.detach_host(first_id));
        assert!(room.host.is_some());
    }

    #[test]
    fn leaderboard_sorts_live_scores() {
        let mut room = Room::new("AB2C".into(), Uuid::new_v4(), "host".into(), Instant::now());
        room.players.insert("a".into(), player("a", 3));
        room.players.insert("b".into(), player("b", 7));
        let ids: Vec<_> = room
            .leaderboard()
            .into_iter()
            .map(|entry| entry.player_id)
            .collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn close_players_leaves_the_host_socket_open() {
        let mut room = Room::new("AB2C".into(), Uuid::new_v4(), "host".into(), Instant::now());
        let (host, mut host_rx) = test_connection();
        room.attach_host(host, Instant::now());
        let (conn, mut rx) = test_connection();
        let mut alice = player("a", 0);
        alice.connection = Some(conn);
        room.players.insert("a".into(), alice);

        room.close_players("bye");

        assert!(matches!(rx.try_recv(), Ok(Message::Text(_))));
        assert!(matches!(rx.try_recv(), Ok(Message::Close(Some(_)))));
        assert!(room.host.is_some());
        assert!(host_rx.try_recv().is_err());
        assert!(!room.players["a"].is_connected());
    }

    #[test]
    fn close_all_notifies_and_closes_sockets() {
        let mut room = Room::new("AB2C".into(), Uuid::new_v4(), "host".into(), Instant::now());
        let (conn, mut rx) = test_connection();
        let mut alice = player("a", 0);
        alice.connection = Some(conn);
        room.players.insert("a".into(), alice);

        room.close_all("bye");

        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected room:closed");
        };
        assert!(text.as_str().contains("room:closed"));
        assert!(matches!(rx.try_recv(), Ok(Message::Close(Some(_)))));
        assert!(!room.players["a"].is_connected());
    }
}
