//! Liveness monitor.
//!
//! Periodically sweeps every room: players that stopped sending keepalives are evicted,
//! stale host sockets are detached, and rooms without host activity for the inactivity
//! window are torn down.

use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    config::LivenessConfig,
    dto::ws::ServerMessage,
    services::persistence::PersistCommand,
    state::{RoomHandle, SharedState, room::Room},
};

/// Reason attached to notices sent when an idle room is torn down.
pub const INACTIVITY_REASON: &str = "Room closed due to inactivity";

/// What a single sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted_players: usize,
    pub detached_hosts: usize,
    pub removed_rooms: usize,
}

/// Background task enforcing keepalive timeouts and room garbage collection.
pub struct LivenessMonitor {
    state: SharedState,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(state: SharedState) -> Self {
        let config = state.config().liveness.clone();
        info!(
            player_timeout = ?config.player_timeout,
            host_timeout = ?config.host_timeout,
            sweep_interval = ?config.sweep_interval,
            "liveness monitor configured"
        );
        Self { state, config }
    }

    /// Sweep forever on the configured interval.
    pub async fn run(self) {
        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = self.sweep(Instant::now()).await;
            if report != SweepReport::default() {
                info!(
                    evicted_players = report.evicted_players,
                    detached_hosts = report.detached_hosts,
                    removed_rooms = report.removed_rooms,
                    "liveness sweep finished"
                );
            } else {
                debug!(rooms = self.state.rooms().len(), "liveness sweep found nothing to do");
            }
        }
    }

    /// Run one sweep against `now`.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for (code, handle) in self.state.rooms().handles() {
            let mut room = handle.lock().await;

            if now.saturating_duration_since(room.last_host_activity) > self.config.room_inactivity {
                warn!(code = %code, "tearing down room after host inactivity");
                room.sequence.reset();
                room.close_all(INACTIVITY_REASON);
                if self.state.rooms().remove_if_same(&code, &handle) {
                    report.removed_rooms += 1;
                }
                continue;
            }

            report.evicted_players += self.evict_stale_players(&code, &mut room, now);

            let host_stale = room.host.is_some()
                && now.saturating_duration_since(room.last_host_activity)
                    > self.config.host_timeout;
            if host_stale {
                if let Some(host) = room.host.take() {
                    host.close("keepalive timeout");
                }
                info!(code = %code, "detached silent host");
                report.detached_hosts += 1;
            }

            if release_if_abandoned(&self.state, &code, &handle, &mut room) {
                report.removed_rooms += 1;
            }
        }

        report
    }

    fn evict_stale_players(&self, code: &str, room: &mut Room, now: Instant) -> usize {
        let stale: Vec<String> = room
            .players
            .values()
            .filter(|player| {
                now.saturating_duration_since(player.last_seen) > self.config.player_timeout
            })
            .map(|player| player.id.clone())
            .collect();

        for player_id in &stale {
            let Some(player) = room.remove_player(player_id) else {
                continue;
            };
            if let Some(connection) = player.connection {
                connection.close("keepalive timeout");
            }
            info!(code = %code, player_id = %player_id, "evicted silent player");

            // The durable row and its score stay behind for a later rejoin.
            self.state.persist(PersistCommand::Connection {
                session_id: room.session_id,
                player_id: player_id.clone(),
                connected: false,
            });
            room.send_to_host(&ServerMessage::PlayerLeft {
                player_id: player_id.clone(),
                reason: "timeout".into(),
            });
        }

        if !stale.is_empty() {
            room.broadcast_roster();
        }
        stale.len()
    }
}

/// Remove `room` from the registry when it has neither a host socket nor players.
pub fn release_if_abandoned(
    state: &SharedState,
    code: &str,
    handle: &RoomHandle,
    room: &mut Room,
) -> bool {
    if !room.is_abandoned() {
        return false;
    }
    room.sequence.reset();
    let removed = state.rooms().remove_if_same(code, handle);
    if removed {
        info!(code = %code, "removed abandoned room");
    }
    removed
}
