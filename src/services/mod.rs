/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Host actions: room creation, buzzer control and room management.
pub mod host_service;
/// Keepalive timeouts and idle room cleanup.
pub mod liveness;
/// Ordered fire-and-forget writes to the session store.
pub mod persistence;
/// Player actions: join, reconnection, buzzing and leaving.
pub mod player_service;
/// Ranked-submission sub-game handlers and round timers.
pub mod sequence_service;
/// Session store connection supervisor.
pub mod storage_supervisor;
/// WebSocket connection gateway and message routing.
pub mod websocket_service;

#[cfg(test)]
pub(crate) mod testing;
