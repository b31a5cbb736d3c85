use serde::Serialize;
use utoipa::ToSchema;

/// Whether durable session storage is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Storage reachable, room creation accepted.
    Ok,
    /// Storage unreachable. Live rooms keep running but `host:create` is refused.
    Degraded,
}

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Rooms currently held in memory.
    pub rooms: usize,
}

impl HealthResponse {
    pub fn new(degraded: bool, rooms: usize) -> Self {
        let status = if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        Self { status, rooms }
    }
}
