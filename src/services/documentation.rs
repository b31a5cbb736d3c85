use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the trivia room backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
    ),
    components(schemas(
        crate::dto::health::HealthResponse,
        crate::dto::health::HealthStatus,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "WebSocket endpoint shared by hosts and players"),
    )
)]
pub struct ApiDoc;
