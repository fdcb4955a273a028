use crate::api::AppState;
use crate::api::schemas::gateway::WsParams;
use crate::domain::auth::Claims;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{Extensions, StatusCode},
    response::IntoResponse,
};
use tower_http::request_id::RequestId;

/// Upgrades to a WebSocket bound to the caller's room.
///
/// Browsers cannot set headers on the upgrade request, so the JWT rides in `?token=`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    extensions: Extensions,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let request_id = extensions
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    match Claims::decode(&params.token, &state.config.auth.jwt_secret) {
        Ok(claims) => {
            let gateway = state.gateway_service.clone();
            let shutdown_rx = state.shutdown_rx.clone();
            ws.on_upgrade(move |socket| async move {
                gateway.handle_socket(socket, claims.sub, request_id, shutdown_rx).await;
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake failed: invalid token");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
