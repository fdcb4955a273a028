use crate::api::AppState;
use axum::{
    extract::{Request, State},
    http::header::RETRY_AFTER,
    middleware::Next,
    response::Response,
};

/// Records every limiter decision. Throttled responses carry `Retry-After` from the governor layer.
pub async fn log_rate_limit_events(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    let retry_after = response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok());
    state.rate_limit_service.log_decision(response.status(), retry_after);
    response
}
