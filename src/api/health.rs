use crate::api::MgmtState;
use crate::api::schemas::health::HealthResponse;
use crate::services::health_service::ComponentStatus;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

/// Liveness probe: 200 as long as the process serves requests.
pub async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe: checks every configured backend. Unconfigured ones report `disabled`.
pub async fn readyz(State(state): State<MgmtState>) -> impl IntoResponse {
    let (db_res, pubsub_res) = tokio::join!(state.health_service.check_db(), state.health_service.check_pubsub());

    let database = component_status("database", db_res);
    let pubsub = component_status("pubsub", pubsub_res);

    let healthy = database != "error" && pubsub != "error";
    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "error" }.to_string(),
        database: database.to_string(),
        pubsub: pubsub.to_string(),
    };

    (status_code, Json(response))
}

fn component_status(component: &'static str, result: Result<ComponentStatus, String>) -> &'static str {
    match result {
        Ok(status) => status.as_str(),
        Err(e) => {
            tracing::warn!(error = %e, component, "Readiness probe failed");
            "error"
        }
    }
}
