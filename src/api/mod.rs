use crate::api::rate_limit::log_rate_limit_events;
use crate::config::Config;
use crate::services::conversation_service::ConversationService;
use crate::services::delivery_service::DeliveryService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::rate_limit_service::RateLimitService;
use crate::services::read_state_service::ReadStateService;
use anyhow::anyhow;
use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod conversations;
pub mod gateway;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod rate_limit;
pub mod schemas;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub message_service: MessageService,
    pub conversation_service: ConversationService,
    pub read_state_service: ReadStateService,
    pub delivery_service: DeliveryService,
    pub gateway_service: GatewayService,
    pub rate_limit_service: RateLimitService,
    pub shutdown_rx: watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

/// Every service the public router needs, wired by [`crate::AppBuilder`].
#[derive(Clone, Debug)]
pub struct ServiceContainer {
    pub message_service: MessageService,
    pub conversation_service: ConversationService,
    pub read_state_service: ReadStateService,
    pub delivery_service: DeliveryService,
    pub gateway_service: GatewayService,
    pub rate_limit_service: RateLimitService,
}

/// Configures and returns the public API router.
///
/// # Errors
/// Returns an error if the rate limiter configuration is invalid.
pub fn app_router(config: Config, services: ServiceContainer, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<Router> {
    let interval_ns = 1_000_000_000 / config.rate_limit.per_second.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_nanosecond(u64::from(interval_ns))
            .burst_size(config.rate_limit.burst.max(1))
            .key_extractor(services.rate_limit_service.extractor.clone())
            .finish()
            .ok_or_else(|| anyhow!("invalid rate limiter configuration"))?,
    );

    let state = AppState {
        config,
        message_service: services.message_service,
        conversation_service: services.conversation_service,
        read_state_service: services.read_state_service,
        delivery_service: services.delivery_service,
        gateway_service: services.gateway_service,
        rate_limit_service: services.rate_limit_service,
        shutdown_rx,
    };

    let api_routes = Router::new()
        .route("/messages", post(messages::send_message).get(messages::list_messages))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{partnerId}/messages", get(conversations::get_thread))
        .route("/conversations/{partnerId}/read", post(conversations::mark_read))
        .route("/gateway", get(gateway::websocket_handler))
        .layer(GovernorLayer::new(governor_conf));

    Ok(Router::new()
        .nest("/v1", api_routes)
        .layer(from_fn_with_state(state.clone(), log_rate_limit_events))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<RequestId>()
                        .and_then(|id| id.header_value().to_str().ok())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                        "user_id" = tracing::field::Empty,
                    )
                })
                .on_response(|response: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                    let status = response.status();
                    span.record("http.response.status_code", status.as_u16());
                    tracing::info!(latency_ms = %latency.as_millis(), status = %status.as_u16(), "request completed");
                })
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER), middleware::MakeRequestUuidOrHeader))
        .with_state(state))
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
