use crate::adapters::database::DbPool;
use crate::adapters::redis::RedisClient;
use crate::config::HealthConfig;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone, Debug)]
struct Metrics {
    status: Gauge<i64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            status: meter
                .i64_gauge("parley_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

/// Outcome of a probe that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Ok,
    /// The component is not configured on this node.
    Disabled,
}

impl ComponentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthService {
    pool: Option<DbPool>,
    pubsub: Option<Arc<RedisClient>>,
    config: HealthConfig,
    metrics: Metrics,
}

impl HealthService {
    #[must_use]
    pub fn new(pool: Option<DbPool>, pubsub: Option<Arc<RedisClient>>, config: HealthConfig) -> Self {
        Self { pool, pubsub, config, metrics: Metrics::new() }
    }

    /// # Errors
    /// Returns a string describing the failure if the database is unreachable.
    pub async fn check_db(&self) -> Result<ComponentStatus, String> {
        let Some(pool) = &self.pool else {
            return Ok(ComponentStatus::Disabled);
        };
        let db_timeout = Duration::from_millis(self.config.db_timeout_ms);

        let result = match timeout(db_timeout, sqlx::query("SELECT 1").execute(pool)).await {
            Ok(Ok(_)) => Ok(ComponentStatus::Ok),
            Ok(Err(e)) => Err(format!("Database connection failed: {e:?}")),
            Err(_) => Err("Database connection timed out".to_string()),
        };
        self.record("database", result.is_ok());
        result
    }

    /// # Errors
    /// Returns a string describing the failure if `PubSub` is unreachable.
    pub async fn check_pubsub(&self) -> Result<ComponentStatus, String> {
        let Some(pubsub) = &self.pubsub else {
            return Ok(ComponentStatus::Disabled);
        };
        let pubsub_timeout = Duration::from_millis(self.config.pubsub_timeout_ms);

        let result = match timeout(pubsub_timeout, pubsub.ping()).await {
            Ok(Ok(())) => Ok(ComponentStatus::Ok),
            Ok(Err(e)) => Err(format!("PubSub connection failed: {e:?}")),
            Err(_) => Err("PubSub connection timed out".to_string()),
        };
        self.record("pubsub", result.is_ok());
        result
    }

    fn record(&self, component: &'static str, healthy: bool) {
        self.metrics.status.record(i64::from(healthy), &[KeyValue::new("component", component)]);
    }
}
