#![allow(dead_code)]
use futures::{SinkExt, StreamExt};
use parley_server::adapters::database::{self, DbPool};
use parley_server::adapters::memory::{InMemoryIdentityDirectory, InMemoryMessageStore};
use parley_server::adapters::redis::RedisClient;
use parley_server::api::MgmtState;
use parley_server::config::Config;
use parley_server::domain::auth::Claims;
use parley_server::domain::identity::Identity;
use parley_server::{AppBuilder, telemetry};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

pub const TEST_SECRET: &str = "test_secret";

pub fn get_test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.mgmt_port = 0;
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.rate_limit.per_second = 10_000;
    config.rate_limit.burst = 10_000;
    config
}

pub async fn get_test_pool() -> DbPool {
    telemetry::init_test_telemetry();
    let mut config = Config::default().database;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.url = url;
    }
    config.min_connections = 0;

    let pool = database::init_pool(&config).await.expect("Failed to connect to DB. Is Postgres running?");

    // Run migrations automatically
    sqlx::migrate!().run(&pool).await.expect("Failed to run migrations");

    pool
}

/// Inserts a directory row so foreign keys on `messages` are satisfied.
pub async fn insert_user(pool: &DbPool, display_name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, display_name) VALUES ($1, $2)")
        .bind(id)
        .bind(display_name)
        .execute(pool)
        .await
        .expect("Failed to insert user");
    id
}

pub async fn get_test_pubsub(shutdown_rx: watch::Receiver<bool>) -> Arc<RedisClient> {
    telemetry::init_test_telemetry();
    let mut config = Config::default().pubsub;
    if let Ok(url) = std::env::var("REDIS_URL") {
        config.url = url;
    }
    RedisClient::new(&config, shutdown_rx).await.expect("Failed to connect to Redis. Is it running?")
}

/// Subscriber connections Redis reports for `channel`.
pub async fn numsub(redis: &RedisClient, channel: &str) -> i64 {
    let mut conn = redis.publisher();
    let (_, count): (String, i64) =
        redis::cmd("PUBSUB").arg("NUMSUB").arg(channel).query_async(&mut conn).await.unwrap();
    count
}

/// Polls until Redis reports `expected` subscribers on `channel`.
pub async fn wait_for_numsub(redis: &RedisClient, channel: &str, expected: i64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = numsub(redis, channel).await;
        if current == expected {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "{channel} has {current} subscribers, expected {expected}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

pub struct TestApp {
    pub config: Config,
    pub server_url: String,
    pub mgmt_url: String,
    pub ws_url: String,
    pub client: reqwest::Client,
    pub store: InMemoryMessageStore,
    pub directory: InMemoryIdentityDirectory,
    shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(get_test_config()).await
    }

    /// Runs the full router stack over in-memory adapters on ephemeral ports.
    pub async fn spawn_with_config(config: Config) -> Self {
        telemetry::init_test_telemetry();

        let store = InMemoryMessageStore::new();
        let directory = InMemoryIdentityDirectory::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let app = AppBuilder::new(config.clone())
            .with_message_store(Arc::new(store.clone()))
            .with_identity_directory(Arc::new(directory.clone()))
            .with_shutdown_rx(shutdown_rx.clone())
            .build()
            .unwrap();

        let _ = app.workers.spawn_all();

        let router = parley_server::api::app_router(config.clone(), app.services, shutdown_rx.clone()).unwrap();
        let mgmt_router = parley_server::api::mgmt_router(MgmtState { health_service: app.health_service });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mgmt_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mgmt_addr = mgmt_listener.local_addr().unwrap();

        let mut api_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = api_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        let mut mgmt_rx = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(mgmt_listener, mgmt_router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = mgmt_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        Self {
            config,
            server_url: format!("http://{addr}"),
            mgmt_url: format!("http://{mgmt_addr}"),
            ws_url: format!("ws://{addr}/v1/gateway"),
            client: reqwest::Client::new(),
            store,
            directory,
            shutdown_tx,
        }
    }

    pub fn register_user(&self, display_name: &str) -> TestUser {
        let id = Uuid::now_v7();
        self.directory.register(Identity { id, display_name: display_name.to_string(), avatar_url: None });
        TestUser { id, token: self.token_for(id) }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        Claims::new(user_id, 3600).encode(&self.config.auth.jwt_secret).unwrap()
    }

    pub async fn send_message(&self, sender: &TestUser, recipient: Uuid, content: &str) -> reqwest::Response {
        self.send_json(sender, serde_json::json!({ "recipientId": recipient, "content": content })).await
    }

    pub async fn send_json(&self, sender: &TestUser, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/messages", self.server_url))
            .bearer_auth(&sender.token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn get_json(&self, user: &TestUser, path: &str) -> (reqwest::StatusCode, Value) {
        let resp = self.client.get(format!("{}{path}", self.server_url)).bearer_auth(&user.token).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn post_empty(&self, user: &TestUser, path: &str) -> (reqwest::StatusCode, Value) {
        let resp = self.client.post(format!("{}{path}", self.server_url)).bearer_auth(&user.token).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn connect_ws(&self, token: &str) -> TestClient {
        let (stream, _) = connect_async(format!("{}?token={token}", self.ws_url)).await.unwrap();
        TestClient { stream }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct TestClient {
    pub stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Next text frame decoded as JSON, skipping control frames.
    pub async fn receive_json_timeout(&mut self, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.stream.next()).await.ok()??;
            match msg {
                Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Binary(_)) => {}
                Ok(Message::Close(_)) | Err(_) => return None,
            }
        }
    }

    pub async fn receive_raw_timeout(&mut self, timeout: Duration) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
        tokio::time::timeout(timeout, self.stream.next()).await.ok().flatten()
    }

    /// Waits for a frame with the given `type`, discarding others.
    pub async fn expect_frame(&mut self, frame_type: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self
                .receive_json_timeout(remaining)
                .await
                .unwrap_or_else(|| panic!("timed out waiting for {frame_type} frame"));
            if frame["type"] == frame_type {
                return frame;
            }
        }
    }

    pub async fn send_json(&mut self, value: &Value) {
        self.stream.send(Message::Text(value.to_string().into())).await.unwrap();
    }
}
