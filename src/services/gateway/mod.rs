mod session;

use crate::config::WsConfig;
use crate::services::conversation_service::ConversationService;
use crate::services::read_state_service::ReadStateService;
use crate::services::room::RoomChannel;
use axum::extract::ws::WebSocket;
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
};
use session::Session;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) active_connections: UpDownCounter<i64>,
    pub(crate) frames_sent_total: Counter<u64>,
    pub(crate) resyncs_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            active_connections: meter
                .i64_up_down_counter("parley_websocket_active_connections")
                .with_description("Number of active WebSocket connections")
                .build(),
            frames_sent_total: meter
                .u64_counter("parley_websocket_frames_sent_total")
                .with_description("Text frames pushed to clients")
                .build(),
            resyncs_total: meter
                .u64_counter("parley_websocket_resyncs_total")
                .with_description("Snapshots rebuilt from the store after lag or on request")
                .build(),
        }
    }
}

/// Accepts upgraded sockets and runs one room-backed session per connection.
#[derive(Clone, Debug)]
pub struct GatewayService {
    conversations: ConversationService,
    read_state: ReadStateService,
    rooms: RoomChannel,
    config: WsConfig,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        conversations: ConversationService,
        read_state: ReadStateService,
        rooms: RoomChannel,
        config: WsConfig,
    ) -> Self {
        Self { conversations, read_state, rooms, config, metrics: Metrics::new() }
    }

    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        user_id: Uuid,
        request_id: String,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        let session = Session {
            user_id,
            request_id,
            socket,
            context: self.rooms.context(),
            conversations: self.conversations.clone(),
            read_state: self.read_state.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            shutdown_rx,
        };

        session.run().await;
    }
}
