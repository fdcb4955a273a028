use crate::api::schemas::gateway::{ClientFrame, ServerFrame};
use crate::config::WsConfig;
use crate::domain::conversation::ConversationIndex;
use crate::domain::message::Message;
use crate::domain::room::{RoomEvent, RoomId};
use crate::services::conversation_service::ConversationService;
use crate::services::gateway::Metrics;
use crate::services::read_state_service::ReadStateService;
use crate::services::room::{RoomContext, RoomSignal};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use opentelemetry::KeyValue;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

type WsSink = SplitSink<WebSocket, WsMessage>;

pub(super) struct Session {
    pub(super) user_id: Uuid,
    pub(super) request_id: String,
    pub(super) socket: WebSocket,
    pub(super) context: RoomContext,
    pub(super) conversations: ConversationService,
    pub(super) read_state: ReadStateService,
    pub(super) metrics: Metrics,
    pub(super) config: WsConfig,
    pub(super) shutdown_rx: watch::Receiver<bool>,
}

/// What the loop should do after handling one input.
enum Flow {
    Continue,
    Close,
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.user_id,
            request_id = %self.request_id,
            otel.kind = "server",
            ws.session_id = %Uuid::new_v4()
        )
    )]
    pub(super) async fn run(self) {
        let Self { user_id, socket, mut context, conversations, read_state, metrics, config, mut shutdown_rx, .. } =
            self;

        metrics.active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        let (mut ws_sink, mut ws_stream) = socket.split();

        // Join before seeding so nothing stored in between goes unseen.
        context.join_room(RoomId::for_user(user_id));

        let mut index = match conversations.index(user_id).await {
            Ok(index) => index,
            Err(e) => {
                tracing::error!(error = %e, "Failed to seed conversation index");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "Message store unavailable".into(),
                    })))
                    .await;
                context.leave_room();
                metrics.active_connections.add(-1, &[]);
                return;
            }
        };

        let mut flow = send_frame(&mut ws_sink, &snapshot(&index), &metrics).await;

        let period = Duration::from_secs(config.ping_interval_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while matches!(flow, Flow::Continue) {
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            flow = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => if changed.is_ok() { Flow::Continue } else { Flow::Close },

                msg = ws_stream.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                        Ok(ClientFrame::MarkRead { partner_id }) => {
                            // The outcome comes back through the room as a read-state event.
                            let _ = read_state.mark_read_detached(user_id, partner_id);
                            Flow::Continue
                        }
                        Ok(ClientFrame::Resync) => {
                            resync(&mut ws_sink, &mut index, &conversations, user_id, &metrics, "requested").await
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to decode client frame");
                            Flow::Continue
                        }
                    },
                    Some(Ok(WsMessage::Binary(_))) => {
                        tracing::warn!("Received unexpected binary frame");
                        Flow::Continue
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => Flow::Continue,
                    Some(Ok(WsMessage::Close(_)) | Err(_)) | None => Flow::Close,
                },

                signal = context.recv() => match signal {
                    RoomSignal::Event { event: RoomEvent::MessageReceived { message }, .. } => {
                        let stored = Message::from(message.clone());
                        index.apply(&stored);
                        let frame = ServerFrame::MessageReceived {
                            conversation: index.get(stored.partner_of(user_id)).cloned().map(Into::into),
                            message,
                            total_unread: index.total_unread(),
                        };
                        send_frame(&mut ws_sink, &frame, &metrics).await
                    }
                    RoomSignal::Event { event: RoomEvent::ReadStateChanged { partner_id, count, read_through }, .. } => {
                        index.mark_read(partner_id, read_through);
                        let frame = ServerFrame::ReadStateChanged { partner_id, count, total_unread: index.total_unread() };
                        send_frame(&mut ws_sink, &frame, &metrics).await
                    }
                    RoomSignal::Lagged { missed, .. } => {
                        tracing::warn!(missed, "Session lagged behind its room, resyncing from store");
                        resync(&mut ws_sink, &mut index, &conversations, user_id, &metrics, "lagged").await
                    }
                },

                _ = heartbeat.tick() => {
                    if ws_sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() { Flow::Close } else { Flow::Continue }
                }
            };
        }

        let _ = ws_sink.close().await;
        context.leave_room();

        metrics.active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}

fn snapshot(index: &ConversationIndex) -> ServerFrame {
    ServerFrame::Snapshot {
        conversations: index.summaries().into_iter().map(Into::into).collect(),
        total_unread: index.total_unread(),
    }
}

/// Rebuilds the index from the store, which stays authoritative, and pushes a fresh snapshot.
async fn resync(
    ws_sink: &mut WsSink,
    index: &mut ConversationIndex,
    conversations: &ConversationService,
    user_id: Uuid,
    metrics: &Metrics,
    reason: &'static str,
) -> Flow {
    metrics.resyncs_total.add(1, &[KeyValue::new("reason", reason)]);
    match conversations.index(user_id).await {
        Ok(fresh) => {
            *index = fresh;
            send_frame(ws_sink, &snapshot(index), metrics).await
        }
        Err(e) => {
            // Keep the stale index; the next push or resync retries.
            tracing::warn!(error = %e, "Resync failed");
            Flow::Continue
        }
    }
}

async fn send_frame(ws_sink: &mut WsSink, frame: &ServerFrame, metrics: &Metrics) -> Flow {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode gateway frame");
            return Flow::Continue;
        }
    };

    if ws_sink.send(WsMessage::Text(text.into())).await.is_err() {
        return Flow::Close;
    }
    metrics.frames_sent_total.add(1, &[]);
    Flow::Continue
}
