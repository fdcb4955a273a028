use crate::config::PubSubConfig;
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::Instrument;

pub mod room_repo;

pub use room_repo::RedisRoomTransport;

#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
enum ListenerCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Shared Redis handle: one multiplexed publisher plus a single background
/// listener holding exactly the channels this node asked for.
///
/// Messages on any of those channels are fanned out locally over one broadcast.
#[derive(Debug)]
pub struct RedisClient {
    publisher: redis::aio::ConnectionManager,
    commands: mpsc::UnboundedSender<ListenerCommand>,
    messages: broadcast::Sender<PubSubMessage>,
}

impl RedisClient {
    /// Connects the publisher and starts the channel listener.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn new(config: &PubSubConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<Arc<Self>> {
        let client = redis::Client::open(config.url.as_str())?;
        let publisher = client.get_connection_manager().await?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (messages, _) = broadcast::channel(config.global_channel_capacity.max(1));

        let listener = ChannelListener {
            client,
            commands: commands_rx,
            tx: messages.clone(),
            shutdown,
            channels: HashSet::new(),
            min_backoff: Duration::from_secs(config.min_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        };
        tokio::spawn(listener.run().instrument(tracing::debug_span!("pubsub_listener")));

        Ok(Arc::new(Self { publisher, commands, messages }))
    }

    #[must_use]
    pub fn publisher(&self) -> redis::aio::ConnectionManager {
        self.publisher.clone()
    }

    /// Asks the listener to `SUBSCRIBE` to `channel`. Repeated calls are no-ops.
    ///
    /// Returns before the subscription is live on the server.
    pub fn subscribe(&self, channel: impl Into<String>) {
        self.send(ListenerCommand::Subscribe(channel.into()));
    }

    /// Asks the listener to `UNSUBSCRIBE` from `channel`.
    pub fn unsubscribe(&self, channel: impl Into<String>) {
        self.send(ListenerCommand::Unsubscribe(channel.into()));
    }

    /// Every message arriving on a subscribed channel, from now on.
    #[must_use]
    pub fn messages(&self) -> broadcast::Receiver<PubSubMessage> {
        self.messages.subscribe()
    }

    /// # Errors
    /// Returns an error if the ping fails.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.publisher();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn send(&self, command: ListenerCommand) {
        if let Err(e) = self.commands.send(command) {
            tracing::warn!(command = ?e.0, "Pubsub listener is gone, dropping command");
        }
    }
}

struct ChannelListener {
    client: redis::Client,
    commands: mpsc::UnboundedReceiver<ListenerCommand>,
    tx: broadcast::Sender<PubSubMessage>,
    shutdown: watch::Receiver<bool>,
    /// Channels this node wants, restored on every reconnect.
    channels: HashSet<String>,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl ChannelListener {
    async fn run(mut self) {
        let retry_strategy =
            ExponentialBuilder::default().with_min_delay(self.min_backoff).with_max_delay(self.max_backoff);

        while !*self.shutdown.borrow() {
            let client = self.client.clone();
            let pubsub_result = (|| {
                let client = client.clone();
                async move { client.get_async_pubsub().await }
            })
            .retry(&retry_strategy)
            .notify(|e, duration| {
                tracing::warn!(error = %e, retry_in = ?duration, "Pubsub connect failed, retrying");
            })
            .await;

            let pubsub = match pubsub_result {
                Ok(ps) => ps,
                Err(e) => {
                    tracing::error!(error = %e, "Pubsub connection failed after retries");
                    break;
                }
            };

            let (mut sink, mut stream) = pubsub.split();

            let mut restored = Ok(());
            for channel in &self.channels {
                restored = sink.subscribe(channel).await;
                if restored.is_err() {
                    break;
                }
            }
            if let Err(e) = restored {
                tracing::warn!(error = %e, "Failed to restore pubsub channels, reconnecting");
                tokio::time::sleep(self.min_backoff).await;
                continue;
            }
            tracing::info!(channels = self.channels.len(), "Pubsub listener connected");

            loop {
                tokio::select! {
                    _ = self.shutdown.changed() => return,

                    command = self.commands.recv() => {
                        let Some(command) = command else {
                            tracing::debug!("Redis client dropped, pubsub listener exiting");
                            return;
                        };
                        if let Err(e) = self.apply(&mut sink, command).await {
                            tracing::warn!(error = %e, "Pubsub command failed, reconnecting");
                            break;
                        }
                    }

                    msg = stream.next() => {
                        let Some(msg) = msg else {
                            tracing::warn!("Pubsub connection lost, reconnecting");
                            break;
                        };
                        let message = PubSubMessage {
                            channel: msg.get_channel_name().to_string(),
                            payload: msg.get_payload().unwrap_or_default(),
                        };
                        // No local receivers is not an error here.
                        let _ = self.tx.send(message);
                    }
                }
            }
        }
    }

    /// Updates the wanted set first, so a failed command is repaired by the reconnect.
    async fn apply(&mut self, sink: &mut redis::aio::PubSubSink, command: ListenerCommand) -> redis::RedisResult<()> {
        match command {
            ListenerCommand::Subscribe(channel) => {
                if self.channels.insert(channel.clone()) {
                    sink.subscribe(&channel).await?;
                    tracing::debug!(%channel, "Subscribed to pubsub channel");
                }
            }
            ListenerCommand::Unsubscribe(channel) => {
                if self.channels.remove(&channel) {
                    sink.unsubscribe(&channel).await?;
                    tracing::debug!(%channel, "Unsubscribed from pubsub channel");
                }
            }
        }
        Ok(())
    }
}
