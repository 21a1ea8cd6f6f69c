use crate::error::MessagingError;
use crate::message::Message;
use crate::status::{ConnectionMonitor, ConnectionStatus};
use crate::transport::{MessageStream, Transport};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info};

/// [`Transport`] over Redis `PUBLISH`/`SUBSCRIBE`.
///
/// Publishing goes through the shared connection manager; every subscription
/// opens its own pub/sub connection, which Redis requires.
#[derive(Clone)]
pub struct RedisTransport {
    client: Client,
    manager: ConnectionManager,
    monitor: ConnectionMonitor,
}

impl RedisTransport {
    pub(crate) fn new(client: Client, manager: ConnectionManager, monitor: ConnectionMonitor) -> Self {
        Self {
            client,
            manager,
            monitor,
        }
    }

    fn check_open(&self) -> Result<(), MessagingError> {
        if self.monitor.is_closed() {
            return Err(MessagingError::Closed);
        }
        Ok(())
    }

    fn failure(&self, err: ::redis::RedisError) -> MessagingError {
        let err = MessagingError::from(err);
        if err.is_connectivity() {
            self.monitor.disconnected(err.to_string());
        }
        err
    }
}

async fn closed(mut status: watch::Receiver<ConnectionStatus>) {
    let _ = status
        .wait_for(|s| matches!(s, ConnectionStatus::Closed))
        .await;
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, message: &Message) -> Result<usize, MessagingError> {
        self.check_open()?;
        let wire = message.to_wire()?;
        let mut conn = self.manager.clone();
        let receivers: usize = conn
            .publish(channel, wire)
            .await
            .map_err(|e| self.failure(e))?;
        debug!(channel = %channel, receivers = receivers, "PUBLISH");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, MessagingError> {
        self.check_open()?;
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| self.failure(e))?;
        pubsub.subscribe(channel).await.map_err(|e| self.failure(e))?;
        info!(channel = %channel, "Subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| {
                msg.get_payload::<String>()
                    .map(Message::from_wire)
                    .map_err(MessagingError::from)
            })
            .take_until(closed(self.monitor.watch()));

        Ok(Box::pin(stream))
    }

    fn monitor(&self) -> ConnectionMonitor {
        self.monitor.clone()
    }
}
