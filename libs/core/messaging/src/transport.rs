//! Pub/sub transport collaborator.

use crate::error::MessagingError;
use crate::message::Message;
use crate::status::{ConnectionMonitor, ConnectionStatus};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Messages arriving on one subscribed channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, MessagingError>> + Send>>;

/// Cross-process publish/subscribe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message, returning how many receivers got it.
    async fn publish(&self, channel: &str, message: &Message) -> Result<usize, MessagingError>;

    /// Open a long-lived subscription on `channel`.
    ///
    /// The stream ends when the underlying connection goes away.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, MessagingError>;

    /// Connection status of this transport.
    fn monitor(&self) -> ConnectionMonitor;
}

const CHANNEL_CAPACITY: usize = 256;

/// In-process transport built on tokio broadcast channels.
///
/// Messages are carried in their wire form so they decode exactly like they
/// would coming from Redis. The transport can be taken offline, which ends
/// every open subscription and makes later calls fail with a connectivity
/// error.
pub struct MemoryTransport {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    monitor: ConnectionMonitor,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            monitor: ConnectionMonitor::local("memory transport"),
        }
    }

    /// Take the transport offline or bring it back.
    pub fn set_online(&self, online: bool) {
        if online {
            self.monitor.connected();
        } else {
            if let Ok(mut channels) = self.channels.lock() {
                channels.clear();
            }
            self.monitor.disconnected("transport offline");
        }
    }

    pub fn close(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
        self.monitor.closed();
    }

    fn check_online(&self) -> Result<(), MessagingError> {
        match self.monitor.status() {
            ConnectionStatus::Closed => Err(MessagingError::Closed),
            ConnectionStatus::Disconnected { reason } => Err(MessagingError::Connectivity(reason)),
            _ => Ok(()),
        }
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>, MessagingError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| MessagingError::connectivity("memory transport lock poisoned"))?;
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, message: &Message) -> Result<usize, MessagingError> {
        self.check_online()?;
        let wire = message.to_wire()?;
        // send only fails when nobody is listening
        let receivers = self.sender(channel)?.send(wire).unwrap_or(0);
        debug!(channel = %channel, receivers = receivers, "Published on memory transport");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, MessagingError> {
        self.check_online()?;
        let rx = self.sender(channel)?.subscribe();
        let channel = channel.to_string();

        let stream = stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(raw) => return Some((Ok(Message::from_wire(raw)), rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped = skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn monitor(&self) -> ConnectionMonitor {
        self.monitor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let transport = MemoryTransport::new();
        let receivers = transport.publish("ALX channel", &"hello".into()).await.unwrap();
        assert_eq!(receivers, 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_in_order() {
        let transport = MemoryTransport::new();
        let mut stream = transport.subscribe("ALX channel").await.unwrap();

        assert_eq!(transport.publish("ALX channel", &"one".into()).await.unwrap(), 1);
        transport
            .publish("ALX channel", &Message::json(json!({"n": 2})))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Message::text("one"));
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Message::json(json!({"n": 2}))
        );
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let transport = MemoryTransport::new();
        let _other = transport.subscribe("other").await.unwrap();
        let receivers = transport.publish("ALX channel", &"x".into()).await.unwrap();
        assert_eq!(receivers, 0);
    }

    #[tokio::test]
    async fn test_offline_ends_streams_and_fails_calls() {
        let transport = MemoryTransport::new();
        let mut stream = transport.subscribe("c").await.unwrap();

        transport.set_online(false);
        assert!(stream.next().await.is_none());

        let err = transport.publish("c", &"x".into()).await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(transport.subscribe("c").await.is_err());

        transport.set_online(true);
        assert!(transport.publish("c", &"x".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_transport() {
        let transport = MemoryTransport::new();
        transport.close();
        assert!(matches!(
            transport.publish("c", &"x".into()).await,
            Err(MessagingError::Closed)
        ));
    }
}
