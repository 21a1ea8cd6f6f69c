use super::retry::{retry_with_backoff, RetryConfig};
use super::{RedisStore, RedisTransport};
use crate::error::MessagingError;
use crate::status::{ConnectionMonitor, ConnectionStatus};
use ::redis::aio::ConnectionManager;
use ::redis::Client;
use core_config::RedisConfig;
use std::time::Duration;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// An explicitly opened Redis connection.
///
/// Hands out a [`RedisStore`] and a [`RedisTransport`] sharing one
/// auto-reconnecting `ConnectionManager` and one [`ConnectionMonitor`].
/// After [`RedisConnection::close`] every store and transport call fails with
/// [`MessagingError::Closed`] and open subscriptions end.
pub struct RedisConnection {
    client: Client,
    manager: ConnectionManager,
    monitor: ConnectionMonitor,
    operation_timeout: Duration,
}

impl RedisConnection {
    /// Connect and verify with `PING`, retrying `config.connect_retries` times.
    pub async fn open(config: &RedisConfig) -> Result<Self, MessagingError> {
        let retry = RetryConfig::default().with_max_retries(config.connect_retries);
        Self::open_with_retry(config, &retry).await
    }

    pub async fn open_with_retry(
        config: &RedisConfig,
        retry: &RetryConfig,
    ) -> Result<Self, MessagingError> {
        let monitor = ConnectionMonitor::new("Redis", ConnectionStatus::Connecting);
        info!(
            database = ?config.database,
            max_retries = retry.max_retries,
            "Connecting to Redis"
        );

        let client = Client::open(config.connection_url().as_str())
            .map_err(|e| MessagingError::Config(format!("invalid Redis URL: {}", e)))?;

        let connected = retry_with_backoff(
            || {
                let client = client.clone();
                async move {
                    tokio::time::timeout(CONNECT_TIMEOUT, Self::connect(client))
                        .await
                        .unwrap_or_else(|_| {
                            Err(MessagingError::connectivity(format!(
                                "connect timed out after {}ms",
                                CONNECT_TIMEOUT.as_millis()
                            )))
                        })
                }
            },
            retry,
        )
        .await;

        match connected {
            Ok(manager) => {
                monitor.connected();
                Ok(Self {
                    client,
                    manager,
                    monitor,
                    operation_timeout: DEFAULT_OPERATION_TIMEOUT,
                })
            }
            Err(e) => {
                let reason = match e {
                    MessagingError::Connectivity(reason) | MessagingError::Store(reason) => reason,
                    other => other.to_string(),
                };
                monitor.disconnected(reason.clone());
                Err(MessagingError::Connectivity(reason))
            }
        }
    }

    async fn connect(client: Client) -> Result<ConnectionManager, MessagingError> {
        let manager = ConnectionManager::new(client).await?;
        let mut conn = manager.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(manager)
    }

    /// Bound for store calls and [`RedisConnection::check_health`].
    ///
    /// Applies to stores handed out after this call.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn store(&self) -> RedisStore {
        RedisStore::new(
            self.manager.clone(),
            self.monitor.clone(),
            self.operation_timeout,
        )
    }

    pub fn transport(&self) -> RedisTransport {
        RedisTransport::new(self.client.clone(), self.manager.clone(), self.monitor.clone())
    }

    pub fn monitor(&self) -> ConnectionMonitor {
        self.monitor.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.monitor.status()
    }

    /// `PING` the server.
    pub async fn check_health(&self) -> Result<(), MessagingError> {
        let mut conn = self.manager.clone();
        self.monitor
            .guard("PING", self.operation_timeout, async move {
                let response: String = ::redis::cmd("PING").query_async(&mut conn).await?;
                if response != "PONG" {
                    return Err(MessagingError::Store(format!(
                        "PING returned unexpected response: {}",
                        response
                    )));
                }
                Ok(())
            })
            .await
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.monitor.closed();
    }
}
