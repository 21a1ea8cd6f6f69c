use crate::error::MessagingError;
use crate::status::ConnectionMonitor;
use crate::store::KeyValueStore;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// [`KeyValueStore`] over Redis `GET`/`SET`.
///
/// Each call is bounded by the connection's operation timeout.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    monitor: ConnectionMonitor,
    operation_timeout: Duration,
}

impl RedisStore {
    pub(crate) fn new(
        manager: ConnectionManager,
        monitor: ConnectionMonitor,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            monitor,
            operation_timeout,
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MessagingError> {
        let mut conn = self.manager.clone();
        let value = self
            .monitor
            .guard("GET", self.operation_timeout, async move {
                Ok::<_, MessagingError>(conn.get::<_, Option<String>>(key).await?)
            })
            .await?;
        debug!(key = %key, found = value.is_some(), "GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MessagingError> {
        let mut conn = self.manager.clone();
        self.monitor
            .guard("SET", self.operation_timeout, async move {
                Ok::<_, MessagingError>(conn.set::<_, _, ()>(key, value).await?)
            })
            .await?;
        debug!(key = %key, "SET");
        Ok(())
    }

    fn monitor(&self) -> ConnectionMonitor {
        self.monitor.clone()
    }
}
