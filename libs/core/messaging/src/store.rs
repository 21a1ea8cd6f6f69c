//! Key-value store collaborator.

use crate::error::MessagingError;
use crate::status::ConnectionMonitor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// GET/SET key-value store.
///
/// Errors are surfaced to the caller, never swallowed. Implementations report
/// their connection lifecycle through [`KeyValueStore::monitor`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, MessagingError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), MessagingError>;

    /// Connection status of this store.
    fn monitor(&self) -> ConnectionMonitor;
}

/// In-process store for tests and local runs.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    monitor: ConnectionMonitor,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            monitor: ConnectionMonitor::local("memory store"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the store closed; later calls fail with [`MessagingError::Closed`].
    pub fn close(&self) {
        self.monitor.closed();
    }

    fn check_open(&self) -> Result<(), MessagingError> {
        if self.monitor.is_closed() {
            return Err(MessagingError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MessagingError> {
        self.check_open()?;
        let entries = self
            .entries
            .read()
            .map_err(|_| MessagingError::Store("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MessagingError> {
        self.check_open()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| MessagingError::Store("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn monitor(&self) -> ConnectionMonitor {
        self.monitor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("ALXSanFrancisco", "100").await.unwrap();
        assert_eq!(store.get("ALXSanFrancisco").await.unwrap(), Some("100".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("HolbertonSanFrancisco").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryStore::new();
        store.set("k", "1").await.unwrap();
        store.set("k", "2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_fails_fast() {
        let store = MemoryStore::new();
        store.close();
        assert!(matches!(store.get("k").await, Err(MessagingError::Closed)));
        assert!(matches!(store.set("k", "v").await, Err(MessagingError::Closed)));
    }
}
