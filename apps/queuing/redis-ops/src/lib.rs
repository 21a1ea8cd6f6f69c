//! Redis Ops
//!
//! Writes a school value into the key-value store and reads values back,
//! logging each reply.
//!
//! ```text
//! GET ALX              -> (nil)
//! SET ALXSanFrancisco 100
//! GET ALXSanFrancisco  -> 100
//! ```

use core_config::{tracing::install_color_eyre, Environment, FromEnv, RedisConfig};
use eyre::{Result, WrapErr};
use messaging::redis::RedisConnection;
use messaging::{KeyValueStore, MessagingError};
use tracing::info;

/// Store `value` under the school's name.
pub async fn set_new_school(
    store: &dyn KeyValueStore,
    school_name: &str,
    value: &str,
) -> Result<(), MessagingError> {
    store.set(school_name, value).await?;
    info!(key = %school_name, "Reply: OK");
    Ok(())
}

/// Read and log the value stored for a school.
pub async fn display_school_value(
    store: &dyn KeyValueStore,
    school_name: &str,
) -> Result<Option<String>, MessagingError> {
    let reply = store.get(school_name).await?;
    match &reply {
        Some(value) => info!(key = %school_name, "{}", value),
        None => info!(key = %school_name, "(nil)"),
    }
    Ok(reply)
}

/// The scripted sequence: an absent key, a write, then a read of the write.
pub async fn run_operations(store: &dyn KeyValueStore) -> Result<Option<String>, MessagingError> {
    display_school_value(store, "ALX").await?;
    set_new_school(store, "ALXSanFrancisco", "100").await?;
    display_school_value(store, "ALXSanFrancisco").await
}

pub async fn run() -> Result<()> {
    install_color_eyre();
    core_config::tracing::init_tracing(&Environment::from_env());

    let config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let connection = RedisConnection::open(&config)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let store = connection.store();
    let result = run_operations(&store).await;
    connection.close();

    result.wrap_err("Redis operation failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::MemoryStore;

    #[tokio::test]
    async fn test_operations_read_back_written_value() {
        let store = MemoryStore::new();

        let reply = run_operations(&store).await.unwrap();

        assert_eq!(reply.as_deref(), Some("100"));
        assert_eq!(store.get("ALX").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_display_absent_school() {
        let store = MemoryStore::new();
        assert_eq!(display_school_value(&store, "ALX").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites_previous_value() {
        let store = MemoryStore::new();
        set_new_school(&store, "ALXSanFrancisco", "50").await.unwrap();
        set_new_school(&store, "ALXSanFrancisco", "100").await.unwrap();

        let reply = display_school_value(&store, "ALXSanFrancisco").await.unwrap();
        assert_eq!(reply.as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_closed_store_fails() {
        let store = MemoryStore::new();
        store.close();

        let err = run_operations(&store).await.unwrap_err();
        assert!(matches!(err, MessagingError::Closed));
    }
}
