//! Redis backend: explicitly owned connection, GET/SET store and pub/sub
//! transport.
//!
//! ```rust,ignore
//! use core_config::{FromEnv, RedisConfig};
//! use messaging::redis::RedisConnection;
//!
//! let connection = RedisConnection::open(&RedisConfig::from_env()?).await?;
//! let store = Arc::new(connection.store());
//! let transport = Arc::new(connection.transport());
//! // ...
//! connection.close();
//! ```

mod connection;
mod retry;
mod store;
mod transport;

pub use connection::RedisConnection;
pub use retry::{retry_with_backoff, RetryConfig};
pub use store::RedisStore;
pub use transport::RedisTransport;

use crate::error::MessagingError;

impl From<::redis::RedisError> for MessagingError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            MessagingError::Connectivity(err.to_string())
        } else {
            MessagingError::Store(err.to_string())
        }
    }
}
