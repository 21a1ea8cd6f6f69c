//! Connection status reporting for stores and transports.

use crate::error::MessagingError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Lifecycle state of an external connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected { reason: String },
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected { reason } => write!(f, "disconnected: {}", reason),
            ConnectionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Shared, observable connection status.
///
/// Clones share the same state. Transitions are logged once; repeated reports
/// of the same state are ignored. `Closed` is final.
#[derive(Clone)]
pub struct ConnectionMonitor {
    name: Arc<str>,
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionMonitor {
    pub fn new(name: &str, initial: ConnectionStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            name: Arc::from(name),
            tx: Arc::new(tx),
        }
    }

    /// Monitor for an in-process component that is always reachable.
    pub fn local(name: &str) -> Self {
        Self::new(name, ConnectionStatus::Connected)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.tx.borrow(), ConnectionStatus::Closed)
    }

    /// Receiver that observes every later transition.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    pub fn connecting(&self) {
        self.transition(ConnectionStatus::Connecting);
    }

    pub fn connected(&self) {
        if self.transition(ConnectionStatus::Connected) {
            info!(backend = %self.name, "{} client connected to the server", self.name);
        }
    }

    pub fn disconnected(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.transition(ConnectionStatus::Disconnected {
            reason: reason.clone(),
        }) {
            error!(
                backend = %self.name,
                reason = %reason,
                "{} client not connected to the server: {}",
                self.name,
                reason
            );
        }
    }

    pub fn closed(&self) {
        if self.transition(ConnectionStatus::Closed) {
            info!(backend = %self.name, "{} client closed", self.name);
        }
    }

    fn transition(&self, next: ConnectionStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == ConnectionStatus::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Run one external call under `timeout`, keeping the status in sync.
    ///
    /// Fails fast with [`MessagingError::Closed`] once closed. A timeout or a
    /// connectivity failure moves the status to `Disconnected`; a success
    /// moves it back to `Connected`.
    pub async fn guard<T, F>(
        &self,
        operation: &str,
        timeout: Duration,
        call: F,
    ) -> Result<T, MessagingError>
    where
        F: Future<Output = Result<T, MessagingError>>,
    {
        if self.is_closed() {
            return Err(MessagingError::Closed);
        }

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => {
                self.connected();
                Ok(value)
            }
            Ok(Err(e)) => {
                if e.is_connectivity() {
                    self.disconnected(e.to_string());
                }
                Err(e)
            }
            Err(_) => {
                let reason = format!("{} timed out after {}ms", operation, timeout.as_millis());
                self.disconnected(reason.clone());
                Err(MessagingError::Connectivity(reason))
            }
        }
    }
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
