//! Subscriber
//!
//! Listens on `ALX channel` and logs every message. Stops when:
//!
//! - a `KILL_SERVER` message arrives (unsubscribes first, so nothing after it
//!   is delivered)
//! - the process receives Ctrl+C or SIGTERM
//! - the Redis subscription ends

use core_config::{tracing::install_color_eyre, Environment, FromEnv, RedisConfig};
use eyre::{Result, WrapErr};
use messaging::redis::RedisConnection;
use messaging::{BridgeHandle, BusConfig, ChannelBus, MessagingError, Subscription};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};

pub const CHANNEL: &str = "ALX channel";
pub const KILL_SERVER: &str = "KILL_SERVER";

/// Why the listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    KillServer,
    Shutdown,
    SubscriptionEnded,
}

/// A subscription to one channel, bridged from the transport.
pub struct Listener {
    bus: ChannelBus,
    subscription: Subscription,
    bridge: BridgeHandle,
    kill: Arc<Notify>,
    received: Arc<Mutex<Vec<String>>>,
}

impl Listener {
    /// Subscribe to `channel` and start receiving remote messages.
    pub async fn start(bus: &ChannelBus, channel: &str) -> Result<Self, MessagingError> {
        let kill = Arc::new(Notify::new());
        let received = Arc::new(Mutex::new(Vec::new()));

        let subscription = {
            let kill = kill.clone();
            let received = received.clone();
            bus.subscribe(channel, move |message| {
                let text = message.to_string();
                info!("{}", text);
                received
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(text);

                if message.as_text() == Some(KILL_SERVER) {
                    kill.notify_one();
                }
                Ok(())
            })
        };

        let bridge = match bus.bridge(channel).await {
            Ok(bridge) => bridge,
            Err(e) => {
                bus.unsubscribe(&subscription);
                return Err(e);
            }
        };

        info!(channel = %channel, "Listening for messages");
        Ok(Self {
            bus: bus.clone(),
            subscription,
            bridge,
            kill,
            received,
        })
    }

    /// Messages delivered so far, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Run until killed, shut down, or disconnected, then unsubscribe.
    pub async fn until_stopped<S>(mut self, shutdown: S) -> StopReason
    where
        S: Future<Output = ()>,
    {
        let reason = tokio::select! {
            _ = self.kill.notified() => StopReason::KillServer,
            _ = shutdown => StopReason::Shutdown,
            _ = self.bridge.finished() => StopReason::SubscriptionEnded,
        };

        self.bus.unsubscribe(&self.subscription);
        self.bridge.stop();

        match reason {
            StopReason::SubscriptionEnded => warn!(
                channel = %self.subscription.channel(),
                "Subscription ended, stopping"
            ),
            _ => info!(channel = %self.subscription.channel(), reason = ?reason, "Unsubscribed"),
        }
        reason
    }
}

pub async fn run() -> Result<()> {
    install_color_eyre();
    core_config::tracing::init_tracing(&Environment::from_env());

    let config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let bus_config = BusConfig::from_env().wrap_err("Failed to load bus configuration")?;

    let connection = RedisConnection::open(&config)
        .await
        .wrap_err("Failed to connect to Redis")?;
    let bus = ChannelBus::with_transport(Arc::new(connection.transport()), bus_config);

    let listener = match Listener::start(&bus, CHANNEL).await {
        Ok(listener) => listener,
        Err(e) => {
            connection.close();
            return Err(e).wrap_err("Failed to subscribe");
        }
    };

    let reason = listener.until_stopped(shutdown_signal()).await;
    connection.close();

    if reason == StopReason::SubscriptionEnded {
        eyre::bail!("Subscription to '{}' ended unexpectedly", CHANNEL);
    }
    info!("Subscriber stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
