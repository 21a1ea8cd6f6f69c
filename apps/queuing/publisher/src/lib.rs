//! Publisher
//!
//! Announces course starts on `ALX channel`, each message on its own timer
//! measured from startup. The third message tells subscribers to shut down,
//! so a well-behaved subscriber never sees the fourth.

use core_config::{tracing::install_color_eyre, Environment, FromEnv, RedisConfig};
use eyre::{Result, WrapErr};
use messaging::redis::RedisConnection;
use messaging::{BusConfig, ChannelBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info};

pub const CHANNEL: &str = "ALX channel";

/// Messages and their send offsets from startup, in send order.
pub const ANNOUNCEMENTS: [(&str, Duration); 4] = [
    ("ALX Student #1 starts course", Duration::from_millis(100)),
    ("ALX Student #2 starts course", Duration::from_millis(200)),
    ("KILL_SERVER", Duration::from_millis(300)),
    ("ALX Student #3 starts course", Duration::from_millis(400)),
];

/// Publish every announcement on `channel` at its offset.
///
/// A failed publish is logged and the schedule continues. Returns how many
/// messages were handed to the bus successfully.
pub async fn publish_announcements(bus: &ChannelBus, channel: &str) -> usize {
    let start = Instant::now();
    let mut sent = 0;

    for (message, offset) in ANNOUNCEMENTS {
        sleep_until(start + offset).await;
        info!("About to send {}", message);

        match bus.publish(channel, message).await {
            Ok(report) => {
                sent += 1;
                info!(
                    channel = %channel,
                    receivers = ?report.remote_receivers,
                    "Message published"
                );
            }
            Err(e) => error!(channel = %channel, error = %e, "Failed to publish message"),
        }
    }

    sent
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

    let sent = publish_announcements(&bus, CHANNEL).await;
    info!(sent = sent, total = ANNOUNCEMENTS.len(), "Publisher finished");

    connection.close();
    Ok(())
}
