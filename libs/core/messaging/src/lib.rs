//! Channel bus and FIFO job queue.
//!
//! Two components, usable on their own or wired to Redis:
//! - **[`ChannelBus`]**: named channels, synchronous fan-out to listeners in
//!   subscription order, optional bridging to a pub/sub [`Transport`]
//! - **[`JobQueue`]**: jobs processed one at a time in enqueue order by a
//!   single worker, with per-job completion and failure observers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  publish   ┌──────────────┐  PUBLISH/SUBSCRIBE  ┌───────────┐
//! │  Publishers  │───────────▶│  ChannelBus  │◀───────────────────▶│ Transport │
//! └──────────────┘            └──────┬───────┘                     └───────────┘
//!                                    │ listeners
//! ┌──────────────┐  enqueue   ┌──────────────┐  GET/SET            ┌───────────┐
//! │  Producers   │───────────▶│   JobQueue   │────────────────────▶│ KV store  │
//! └──────────────┘            └──────┬───────┘                     └───────────┘
//!                                    │ worker: pending → active → completed/failed
//!                                    ▼
//!                               JobHandler
//! ```
//!
//! `MemoryStore` and `MemoryTransport` cover tests and single-process use;
//! the `redis` feature adds [`redis::RedisConnection`] with `RedisStore` and
//! `RedisTransport`.
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{ChannelBus, JobQueue, NoOpHandler};
//!
//! let bus = ChannelBus::new();
//! bus.subscribe("ALX channel", |message| {
//!     println!("{}", message);
//!     Ok(())
//! });
//! bus.publish("ALX channel", "ALX Student #1 starts course").await?;
//!
//! let queue = JobQueue::new();
//! queue.register_handler(NoOpHandler::new("push_notification_code"));
//! let worker = queue.start();
//! let job = queue.enqueue("push_notification_code", payload).await?;
//! job.on_complete(|_| println!("Notification job completed"));
//! job.wait().await;
//! worker.shutdown().await?;
//! ```

mod bus;
mod config;
mod error;
mod handler;
mod job;
mod message;
pub mod metrics;
mod queue;
mod status;
mod store;
mod transport;

#[cfg(feature = "redis")]
pub mod redis;

pub use bus::{BridgeHandle, ChannelBus, ListenerError, PublishReport, Subscription};
pub use config::{BusConfig, QueueConfig};
pub use error::{DeliveryError, JobError, MessagingError};
pub use handler::{FnHandler, JobHandler, NoOpHandler};
pub use job::{Job, JobOutcome, JobRecord, JobStatus, JobTransition, Payload};
pub use message::Message;
pub use crate::metrics::{init_metrics, render_metrics};
pub use queue::{JobQueue, WorkerHandle};
pub use status::{ConnectionMonitor, ConnectionStatus};
pub use store::{KeyValueStore, MemoryStore};
pub use transport::{MemoryTransport, MessageStream, Transport};
