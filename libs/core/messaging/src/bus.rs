//! In-process channel bus with optional cross-process bridging.
//!
//! Listeners are plain synchronous callbacks. `publish` runs every listener of
//! the channel, in subscription order, before it returns. With a transport
//! attached, the message is forwarded to the transport first and delivery
//! only happens locally once the transport accepted it.

use crate::config::BusConfig;
use crate::error::{panic_message, DeliveryError, MessagingError};
use crate::message::Message;
use crate::metrics;
use crate::status::{ConnectionMonitor, ConnectionStatus};
use crate::transport::Transport;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error a listener may return to signal that it could not handle a message.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Arc<dyn Fn(&Message) -> Result<(), ListenerError> + Send + Sync>;

struct Entry {
    id: u64,
    active: AtomicBool,
    // held for the whole listener call, so unsubscribe can wait it out
    call: Mutex<()>,
    caller: Mutex<Option<ThreadId>>,
    listener: Listener,
}

impl Entry {
    fn new(id: u64, listener: Listener) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            call: Mutex::new(()),
            caller: Mutex::new(None),
            listener,
        }
    }

    /// Call the listener unless it has been unsubscribed; `None` if skipped.
    ///
    /// A nested publish from inside this listener on the same thread calls it
    /// again without taking the call lock.
    fn invoke(&self, message: &Message) -> Option<thread::Result<Result<(), ListenerError>>> {
        let me = thread::current().id();
        let reentrant = self.caller() == Some(me);
        let _call = (!reentrant).then(|| self.call.lock().unwrap_or_else(|p| p.into_inner()));

        if !self.active.load(Ordering::SeqCst) {
            return None;
        }

        if !reentrant {
            self.set_caller(Some(me));
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.listener)(message)));
        if !reentrant {
            self.set_caller(None);
        }
        Some(outcome)
    }

    /// Wait for a call in progress on another thread to return.
    fn wait_idle(&self) {
        if self.caller() != Some(thread::current().id()) {
            drop(self.call.lock().unwrap_or_else(|p| p.into_inner()));
        }
    }

    fn caller(&self) -> Option<ThreadId> {
        *self.caller.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_caller(&self, caller: Option<ThreadId>) {
        *self.caller.lock().unwrap_or_else(|p| p.into_inner()) = caller;
    }
}

/// Handle returned by [`ChannelBus::subscribe`].
///
/// Dropping it does not unsubscribe; call [`ChannelBus::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    channel: String,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub channel: String,
    /// Local listeners that accepted the message
    pub delivered: usize,
    /// Receivers reported by the transport, when one is attached
    pub remote_receivers: Option<usize>,
    /// Local listeners that returned an error or panicked
    pub failures: Vec<DeliveryError>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn listener failures into [`MessagingError::Delivery`].
    pub fn into_result(self) -> Result<Self, MessagingError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(MessagingError::Delivery {
                channel: self.channel,
                failures: self.failures,
            })
        }
    }
}

struct BusInner {
    channels: RwLock<HashMap<String, Vec<Arc<Entry>>>>,
    next_id: AtomicU64,
    transport: Option<Arc<dyn Transport>>,
    monitor: ConnectionMonitor,
    config: BusConfig,
    /// Wire forms of messages this bus forwarded on bridged channels
    echoes: Mutex<HashMap<String, VecDeque<String>>>,
    /// Number of live bridges per channel
    bridges: Mutex<HashMap<String, usize>>,
}

/// Channel-keyed publish/subscribe.
#[derive(Clone)]
pub struct ChannelBus {
    inner: Arc<BusInner>,
}

impl ChannelBus {
    /// Purely in-process bus.
    pub fn new() -> Self {
        Self::build(None, ConnectionMonitor::local("channel bus"), BusConfig::default())
    }

    /// Bus that forwards every publish to `transport` and reports the
    /// transport's connection status.
    pub fn with_transport(transport: Arc<dyn Transport>, config: BusConfig) -> Self {
        let monitor = transport.monitor();
        Self::build(Some(transport), monitor, config)
    }

    fn build(
        transport: Option<Arc<dyn Transport>>,
        monitor: ConnectionMonitor,
        config: BusConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                transport,
                monitor,
                config,
                echoes: Mutex::new(HashMap::new()),
                bridges: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register `listener` for every later publish on `channel`.
    pub fn subscribe<F>(&self, channel: &str, listener: F) -> Subscription
    where
        F: Fn(&Message) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry::new(id, Arc::new(listener)));

        self.write_channels()
            .entry(channel.to_string())
            .or_default()
            .push(entry);

        debug!(channel = %channel, subscription = id, "Listener subscribed");
        Subscription {
            id,
            channel: channel.to_string(),
        }
    }

    /// Remove a listener. Returns false if it was already removed.
    ///
    /// Once this returns the listener is not called again, including by a
    /// publish that is already delivering. If that publish is calling the
    /// listener on another thread right now, this blocks until the call
    /// returns. A listener may unsubscribe itself. Two listeners that
    /// unsubscribe each other from concurrent publishes on different threads
    /// deadlock.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let entry = {
            let mut channels = self.write_channels();
            let Some(entries) = channels.get_mut(&subscription.channel) else {
                return false;
            };
            let Some(pos) = entries.iter().position(|e| e.id == subscription.id) else {
                return false;
            };

            let entry = entries.remove(pos);
            entry.active.store(false, Ordering::SeqCst);
            if entries.is_empty() {
                channels.remove(&subscription.channel);
            }
            entry
        };
        entry.wait_idle();

        debug!(
            channel = %subscription.channel,
            subscription = subscription.id,
            "Listener unsubscribed"
        );
        true
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.read_channels().get(channel).map_or(0, |e| e.len())
    }

    /// Channels that currently have listeners, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_channels().keys().cloned().collect();
        names.sort();
        names
    }

    /// Publish a message.
    ///
    /// With a transport attached the message is forwarded first; if that
    /// fails, nothing is delivered locally and a connectivity error is
    /// returned. Listener failures do not fail the publish, they are listed
    /// in the report.
    pub async fn publish(
        &self,
        channel: &str,
        message: impl Into<Message>,
    ) -> Result<PublishReport, MessagingError> {
        let message = message.into();

        let remote_receivers = match &self.inner.transport {
            Some(transport) => Some(self.forward(transport.as_ref(), channel, &message).await?),
            None => None,
        };

        let mut report = self.publish_local(channel, &message);
        report.remote_receivers = remote_receivers;
        Ok(report)
    }

    /// Deliver to local listeners only, bypassing any transport.
    pub fn publish_local(&self, channel: &str, message: &Message) -> PublishReport {
        let snapshot: Vec<Arc<Entry>> = self
            .read_channels()
            .get(channel)
            .cloned()
            .unwrap_or_default();

        let mut report = PublishReport {
            channel: channel.to_string(),
            ..Default::default()
        };

        for entry in snapshot {
            let Some(outcome) = entry.invoke(message) else {
                continue;
            };
            let failure = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic),
            };

            warn!(
                channel = %channel,
                subscription = entry.id,
                error = %failure,
                "Listener failed"
            );
            report.failures.push(DeliveryError {
                channel: channel.to_string(),
                subscription: entry.id,
                message: failure,
            });
        }

        metrics::message_published(channel);
        metrics::deliveries(channel, report.delivered, report.failures.len());
        report
    }

    /// Deliver messages arriving on the transport for `channel` to local
    /// listeners.
    ///
    /// Messages this bus forwarded itself are recognised and not delivered a
    /// second time. When the remote subscription ends, the connection status
    /// becomes `Disconnected`.
    pub async fn bridge(&self, channel: &str) -> Result<BridgeHandle, MessagingError> {
        let transport = self.inner.transport.clone().ok_or_else(|| {
            MessagingError::Config("channel bus has no transport to bridge".to_string())
        })?;

        // registered before subscribing so no forwarded message is missed
        let guard = BridgeGuard::register(self.inner.clone(), channel);

        let mut stream = self
            .inner
            .monitor
            .guard(
                "SUBSCRIBE",
                self.inner.config.operation_timeout,
                transport.subscribe(channel),
            )
            .await?;

        info!(channel = %channel, "Bridged channel to transport");

        let bus = self.clone();
        let channel_name = channel.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(message) => bus.deliver_remote(&channel_name, message),
                    Err(e) => warn!(channel = %channel_name, error = %e, "Dropped incoming message"),
                }
            }
            bus.inner
                .monitor
                .disconnected(format!("subscription to '{}' ended", channel_name));
        });

        Ok(BridgeHandle {
            channel: channel.to_string(),
            task,
            joined: false,
        })
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.monitor.status()
    }

    /// Observe connection status transitions.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.monitor.watch()
    }

    async fn forward(
        &self,
        transport: &dyn Transport,
        channel: &str,
        message: &Message,
    ) -> Result<usize, MessagingError> {
        let echo = if self.is_bridged(channel) {
            let wire = message.to_wire()?;
            self.remember_echo(channel, wire.clone());
            Some(wire)
        } else {
            None
        };

        let result = self
            .inner
            .monitor
            .guard(
                "PUBLISH",
                self.inner.config.operation_timeout,
                transport.publish(channel, message),
            )
            .await;

        match &result {
            Ok(receivers) => {
                debug!(channel = %channel, receivers = receivers, "Forwarded message to transport")
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Failed to forward message");
                if let Some(wire) = echo {
                    self.forget_echo(channel, &wire);
                }
            }
        }
        result
    }

    fn deliver_remote(&self, channel: &str, message: Message) {
        if let Ok(wire) = message.to_wire() {
            if self.take_echo(channel, &wire) {
                debug!(channel = %channel, "Skipped echo of a locally published message");
                return;
            }
        }

        let report = self.publish_local(channel, &message);
        debug!(
            channel = %channel,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Delivered remote message"
        );
    }

    fn is_bridged(&self, channel: &str) -> bool {
        lock(&self.inner.bridges).get(channel).is_some_and(|n| *n > 0)
    }

    fn remember_echo(&self, channel: &str, wire: String) {
        let mut echoes = lock(&self.inner.echoes);
        let pending = echoes.entry(channel.to_string()).or_default();
        pending.push_back(wire);
        while pending.len() > self.inner.config.echo_capacity {
            pending.pop_front();
        }
    }

    fn forget_echo(&self, channel: &str, wire: &str) {
        let mut echoes = lock(&self.inner.echoes);
        if let Some(pending) = echoes.get_mut(channel) {
            if let Some(pos) = pending.iter().rposition(|w| w == wire) {
                pending.remove(pos);
            }
        }
    }

    fn take_echo(&self, channel: &str, wire: &str) -> bool {
        let mut echoes = lock(&self.inner.echoes);
        let Some(pending) = echoes.get_mut(channel) else {
            return false;
        };
        match pending.iter().position(|w| w == wire) {
            Some(pos) => {
                pending.remove(pos);
                true
            }
            None => false,
        }
    }

    // listeners never run under these locks, so a poisoned lock is still consistent
    fn read_channels(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Arc<Entry>>>> {
        self.inner
            .channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_channels(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Arc<Entry>>>> {
        self.inner
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps a channel marked as bridged while the bridge task lives.
struct BridgeGuard {
    inner: Arc<BusInner>,
    channel: String,
}

impl BridgeGuard {
    fn register(inner: Arc<BusInner>, channel: &str) -> Self {
        *lock(&inner.bridges).entry(channel.to_string()).or_insert(0) += 1;
        Self {
            inner,
            channel: channel.to_string(),
        }
    }
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        let mut bridges = lock(&self.inner.bridges);
        let remaining = match bridges.get_mut(&self.channel) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            bridges.remove(&self.channel);
            lock(&self.inner.echoes).remove(&self.channel);
        }
    }
}

/// A running bridge from the transport into the bus.
///
/// Dropping the handle leaves the bridge running; call [`BridgeHandle::stop`].
#[derive(Debug)]
pub struct BridgeHandle {
    channel: String,
    task: JoinHandle<()>,
    joined: bool,
}

impl BridgeHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves when the remote subscription has ended.
    ///
    /// Cancel-safe, and returns immediately once it has resolved before.
    pub async fn finished(&mut self) {
        if self.joined {
            return;
        }
        let _ = (&mut self.task).await;
        self.joined = true;
    }

    /// Stop delivering remote messages.
    pub fn stop(self) {
        self.task.abort();
        info!(channel = %self.channel, "Bridge stopped");
    }
}
