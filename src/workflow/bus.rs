//! Per-execution notification bus.
//!
//! Every committed mutation of an execution is published here as a full
//! snapshot. Listeners are either channels (read through a
//! [`Subscription`]) or synchronous callbacks. A new listener first receives
//! the latest snapshot, then every later one, in publish order and without
//! coalescing. Once an execution's stream is closed the bus forgets its
//! snapshots; late listeners are served a final snapshot supplied by the
//! caller.
//!
//! The listener set sits behind its own lock, separate from any execution
//! state. A per-topic delivery lock serializes delivery against
//! registration, so a listener never sees a snapshot twice or out of order.
//! The delivery lock is reentrant: callbacks may subscribe or unsubscribe
//! from inside a notification.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;

use super::execution::Execution;

/// Synchronous listener invoked with each snapshot.
pub type Callback = Arc<dyn Fn(&Execution) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Channel(mpsc::UnboundedSender<Execution>),
    Callback(Callback),
}

impl Listener {
    /// Deliver a snapshot. Returns false once the listener is gone.
    fn deliver(&self, execution: &Execution) -> bool {
        match self {
            Self::Channel(tx) => tx.send(execution.clone()).is_ok(),
            Self::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(execution))).is_err() {
                    tracing::warn!(execution_id = %execution.id, "Execution listener panicked");
                }
                true
            }
        }
    }
}

#[derive(Default)]
struct Topic {
    latest: Option<Execution>,
    listeners: Vec<(u64, Listener)>,
    closed: bool,
    delivery: Arc<ReentrantMutex<()>>,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, Topic>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn delivery_lock(&self, execution_id: &str) -> Arc<ReentrantMutex<()>> {
        let mut topics = self.topics.lock();
        Arc::clone(&topics.entry(execution_id.to_string()).or_default().delivery)
    }

    fn remove(&self, execution_id: &str, listener_id: u64) {
        let delivery = self.delivery_lock(execution_id);
        let _guard = delivery.lock();
        if let Some(topic) = self.topics.lock().get_mut(execution_id) {
            topic.listeners.retain(|(id, _)| *id != listener_id);
        }
    }
}

/// Fan-out of execution snapshots to per-execution listeners.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot to every listener of its execution.
    pub fn publish(&self, execution: &Execution) {
        let delivery = self.inner.delivery_lock(&execution.id);
        let _guard = delivery.lock();

        let listeners: Vec<(u64, Listener)> = {
            let mut topics = self.inner.topics.lock();
            let topic = topics.entry(execution.id.clone()).or_default();
            topic.latest = Some(execution.clone());
            topic.listeners.clone()
        };

        let dead: Vec<u64> = listeners
            .iter()
            .filter(|(_, listener)| !listener.deliver(execution))
            .map(|(id, _)| *id)
            .collect();

        if !dead.is_empty() {
            if let Some(topic) = self.inner.topics.lock().get_mut(&execution.id) {
                topic.listeners.retain(|(id, _)| !dead.contains(id));
            }
        }
    }

    /// Mark an execution's stream as finished.
    ///
    /// Channel subscribers drain what was already sent and then end. The
    /// latest snapshot is dropped.
    pub fn close(&self, execution_id: &str) {
        let delivery = self.inner.delivery_lock(execution_id);
        let _guard = delivery.lock();
        if let Some(topic) = self.inner.topics.lock().get_mut(execution_id) {
            topic.closed = true;
            topic.listeners.clear();
            topic.latest = None;
        }
    }

    /// Latest published snapshot for an execution.
    pub fn latest(&self, execution_id: &str) -> Option<Execution> {
        self.inner.topics.lock().get(execution_id).and_then(|t| t.latest.clone())
    }

    /// Number of live listeners on an execution.
    pub fn listener_count(&self, execution_id: &str) -> usize {
        self.inner.topics.lock().get(execution_id).map_or(0, |t| t.listeners.len())
    }

    /// Subscribe with a channel.
    pub fn subscribe(&self, execution_id: &str) -> Subscription {
        self.subscribe_or_replay(execution_id, &|| None)
    }

    /// Subscribe with a channel. If the stream is already closed, the
    /// stream yields `final_snapshot()` and ends.
    pub fn subscribe_or_replay(
        &self,
        execution_id: &str,
        final_snapshot: &dyn Fn() -> Option<Execution>,
    ) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener_id = self.register(execution_id, Listener::Channel(tx), final_snapshot);
        Subscription {
            bus: Arc::downgrade(&self.inner),
            execution_id: execution_id.to_string(),
            listener_id,
            receiver: Some(rx),
        }
    }

    /// Subscribe with a synchronous callback.
    ///
    /// The callback runs on the publishing task; keep it short.
    pub fn subscribe_with<F>(&self, execution_id: &str, callback: F) -> Subscription
    where
        F: Fn(&Execution) + Send + Sync + 'static,
    {
        self.subscribe_with_or_replay(execution_id, callback, &|| None)
    }

    /// Callback variant of [`subscribe_or_replay`](Self::subscribe_or_replay).
    pub fn subscribe_with_or_replay<F>(
        &self,
        execution_id: &str,
        callback: F,
        final_snapshot: &dyn Fn() -> Option<Execution>,
    ) -> Subscription
    where
        F: Fn(&Execution) + Send + Sync + 'static,
    {
        let listener_id =
            self.register(execution_id, Listener::Callback(Arc::new(callback)), final_snapshot);
        Subscription {
            bus: Arc::downgrade(&self.inner),
            execution_id: execution_id.to_string(),
            listener_id,
            receiver: None,
        }
    }

    fn register(
        &self,
        execution_id: &str,
        listener: Listener,
        final_snapshot: &dyn Fn() -> Option<Execution>,
    ) -> u64 {
        let listener_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let delivery = self.inner.delivery_lock(execution_id);
        let _guard = delivery.lock();

        let (closed, latest) = {
            let mut topics = self.inner.topics.lock();
            let topic = topics.entry(execution_id.to_string()).or_default();
            if !topic.closed {
                topic.listeners.push((listener_id, listener.clone()));
            }
            (topic.closed, topic.latest.clone())
        };

        let replay = if closed { final_snapshot() } else { latest };
        if let Some(snapshot) = replay {
            listener.deliver(&snapshot);
        }

        listener_id
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("topics", &self.inner.topics.lock().len())
            .finish()
    }
}

/// Handle to one listener. Dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<BusInner>,
    execution_id: String,
    listener_id: u64,
    receiver: Option<mpsc::UnboundedReceiver<Execution>>,
}

impl Subscription {
    /// Execution this subscription follows.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Next snapshot. Returns `None` for callback subscriptions and once the
    /// stream has ended.
    pub async fn recv(&mut self) -> Option<Execution> {
        match self.receiver.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Next snapshot if one is already queued.
    pub fn try_recv(&mut self) -> Option<Execution> {
        self.receiver.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Receive until a snapshot satisfies `predicate`.
    pub async fn wait_until<F>(&mut self, mut predicate: F) -> Option<Execution>
    where
        F: FnMut(&Execution) -> bool,
    {
        while let Some(snapshot) = self.recv().await {
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    }

    /// Stop receiving. No notification is delivered after this returns.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.execution_id, self.listener_id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("execution_id", &self.execution_id)
            .field("listener_id", &self.listener_id)
            .finish()
    }
}
