//! In-process broadcast bus for cross-view invalidation.
//!
//! # Responsibility
//! - Deliver upsert/delete notifications to every subscriber of a topic.
//! - Hand out subscription handles that unsubscribe on drop.
//!
//! # Invariants
//! - Delivery is synchronous and FIFO: a publish issued while a message is
//!   being delivered is queued and delivered after it.
//! - The subscriber set for a message is captured when its delivery starts;
//!   subscribers added meanwhile do not receive it.
//! - No lock is held while a handler runs, so handlers may publish,
//!   subscribe or unsubscribe.

use crate::model::record::{EntityKind, EntityRecord, RecordKey};
use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Broadcast action half of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastAction {
    Upsert,
    Delete,
}

impl BroadcastAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// Ephemeral notification; never persisted or replayed.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastMessage {
    /// A record changed; carries the full current record.
    Upsert(EntityRecord),
    /// A record was deleted for the rest of the session.
    Delete(RecordKey),
}

impl BroadcastMessage {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Upsert(record) => record.kind,
            Self::Delete(key) => key.kind,
        }
    }

    pub fn action(&self) -> BroadcastAction {
        match self {
            Self::Upsert(_) => BroadcastAction::Upsert,
            Self::Delete(_) => BroadcastAction::Delete,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Upsert(record) => record.id.as_str(),
            Self::Delete(key) => key.id.as_str(),
        }
    }
}

type Handler = Arc<dyn Fn(&BroadcastMessage) + Send + Sync>;

struct SubscriberEntry {
    id: u64,
    kind: EntityKind,
    action: Option<BroadcastAction>,
    handler: Handler,
}

impl SubscriberEntry {
    fn wants(&self, message: &BroadcastMessage) -> bool {
        self.kind == message.kind()
            && self
                .action
                .map_or(true, |action| action == message.action())
    }
}

#[derive(Default)]
struct BusState {
    next_subscriber_id: u64,
    subscribers: Vec<SubscriberEntry>,
    queue: VecDeque<BroadcastMessage>,
    delivering: bool,
    delivered: u64,
}

#[derive(Default)]
struct BusInner {
    state: Mutex<BusState>,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, subscriber_id: u64) {
        self.lock()
            .subscribers
            .retain(|entry| entry.id != subscriber_id);
    }
}

/// Typed publish/subscribe channel keyed by `(EntityKind, BroadcastAction)`.
///
/// Cloning is cheap and every clone shares one subscriber set.
#[derive(Clone, Default)]
pub struct BroadcastBus {
    inner: Arc<BusInner>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every action on `kind`.
    pub fn subscribe(
        &self,
        kind: EntityKind,
        handler: impl Fn(&BroadcastMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.add_subscriber(kind, None, Arc::new(handler))
    }

    /// Subscribes to one action on `kind`.
    pub fn subscribe_to(
        &self,
        kind: EntityKind,
        action: BroadcastAction,
        handler: impl Fn(&BroadcastMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.add_subscriber(kind, Some(action), Arc::new(handler))
    }

    /// Publishes one message and, unless a delivery is already running,
    /// drains the queue before returning.
    pub fn publish(&self, message: BroadcastMessage) {
        {
            let mut state = self.inner.lock();
            trace!(
                "event=bus_publish module=sync status=queued kind={} action={} id={} depth={}",
                message.kind(),
                message.action().as_str(),
                message.id(),
                state.queue.len()
            );
            state.queue.push_back(message);
            if state.delivering {
                return;
            }
            state.delivering = true;
        }

        let mut guard = DeliveryGuard {
            inner: &self.inner,
            armed: true,
        };
        loop {
            let (message, targets) = {
                let mut state = self.inner.lock();
                let Some(message) = state.queue.pop_front() else {
                    state.delivering = false;
                    guard.armed = false;
                    break;
                };
                let targets: Vec<Handler> = state
                    .subscribers
                    .iter()
                    .filter(|entry| entry.wants(&message))
                    .map(|entry| Arc::clone(&entry.handler))
                    .collect();
                state.delivered += 1;
                (message, targets)
            };

            debug!(
                "event=bus_publish module=sync status=delivering kind={} action={} id={} subscribers={}",
                message.kind(),
                message.action().as_str(),
                message.id(),
                targets.len()
            );
            for handler in targets {
                handler(&message);
            }
        }
    }

    /// Shorthand for `publish(BroadcastMessage::Upsert(record))`.
    pub fn publish_upsert(&self, record: EntityRecord) {
        self.publish(BroadcastMessage::Upsert(record));
    }

    /// Shorthand for `publish(BroadcastMessage::Delete(key))`.
    pub fn publish_delete(&self, key: RecordKey) {
        self.publish(BroadcastMessage::Delete(key));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Number of messages whose delivery has started.
    pub fn delivered_count(&self) -> u64 {
        self.inner.lock().delivered
    }

    /// Non-owning handle for handlers that need to publish back into the bus.
    pub fn downgrade(&self) -> WeakBroadcastBus {
        WeakBroadcastBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn add_subscriber(
        &self,
        kind: EntityKind,
        action: Option<BroadcastAction>,
        handler: Handler,
    ) -> Subscription {
        let mut state = self.inner.lock();
        state.next_subscriber_id += 1;
        let id = state.next_subscriber_id;
        state.subscribers.push(SubscriberEntry {
            id,
            kind,
            action,
            handler,
        });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
            active: true,
        }
    }
}

/// Weak reference to a bus, held by handlers to avoid reference cycles.
#[derive(Clone)]
pub struct WeakBroadcastBus {
    inner: Weak<BusInner>,
}

impl WeakBroadcastBus {
    pub fn upgrade(&self) -> Option<BroadcastBus> {
        self.inner.upgrade().map(|inner| BroadcastBus { inner })
    }
}

/// Live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Stops delivery to this subscriber.
    ///
    /// A delivery that already captured this subscriber still completes.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Clears the delivering flag when a handler panics mid-delivery.
struct DeliveryGuard<'a> {
    inner: &'a BusInner,
    armed: bool,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.lock();
            state.delivering = false;
            state.queue.clear();
        }
    }
}
