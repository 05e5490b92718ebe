//! Process-local subscriber registry
//!
//! Maps a user id to the set of open subscriber queues for that user and
//! broadcasts events to them without ever blocking the producer.
//! Supports:
//! - Multiple concurrent subscriptions per user (tabs, devices)
//! - Drop-on-full delivery to slow consumers
//! - Exactly-once release of a subscription, on explicit unsubscribe or drop
//! - Reclaiming a user's entry once their last subscription closes

use crate::metrics;
use crate::sse::Event;
use dashmap::DashMap;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use uuid::Uuid;

/// Default number of queued events per subscription
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Unique identifier for one subscriber queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

type Subscribers = HashMap<SubscriberId, mpsc::Sender<Event>>;

// DashMap shards the user space, so two users only contend when they hash
// to the same shard.
type Registry = DashMap<String, Subscribers>;

/// Per-user fan-out hub
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    queue_capacity: usize,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a hub whose subscriptions buffer up to `queue_capacity` events
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Register a new subscription for `user_id`.
    ///
    /// The returned [`Subscription`] is the only read handle for its queue.
    /// Dropping it (or calling [`Subscription::unsubscribe`]) removes it from
    /// the registry.
    pub fn subscribe(&self, user_id: impl Into<String>) -> Subscription {
        let user_id = user_id.into();
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let id = SubscriberId::new();

        let count = {
            let mut subscribers = self.registry.entry(user_id.clone()).or_default();
            subscribers.insert(id, sender);
            subscribers.len()
        };
        metrics::subscription_opened();

        debug!(user_id = %user_id, subscriber = ?id, connections = count, "sse subscriber added");

        Subscription {
            id,
            user_id,
            receiver,
            registry: Arc::clone(&self.registry),
            released: false,
        }
    }

    /// Offer `event` to every subscription currently registered for `user_id`.
    ///
    /// Full queues drop the event for that subscriber only. Returns how many
    /// queues accepted it; zero subscribers is a no-op, not an error.
    pub fn publish(&self, user_id: &str, event: &Event) -> usize {
        let Some(subscribers) = self.registry.get(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, sender) in subscribers.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    metrics::event_dropped();
                    trace!(user_id = %user_id, subscriber = ?id, "sse queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(user_id = %user_id, subscriber = ?id, "sse queue closed");
                }
            }
        }
        drop(subscribers);

        if delivered > 0 {
            metrics::events_delivered(delivered);
        }
        delivered
    }

    /// Number of open subscriptions for a user
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.registry.get(user_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of open subscriptions across all users
    pub fn total_connections(&self) -> usize {
        self.registry.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of users with at least one open subscription
    pub fn connected_users(&self) -> usize {
        self.registry.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

fn release(registry: &Registry, user_id: &str, id: SubscriberId) -> bool {
    let removed = match registry.get_mut(user_id) {
        Some(mut subscribers) => subscribers.remove(&id).is_some(),
        None => false,
    };

    // Evaluated under the shard lock: a subscribe racing with this call either
    // lands before (entry kept) or recreates the entry afterwards.
    registry.remove_if(user_id, |_, subscribers| subscribers.is_empty());

    removed
}

/// One connection's interest in one user's events
///
/// Owns the read side of a bounded queue. Implements [`Stream`] and exposes
/// [`recv`](Subscription::recv) for `select!` loops.
pub struct Subscription {
    id: SubscriberId,
    user_id: String,
    receiver: mpsc::Receiver<Event>,
    registry: Arc<Registry>,
    released: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_active(&self) -> bool {
        !self.released
    }

    /// Next queued event; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Remove this subscription from the hub and close its queue.
    ///
    /// Idempotent; only the first call has an effect. Events already queued
    /// can still be drained with `recv`.
    pub fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        release(&self.registry, &self.user_id, self.id);
        self.receiver.close();
        metrics::subscription_closed();

        debug!(user_id = %self.user_id, subscriber = ?self.id, "sse subscriber removed");
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("released", &self.released)
            .finish()
    }
}
