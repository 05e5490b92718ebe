//! Pub/sub broker abstraction used by the relay bridge
//!
//! ```text
//! Instance A                     Broker topic                  Instance B
//!   Bridge::publish ──PUBLISH──▶ notification:sse ──message──▶ Bridge loop
//!                                      │                          │
//!                                      └──────message──▶ A loop   ▼
//!                                                         Hub::publish
//! ```
//!
//! Two implementations ship with the crate: [`RedisBroker`] for multi-instance
//! deployments and [`MemoryBroker`] for single-process setups and tests.

use crate::sse::error::BrokerError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Raw message payloads delivered by a topic subscription
pub type MessageStream = BoxStream<'static, Vec<u8>>;

/// Publish/subscribe capability consumed by the bridge.
///
/// `subscribe` returns a long-lived stream that ends when the underlying
/// connection is lost; the caller is responsible for resubscribing.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish one payload to `topic`
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribe to `topic`; the subscription is active once this returns
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BrokerError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Redis Pub/Sub broker
///
/// Publishes through a shared [`ConnectionManager`] (which reconnects on its
/// own) and opens a dedicated pub/sub connection per subscription.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;

        debug!(topic = %topic, receivers, "redis message published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BrokerError> {
        // PubSub requires a dedicated connection, not the multiplexed one
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());

        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// In-process broker backed by one broadcast channel per topic.
///
/// Several hubs sharing one `MemoryBroker` behave like several instances
/// sharing one Redis. [`disconnect`](MemoryBroker::disconnect) and
/// [`fail_next_subscribes`](MemoryBroker::fail_next_subscribes) simulate
/// broker outages.
#[derive(Debug)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    buffer_size: usize,
    failing_subscribes: AtomicU32,
}

impl MemoryBroker {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            buffer_size: buffer_size.max(1),
            failing_subscribes: AtomicU32::new(0),
        }
    }

    /// End every open subscription on `topic`, as a dropped connection would
    pub async fn disconnect(&self, topic: &str) {
        let mut topics = self.topics.lock().await;
        if topics.remove(topic).is_some() {
            debug!(topic = %topic, "memory broker topic disconnected");
        }
    }

    /// Make the next `count` subscribe calls fail
    pub fn fail_next_subscribes(&self, count: u32) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// Number of live subscriptions on `topic`
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().await;
        topics.get(topic).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let topics = self.topics.lock().await;
        if let Some(tx) = topics.get(topic) {
            // No receivers is not an error, same as PUBLISH to an idle channel
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BrokerError> {
        if self.take_injected_failure() {
            return Err(BrokerError::Unavailable(format!(
                "subscribe to {} refused",
                topic
            )));
        }

        let receiver = {
            let mut topics = self.topics.lock().await;
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(self.buffer_size).0)
                .subscribe()
        };

        let topic = topic.to_string();
        let stream = stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "memory broker subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_broker_delivers_to_all_subscribers() {
        let broker = MemoryBroker::default();
        let mut first = broker.subscribe("topic").await.unwrap();
        let mut second = broker.subscribe("topic").await.unwrap();

        broker.publish("topic", b"hello".to_vec()).await.unwrap();

        assert_eq!(first.next().await, Some(b"hello".to_vec()));
        assert_eq!(second.next().await, Some(b"hello".to_vec()));
        assert_eq!(broker.subscriber_count("topic").await, 2);
    }

    #[tokio::test]
    async fn test_memory_broker_publish_without_subscribers() {
        let broker = MemoryBroker::default();
        assert!(broker.publish("idle", b"x".to_vec()).await.is_ok());
        assert_eq!(broker.subscriber_count("idle").await, 0);
    }

    #[tokio::test]
    async fn test_memory_broker_topics_are_isolated() {
        let broker = MemoryBroker::default();
        let mut other = broker.subscribe("other").await.unwrap();
        let mut topic = broker.subscribe("topic").await.unwrap();

        broker.publish("topic", b"a".to_vec()).await.unwrap();
        broker.publish("other", b"b".to_vec()).await.unwrap();

        assert_eq!(topic.next().await, Some(b"a".to_vec()));
        assert_eq!(other.next().await, Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_broker_disconnect_ends_stream() {
        let broker = MemoryBroker::default();
        let mut stream = broker.subscribe("topic").await.unwrap();

        broker.disconnect("topic").await;

        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_memory_broker_injected_subscribe_failures() {
        let broker = MemoryBroker::default();
        broker.fail_next_subscribes(2);

        assert!(matches!(
            broker.subscribe("topic").await,
            Err(BrokerError::Unavailable(_))
        ));
        assert!(broker.subscribe("topic").await.is_err());
        assert!(broker.subscribe("topic").await.is_ok());
    }

    #[test]
    fn test_broker_names() {
        assert_eq!(MemoryBroker::default().name(), "memory");
    }
}
