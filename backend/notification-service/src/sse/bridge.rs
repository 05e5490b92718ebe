//! Cross-instance relay between the local [`Hub`] and a shared broker topic
//!
//! Every instance publishes outgoing events to one topic and runs a single
//! background loop that feeds inbound messages back into its own hub. The
//! publishing instance receives its own events through the same round trip.
//!
//! The loop is supervised: if the subscription fails or the stream ends it
//! resubscribes with exponential backoff until the [`BridgeHandle`] is shut
//! down.

use crate::metrics::{self, PublishPath};
use crate::sse::broker::{Broker, MessageStream};
use crate::sse::error::RelayError;
use crate::sse::{Envelope, Event, Hub};
use futures::StreamExt;
use resilience::{with_deadline, Backoff, BackoffConfig, DeadlineError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default relay topic shared by all instances
pub const DEFAULT_CHANNEL: &str = "notification:sse";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Topic every instance publishes to and subscribes on
    pub channel: String,
    /// Upper bound for one relay publish
    pub publish_timeout: Duration,
    /// Resubscribe schedule after the subscription is lost
    pub reconnect: BackoffConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            publish_timeout: Duration::from_secs(2),
            reconnect: BackoffConfig::default(),
        }
    }
}

/// State of the relay subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Relay bridge between a [`Hub`] and a [`Broker`]
pub struct Bridge {
    broker: Arc<dyn Broker>,
    hub: Hub,
    config: BridgeConfig,
    link: watch::Sender<LinkState>,
}

impl Bridge {
    pub fn new(broker: Arc<dyn Broker>, hub: Hub, config: BridgeConfig) -> Self {
        let (link, _) = watch::channel(LinkState::Connecting);
        Self {
            broker,
            hub,
            config,
            link,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// Publish `event` for `user_id` to the relay topic.
    ///
    /// Failures are logged and counted; they never reach the caller and are
    /// not retried.
    pub async fn publish(&self, user_id: &str, event: Event) {
        if let Err(e) = self.try_publish(user_id, event).await {
            metrics::relay_publish_failed();
            error!(
                channel = %self.config.channel,
                user_id = %user_id,
                error = %e,
                "sse relay publish failed"
            );
        }
    }

    async fn try_publish(&self, user_id: &str, event: Event) -> Result<(), RelayError> {
        let envelope = Envelope::wrap(user_id, event);
        let payload = envelope.to_vec().map_err(RelayError::Encode)?;

        with_deadline(
            self.config.publish_timeout,
            self.broker.publish(&self.config.channel, payload),
        )
        .await
        .map_err(|e| match e {
            DeadlineError::Elapsed(after) => RelayError::Timeout(after),
            DeadlineError::Failed(e) => RelayError::Broker(e),
        })?;

        metrics::event_published(PublishPath::Relay);
        debug!(
            channel = %self.config.channel,
            user_id = %user_id,
            event_type = %envelope.event_type,
            "sse event relayed"
        );
        Ok(())
    }

    /// Start the subscriber loop on the current runtime
    pub fn spawn(self: Arc<Self>) -> BridgeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bridge = Arc::clone(&self);
        let handle = tokio::spawn(async move { bridge.run(shutdown_rx).await });

        info!(
            broker = self.broker.name(),
            channel = %self.config.channel,
            "sse relay bridge started"
        );

        BridgeHandle {
            bridge: self,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }

            let subscribed = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.broker.subscribe(&self.config.channel) => result,
            };

            match subscribed {
                Ok(stream) => {
                    backoff.reset();
                    self.link.send_replace(LinkState::Connected);
                    info!(channel = %self.config.channel, "sse relay subscribed");

                    match self.consume(stream, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Disconnected => {
                            warn!(channel = %self.config.channel, "sse relay subscription lost");
                        }
                    }
                }
                Err(e) => {
                    error!(
                        channel = %self.config.channel,
                        error = %e,
                        "failed to subscribe to sse relay channel"
                    );
                }
            }

            self.link.send_replace(LinkState::Reconnecting);
            metrics::relay_reconnect();

            let delay = backoff.next_delay();
            warn!(
                channel = %self.config.channel,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "sse relay reconnecting"
            );

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.link.send_replace(LinkState::Stopped);
        info!(channel = %self.config.channel, "sse relay bridge stopped");
    }

    async fn consume(
        &self,
        mut stream: MessageStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return SessionEnd::Shutdown,
                next = stream.next() => match next {
                    Some(payload) => {
                        if let Err(e) = self.dispatch(&payload) {
                            metrics::relay_decode_failed();
                            error!(
                                channel = %self.config.channel,
                                error = %e,
                                "failed to decode sse relay message"
                            );
                        }
                    }
                    None => return SessionEnd::Disconnected,
                },
            }
        }
    }

    /// Decode one relay payload and fan it out locally
    fn dispatch(&self, payload: &[u8]) -> Result<usize, RelayError> {
        let envelope = Envelope::from_slice(payload).map_err(RelayError::Decode)?;
        if !envelope.is_routable() {
            debug!("sse relay message without user or type skipped");
            return Ok(0);
        }

        let (user_id, event) = envelope.into_parts();
        Ok(self.hub.publish(&user_id, &event))
    }
}

/// Owner of a running subscriber loop
///
/// Dropping the handle signals the loop and aborts it; prefer
/// [`shutdown`](BridgeHandle::shutdown) to wait for a clean exit.
pub struct BridgeHandle {
    bridge: Arc<Bridge>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Wait until the relay subscription is established
    pub async fn wait_connected(&self) {
        let mut link = self.bridge.watch_link();
        let _ = link.wait_for(|state| *state == LinkState::Connected).await;
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "sse relay task ended abnormally");
            }
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::broker::MemoryBroker;
    use serde_json::json;

    fn bridge() -> Bridge {
        Bridge::new(
            Arc::new(MemoryBroker::default()),
            Hub::new(),
            BridgeConfig::default(),
        )
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.channel, DEFAULT_CHANNEL);
        assert_eq!(config.publish_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_initial_link_state() {
        assert_eq!(bridge().link_state(), LinkState::Connecting);
    }

    #[test]
    fn test_link_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(LinkState::Reconnecting).unwrap(),
            json!("reconnecting")
        );
    }

    #[test]
    fn test_dispatch_routes_to_hub() {
        let bridge = bridge();
        let mut sub = bridge.hub().subscribe("u1");

        let payload = br#"{"user_uuid":"u1","type":"notification.created","data":{"unread_count":3},"sent_at":"2024-05-01T10:00:00Z"}"#;
        assert_eq!(bridge.dispatch(payload).unwrap(), 1);
        assert_eq!(
            sub.try_recv(),
            Some(Event::new("notification.created", json!({"unread_count": 3})))
        );
    }

    #[test]
    fn test_dispatch_rejects_malformed_payload() {
        let bridge = bridge();
        assert!(matches!(
            bridge.dispatch(b"not json"),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn test_dispatch_skips_unroutable_envelope() {
        let bridge = bridge();
        let mut sub = bridge.hub().subscribe("u1");

        let payload = br#"{"user_uuid":"u1","type":"","sent_at":"2024-05-01T10:00:00Z"}"#;
        assert_eq!(bridge.dispatch(payload).unwrap(), 0);
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_dispatch_skips_multiline_type() {
        let bridge = bridge();
        let mut sub = bridge.hub().subscribe("u1");

        let payload = br#"{"user_uuid":"u1","type":"x\ndata: {}\n\nevent: admin","data":{"a":1}}"#;
        assert_eq!(bridge.dispatch(payload).unwrap(), 0);
        assert_eq!(sub.try_recv(), None);
    }
}
