//! Per-connection SSE stream writer
//!
//! Turns one [`Subscription`] into the body of a `text/event-stream`
//! response:
//!
//! ```text
//! : ok                      <- on connect
//!
//! event: notification.created
//! data: {"unread_count":3}
//!
//! : ping                    <- every heartbeat interval
//! ```
//!
//! The subscription lives inside the stream state, so whichever way the
//! stream ends (client gone, shutdown, queue closed) it is released exactly
//! once when the state is dropped.

use crate::sse::{Event, Subscription};
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

pub const CONNECTED_FRAME: &str = ": ok\n\n";
pub const HEARTBEAT_FRAME: &str = ": ping\n\n";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Encode one event as an SSE frame
pub fn encode_event(event: &Event) -> serde_json::Result<Bytes> {
    let data = serde_json::to_string(&event.data)?;
    Ok(Bytes::from(format!(
        "event: {}\ndata: {}\n\n",
        event.event_type, data
    )))
}

/// Server-wide signal that closes every open stream
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct StreamWriter {
    subscription: Subscription,
    heartbeat: Interval,
    shutdown: watch::Receiver<bool>,
    greeted: bool,
}

impl StreamWriter {
    async fn next_frame(&mut self) -> Option<Bytes> {
        if !self.greeted {
            self.greeted = true;
            return Some(Bytes::from_static(CONNECTED_FRAME.as_bytes()));
        }

        loop {
            if *self.shutdown.borrow() {
                return None;
            }

            tokio::select! {
                _ = self.shutdown.changed() => return None,
                _ = self.heartbeat.tick() => {
                    return Some(Bytes::from_static(HEARTBEAT_FRAME.as_bytes()));
                }
                event = self.subscription.recv() => match event {
                    Some(event) if !event.has_valid_type() => {
                        warn!(
                            user_id = %self.subscription.user_id(),
                            "sse event with invalid type skipped"
                        );
                    }
                    Some(event) => match encode_event(&event) {
                        Ok(frame) => return Some(frame),
                        Err(e) => {
                            warn!(
                                user_id = %self.subscription.user_id(),
                                event_type = %event.event_type,
                                error = %e,
                                "failed to encode sse event, skipping"
                            );
                        }
                    },
                    None => return None,
                },
            }
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        debug!(user_id = %self.subscription.user_id(), "sse stream closed");
    }
}

/// Build the response body for one connection.
///
/// The first heartbeat fires one full `heartbeat_every` after connect.
pub fn event_stream(
    subscription: Subscription,
    heartbeat_every: Duration,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let writer = StreamWriter {
        subscription,
        heartbeat,
        shutdown,
        greeted: false,
    };

    stream::unfold(writer, |mut writer| async move {
        let frame = writer.next_frame().await?;
        Some((Ok(frame), writer))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::Hub;
    use futures::StreamExt;
    use serde_json::{json, Value};

    async fn next_text<S>(stream: &mut S) -> Option<String>
    where
        S: Stream<Item = Result<Bytes, Infallible>> + Unpin,
    {
        let frame = stream.next().await?.unwrap();
        Some(String::from_utf8(frame.to_vec()).unwrap())
    }

    #[test]
    fn test_encode_event_frame() {
        let event = Event::new("notification.created", json!({"unread_count": 3}));
        let frame = encode_event(&event).unwrap();
        assert_eq!(
            &frame[..],
            b"event: notification.created\ndata: {\"unread_count\":3}\n\n"
        );
    }

    #[test]
    fn test_encode_event_without_data() {
        let frame = encode_event(&Event::new("notification.updated", Value::Null)).unwrap();
        assert_eq!(&frame[..], b"event: notification.updated\ndata: null\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_starts_with_connected_frame() {
        let hub = Hub::new();
        let shutdown = ShutdownSignal::new();
        let mut stream = Box::pin(event_stream(
            hub.subscribe("u1"),
            DEFAULT_HEARTBEAT_INTERVAL,
            shutdown.subscribe(),
        ));

        assert_eq!(next_text(&mut stream).await.as_deref(), Some(CONNECTED_FRAME));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_writes_events() {
        let hub = Hub::new();
        let shutdown = ShutdownSignal::new();
        let mut stream = Box::pin(event_stream(
            hub.subscribe("u1"),
            DEFAULT_HEARTBEAT_INTERVAL,
            shutdown.subscribe(),
        ));
        next_text(&mut stream).await;

        hub.publish("u1", &Event::new("notification.created", json!({"unread_count": 3})));

        assert_eq!(
            next_text(&mut stream).await.as_deref(),
            Some("event: notification.created\ndata: {\"unread_count\":3}\n\n")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiline_type_never_reaches_the_wire() {
        let hub = Hub::new();
        let shutdown = ShutdownSignal::new();
        let mut stream = Box::pin(event_stream(
            hub.subscribe("u1"),
            DEFAULT_HEARTBEAT_INTERVAL,
            shutdown.subscribe(),
        ));
        next_text(&mut stream).await;

        hub.publish(
            "u1",
            &Event::new("x\ndata: {\"forged\":true}\n\nevent: admin", json!({"a": 1})),
        );
        hub.publish("u1", &Event::new("notification.updated", json!({"a": 1})));

        assert_eq!(
            next_text(&mut stream).await.as_deref(),
            Some("event: notification.updated\ndata: {\"a\":1}\n\n")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_heartbeat() {
        let hub = Hub::new();
        let shutdown = ShutdownSignal::new();
        let mut stream = Box::pin(event_stream(
            hub.subscribe("u1"),
            Duration::from_secs(25),
            shutdown.subscribe(),
        ));
        next_text(&mut stream).await;

        let started = Instant::now();
        assert_eq!(next_text(&mut stream).await.as_deref(), Some(HEARTBEAT_FRAME));
        assert!(started.elapsed() >= Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_stream_and_unsubscribes() {
        let hub = Hub::new();
        let shutdown = ShutdownSignal::new();
        let mut stream = Box::pin(event_stream(
            hub.subscribe("u1"),
            DEFAULT_HEARTBEAT_INTERVAL,
            shutdown.subscribe(),
        ));
        next_text(&mut stream).await;
        assert_eq!(hub.connection_count("u1"), 1);

        shutdown.trigger();

        assert!(shutdown.is_triggered());
        assert_eq!(next_text(&mut stream).await, None);
        assert_eq!(hub.connection_count("u1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_unsubscribes() {
        let hub = Hub::new();
        let shutdown = ShutdownSignal::new();
        let mut stream = Box::pin(event_stream(
            hub.subscribe("u1"),
            DEFAULT_HEARTBEAT_INTERVAL,
            shutdown.subscribe(),
        ));
        next_text(&mut stream).await;

        drop(stream);

        assert_eq!(hub.connection_count("u1"), 0);
        assert_eq!(hub.connected_users(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpolled_stream_still_unsubscribes_on_drop() {
        let hub = Hub::new();
        let shutdown = ShutdownSignal::new();
        let stream = event_stream(hub.subscribe("u1"), DEFAULT_HEARTBEAT_INTERVAL, shutdown.subscribe());

        assert_eq!(hub.connection_count("u1"), 1);
        drop(stream);
        assert_eq!(hub.connection_count("u1"), 0);
    }
}
