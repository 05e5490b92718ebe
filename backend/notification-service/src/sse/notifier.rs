//! Publish entrypoint for notification producers

use crate::metrics::{self, PublishPath};
use crate::sse::bridge::{Bridge, LinkState};
use crate::sse::{Event, Hub};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Single dispatch point producers call after a write completes.
///
/// - Without a bridge (single instance / dev), events go straight to the
///   local hub.
/// - With a bridge, events go to the relay topic and every instance
///   (including this one) replays them into its own hub.
#[derive(Clone)]
pub struct Notifier {
    hub: Hub,
    bridge: Option<Arc<Bridge>>,
}

impl Notifier {
    /// Local-only delivery
    pub fn local(hub: Hub) -> Self {
        Self { hub, bridge: None }
    }

    /// Delivery through the relay bridge
    pub fn relayed(bridge: Arc<Bridge>) -> Self {
        Self {
            hub: bridge.hub().clone(),
            bridge: Some(bridge),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn is_relayed(&self) -> bool {
        self.bridge.is_some()
    }

    /// Relay link state, or `None` when running without a bridge
    pub fn relay_state(&self) -> Option<LinkState> {
        self.bridge.as_ref().map(|bridge| bridge.link_state())
    }

    /// Dispatch `event` to every live stream of `user_id`.
    ///
    /// Requests with an empty user id, or an event type that is empty or
    /// spans several lines, are discarded. Never
    /// fails; relay problems are logged by the bridge.
    pub async fn publish_notification(&self, user_id: &str, event: Event) {
        if user_id.is_empty() || !event.has_valid_type() {
            trace!("sse publish without user or with invalid event type discarded");
            return;
        }

        match &self.bridge {
            Some(bridge) => bridge.publish(user_id, event).await,
            None => {
                let delivered = self.hub.publish(user_id, &event);
                metrics::event_published(PublishPath::Local);
                debug!(
                    user_id = %user_id,
                    event_type = %event.event_type,
                    delivered,
                    "sse event published locally"
                );
            }
        }
    }

    /// Fire-and-forget variant of [`publish_notification`](Self::publish_notification)
    pub fn spawn_publish(&self, user_id: impl Into<String>, event: Event) -> JoinHandle<()> {
        let notifier = self.clone();
        let user_id = user_id.into();
        tokio::spawn(async move { notifier.publish_notification(&user_id, event).await })
    }
}
