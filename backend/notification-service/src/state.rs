use crate::sse::{Notifier, ShutdownSignal};
use std::time::Duration;

/// Settings shared by every open stream
#[derive(Clone)]
pub struct StreamSettings {
    pub heartbeat_interval: Duration,
    pub shutdown: ShutdownSignal,
}

#[derive(Clone)]
pub struct AppState {
    pub notifier: Notifier,
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(notifier: Notifier, heartbeat_interval: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            notifier,
            stream: StreamSettings {
                heartbeat_interval,
                shutdown,
            },
        }
    }
}
