//! Server-Sent Events delivery
//!
//! - `hub`: per-user subscriber registry with bounded queues
//! - `bridge`: cross-instance relay over a shared broker topic
//! - `notifier`: publish entrypoint used by producers
//! - `stream`: per-connection SSE writer

pub mod bridge;
pub mod broker;
pub mod error;
pub mod event;
pub mod hub;
pub mod notifier;
pub mod stream;

pub use bridge::{Bridge, BridgeConfig, BridgeHandle, LinkState};
pub use broker::{Broker, MemoryBroker, RedisBroker};
pub use error::{BrokerError, RelayError};
pub use event::{Envelope, Event};
pub use hub::{Hub, SubscriberId, Subscription};
pub use notifier::Notifier;
pub use stream::{event_stream, ShutdownSignal};
