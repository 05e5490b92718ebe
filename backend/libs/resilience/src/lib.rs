//! Resilience helpers shared by long-running relay components
//!
//! - **Backoff**: exponential schedule with jitter for loops that reconnect forever
//! - **Deadline**: bounded-time execution that preserves the operation's error
//!
//! # Example: supervised reconnect
//!
//! ```rust,no_run
//! use resilience::{Backoff, BackoffConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut backoff = Backoff::new(BackoffConfig::default());
//!     loop {
//!         match connect().await {
//!             Ok(()) => backoff.reset(),
//!             Err(_) => tokio::time::sleep(backoff.next_delay()).await,
//!         }
//!     }
//! }
//! # async fn connect() -> Result<(), ()> { Ok(()) }
//! ```

pub mod backoff;
pub mod timeout;

pub use backoff::{Backoff, BackoffConfig};
pub use timeout::{with_deadline, DeadlineError};
