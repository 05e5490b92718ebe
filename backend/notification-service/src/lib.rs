pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod sse;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use sse::{Event, Hub, Notifier};
pub use state::AppState;
