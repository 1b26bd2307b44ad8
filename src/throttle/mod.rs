//! Event throttling: backlog accounting, window scheduling and dispatch.

mod engine;
mod handler;
mod options;
mod state;

pub use engine::{Throttle, ThrottleBuilder, ThrottleError};
pub use handler::ThrottleHandler;
pub use options::{interval_from_millis, ThrottleConfig, ThrottleOptions, DEFAULT_INTERVAL};
pub use state::Occurrence;
