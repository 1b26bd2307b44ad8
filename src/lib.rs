//! Eventgate - event throttling with a guaranteed trailing dispatch
//!
//! This crate implements a throttle that re-emits a high-frequency stream of
//! occurrences to a single handler at a bounded rate. The most recent
//! occurrence of every burst always reaches the handler. A small text-editor
//! demo shows two throttles driving word counts and an idle marker.

pub mod config;
pub mod demo;
pub mod error;
pub mod throttle;

pub use throttle::{Throttle, ThrottleBuilder, ThrottleConfig, ThrottleError, ThrottleHandler, ThrottleOptions};
