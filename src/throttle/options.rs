//! Throttle configuration and defaulting rules.
//!
//! [`ThrottleOptions`] is the raw, optional form read from configuration
//! files or built by hand. It is resolved exactly once into an immutable
//! [`ThrottleConfig`] when a throttle is constructed.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::warn;

/// Default minimum delay between downstream dispatches.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(150);

/// Resolved throttle configuration. Immutable once a throttle is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum time between downstream dispatches
    pub interval: Duration,
    /// Deliver only the dispatch that drains a burst
    pub suppress_non_final: bool,
    /// Label used in log output
    pub name: Option<String>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            suppress_non_final: false,
            name: None,
        }
    }
}

impl ThrottleConfig {
    /// Create a configuration with the given interval and no suppression.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Whether registrations bypass the timer entirely.
    pub fn is_passthrough(&self) -> bool {
        self.interval.is_zero()
    }
}

/// Optional throttle settings, as supplied by a caller or a config file.
///
/// Every field may be absent. An interval that is not a non-negative
/// number (negative, NaN, a string, ...) is ignored and the default kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrottleOptions {
    /// Minimum delay between dispatches, in milliseconds
    #[serde(default, deserialize_with = "lenient_millis")]
    pub interval_ms: Option<f64>,

    /// Only deliver the dispatch that ends a burst
    #[serde(default)]
    pub suppress_non_final: Option<bool>,

    /// Optional label for log output
    #[serde(default)]
    pub name: Option<String>,
}

impl ThrottleOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interval in milliseconds.
    pub fn interval_ms(mut self, interval_ms: f64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }

    /// Set the suppression flag.
    pub fn suppress_non_final(mut self, suppress: bool) -> Self {
        self.suppress_non_final = Some(suppress);
        self
    }

    /// Set the log label.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Resolve against the built-in defaults.
    pub fn resolve(&self) -> ThrottleConfig {
        self.resolve_with(&ThrottleConfig::default())
    }

    /// Resolve against caller-supplied defaults.
    pub fn resolve_with(&self, defaults: &ThrottleConfig) -> ThrottleConfig {
        let interval = match self.interval_ms {
            Some(ms) => interval_from_millis(ms).unwrap_or_else(|| {
                warn!(
                    interval_ms = ms,
                    default_ms = defaults.interval.as_millis() as u64,
                    "Ignoring invalid throttle interval"
                );
                defaults.interval
            }),
            None => defaults.interval,
        };

        ThrottleConfig {
            interval,
            suppress_non_final: self
                .suppress_non_final
                .unwrap_or(defaults.suppress_non_final),
            name: self.name.clone().or_else(|| defaults.name.clone()),
        }
    }

    /// Overlay another set of options on top of this one.
    ///
    /// Fields present in `other` win.
    pub fn merge(&self, other: &ThrottleOptions) -> ThrottleOptions {
        ThrottleOptions {
            interval_ms: other.interval_ms.or(self.interval_ms),
            suppress_non_final: other.suppress_non_final.or(self.suppress_non_final),
            name: other.name.clone().or_else(|| self.name.clone()),
        }
    }
}

/// Convert a millisecond count into a duration.
///
/// Returns `None` for negative, non-finite or out-of-range values.
pub fn interval_from_millis(ms: f64) -> Option<Duration> {
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    let nanos = (ms * 1_000_000.0).round();
    if nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}

/// Accept any value for the interval; keep it only when it is a number.
fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value.as_f64() {
        Some(ms) => Some(ms),
        None => {
            warn!(value = %value, "Throttle interval is not a number, using default");
            None
        }
    }))
}
