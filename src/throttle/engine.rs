//! Throttle engine.
//!
//! A [`Throttle`] accepts a high-frequency stream of occurrences and hands
//! them to a single [`ThrottleHandler`] at most once per interval. The last
//! occurrence of every burst is always delivered eventually.
//!
//! Windows are plain Tokio tasks that sleep until their deadline. They are
//! never cancelled: a window that outlives a flush finds a changed
//! generation (or an empty backlog) and does nothing.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::handler::ThrottleHandler;
use super::options::{ThrottleConfig, ThrottleOptions};
use super::state::{Occurrence, Registration, ScheduledWindow, ThrottleState, WindowOutcome};

/// Label used in logs when a throttle has no name.
const DEFAULT_NAME: &str = "throttle";

/// Errors that can occur when building a throttle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("A throttle interval of {0:?} requires a Tokio runtime")]
    NoRuntime(Duration),
}

struct Inner<V, A> {
    config: ThrottleConfig,
    handler: Box<dyn ThrottleHandler<V, A>>,
    state: Mutex<ThrottleState<V, A>>,
    runtime: Option<Handle>,
}

/// Rate-limits occurrences on their way to a handler.
///
/// Cloning is cheap; all clones share one backlog. Windows still pending
/// when the last clone is dropped fire without effect.
pub struct Throttle<V, A = ()> {
    inner: Arc<Inner<V, A>>,
}

impl<V, A> Clone for Throttle<V, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, A> fmt::Debug for Throttle<V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Throttle")
            .field("name", &self.name())
            .field("interval", &self.inner.config.interval)
            .field("suppress_non_final", &self.inner.config.suppress_non_final)
            .field("enabled", &state.is_enabled())
            .field("backlog", &state.backlog())
            .finish()
    }
}

impl<V, A> Throttle<V, A>
where
    V: Send + 'static,
    A: Send + 'static,
{
    /// Start building a throttle.
    pub fn builder() -> ThrottleBuilder<V, A> {
        ThrottleBuilder::new()
    }

    /// Create a throttle from a handler and a resolved configuration.
    ///
    /// Uses the ambient Tokio runtime for timers.
    pub fn new<H>(handler: H, config: ThrottleConfig) -> Result<Self, ThrottleError>
    where
        H: ThrottleHandler<V, A>,
    {
        Self::from_parts(Box::new(handler), config, Handle::try_current().ok())
    }

    fn from_parts(
        handler: Box<dyn ThrottleHandler<V, A>>,
        config: ThrottleConfig,
        runtime: Option<Handle>,
    ) -> Result<Self, ThrottleError> {
        if runtime.is_none() && !config.is_passthrough() {
            return Err(ThrottleError::NoRuntime(config.interval));
        }

        debug!(
            throttle = config.name.as_deref().unwrap_or(DEFAULT_NAME),
            interval_ms = config.interval.as_millis() as u64,
            suppress_non_final = config.suppress_non_final,
            "Creating throttle"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state: Mutex::new(ThrottleState::new()),
                runtime,
            }),
        })
    }

    /// Register one occurrence.
    ///
    /// Ignored while disabled. With a zero interval the handler runs
    /// before this call returns; otherwise the occurrence either opens a
    /// new window or replaces the pending one.
    pub fn register_event(&self, value: V, aux: A) {
        let registration = self
            .inner
            .state
            .lock()
            .register(Occurrence::new(value, aux), self.inner.config.is_passthrough());

        match registration {
            Registration::Ignored => {
                trace!(throttle = %self.name(), "Throttle disabled, ignoring occurrence");
            }
            Registration::Immediate(occurrence) => self.deliver(occurrence),
            Registration::OpenWindow(window) => {
                trace!(throttle = %self.name(), "Opening throttle window");
                self.schedule(window);
            }
            Registration::Coalesced => {
                trace!(throttle = %self.name(), backlog = self.throttled(), "Coalesced occurrence");
            }
        }
    }

    /// Register an occurrence with default auxiliary state.
    pub fn register(&self, value: V)
    where
        A: Default,
    {
        self.register_event(value, A::default());
    }

    fn schedule(&self, window: ScheduledWindow<V, A>) {
        let Some(runtime) = self.inner.runtime.as_ref() else {
            warn!(throttle = %self.name(), "No runtime to schedule a window, dropping backlog");
            self.inner.state.lock().flush();
            return;
        };

        let deadline = Instant::now() + self.inner.config.interval;
        let weak: Weak<Inner<V, A>> = Arc::downgrade(&self.inner);

        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                Throttle { inner }.on_window_elapsed(window);
            }
        });
    }

    fn on_window_elapsed(&self, window: ScheduledWindow<V, A>) {
        let captured = window.backlog;
        let outcome = self
            .inner
            .state
            .lock()
            .complete_window(window, self.inner.config.suppress_non_final);

        match outcome {
            WindowOutcome::Stale => {
                trace!(throttle = %self.name(), "Discarding stale window");
            }
            WindowOutcome::Fired { deliver, next } => {
                match deliver {
                    Some(occurrence) => self.deliver(occurrence),
                    None => {
                        trace!(throttle = %self.name(), "Suppressed non-final dispatch");
                    }
                }

                if let Some(next) = next {
                    debug!(
                        throttle = %self.name(),
                        resolved = captured,
                        backlog = next.backlog,
                        "Burst continues, chaining window"
                    );
                    self.schedule(next);
                }
            }
        }
    }

    fn deliver(&self, occurrence: Occurrence<V, A>) {
        trace!(throttle = %self.name(), "Dispatching occurrence");
        self.inner
            .handler
            .dispatch(self, occurrence.value, occurrence.aux);
    }
}

impl<V, A> Throttle<V, A> {
    /// Drop the backlog and any pending occurrence.
    ///
    /// Windows already scheduled will fire without dispatching.
    pub fn flush(&self) {
        self.inner.state.lock().flush();
        trace!(throttle = %self.name(), "Flushed throttle");
    }

    /// Whether registrations are accepted.
    pub fn enabled(&self) -> bool {
        self.inner.state.lock().is_enabled()
    }

    /// Enable or disable the throttle. Disabling also flushes.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.state.lock().set_enabled(enabled);
        debug!(throttle = %self.name(), enabled, "Throttle toggled");
    }

    /// Number of registered occurrences not yet resolved by a dispatch.
    pub fn throttled(&self) -> u64 {
        self.inner.state.lock().backlog()
    }

    /// Whether any occurrence is waiting on a window.
    pub fn is_throttling(&self) -> bool {
        self.throttled() > 0
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ThrottleConfig {
        &self.inner.config
    }

    /// Minimum time between dispatches.
    pub fn interval(&self) -> Duration {
        self.inner.config.interval
    }

    /// Whether interior dispatches of a burst are dropped.
    pub fn suppress_non_final(&self) -> bool {
        self.inner.config.suppress_non_final
    }

    /// Log label for this throttle.
    pub fn name(&self) -> &str {
        self.inner.config.name.as_deref().unwrap_or(DEFAULT_NAME)
    }
}

/// Builder for [`Throttle`].
pub struct ThrottleBuilder<V, A = ()> {
    handler: Option<Box<dyn ThrottleHandler<V, A>>>,
    options: ThrottleOptions,
    interval: Option<Duration>,
    runtime: Option<Handle>,
}

impl<V, A> Default for ThrottleBuilder<V, A>
where
    V: Send + 'static,
    A: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, A> ThrottleBuilder<V, A>
where
    V: Send + 'static,
    A: Send + 'static,
{
    /// Create a builder with no handler and default options.
    pub fn new() -> Self {
        Self {
            handler: None,
            options: ThrottleOptions::default(),
            interval: None,
            runtime: None,
        }
    }

    /// Use a closure as the handler.
    pub fn on_dispatch<F>(mut self, f: F) -> Self
    where
        F: Fn(&Throttle<V, A>, V, A) + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(f));
        self
    }

    /// Use a handler implementation.
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: ThrottleHandler<V, A>,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Apply raw options on top of what the builder already holds.
    pub fn options(mut self, options: ThrottleOptions) -> Self {
        if options.interval_ms.is_some() {
            self.interval = None;
        }
        self.options = self.options.merge(&options);
        self
    }

    /// Set the interval in milliseconds. Invalid values keep the default.
    pub fn interval_ms(mut self, interval_ms: f64) -> Self {
        self.options.interval_ms = Some(interval_ms);
        self.interval = None;
        self
    }

    /// Set the interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Only deliver the dispatch that ends a burst.
    pub fn suppress_non_final(mut self, suppress: bool) -> Self {
        self.options.suppress_non_final = Some(suppress);
        self
    }

    /// Set the log label.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Schedule windows on a specific runtime instead of the ambient one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the throttle.
    ///
    /// Fails with [`ThrottleError::InvalidArgument`] when no handler was
    /// supplied, and with [`ThrottleError::NoRuntime`] when a non-zero
    /// interval is requested outside a Tokio runtime.
    pub fn build(self) -> Result<Throttle<V, A>, ThrottleError> {
        let handler = self.handler.ok_or_else(|| {
            ThrottleError::InvalidArgument("a dispatch handler is required".to_string())
        })?;

        let mut config = self.options.resolve();
        if let Some(interval) = self.interval {
            config.interval = interval;
        }

        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        Throttle::from_parts(handler, config, runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    type Log = Arc<Mutex<Vec<(u32, &'static str, u64)>>>;

    fn recording(interval_ms: f64, suppress: bool) -> (Throttle<u32, &'static str>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let start = Instant::now();

        let throttle = Throttle::<u32, &'static str>::builder()
            .interval_ms(interval_ms)
            .suppress_non_final(suppress)
            .on_dispatch(move |_, value, aux| {
                let at = start.elapsed().as_millis() as u64;
                sink.lock().push((value, aux, at));
            })
            .build()
            .unwrap();

        (throttle, log)
    }

    fn values(log: &Log) -> Vec<(u32, u64)> {
        log.lock().iter().map(|(v, _, t)| (*v, *t)).collect()
    }

    #[test]
    fn test_missing_handler_is_invalid_argument() {
        let result = Throttle::<u32, ()>::builder().interval_ms(0.0).build();
        assert!(matches!(result, Err(ThrottleError::InvalidArgument(_))));
    }

    #[test]
    fn test_interval_without_runtime_fails() {
        let result = Throttle::<u32, ()>::builder()
            .on_dispatch(|_, _, _| {})
            .build();
        assert_eq!(
            result.unwrap_err(),
            ThrottleError::NoRuntime(Duration::from_millis(150))
        );
    }

    #[test]
    fn test_zero_interval_dispatches_synchronously() {
        let log: Arc<Mutex<Vec<(u32, &'static str)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);

        let throttle = Throttle::<u32, &'static str>::builder()
            .interval_ms(0.0)
            .suppress_non_final(true)
            .on_dispatch(move |sender, value, aux| {
                assert_eq!(sender.throttled(), 0);
                sink.lock().push((value, aux));
            })
            .build()
            .unwrap();

        throttle.register_event(1, "a");
        throttle.register_event(2, "b");
        throttle.register_event(3, "c");

        assert_eq!(*log.lock(), vec![(1, "a"), (2, "b"), (3, "c")]);
        assert_eq!(throttle.throttled(), 0);
        assert!(!throttle.is_throttling());
    }

    #[test]
    fn test_zero_interval_respects_enabled() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let throttle = Throttle::<u32, ()>::builder()
            .interval(Duration::ZERO)
            .on_dispatch(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        throttle.set_enabled(false);
        throttle.register(1);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        throttle.set_enabled(true);
        throttle.register(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let throttle = Throttle::<u32, ()>::builder()
            .on_dispatch(|_, _, _| {})
            .build()
            .unwrap();

        assert_eq!(throttle.interval(), Duration::from_millis(150));
        assert!(!throttle.suppress_non_final());
        assert!(throttle.enabled());
        assert_eq!(throttle.name(), "throttle");
        assert_eq!(throttle.throttled(), 0);
    }

    #[tokio::test]
    async fn test_builder_invalid_interval_keeps_default() {
        let throttle = Throttle::<u32, ()>::builder()
            .interval_ms(-25.0)
            .name("stats")
            .on_dispatch(|_, _, _| {})
            .build()
            .unwrap();

        assert_eq!(throttle.interval(), Duration::from_millis(150));
        assert_eq!(throttle.name(), "stats");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_occurrence_dispatched_after_interval() {
        let (throttle, log) = recording(500.0, false);

        throttle.register_event(1, "only");
        assert_eq!(throttle.throttled(), 1);
        assert!(throttle.is_throttling());

        sleep(Duration::from_millis(499)).await;
        assert!(log.lock().is_empty());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(*log.lock(), vec![(1, "only", 500)]);
        assert_eq!(throttle.throttled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_burst_delivers_first_then_last() {
        let (throttle, log) = recording(500.0, false);

        for value in 1..=5 {
            throttle.register_event(value, "burst");
        }
        assert_eq!(throttle.throttled(), 5);

        sleep(Duration::from_millis(750)).await;
        assert_eq!(values(&log), vec![(1, 500)]);
        assert_eq!(throttle.throttled(), 4);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(values(&log), vec![(1, 500), (5, 1000)]);
        assert_eq!(throttle.throttled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_edge_across_windows() {
        let (throttle, log) = recording(500.0, false);

        throttle.register_event(1, "t0");
        sleep(Duration::from_millis(100)).await;
        throttle.register_event(2, "t100");
        sleep(Duration::from_millis(100)).await;
        throttle.register_event(3, "t200");

        sleep(Duration::from_millis(700)).await;
        // t=900: the first window delivered t0 and chained t200.
        assert_eq!(values(&log), vec![(1, 500)]);
        throttle.register_event(4, "t900");

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(values(&log), vec![(1, 500), (3, 1000), (4, 1500)]);
        assert_eq!(log.lock()[2].1, "t900");
        assert_eq!(throttle.throttled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_get_separate_windows() {
        let (throttle, log) = recording(500.0, false);

        throttle.register_event(1, "first");
        sleep(Duration::from_millis(600)).await;
        throttle.register_event(2, "second");
        sleep(Duration::from_millis(600)).await;

        assert_eq!(values(&log), vec![(1, 500), (2, 1100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_delivers_only_burst_end() {
        let (throttle, log) = recording(1500.0, true);

        throttle.register_event(1, "t0");
        sleep(Duration::from_millis(200)).await;
        throttle.register_event(2, "t200");
        sleep(Duration::from_millis(200)).await;
        throttle.register_event(3, "t400");
        sleep(Duration::from_millis(1200)).await;
        throttle.register_event(4, "t1600");

        sleep(Duration::from_millis(2400)).await;
        // t=4000: two interior windows closed without delivering.
        assert!(log.lock().is_empty());
        assert_eq!(throttle.throttled(), 1);

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(*log.lock(), vec![(4, "t1600", 4500)]);
        assert_eq!(throttle.throttled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_single_occurrence_is_final() {
        let (throttle, log) = recording(300.0, true);

        throttle.register_event(9, "solo");
        sleep(Duration::from_millis(400)).await;

        assert_eq!(*log.lock(), vec![(9, "solo", 300)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_discards_backlog() {
        let (throttle, log) = recording(500.0, false);

        throttle.register_event(1, "a");
        throttle.register_event(2, "b");
        throttle.register_event(3, "c");
        assert_eq!(throttle.throttled(), 3);

        throttle.flush();
        assert_eq!(throttle.throttled(), 0);
        assert!(!throttle.is_throttling());

        sleep(Duration::from_secs(2)).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_when_idle_is_noop() {
        let (throttle, log) = recording(500.0, false);

        throttle.flush();
        assert_eq!(throttle.throttled(), 0);

        throttle.register_event(1, "after");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(values(&log), vec![(1, 500)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_window_does_not_consume_new_burst() {
        let (throttle, log) = recording(500.0, false);

        throttle.register_event(1, "old");
        sleep(Duration::from_millis(100)).await;
        throttle.flush();
        throttle.register_event(2, "new");

        sleep(Duration::from_millis(900)).await;
        assert_eq!(*log.lock(), vec![(2, "new", 600)]);
        assert_eq!(throttle.throttled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_flushes_and_ignores() {
        let (throttle, log) = recording(500.0, false);

        throttle.register_event(1, "a");
        throttle.register_event(2, "b");
        throttle.set_enabled(false);
        assert!(!throttle.enabled());
        assert_eq!(throttle.throttled(), 0);

        throttle.register_event(3, "ignored");
        assert_eq!(throttle.throttled(), 0);

        sleep(Duration::from_secs(1)).await;
        assert!(log.lock().is_empty());

        throttle.set_enabled(true);
        sleep(Duration::from_secs(1)).await;
        assert!(log.lock().is_empty());

        throttle.register_event(4, "back");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(values(&log), vec![(4, 2500)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_can_inspect_sender() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let throttle = Throttle::<u32, ()>::builder()
            .interval(Duration::from_millis(100))
            .on_dispatch(move |sender, _, _| {
                sink.lock().push(sender.throttled());
            })
            .build()
            .unwrap();

        throttle.register(1);
        throttle.register(2);
        throttle.register(3);

        sleep(Duration::from_millis(250)).await;
        assert_eq!(*seen.lock(), vec![2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_can_flush_sender() {
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);

        let throttle = Throttle::<u32, ()>::builder()
            .interval(Duration::from_millis(100))
            .on_dispatch(move |sender, value, _| {
                sink.lock().push(value);
                sender.flush();
            })
            .build()
            .unwrap();

        throttle.register(1);
        throttle.register(2);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(throttle.throttled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_throttle_does_not_dispatch() {
        let (throttle, log) = recording(200.0, false);

        throttle.register_event(1, "orphan");
        drop(throttle);

        sleep(Duration::from_millis(500)).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_backlog() {
        let (throttle, log) = recording(200.0, false);
        let other = throttle.clone();

        throttle.register_event(1, "a");
        other.register_event(2, "b");
        assert_eq!(throttle.throttled(), 2);
        assert_eq!(other.throttled(), 2);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(values(&log), vec![(1, 200), (2, 400)]);
    }
}
