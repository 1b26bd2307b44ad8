//! Backlog and pending-occurrence bookkeeping.
//!
//! This is the synchronous half of the throttle: it decides what to do with
//! each registration and each timer expiry, but never sleeps or calls the
//! handler itself. The engine owns one `ThrottleState` behind a mutex and
//! acts on the returned decisions after releasing the lock.

use tracing::warn;

/// One opaque (value, aux) pair submitted through registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence<V, A> {
    /// The event value
    pub value: V,
    /// Auxiliary state passed through to the handler
    pub aux: A,
}

impl<V, A> Occurrence<V, A> {
    /// Create a new occurrence.
    pub fn new(value: V, aux: A) -> Self {
        Self { value, aux }
    }
}

/// A dispatch step waiting for its window to elapse.
///
/// Carries everything the step needs by value: the occurrence it will
/// deliver, the backlog it accounts for, and the flush generation that was
/// current when it was scheduled.
#[derive(Debug)]
pub struct ScheduledWindow<V, A> {
    /// Backlog count captured at scheduling time
    pub backlog: u64,
    /// Flush generation captured at scheduling time
    pub generation: u64,
    /// Occurrence bound into this window
    pub occurrence: Occurrence<V, A>,
}

/// What the engine must do after a registration.
#[derive(Debug)]
pub enum Registration<V, A> {
    /// The throttle is disabled; nothing happens.
    Ignored,
    /// Zero-interval throttle: deliver this occurrence right now.
    Immediate(Occurrence<V, A>),
    /// First occurrence of a burst: start a timer for this window.
    OpenWindow(ScheduledWindow<V, A>),
    /// A window is already open; the occurrence was parked as pending.
    Coalesced,
}

/// What the engine must do after a window elapses.
#[derive(Debug)]
pub enum WindowOutcome<V, A> {
    /// The window was flushed away before it fired.
    Stale,
    /// The window completed.
    Fired {
        /// Occurrence to hand to the handler, if not suppressed
        deliver: Option<Occurrence<V, A>>,
        /// Next window to schedule, if more occurrences arrived meanwhile
        next: Option<ScheduledWindow<V, A>>,
    },
}

/// Mutable throttle state. Always accessed under the engine's lock.
#[derive(Debug)]
pub struct ThrottleState<V, A> {
    backlog: u64,
    pending: Option<Occurrence<V, A>>,
    enabled: bool,
    generation: u64,
}

impl<V, A> Default for ThrottleState<V, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, A> ThrottleState<V, A> {
    /// Create an enabled, idle state.
    pub fn new() -> Self {
        Self {
            backlog: 0,
            pending: None,
            enabled: true,
            generation: 0,
        }
    }

    /// Occurrences registered but not yet resolved by a completed window.
    pub fn backlog(&self) -> u64 {
        self.backlog
    }

    /// Whether registrations are accepted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether an occurrence is parked waiting for the next window.
    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Current flush generation.
    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Account for a new occurrence.
    pub fn register(&mut self, occurrence: Occurrence<V, A>, passthrough: bool) -> Registration<V, A> {
        if !self.enabled {
            return Registration::Ignored;
        }

        if passthrough {
            // A single-occurrence window that completes on the spot: the
            // backlog goes to 1, the step subtracts 1 and resets to 0.
            self.backlog = 0;
            return Registration::Immediate(occurrence);
        }

        self.backlog += 1;
        if self.backlog == 1 {
            Registration::OpenWindow(ScheduledWindow {
                backlog: self.backlog,
                generation: self.generation,
                occurrence,
            })
        } else {
            self.pending = Some(occurrence);
            Registration::Coalesced
        }
    }

    /// Complete a window that was scheduled earlier.
    pub fn complete_window(
        &mut self,
        window: ScheduledWindow<V, A>,
        suppress_non_final: bool,
    ) -> WindowOutcome<V, A> {
        if self.backlog == 0 || window.generation != self.generation {
            return WindowOutcome::Stale;
        }

        self.backlog = self.backlog.saturating_sub(window.backlog);

        let deliver = if suppress_non_final && self.backlog > 0 {
            None
        } else {
            Some(window.occurrence)
        };

        let next = if self.backlog > 0 {
            match self.pending.take() {
                Some(occurrence) => Some(ScheduledWindow {
                    backlog: self.backlog,
                    generation: self.generation,
                    occurrence,
                }),
                None => {
                    warn!(backlog = self.backlog, "Backlog without a pending occurrence, resetting");
                    self.backlog = 0;
                    None
                }
            }
        } else {
            None
        };

        WindowOutcome::Fired { deliver, next }
    }

    /// Drop the backlog and the pending occurrence.
    ///
    /// Every window scheduled before this call becomes stale.
    pub fn flush(&mut self) {
        self.backlog = 0;
        self.pending = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Enable or disable registrations. Disabling flushes.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.flush();
        }
    }
}
