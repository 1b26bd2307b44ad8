//! Downstream handler trait.

use super::engine::Throttle;

/// Receives the occurrences a [`Throttle`] lets through.
///
/// Any `Fn(&Throttle<V, A>, V, A)` closure that is `Send + Sync` is a
/// handler, so most callers never implement this directly.
pub trait ThrottleHandler<V, A>: Send + Sync + 'static {
    /// Handle one dispatched occurrence.
    ///
    /// Called without the throttle's lock held, so the handler may register
    /// new events, flush, or read the backlog through `sender`.
    fn dispatch(&self, sender: &Throttle<V, A>, value: V, aux: A);
}

impl<V, A, F> ThrottleHandler<V, A> for F
where
    F: Fn(&Throttle<V, A>, V, A) + Send + Sync + 'static,
{
    fn dispatch(&self, sender: &Throttle<V, A>, value: V, aux: A) {
        self(sender, value, aux)
    }
}
