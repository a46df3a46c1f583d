//! Cancellable delayed notifier racing the scheduler's lifecycle callbacks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::work::WaitSignal;

/// One guard is armed per blocking wait. On expiry it re-checks the wait
/// condition under the item's state lock (via the supplied predicate); if the
/// target was reached in the meantime the firing is a no-op, otherwise it
/// marks the wait timed out and wakes the waiter through the shared signal.
///
/// Correctness never depends on cancellation: a guard that outlives its wait
/// finds the predicate true and does nothing. Dropping the guard aborts the
/// task anyway so short-lived waits do not pile up sleeper tasks.
pub struct TimeoutGuard {
    handle: JoinHandle<()>,
}

impl TimeoutGuard {
    pub fn arm<F>(signal: Arc<WaitSignal>, reached: F, timeout: Duration) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !reached() {
                signal.mark_timed_out();
            }
        });
        Self { handle }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
