//! Work-item lifecycle state machine and the wait handle a caller blocks on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;

use crate::scheduler::WorkError;

/// Lifecycle state of a work item.
///
/// `Initial` is the only start state. `Completed` and `Rejected` end the
/// item's useful life; a `Started` item may still complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Initial,
    Accepted,
    Rejected,
    Started,
    Completed,
}

impl std::fmt::Display for WorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkState::Initial => "initial",
            WorkState::Accepted => "accepted",
            WorkState::Rejected => "rejected",
            WorkState::Started => "started",
            WorkState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Failure captured from a lifecycle callback, read once by the waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkFailure {
    Rejected { reason: String },
    Abnormal { message: String },
}

/// Wait handle shared by a work item (or a fan-out batch), its waiter, and
/// the timeout guard.
///
/// The `timed_out` flag lives here rather than on the item: "the guard fired"
/// must stay distinguishable from "the state machine signalled". Both sources
/// notify the same `Notify`; the waiter re-checks its condition after every
/// wakeup, and a reached target wins over a concurrent timeout.
pub struct WaitSignal {
    notify: Notify,
    timed_out: AtomicBool,
}

impl WaitSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { notify: Notify::new(), timed_out: AtomicBool::new(false) })
    }

    /// Future that resolves on the next notification. Create it before
    /// checking the wait condition: `notify_one` stores a permit, so a signal
    /// landing between the check and the await is never lost.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn signal(&self) {
        self.notify.notify_one();
    }
}

#[derive(Debug)]
struct WorkInner {
    state: WorkState,
    target: Option<WorkState>,
    reached_target: bool,
    was_accepted: bool,
    was_rejected: bool,
    was_started: bool,
    was_completed: bool,
    failure: Option<WorkFailure>,
}

/// One unit of asynchronous work, keyed by a correlation id.
///
/// State transitions are driven only by the dispatcher's listener callbacks;
/// they are totally ordered by the state lock. At most one caller waits on an
/// item at a time (the dispatcher performs one wait per submission call).
pub struct WorkItem {
    id: String,
    inner: Mutex<WorkInner>,
    signal: Arc<WaitSignal>,
}

impl WorkItem {
    pub(crate) fn new(id: impl Into<String>, signal: Arc<WaitSignal>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            inner: Mutex::new(WorkInner {
                state: WorkState::Initial,
                target: None,
                reached_target: false,
                was_accepted: false,
                was_rejected: false,
                was_started: false,
                was_completed: false,
                failure: None,
            }),
            signal,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> WorkState {
        self.inner.lock().unwrap().state
    }

    /// Whether the item has *ever* been in `state`. Monotonic: a started item
    /// that later completes still answers true for `Started`.
    pub fn has_been(&self, state: WorkState) -> bool {
        let inner = self.inner.lock().unwrap();
        match state {
            WorkState::Initial => true,
            WorkState::Accepted => inner.was_accepted,
            WorkState::Rejected => inner.was_rejected,
            WorkState::Started => inner.was_started,
            WorkState::Completed => inner.was_completed,
        }
    }

    pub fn failure(&self) -> Option<WorkFailure> {
        self.inner.lock().unwrap().failure.clone()
    }

    pub fn has_reached_target(&self) -> bool {
        self.inner.lock().unwrap().reached_target
    }

    pub(crate) fn wait_signal(&self) -> Arc<WaitSignal> {
        self.signal.clone()
    }

    /// Arm a wait epoch: record the state the next wait blocks on. If the
    /// item is already there, the wait must return without sleeping, so the
    /// sticky flag is set (and the signal raised) right away.
    pub(crate) fn set_target(&self, target: WorkState) {
        let mut inner = self.inner.lock().unwrap();
        inner.target = Some(target);
        inner.reached_target = inner.state == target;
        if inner.reached_target {
            self.signal.signal();
        }
    }

    /// Apply a lifecycle callback. Sets the current state and its sticky
    /// flag, captures a failure when the error is of the matching kind, and,
    /// still under the state lock, signals the waiter if the target state has
    /// been reached. Check-then-signal and the waiter's check-then-wait share
    /// this lock plus the notify permit, which closes the lost-wakeup race.
    pub(crate) fn transition(&self, to: WorkState, error: Option<WorkError>) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = to;
        match to {
            WorkState::Initial => {}
            WorkState::Accepted => inner.was_accepted = true,
            WorkState::Rejected => inner.was_rejected = true,
            WorkState::Started => inner.was_started = true,
            WorkState::Completed => inner.was_completed = true,
        }
        match (to, error) {
            (WorkState::Rejected, Some(WorkError::Rejected { reason })) => {
                inner.failure = Some(WorkFailure::Rejected { reason });
            }
            (WorkState::Completed, Some(WorkError::Abnormal { message })) => {
                inner.failure = Some(WorkFailure::Abnormal { message });
            }
            (_, Some(other)) => {
                // Narrow capture: anything else on a callback is swallowed.
                debug!(work_id = %self.id, error = ?other, "ignoring non-capturable callback error");
            }
            (_, None) => {}
        }
        if !inner.reached_target && inner.target == Some(inner.state) {
            inner.reached_target = true;
            self.signal.signal();
        }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("target", &inner.target)
            .field("reached_target", &inner.reached_target)
            .finish()
    }
}
