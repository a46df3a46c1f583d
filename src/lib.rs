//! Test-harness work dispatcher.
//!
//! Submits asynchronous units of work to an external [`Scheduler`], waits with
//! a bounded timeout for each item to reach a caller-chosen lifecycle state,
//! and tracks the transaction identifiers imported alongside in-flight work.
//!
//! The scheduler runs work bodies on its own tasks and reports lifecycle
//! transitions (accepted/started/completed/rejected) back through a
//! [`WorkListener`]; the [`WorkDispatcher`] is that listener, demultiplexing
//! callbacks by work-item id and driving each item's state machine. A caller
//! blocked on an item is woken either by the state machine reaching the
//! target state or by a timeout guard expiring, and re-checks the state after
//! waking, so a target reached before the deadline always wins.

pub mod dispatcher;
pub mod error;
pub mod scheduler;

pub use dispatcher::txn::{
    same_transaction, GlobalTransactionId, TransactionCoordinator, TransactionId,
    TransactionRegistry,
};
pub use dispatcher::work::{WorkFailure, WorkItem, WorkState};
pub use dispatcher::{DispatcherOptions, Submission, SubmitMode, WorkDispatcher};
pub use error::DispatchError;
pub use scheduler::in_process::InProcessScheduler;
pub use scheduler::{
    AsyncEntry, FnWorkBody, Scheduler, SubmitError, WorkBody, WorkError, WorkListener,
};
