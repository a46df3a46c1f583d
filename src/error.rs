use crate::dispatcher::SubmitMode;

/// Error surfaced to a caller of the dispatcher's submission operations.
///
/// A timed-out wait is a distinct variant from an abnormal completion so test
/// assertions can tell "never finished" from "finished badly". Timeouts are
/// advisory: the scheduled work keeps running and the item stays retrievable
/// via `WorkDispatcher::get_work`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A precondition failed before anything was submitted (e.g. the upstream
    /// endpoint provider is in a failed state). Never retried.
    Validation(String),
    /// The scheduler declined to accept the work; carries its reason verbatim.
    Rejected { reason: String },
    /// The target state was not reached within the wait budget.
    Timeout { work_id: String },
    /// A failure captured from a lifecycle callback, re-surfaced to the
    /// original caller.
    Abnormal { work_id: String, message: String },
    /// Synchronous submission returned without the item ever completing.
    Incomplete { work_id: String },
    /// The submission mode is not valid for the requested operation.
    /// Programmer error; always fatal.
    UnsupportedMode(SubmitMode),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Validation(msg) => write!(f, "validation failed: {msg}"),
            DispatchError::Rejected { reason } => write!(f, "submission rejected: {reason}"),
            DispatchError::Timeout { work_id } => {
                write!(f, "wait timed out for work item {work_id}")
            }
            DispatchError::Abnormal { work_id, message } => {
                write!(f, "work item {work_id} completed abnormally: {message}")
            }
            DispatchError::Incomplete { work_id } => {
                write!(f, "work item {work_id} did not complete")
            }
            DispatchError::UnsupportedMode(mode) => {
                write!(f, "unsupported submission mode: {mode}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}
