//! Contracts the dispatcher consumes from its external collaborators: the
//! scheduler that runs work bodies on worker tasks, the lifecycle listener it
//! calls back into, and the opaque work body itself.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatcher::work::WorkItem;

pub mod in_process;

/// Asynchronous scheduler entry point used by the fire-with-wait modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEntry {
    /// Submit and return as soon as a worker has picked the item up.
    Start,
    /// Submit for deferred execution; the scheduler may delay the start.
    Schedule,
}

/// Error a scheduler attaches to a lifecycle callback.
///
/// Only `Rejected` (on a rejection callback) and `Abnormal` (on a completion
/// callback) are captured onto the work item; any other kind is swallowed by
/// the state machine. That asymmetry is deliberate: arbitrary runtime errors
/// on callbacks must not leak to the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    Rejected { reason: String },
    Abnormal { message: String },
    Internal { message: String },
}

/// Returned when the scheduler declines to accept a submission at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitError {
    pub reason: String,
}

impl SubmitError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scheduler declined submission: {}", self.reason)
    }
}

impl std::error::Error for SubmitError {}

/// Opaque work payload, run by the scheduler on a worker task.
///
/// A body may call back into the dispatcher that submitted it, which is how
/// nested submissions are built.
#[async_trait]
pub trait WorkBody: Send + Sync {
    async fn run(&self) -> Result<(), String>;
}

/// Function wrapper that implements `WorkBody`.
pub struct FnWorkBody<F, Fut>(pub F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), String>> + Send + 'static;

#[async_trait]
impl<F, Fut> WorkBody for FnWorkBody<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
{
    async fn run(&self) -> Result<(), String> {
        (self.0)().await
    }
}

/// Lifecycle callbacks the scheduler delivers asynchronously.
///
/// One listener instance serves every submission; callbacks for distinct work
/// ids may arrive concurrently and handlers must tolerate that. Delivery
/// order across different items is not guaranteed.
pub trait WorkListener: Send + Sync {
    fn on_accepted(&self, work_id: &str);
    fn on_rejected(&self, work_id: &str, error: Option<WorkError>);
    fn on_started(&self, work_id: &str);
    fn on_completed(&self, work_id: &str, error: Option<WorkError>);
}

/// External scheduler that executes work items on its own worker tasks.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the item's full lifecycle before returning; terminal callbacks
    /// have been delivered by the time this resolves.
    async fn submit_sync(
        &self,
        work: Arc<WorkItem>,
        body: Arc<dyn WorkBody>,
        listener: Arc<dyn WorkListener>,
    ) -> Result<(), SubmitError>;

    /// Hand the item to a worker task and return immediately; lifecycle
    /// callbacks arrive later on the scheduler's own tasks.
    async fn submit_async(
        &self,
        work: Arc<WorkItem>,
        body: Arc<dyn WorkBody>,
        listener: Arc<dyn WorkListener>,
        entry: AsyncEntry,
    ) -> Result<(), SubmitError>;
}
