//! Tokio-backed scheduler used by the integration tests.
//!
//! Runs each accepted body on its own spawned task and reports the lifecycle
//! through the listener. Per-submission fault knobs let tests exercise the
//! rejection, never-starting, and deferred-start paths.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::dispatcher::work::WorkItem;

use super::{AsyncEntry, Scheduler, SubmitError, WorkBody, WorkError, WorkListener};

#[derive(Default)]
struct Faults {
    reject_next: Option<String>,
    reject_async_next: Option<String>,
    hold_next: bool,
}

pub struct InProcessScheduler {
    faults: Mutex<Faults>,
    schedule_delay: Duration,
}

impl InProcessScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { faults: Mutex::new(Faults::default()), schedule_delay: Duration::from_millis(5) })
    }

    pub fn with_schedule_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self { faults: Mutex::new(Faults::default()), schedule_delay: delay })
    }

    /// Decline the next submission outright, before any lifecycle callback.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.faults.lock().unwrap().reject_next = Some(reason.into());
    }

    /// Accept the next submission, then reject it from the worker task.
    pub fn reject_async_next(&self, reason: impl Into<String>) {
        self.faults.lock().unwrap().reject_async_next = Some(reason.into());
    }

    /// Accept the next submission and never start it.
    pub fn hold_next(&self) {
        self.faults.lock().unwrap().hold_next = true;
    }

    fn take_faults(&self) -> Faults {
        std::mem::take(&mut *self.faults.lock().unwrap())
    }

    async fn run_lifecycle(
        work_id: String,
        body: Arc<dyn WorkBody>,
        listener: Arc<dyn WorkListener>,
        faults: Faults,
        start_delay: Duration,
    ) {
        listener.on_accepted(&work_id);
        if faults.hold_next {
            debug!(%work_id, "holding work item; it will never start");
            return;
        }
        if let Some(reason) = faults.reject_async_next {
            listener.on_rejected(&work_id, Some(WorkError::Rejected { reason }));
            return;
        }
        if !start_delay.is_zero() {
            tokio::time::sleep(start_delay).await;
        }
        listener.on_started(&work_id);
        match body.run().await {
            Ok(()) => listener.on_completed(&work_id, None),
            Err(message) => listener.on_completed(&work_id, Some(WorkError::Abnormal { message })),
        }
    }
}

#[async_trait]
impl Scheduler for InProcessScheduler {
    async fn submit_sync(
        &self,
        work: Arc<WorkItem>,
        body: Arc<dyn WorkBody>,
        listener: Arc<dyn WorkListener>,
    ) -> Result<(), SubmitError> {
        let faults = self.take_faults();
        if let Some(reason) = faults.reject_next {
            return Err(SubmitError::new(reason));
        }
        Self::run_lifecycle(work.id().to_string(), body, listener, faults, Duration::ZERO).await;
        Ok(())
    }

    async fn submit_async(
        &self,
        work: Arc<WorkItem>,
        body: Arc<dyn WorkBody>,
        listener: Arc<dyn WorkListener>,
        entry: AsyncEntry,
    ) -> Result<(), SubmitError> {
        let faults = self.take_faults();
        if let Some(reason) = faults.reject_next {
            return Err(SubmitError::new(reason));
        }
        let start_delay = match entry {
            AsyncEntry::Start => Duration::ZERO,
            AsyncEntry::Schedule => self.schedule_delay,
        };
        let work_id = work.id().to_string();
        tokio::spawn(Self::run_lifecycle(work_id, body, listener, faults, start_delay));
        Ok(())
    }
}
