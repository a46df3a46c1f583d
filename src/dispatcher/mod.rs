//! Work dispatcher: submission modes, the by-id work table, listener demux,
//! and imported-transaction reconciliation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::scheduler::{AsyncEntry, Scheduler, WorkBody, WorkError, WorkListener};

pub mod timeout;
pub mod txn;
pub mod work;

use timeout::TimeoutGuard;
use txn::{TransactionCoordinator, TransactionId, TransactionRegistry};
use work::{WaitSignal, WorkFailure, WorkItem, WorkState};

/// Configuration options for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Wait budget in milliseconds used when a submission supplies none.
    pub default_wait_timeout_ms: u64,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self { default_wait_timeout_ms: 5_000 }
    }
}

/// How a submission is handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Run the body inline on the caller task; no scheduler, no wait.
    NoOp,
    /// Block inside the scheduler's synchronous entry point until the item
    /// reports terminal completion.
    Sync,
    /// Fire asynchronously via the scheduler's start entry point, then wait
    /// for the target state under a timeout guard.
    Start,
    /// Same wait semantics as `Start` through the deferred entry point.
    Schedule,
}

impl SubmitMode {
    fn async_entry(self) -> Option<AsyncEntry> {
        match self {
            SubmitMode::Start => Some(AsyncEntry::Start),
            SubmitMode::Schedule => Some(AsyncEntry::Schedule),
            SubmitMode::NoOp | SubmitMode::Sync => None,
        }
    }
}

impl std::fmt::Display for SubmitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmitMode::NoOp => "no-op",
            SubmitMode::Sync => "sync",
            SubmitMode::Start => "start",
            SubmitMode::Schedule => "schedule",
        };
        f.write_str(name)
    }
}

/// One unit of work handed to a submission operation.
pub struct Submission {
    name: Option<String>,
    transaction: Option<Arc<dyn TransactionId>>,
    body: Arc<dyn WorkBody>,
}

impl Submission {
    pub fn new(body: Arc<dyn WorkBody>) -> Self {
        Self { name: None, transaction: None, body }
    }

    /// Correlation id for later retrieval via `get_work`; a unique id is
    /// synthesized when none is given.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Transaction id imported with this work. Registered as active when its
    /// format id is valid, and it stays active whatever the submission's
    /// outcome: the bookkeeping records "was imported", not "succeeded".
    pub fn in_transaction(mut self, id: Arc<dyn TransactionId>) -> Self {
        self.transaction = Some(id);
        self
    }
}

/// Submits work items to the external scheduler, serves as the single shared
/// lifecycle listener for all of them, and blocks each caller until its
/// item's target state or its deadline, whichever comes first.
pub struct WorkDispatcher {
    scheduler: Arc<dyn Scheduler>,
    coordinator: Arc<dyn TransactionCoordinator>,
    works: Mutex<HashMap<String, Arc<WorkItem>>>,
    transactions: TransactionRegistry,
    provider_failed: AtomicBool,
    next_work_id: AtomicU64,
    options: DispatcherOptions,
}

impl WorkDispatcher {
    pub fn start(
        scheduler: Arc<dyn Scheduler>,
        coordinator: Arc<dyn TransactionCoordinator>,
        options: DispatcherOptions,
    ) -> Arc<Self> {
        // Install a default subscriber if none set (ok to call many times)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
            )
            .try_init();

        Arc::new(Self {
            scheduler,
            coordinator,
            works: Mutex::new(HashMap::new()),
            transactions: TransactionRegistry::new(),
            provider_failed: AtomicBool::new(false),
            next_work_id: AtomicU64::new(1),
            options,
        })
    }

    /// Mark the upstream endpoint provider failed; submissions fail fast with
    /// a validation error until it is cleared.
    pub fn set_provider_failed(&self, failed: bool) {
        self.provider_failed.store(failed, Ordering::SeqCst);
    }

    /// Submit one work item.
    ///
    /// `target` and `timeout` apply to the fire-with-wait modes only: the
    /// caller blocks until the item has been in `target` (default
    /// `Completed`) or the budget (default from options) expires. A timeout
    /// releases the wait without cancelling the work; the item stays in the
    /// work table for later inspection.
    pub async fn deliver(
        self: &Arc<Self>,
        mode: SubmitMode,
        submission: Submission,
        target: Option<WorkState>,
        timeout: Option<Duration>,
    ) -> Result<Arc<WorkItem>, DispatchError> {
        self.check_provider()?;
        let Submission { name, transaction, body } = submission;
        let work = self.register_work(name, WaitSignal::new());
        self.import_transaction(transaction);
        debug!(work_id = %work.id(), %mode, "delivering work");

        match mode {
            SubmitMode::NoOp => {
                work.transition(WorkState::Started, None);
                match body.run().await {
                    Ok(()) => work.transition(WorkState::Completed, None),
                    Err(message) => {
                        work.transition(
                            WorkState::Completed,
                            Some(WorkError::Abnormal { message: message.clone() }),
                        );
                        return Err(DispatchError::Abnormal { work_id: work.id().to_string(), message });
                    }
                }
            }
            SubmitMode::Sync => {
                let listener: Arc<dyn WorkListener> = self.clone();
                self.scheduler
                    .submit_sync(work.clone(), body, listener)
                    .await
                    .map_err(|e| DispatchError::Rejected { reason: e.reason })?;
                if !work.has_been(WorkState::Completed) {
                    return Err(DispatchError::Incomplete { work_id: work.id().to_string() });
                }
                if let Some(err) = Self::surface_failure(&work) {
                    return Err(err);
                }
            }
            SubmitMode::Start | SubmitMode::Schedule => {
                let entry = mode.async_entry().expect("start/schedule have an async entry");
                work.set_target(target.unwrap_or(WorkState::Completed));
                let listener: Arc<dyn WorkListener> = self.clone();
                self.scheduler
                    .submit_async(work.clone(), body, listener, entry)
                    .await
                    .map_err(|e| DispatchError::Rejected { reason: e.reason })?;
                self.wait_for_targets(std::slice::from_ref(&work), work.wait_signal(), timeout).await?;
                if let Some(err) = Self::surface_failure(&work) {
                    return Err(err);
                }
            }
        }
        Ok(work)
    }

    /// Submit a fan-out batch: every item is handed to the scheduler before
    /// the single shared wait begins, and one guard budget covers the whole
    /// batch. Only `Start`/`Schedule` are valid here; funnelling a batch
    /// through the synchronous primitive would serialize it, so that is
    /// refused outright.
    ///
    /// Only the last-submitted item's captured failure is surfaced; earlier
    /// failures are discarded. Callers that care about every item inspect
    /// the returned handles.
    pub async fn deliver_concurrent(
        self: &Arc<Self>,
        mode: SubmitMode,
        batch: Vec<Submission>,
        target: Option<WorkState>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Arc<WorkItem>>, DispatchError> {
        let Some(entry) = mode.async_entry() else {
            return Err(DispatchError::UnsupportedMode(mode));
        };
        self.check_provider()?;
        if batch.is_empty() {
            return Err(DispatchError::Validation("fan-out batch is empty".into()));
        }

        let target = target.unwrap_or(WorkState::Completed);
        let shared_signal = WaitSignal::new();
        let mut items: Vec<Arc<WorkItem>> = Vec::with_capacity(batch.len());
        for submission in batch {
            let Submission { name, transaction, body } = submission;
            let work = self.register_work(name, shared_signal.clone());
            self.import_transaction(transaction);
            work.set_target(target);
            let listener: Arc<dyn WorkListener> = self.clone();
            self.scheduler
                .submit_async(work.clone(), body, listener, entry)
                .await
                .map_err(|e| DispatchError::Rejected { reason: e.reason })?;
            items.push(work);
        }
        debug!(count = items.len(), %mode, "fan-out batch submitted; waiting");

        self.wait_for_targets(&items, shared_signal, timeout).await?;
        let last = items.last().expect("batch is non-empty");
        if let Some(err) = Self::surface_failure(last) {
            return Err(err);
        }
        Ok(items)
    }

    /// Retrieve a previously submitted item by correlation id.
    pub fn get_work(&self, id: &str) -> Option<Arc<WorkItem>> {
        self.works.lock().unwrap().get(id).cloned()
    }

    /// Release a correlation id; the item is dropped once all handles go.
    pub fn release_work(&self, id: &str) -> bool {
        self.works.lock().unwrap().remove(id).is_some()
    }

    pub fn clear_works(&self) {
        self.works.lock().unwrap().clear();
    }

    pub fn add_active_transaction(&self, id: Arc<dyn TransactionId>) -> bool {
        self.transactions.add_active(id)
    }

    pub fn add_in_doubt_transaction(&self, id: Arc<dyn TransactionId>) -> bool {
        self.transactions.add_in_doubt(id)
    }

    pub fn remove_active_transaction(&self, id: &dyn TransactionId) -> bool {
        self.transactions.remove_active(id)
    }

    pub fn remove_in_doubt_transaction(&self, id: &dyn TransactionId) -> bool {
        self.transactions.remove_in_doubt(id)
    }

    pub fn verify_in_doubt(&self, ids: &[Arc<dyn TransactionId>]) -> bool {
        self.transactions.verify_in_doubt(ids)
    }

    pub fn rollback_all(&self) -> bool {
        self.transactions.rollback_all(self.coordinator.as_ref())
    }

    pub fn transactions(&self) -> &TransactionRegistry {
        &self.transactions
    }

    fn check_provider(&self) -> Result<(), DispatchError> {
        if self.provider_failed.load(Ordering::SeqCst) {
            return Err(DispatchError::Validation("endpoint provider is in a failed state".into()));
        }
        Ok(())
    }

    fn register_work(&self, name: Option<String>, signal: Arc<WaitSignal>) -> Arc<WorkItem> {
        let id = name.unwrap_or_else(|| {
            let n = self.next_work_id.fetch_add(1, Ordering::Relaxed);
            format!("work-{n:#06x}")
        });
        let work = WorkItem::new(id.clone(), signal);
        self.works.lock().unwrap().insert(id, work.clone());
        work
    }

    fn import_transaction(&self, transaction: Option<Arc<dyn TransactionId>>) {
        let Some(id) = transaction else { return };
        if id.format_id() < 0 {
            debug!(format_id = id.format_id(), "transaction id has invalid format; not imported");
            return;
        }
        if !self.transactions.add_active(id.clone()) {
            warn!(format_id = id.format_id(), "duplicate transaction id imported");
        }
    }

    /// Block until every item has reached its target or the guard fires.
    /// The waiter re-checks the condition after each wakeup rather than
    /// trusting why it woke; a reached target wins over a concurrent timeout.
    async fn wait_for_targets(
        &self,
        items: &[Arc<WorkItem>],
        signal: Arc<WaitSignal>,
        timeout: Option<Duration>,
    ) -> Result<(), DispatchError> {
        let budget = timeout.unwrap_or(Duration::from_millis(self.options.default_wait_timeout_ms));
        let guarded: Vec<Arc<WorkItem>> = items.to_vec();
        let _guard = TimeoutGuard::arm(
            signal.clone(),
            move || guarded.iter().all(|w| w.has_reached_target()),
            budget,
        );
        loop {
            let notified = signal.notified();
            if items.iter().all(|w| w.has_reached_target()) {
                return Ok(());
            }
            if signal.timed_out() {
                let work_id = items[0].id().to_string();
                let budget_ms = budget.as_millis() as u64;
                debug!(%work_id, budget_ms, "wait timed out");
                return Err(DispatchError::Timeout { work_id });
            }
            notified.await;
        }
    }

    fn surface_failure(work: &Arc<WorkItem>) -> Option<DispatchError> {
        match work.failure()? {
            WorkFailure::Rejected { reason } => Some(DispatchError::Rejected { reason }),
            WorkFailure::Abnormal { message } => {
                Some(DispatchError::Abnormal { work_id: work.id().to_string(), message })
            }
        }
    }

    fn apply(&self, work_id: &str, to: WorkState, error: Option<WorkError>) {
        let work = self.works.lock().unwrap().get(work_id).cloned();
        match work {
            Some(work) => work.transition(to, error),
            None => warn!(%work_id, state = %to, "lifecycle callback for unknown work item"),
        }
    }
}

/// The dispatcher is the one listener shared by all submissions; callbacks
/// are demultiplexed through the work table by id, so concurrent callbacks
/// for distinct items never contend on anything but the table lock.
impl WorkListener for WorkDispatcher {
    fn on_accepted(&self, work_id: &str) {
        self.apply(work_id, WorkState::Accepted, None);
    }

    fn on_rejected(&self, work_id: &str, error: Option<WorkError>) {
        self.apply(work_id, WorkState::Rejected, error);
    }

    fn on_started(&self, work_id: &str) {
        self.apply(work_id, WorkState::Started, None);
    }

    fn on_completed(&self, work_id: &str, error: Option<WorkError>) {
        self.apply(work_id, WorkState::Completed, error);
    }
}
