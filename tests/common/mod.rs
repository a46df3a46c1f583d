#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use work_dispatch::{
    DispatcherOptions, FnWorkBody, GlobalTransactionId, InProcessScheduler, TransactionCoordinator,
    TransactionId, WorkBody, WorkDispatcher,
};

/// Coordinator that records every rollback and can be told to fail on one
/// specific global id.
#[derive(Default)]
pub struct RecordingCoordinator {
    rolled_back: Mutex<Vec<Vec<u8>>>,
    fail_on: Mutex<Option<Vec<u8>>>,
}

impl RecordingCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, global_id: &[u8]) {
        *self.fail_on.lock().unwrap() = Some(global_id.to_vec());
    }

    pub fn rolled_back(&self) -> Vec<Vec<u8>> {
        self.rolled_back.lock().unwrap().clone()
    }
}

impl TransactionCoordinator for RecordingCoordinator {
    fn rollback(&self, id: &dyn TransactionId) -> Result<(), String> {
        if self.fail_on.lock().unwrap().as_deref() == Some(id.global_id()) {
            return Err("rollback refused by coordinator".to_string());
        }
        self.rolled_back.lock().unwrap().push(id.global_id().to_vec());
        Ok(())
    }
}

/// Transaction id representation distinct from `GlobalTransactionId`, for
/// exercising equality across heterogeneous implementations.
#[derive(Debug)]
pub struct OpaqueXid {
    pub format: i32,
    pub gid: Vec<u8>,
}

impl TransactionId for OpaqueXid {
    fn format_id(&self) -> i32 {
        self.format
    }

    fn global_id(&self) -> &[u8] {
        &self.gid
    }
}

pub fn harness() -> (Arc<WorkDispatcher>, Arc<InProcessScheduler>, Arc<RecordingCoordinator>) {
    let scheduler = InProcessScheduler::new();
    let coordinator = RecordingCoordinator::new();
    let dispatcher =
        WorkDispatcher::start(scheduler.clone(), coordinator.clone(), DispatcherOptions::default());
    (dispatcher, scheduler, coordinator)
}

pub fn xid(global_id: &[u8]) -> Arc<dyn TransactionId> {
    Arc::new(GlobalTransactionId::new(1, global_id.to_vec(), b"bq".to_vec()))
}

pub fn quick_body() -> Arc<dyn WorkBody> {
    Arc::new(FnWorkBody(|| async { Ok::<(), String>(()) }))
}

pub fn failing_body(message: &str) -> Arc<dyn WorkBody> {
    let message = message.to_string();
    Arc::new(FnWorkBody(move || {
        let message = message.clone();
        async move { Err::<(), String>(message) }
    }))
}

pub fn sleeping_body(delay: Duration) -> Arc<dyn WorkBody> {
    Arc::new(FnWorkBody(move || async move {
        tokio::time::sleep(delay).await;
        Ok::<(), String>(())
    }))
}
