//! Registry of transaction identifiers imported alongside submitted work.
//!
//! Identifiers are compared by their global-id byte sequence, never by object
//! identity: two different `TransactionId` implementations carrying the same
//! global id are the same transaction. Every operation takes the single
//! registry-wide lock; this is bookkeeping for a test harness, not a hot
//! path.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

/// Opaque token naming an externally coordinated transaction.
///
/// A valid id carries a non-negative format id. Equality across heterogeneous
/// representations is by [`same_transaction`], on the global-id bytes only.
pub trait TransactionId: Send + Sync + std::fmt::Debug {
    fn format_id(&self) -> i32;
    fn global_id(&self) -> &[u8];
}

/// Value equality for transaction identifiers: global-id bytes, nothing else.
pub fn same_transaction(a: &dyn TransactionId, b: &dyn TransactionId) -> bool {
    a.global_id() == b.global_id()
}

/// Plain owned transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalTransactionId {
    format_id: i32,
    global_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl GlobalTransactionId {
    pub fn new(format_id: i32, global_id: impl Into<Vec<u8>>, branch_qualifier: impl Into<Vec<u8>>) -> Self {
        Self { format_id, global_id: global_id.into(), branch_qualifier: branch_qualifier.into() }
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

impl TransactionId for GlobalTransactionId {
    fn format_id(&self) -> i32 {
        self.format_id
    }

    fn global_id(&self) -> &[u8] {
        &self.global_id
    }
}

/// Per-id rollback hook, consulted only by [`TransactionRegistry::rollback_all`].
pub trait TransactionCoordinator: Send + Sync {
    fn rollback(&self, id: &dyn TransactionId) -> Result<(), String>;
}

#[derive(Default)]
struct Sets {
    active: Vec<Arc<dyn TransactionId>>,
    in_doubt: Vec<Arc<dyn TransactionId>>,
}

impl Sets {
    fn find(entries: &[Arc<dyn TransactionId>], id: &dyn TransactionId) -> Option<usize> {
        entries.iter().position(|e| same_transaction(e.as_ref(), id))
    }
}

/// Thread-safe active/in-doubt identifier sets.
///
/// An id present in `in_doubt` is never also tracked as active: adding it to
/// `active` is a no-op success. Duplicate adds return `false` but are
/// expected in negative-test scenarios and never abort a call.
#[derive(Default)]
pub struct TransactionRegistry {
    sets: Mutex<Sets>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an imported transaction as active. Returns `true` on insert or
    /// when the id is already in doubt (in-doubt wins); `false` on duplicate.
    pub fn add_active(&self, id: Arc<dyn TransactionId>) -> bool {
        let mut sets = self.sets.lock().unwrap();
        if Sets::find(&sets.in_doubt, id.as_ref()).is_some() {
            debug!(format_id = id.format_id(), "transaction already in doubt; not tracking as active");
            return true;
        }
        if Sets::find(&sets.active, id.as_ref()).is_some() {
            return false;
        }
        sets.active.push(id);
        true
    }

    /// Track a transaction whose outcome awaits external resolution. An
    /// equal id already tracked as active moves here; the two sets stay
    /// disjoint and in-doubt wins.
    pub fn add_in_doubt(&self, id: Arc<dyn TransactionId>) -> bool {
        let mut sets = self.sets.lock().unwrap();
        if Sets::find(&sets.in_doubt, id.as_ref()).is_some() {
            return false;
        }
        if let Some(idx) = Sets::find(&sets.active, id.as_ref()) {
            debug!(format_id = id.format_id(), "active transaction is now in doubt");
            sets.active.remove(idx);
        }
        sets.in_doubt.push(id);
        true
    }

    /// Remove the equal-by-global-id active entry; `false` if absent.
    pub fn remove_active(&self, id: &dyn TransactionId) -> bool {
        let mut sets = self.sets.lock().unwrap();
        match Sets::find(&sets.active, id) {
            Some(idx) => {
                sets.active.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove the equal-by-global-id in-doubt entry; `false` if absent.
    pub fn remove_in_doubt(&self, id: &dyn TransactionId) -> bool {
        let mut sets = self.sets.lock().unwrap();
        match Sets::find(&sets.in_doubt, id) {
            Some(idx) => {
                sets.in_doubt.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Check a recovery list from the transaction coordinator against the
    /// in-doubt set. Every listed id must match an in-doubt entry and no
    /// entry may be left unmatched; a mismatch in either direction returns
    /// `false`. The in-doubt set is cleared either way (fail-safe reset on
    /// mismatch, fully consumed on an exact match).
    pub fn verify_in_doubt(&self, ids: &[Arc<dyn TransactionId>]) -> bool {
        let mut sets = self.sets.lock().unwrap();
        let mut scratch: Vec<Arc<dyn TransactionId>> = sets.in_doubt.clone();
        let mut matched = true;
        for id in ids {
            match Sets::find(&scratch, id.as_ref()) {
                Some(idx) => {
                    scratch.remove(idx);
                }
                None => {
                    matched = false;
                    break;
                }
            }
        }
        if matched && !scratch.is_empty() {
            matched = false;
        }
        if !matched {
            warn!(
                recovered = ids.len(),
                in_doubt = sets.in_doubt.len(),
                "in-doubt verification mismatch; clearing in-doubt set"
            );
        }
        sets.in_doubt.clear();
        matched
    }

    /// Roll back every active transaction through the coordinator, removing
    /// each rolled-back id. The first rollback failure aborts the loop and
    /// force-clears the whole active set; partial recovery is not attempted.
    pub fn rollback_all(&self, coordinator: &dyn TransactionCoordinator) -> bool {
        let snapshot: Vec<Arc<dyn TransactionId>> = self.sets.lock().unwrap().active.clone();
        for id in snapshot {
            if let Err(error) = coordinator.rollback(id.as_ref()) {
                warn!(format_id = id.format_id(), %error, "rollback failed; clearing active set");
                self.sets.lock().unwrap().active.clear();
                return false;
            }
            self.remove_active(id.as_ref());
        }
        true
    }

    pub fn contains_active(&self, id: &dyn TransactionId) -> bool {
        let sets = self.sets.lock().unwrap();
        Sets::find(&sets.active, id).is_some()
    }

    pub fn contains_in_doubt(&self, id: &dyn TransactionId) -> bool {
        let sets = self.sets.lock().unwrap();
        Sets::find(&sets.in_doubt, id).is_some()
    }

    pub fn active_len(&self) -> usize {
        self.sets.lock().unwrap().active.len()
    }

    pub fn in_doubt_len(&self) -> usize {
        self.sets.lock().unwrap().in_doubt.len()
    }
}
