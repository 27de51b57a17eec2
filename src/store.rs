//! Case store: the authoritative in-memory map of case id to record.
//!
//! Writers serialize per case through [`CaseStore::lock`]; operations on
//! different cases never contend. The map itself sits behind a read-write
//! lock held only for the length of a clone or an insert, so readers take a
//! consistent snapshot without waiting on collaborator calls.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::model::{Case, CaseId};

/// Held for the whole of one mutating operation on one case.
pub type CaseGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct CaseStore {
    cases: RwLock<HashMap<CaseId, Case>>,
    locks: DashMap<CaseId, Arc<Mutex<()>>>,
}

impl CaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the per-case operation lock.
    ///
    /// The lock lives in an async mutex because the holder awaits
    /// collaborator calls (payment, persistence) before it commits.
    pub async fn lock(&self, id: CaseId) -> CaseGuard {
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub fn get(&self, id: CaseId) -> Result<Case> {
        self.cases
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::CaseNotFound(id))
    }

    pub fn contains(&self, id: CaseId) -> bool {
        self.cases.read().contains_key(&id)
    }

    /// Copy of every case, terminal ones included.
    pub fn snapshot(&self) -> Vec<Case> {
        self.cases.read().values().cloned().collect()
    }

    /// Replace a case record. Callers hold the case's lock and have already
    /// checked invariants.
    pub fn commit(&self, _guard: &CaseGuard, case: Case) {
        self.cases.write().insert(case.id, case);
    }

    /// Insert a brand-new case. Fails if the id is already taken.
    pub fn insert(&self, case: Case) -> Result<()> {
        let mut cases = self.cases.write();
        if cases.contains_key(&case.id) {
            return Err(Error::Other(format!("case {} already exists", case.id)));
        }
        cases.insert(case.id, case);
        Ok(())
    }

    /// Merge records fetched from the repository. Existing records are kept:
    /// local state is authoritative once a case is known.
    pub fn merge(&self, fetched: Vec<Case>) -> usize {
        let mut cases = self.cases.write();
        let mut added = 0;
        for case in fetched {
            if let std::collections::hash_map::Entry::Vacant(slot) = cases.entry(case.id) {
                slot.insert(case);
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.cases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.read().is_empty()
    }
}
