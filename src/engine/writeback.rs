//! Write-behind queue for repository patches.
//!
//! Operations commit locally and queue their patch here before releasing the
//! case lock, so patches for one case are queued in commit order. Nothing in
//! an operation waits on the repository; [`Engine::flush`](super::Engine::flush)
//! does the writing, from the upkeep loop or on demand.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, Notify};

use crate::model::CaseId;
use crate::repository::CasePatch;

pub(crate) struct WriteQueue {
    pending: Mutex<VecDeque<(CaseId, CasePatch)>>,
    ready: Notify,
    /// Held for a whole flush. Two flushes never interleave.
    flushing: AsyncMutex<()>,
}

impl WriteQueue {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            flushing: AsyncMutex::new(()),
        }
    }

    pub(crate) fn push(&self, case_id: CaseId, patch: CasePatch) {
        self.pending.lock().push_back((case_id, patch));
        self.ready.notify_one();
    }

    pub(crate) fn take(&self) -> Vec<(CaseId, CasePatch)> {
        self.pending.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolves once something has been queued since the last wake-up.
    pub(crate) async fn ready(&self) {
        self.ready.notified().await;
    }

    pub(crate) async fn begin_flush(&self) -> MutexGuard<'_, ()> {
        self.flushing.lock().await
    }
}

