//! Background upkeep: repository read-through, wait-time recomputation,
//! notification redelivery and the write-behind flush.

use tracing::{debug, info, warn};

use super::Engine;
use crate::error::Result;

/// What one upkeep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub loaded: usize,
    pub waits: usize,
    pub redelivered: usize,
    pub persisted: usize,
    pub forwarded: usize,
}

/// What one write-behind flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub persisted: usize,
    pub forwarded: usize,
}

impl Engine {
    /// Read cases through from the repository. Cases already known locally
    /// are left alone: local state is authoritative. Records that break a
    /// case invariant are skipped.
    pub async fn load_from_repository(&self) -> Result<usize> {
        let fetched = self
            .call("fetch_cases", self.repository.fetch_cases())
            .await?;
        let total = fetched.len();

        let valid: Vec<_> = fetched
            .into_iter()
            .filter(|case| match case.check_invariants() {
                Ok(()) => true,
                Err(e) => {
                    warn!(case = %case.id, error = %e, "skipping invalid case from repository");
                    false
                }
            })
            .collect();

        let added = self.store.merge(valid);
        info!(fetched = total, added, "cases loaded from repository");
        Ok(added)
    }

    /// Write queued patches in commit order, then forward the notification
    /// outbox to the external sink. A patch that fails to persist is logged
    /// and dropped: local state stays authoritative.
    pub async fn flush(&self) -> FlushReport {
        let _flushing = self.writes.begin_flush().await;

        let mut persisted = 0;
        for (case_id, patch) in self.writes.take() {
            match self
                .call("persist", self.repository.persist(case_id, patch))
                .await
            {
                Ok(()) => persisted += 1,
                Err(e) => warn!(case = %case_id, error = %e, "persist failed, local state kept"),
            }
        }
        let forwarded = self
            .notifier
            .drain_outbox(self.repository.as_ref(), self.config.collaborator_timeout)
            .await;

        FlushReport {
            persisted,
            forwarded,
        }
    }

    /// One upkeep pass. Repository failures are logged, not returned: the
    /// loop keeps running on local state.
    pub async fn tick(&self) -> TickReport {
        let loaded = match self.load_from_repository().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "repository refresh failed");
                0
            }
        };
        let waits = self.recompute_wait_times().len();
        let redelivered = self.notifier.retry_failed();
        let flushed = self.flush().await;

        let report = TickReport {
            loaded,
            waits,
            redelivered,
            persisted: flushed.persisted,
            forwarded: flushed.forwarded,
        };
        debug!(?report, "upkeep tick");
        report
    }

    /// Signal [`Engine::run`] to return.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run upkeep every `wait_refresh`, and flush as soon as a write is
    /// queued, until [`Engine::shutdown`]. Queued writes are flushed once
    /// more before returning.
    pub async fn run(&self) -> Result<()> {
        info!(
            refresh_secs = self.config.wait_refresh.as_secs(),
            "engine upkeep started"
        );

        let mut interval = tokio::time::interval(self.config.wait_refresh);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let flushed = self.flush().await;
                    info!(persisted = flushed.persisted, "engine upkeep shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = self.writes.ready() => {
                    self.flush().await;
                }
            }
        }
    }
}
