//! Scoped trial cleanup
//!
//! A [`CleanupScope`] owns whatever a trial has done to the environment: the
//! baseline snapshot and the live injection. [`CleanupScope::close`] reverts
//! the injection and then restores the baseline, always attempting both. A
//! scope dropped without being closed (a cancelled trial future) spawns the
//! same cleanup on the current runtime.

use remedy_chaos::{BaselineGuard, FaultInjector, InjectionError, RevertAck, Snapshot};
use remedy_core::{CleanupReport, InjectionRecord};
use std::fmt;
use std::sync::Arc;

/// Undo obligations of one trial
pub struct CleanupScope {
    injector: Arc<FaultInjector>,
    baseline: Arc<BaselineGuard>,
    record: Option<InjectionRecord>,
    snapshot: Option<Snapshot>,
    closed: bool,
}

impl CleanupScope {
    /// Empty scope
    #[must_use]
    pub fn new(injector: Arc<FaultInjector>, baseline: Arc<BaselineGuard>) -> Self {
        Self {
            injector,
            baseline,
            record: None,
            snapshot: None,
            closed: false,
        }
    }

    /// Restore `snapshot` on close
    pub fn guard_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Revert `record` on close
    ///
    /// A previously guarded record must already be reverted.
    pub fn guard_injection(&mut self, record: InjectionRecord) {
        debug_assert!(
            self.record.as_ref().map_or(true, |r| !r.is_applied()),
            "live injection replaced before revert"
        );
        self.record = Some(record);
    }

    /// Whether a live injection is guarded
    #[must_use]
    pub fn has_live_injection(&self) -> bool {
        self.record.as_ref().is_some_and(InjectionRecord::is_applied)
    }

    /// Revert the guarded injection ahead of close
    ///
    /// The record stays in the scope, so close treats it as already reverted.
    pub async fn revert_now(&mut self) -> Result<Option<RevertAck>, InjectionError> {
        match self.record.as_mut() {
            Some(record) => self.injector.revert(record).await.map(Some),
            None => Ok(None),
        }
    }

    /// Revert, restore, and report
    pub async fn close(mut self) -> CleanupReport {
        self.closed = true;
        let record = self.record.take();
        let snapshot = self.snapshot.take();
        run_cleanup(&self.injector, &self.baseline, record, snapshot).await
    }
}

async fn run_cleanup(
    injector: &FaultInjector,
    baseline: &BaselineGuard,
    record: Option<InjectionRecord>,
    snapshot: Option<Snapshot>,
) -> CleanupReport {
    let mut report = CleanupReport::nothing_to_clean();

    if let Some(mut record) = record {
        if let Err(e) = injector.revert(&mut record).await {
            tracing::error!(target = %record.spec.target, error = %e, "fault revert failed");
            report.reverted = false;
            report.errors.push(e.to_string());
        }
    }

    if let Some(snapshot) = snapshot {
        match baseline.restore(&snapshot).await {
            Ok(ack) => {
                tracing::debug!(target = %snapshot.target, ?ack, "baseline restore finished");
            }
            Err(e) => {
                tracing::error!(target = %snapshot.target, error = %e, "baseline restore failed");
                report.restored = false;
                report.errors.push(e.to_string());
            }
        }
        if report.restored {
            match baseline.matches(&snapshot).await {
                Ok(true) => {}
                Ok(false) => {
                    report.restored = false;
                    report
                        .errors
                        .push(format!("{} still differs from its baseline", snapshot.target));
                }
                Err(e) => {
                    report.restored = false;
                    report.errors.push(e.to_string());
                }
            }
        }
    }

    report.environment_dirty = !report.is_clean();
    if report.environment_dirty {
        tracing::warn!(errors = ?report.errors, "environment left dirty");
    } else {
        tracing::info!("trial cleanup complete");
    }
    report
}

impl Drop for CleanupScope {
    fn drop(&mut self) {
        if self.closed || (self.record.is_none() && self.snapshot.is_none()) {
            return;
        }
        let record = self.record.take();
        let snapshot = self.snapshot.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("cleanup scope dropped before close, cleaning up in background");
                let injector = Arc::clone(&self.injector);
                let baseline = Arc::clone(&self.baseline);
                handle.spawn(async move {
                    run_cleanup(&injector, &baseline, record, snapshot).await;
                });
            }
            Err(_) => {
                tracing::error!("cleanup scope dropped outside a runtime, environment may be dirty");
            }
        }
    }
}

impl fmt::Debug for CleanupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupScope")
            .field("live_injection", &self.has_live_injection())
            .field("has_snapshot", &self.snapshot.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
