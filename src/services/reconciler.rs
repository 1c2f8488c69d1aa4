use crate::config::WalkErrorPolicy;
use crate::error::StagingError;
use crate::services::migrator::{MigrationOutcome, Migrator};
use crate::services::staging::StagingStore;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Partial uploads younger than this are never purged, whatever the
/// staleness threshold: a slow client may still be writing them.
pub const PARTIAL_GRACE: Duration = Duration::from_secs(60 * 60);

/// Tally of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    /// Younger than the staleness threshold, left for the fast path.
    pub fresh: usize,
    pub migrated: usize,
    pub orphaned: usize,
    pub retained: usize,
    pub superseded: usize,
    pub skipped: usize,
    pub walk_errors: usize,
    pub partials_purged: usize,
    /// Shutdown was requested before the walk finished.
    pub interrupted: bool,
}

impl SweepReport {
    fn record(&mut self, outcome: MigrationOutcome) {
        match outcome {
            MigrationOutcome::Migrated => self.migrated += 1,
            MigrationOutcome::Orphaned => self.orphaned += 1,
            MigrationOutcome::Retained => self.retained += 1,
            MigrationOutcome::Superseded => self.superseded += 1,
            MigrationOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Safety net behind the upload queue: walks the whole staging area at
/// startup and then on every interval, migrating each file that has sat
/// there longer than the staleness threshold, queued or not.
pub struct Reconciler {
    staging: Arc<dyn StagingStore>,
    migrator: Migrator,
    interval: Duration,
    stale_after: Duration,
    walk_errors: WalkErrorPolicy,
    shutdown: watch::Receiver<bool>,
}

impl Reconciler {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        migrator: Migrator,
        interval: Duration,
        stale_after: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            staging,
            migrator,
            interval,
            stale_after,
            walk_errors: WalkErrorPolicy::Abort,
            shutdown,
        }
    }

    pub fn with_walk_errors(mut self, policy: WalkErrorPolicy) -> Self {
        self.walk_errors = policy;
        self
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Reconciler started (every {:?}, stale after {:?})",
            self.interval,
            self.stale_after
        );

        // First tick completes immediately: the startup sweep.
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Reconciler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) => tracing::info!("🧹 Reconciliation sweep finished: {:?}", report),
                        Err(e) => tracing::warn!("Reconciliation sweep aborted, resuming next interval: {}", e),
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, StagingError> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweeps as if started at `now`: every listed file modified before
    /// `now - stale_after` is migrated in turn. A shutdown request stops the
    /// sweep before the next file and returns what was done so far.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StagingError> {
        let cutoff = stale_cutoff(now, self.stale_after);
        tracing::info!("🧹 Running reconciliation sweep (cutoff {})", cutoff);

        let mut report = SweepReport::default();
        let mut entries = self.staging.list();
        while let Some(entry) = entries.next().await {
            if *self.shutdown.borrow() {
                tracing::info!("🛑 Shutdown requested, stopping sweep early");
                report.interrupted = true;
                return Ok(report);
            }

            let file = match entry {
                Ok(file) => file,
                Err(e) => match self.walk_errors {
                    WalkErrorPolicy::Abort => return Err(e),
                    WalkErrorPolicy::Skip => {
                        tracing::warn!("Walking error: {}", e);
                        report.walk_errors += 1;
                        continue;
                    }
                },
            };

            report.scanned += 1;
            if file.modified >= cutoff {
                report.fresh += 1;
                continue;
            }
            report.record(self.migrator.migrate(&file.path).await);
        }

        let partial_cutoff = stale_cutoff(now, self.stale_after.max(PARTIAL_GRACE));
        match self.staging.purge_partials(partial_cutoff).await {
            Ok(purged) => report.partials_purged = purged,
            Err(e) => tracing::warn!("Failed to purge partial uploads: {}", e),
        }

        Ok(report)
    }
}

fn stale_cutoff(now: DateTime<Utc>, stale_after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
