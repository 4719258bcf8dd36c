//! # Harvest Runner
//!
//! Drives one complete run: ensure a usable session, partition the
//! instrument set, fan out the worker pool, settle the books, write the
//! failure log, and persist the harvested rows as one batch. In loop mode
//! the same run repeats on a fixed interval until termination.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::InstrumentSet;
use crate::harvesting::aggregate::{ResultAggregator, RunResult};
use crate::harvesting::driver::BrowserLauncher;
use crate::harvesting::error::RunError;
use crate::harvesting::partition::partition;
use crate::harvesting::session::SessionManager;
use crate::harvesting::sink::DepthSink;
use crate::harvesting::task::TaskSettings;
use crate::harvesting::worker::PoolWorker;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub num_workers: usize,
    pub max_concurrent_per_worker: usize,
    pub task: TaskSettings,
    /// Per-run failure logs land here when set
    pub failure_log_dir: Option<PathBuf>,
    /// Sleep between cycles in loop mode
    pub interval: Duration,
}

/// Orchestrates harvest runs over a worker pool
pub struct HarvestRunner {
    session: Arc<SessionManager>,
    launcher: Arc<dyn BrowserLauncher>,
    sink: Arc<dyn DepthSink>,
    settings: RunnerSettings,
    cancel: CancellationToken,
}

impl HarvestRunner {
    #[must_use]
    pub fn new(
        session: Arc<SessionManager>,
        launcher: Arc<dyn BrowserLauncher>,
        sink: Arc<dyn DepthSink>,
        settings: RunnerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            launcher,
            sink,
            settings,
            cancel,
        }
    }

    /// One complete harvest run.
    ///
    /// Per-instrument failures are recovered into the result and never
    /// abort the run. Only two things are fatal here: a first login that
    /// yields no usable credential, and a failed bulk insert.
    pub async fn run_once(&self, instruments: &InstrumentSet) -> Result<RunResult, RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        // First login is the only session failure that aborts a run;
        // mid-run expiry goes through the coalesced renewal instead.
        if self.session.credential().await.is_err() {
            self.session.login().await?;
        }

        let shards = partition(instruments, self.settings.num_workers);
        let aggregator = ResultAggregator::new(instruments.clone());
        info!(
            "🚀 run {} starting: {} instruments across {} workers (concurrency {} per worker)",
            aggregator.run_id(),
            instruments.len(),
            shards.len(),
            self.settings.max_concurrent_per_worker
        );

        let task_settings = Arc::new(self.settings.task.clone());
        let mut handles = Vec::with_capacity(shards.len());
        for shard in shards {
            let worker = PoolWorker::new(
                shard,
                Arc::clone(&self.launcher),
                Arc::clone(&self.session),
                Arc::clone(&task_settings),
                self.settings.max_concurrent_per_worker,
                self.cancel.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                // A lost worker is recovered by the aggregator: its shard
                // resolves as worker-fatal.
                Err(join_error) => warn!("worker task panicked: {join_error}"),
            }
        }

        let result = aggregator.finish(outcomes);
        result.log_summary();

        if let Some(dir) = &self.settings.failure_log_dir {
            if !result.failures.is_empty() {
                write_failure_log(dir, &result).await;
            }
        }

        let rows = result.to_rows();
        if rows.is_empty() {
            info!("no depth rows to persist this run");
        } else {
            let inserted = self
                .sink
                .insert_batch(&rows)
                .await
                .map_err(|sink_error| RunError::Persistence(sink_error.to_string()))?;
            info!("💾 persisted {} depth rows", inserted);
        }

        Ok(result)
    }

    /// Loop mode: run, sleep the configured interval, run again, until
    /// termination. Failed cycles are logged and the loop keeps going.
    pub async fn run_cycles(&self, instruments: &InstrumentSet) {
        let mut cycle: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                info!("🛑 harvest loop stopping after {} cycles", cycle);
                return;
            }
            cycle += 1;
            info!("🔄 harvest cycle {} starting", cycle);

            match self.run_once(instruments).await {
                Ok(result) => info!(
                    "cycle {} done: {}/{} succeeded",
                    cycle,
                    result.successes.len(),
                    result.total_instruments()
                ),
                Err(RunError::Cancelled) => {
                    info!("🛑 harvest loop stopping after {} cycles", cycle - 1);
                    return;
                }
                Err(run_error) => error!("cycle {} failed: {}", cycle, run_error),
            }

            info!(
                "next cycle in {}s",
                self.settings.interval.as_secs()
            );
            tokio::select! {
                () = tokio::time::sleep(self.settings.interval) => {}
                () = self.cancel.cancelled() => {
                    info!("🛑 harvest loop stopping after {} cycles", cycle);
                    return;
                }
            }
        }
    }
}

/// Best-effort: a failed failure-log write is logged, never propagated
async fn write_failure_log(dir: &Path, result: &RunResult) {
    if let Err(io_error) = tokio::fs::create_dir_all(dir).await {
        warn!("could not create failure log dir {}: {}", dir.display(), io_error);
        return;
    }
    let path = dir.join(format!(
        "failures_{}.log",
        result.started_at.format("%Y%m%d_%H%M%S")
    ));
    match tokio::fs::write(&path, result.failure_report()).await {
        Ok(()) => info!("📝 failure log written to {}", path.display()),
        Err(io_error) => warn!("could not write failure log {}: {}", path.display(), io_error),
    }
}
