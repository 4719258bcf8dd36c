//! # Result Aggregation
//!
//! Merges per-worker resolutions into one `RunResult` with exactly one
//! entry per requested instrument. Instruments a worker never reported,
//! because it crashed before resolving them, are recorded as worker-fatal
//! failures so the run-level accounting always balances.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{DepthRow, InstrumentSet, OrderBookSnapshot};
use crate::harvesting::error::ExtractError;
use crate::harvesting::task::TaskOutcome;
use crate::harvesting::worker::WorkerOutcome;

/// How many failures the run summary prints before truncating
const SUMMARY_FAILURE_LINES: usize = 10;

/// Unique id for one harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One terminally failed instrument with its last failure reason
#[derive(Debug, Clone)]
pub struct InstrumentFailure {
    pub instrument: crate::domain::Instrument,
    pub reason: ExtractError,
    pub attempts: u32,
}

/// The complete outcome of one harvest run
#[derive(Debug)]
pub struct RunResult {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub successes: Vec<OrderBookSnapshot>,
    pub failures: Vec<InstrumentFailure>,
}

impl RunResult {
    #[must_use]
    pub fn total_instruments(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_instruments();
        if total == 0 {
            return 100.0;
        }
        self.successes.len() as f64 / total as f64 * 100.0
    }

    /// Flattens every successful snapshot into sink rows
    #[must_use]
    pub fn to_rows(&self) -> Vec<DepthRow> {
        self.successes.iter().flat_map(|snapshot| snapshot.to_rows()).collect()
    }

    /// Logs the run summary: totals, rate, and the first few failures
    pub fn log_summary(&self) {
        info!(
            "📊 run {} finished in {:.1}s: {}/{} instruments succeeded ({:.1}%)",
            self.run_id,
            self.elapsed.as_secs_f64(),
            self.successes.len(),
            self.total_instruments(),
            self.success_rate()
        );
        if self.failures.is_empty() {
            return;
        }
        warn!("⚠️ {} instruments failed this run:", self.failures.len());
        for failure in self.failures.iter().take(SUMMARY_FAILURE_LINES) {
            warn!(
                "  - {} after {} attempts: {}",
                failure.instrument, failure.attempts, failure.reason
            );
        }
        if self.failures.len() > SUMMARY_FAILURE_LINES {
            warn!("  ... and {} more", self.failures.len() - SUMMARY_FAILURE_LINES);
        }
    }

    /// Full plain-text failure report for the per-run failure log file.
    /// Unlike the summary this lists every failure.
    #[must_use]
    pub fn failure_report(&self) -> String {
        let mut report = format!(
            "run {} at {} ({} failures of {} instruments)\n",
            self.run_id,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.failures.len(),
            self.total_instruments()
        );
        for failure in &self.failures {
            report.push_str(&format!(
                "{}\tattempts={}\t{}\n",
                failure.instrument.code(),
                failure.attempts,
                failure.reason
            ));
        }
        report
    }
}

/// Collects worker outcomes for one run and settles the books
pub struct ResultAggregator {
    expected: InstrumentSet,
    run_id: RunId,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl ResultAggregator {
    #[must_use]
    pub fn new(expected: InstrumentSet) -> Self {
        Self {
            expected,
            run_id: RunId::new(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Settles the run: every expected instrument resolves exactly once,
    /// in the original request order. Duplicate reports keep the first
    /// resolution; missing instruments become worker-fatal failures.
    #[must_use]
    pub fn finish(self, outcomes: Vec<WorkerOutcome>) -> RunResult {
        let mut by_code: HashMap<String, TaskOutcome> = HashMap::new();
        for outcome in outcomes {
            if let Some(reason) = &outcome.fatal {
                warn!("worker {} reported fatal: {}", outcome.worker_id, reason);
            }
            for resolution in outcome.resolutions {
                let code = resolution.instrument.code().to_string();
                match by_code.entry(code) {
                    Entry::Vacant(slot) => {
                        slot.insert(resolution);
                    }
                    Entry::Occupied(slot) => {
                        warn!(
                            "duplicate resolution for {}, keeping the first report",
                            slot.key()
                        );
                    }
                }
            }
        }

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for instrument in &self.expected {
            match by_code.remove(instrument.code()) {
                Some(TaskOutcome {
                    result: Ok(snapshot),
                    ..
                }) => successes.push(snapshot),
                Some(TaskOutcome {
                    result: Err(reason),
                    attempts,
                    ..
                }) => failures.push(InstrumentFailure {
                    instrument: instrument.clone(),
                    reason,
                    attempts,
                }),
                None => failures.push(InstrumentFailure {
                    instrument: instrument.clone(),
                    reason: ExtractError::WorkerFatal("worker-fatal".to_string()),
                    attempts: 0,
                }),
            }
        }

        RunResult {
            run_id: self.run_id,
            started_at: self.started_at,
            elapsed: self.clock.elapsed(),
            successes,
            failures,
        }
    }
}
