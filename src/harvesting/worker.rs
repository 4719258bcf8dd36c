//! # Pool Worker
//!
//! One isolated browser plus the bounded-concurrency task group for its
//! shard. Tasks acquire a semaphore permit before attempting anything, so
//! at most `max_concurrent` extractions are in flight per worker. A fatal
//! browser failure trips a worker-local flag and short-circuits every task
//! still queued behind the semaphore; the worker itself keeps running so
//! the other workers' shards are unaffected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::harvesting::driver::BrowserLauncher;
use crate::harvesting::error::ExtractError;
use crate::harvesting::partition::ShardAssignment;
use crate::harvesting::session::SessionManager;
use crate::harvesting::task::{ExtractionTask, TaskOutcome, TaskSettings};

/// Everything one worker resolved, exactly one entry per shard instrument
#[derive(Debug)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    pub resolutions: Vec<TaskOutcome>,
    pub fatal: Option<String>,
}

impl WorkerOutcome {
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.resolutions.iter().filter(|outcome| outcome.is_success()).count()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.resolutions.len() - self.success_count()
    }
}

/// One worker: an isolated browser and the tasks for its shard
pub struct PoolWorker {
    shard: ShardAssignment,
    launcher: Arc<dyn BrowserLauncher>,
    session: Arc<SessionManager>,
    settings: Arc<TaskSettings>,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl PoolWorker {
    #[must_use]
    pub fn new(
        shard: ShardAssignment,
        launcher: Arc<dyn BrowserLauncher>,
        session: Arc<SessionManager>,
        settings: Arc<TaskSettings>,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shard,
            launcher,
            session,
            settings,
            max_concurrent: max_concurrent.max(1),
            cancel,
        }
    }

    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.shard.worker_id
    }

    /// Launches the browser, drives every shard instrument to resolution,
    /// then shuts the browser down. Always returns one resolution per
    /// instrument, even on launch failure or a task panic.
    pub async fn run(self) -> WorkerOutcome {
        let worker_id = self.shard.worker_id;

        if self.shard.is_empty() {
            debug!("worker {} has an empty shard, nothing to do", worker_id);
            return WorkerOutcome {
                worker_id,
                resolutions: Vec::new(),
                fatal: None,
            };
        }

        info!(
            "🧵 worker {} starting: {} instruments, concurrency {}",
            worker_id,
            self.shard.len(),
            self.max_concurrent
        );

        let browser = match self.launcher.launch(worker_id).await {
            Ok(browser) => browser,
            Err(error) => {
                let reason = format!("browser launch failed: {error}");
                warn!("🛑 worker {}: {}", worker_id, reason);
                let resolutions = self
                    .shard
                    .instruments
                    .into_iter()
                    .map(|instrument| TaskOutcome {
                        instrument,
                        attempts: 0,
                        result: Err(ExtractError::WorkerFatal(reason.clone())),
                    })
                    .collect();
                return WorkerOutcome {
                    worker_id,
                    resolutions,
                    fatal: Some(reason),
                };
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let fatal_flag = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(self.shard.instruments.len());
        for instrument in &self.shard.instruments {
            let task = ExtractionTask::new(
                instrument.clone(),
                Arc::clone(&self.settings),
                Arc::clone(&self.session),
                self.cancel.clone(),
            );
            let semaphore = Arc::clone(&semaphore);
            let fatal_flag = Arc::clone(&fatal_flag);
            let browser = Arc::clone(&browser);
            let assigned = instrument.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TaskOutcome {
                        instrument: assigned,
                        attempts: 0,
                        result: Err(ExtractError::Cancelled),
                    };
                };
                if fatal_flag.load(Ordering::SeqCst) {
                    return TaskOutcome {
                        instrument: assigned,
                        attempts: 0,
                        result: Err(ExtractError::WorkerFatal(
                            "worker browser already failed".to_string(),
                        )),
                    };
                }

                let outcome = task.run(browser).await;
                if matches!(outcome.result, Err(ExtractError::WorkerFatal(_))) {
                    fatal_flag.store(true, Ordering::SeqCst);
                }
                outcome
            });
            handles.push((instrument.clone(), handle));
        }

        let mut resolutions = Vec::with_capacity(handles.len());
        for (instrument, handle) in handles {
            match handle.await {
                Ok(outcome) => resolutions.push(outcome),
                Err(join_error) => {
                    // A panicked task still resolves its instrument
                    fatal_flag.store(true, Ordering::SeqCst);
                    resolutions.push(TaskOutcome {
                        instrument,
                        attempts: 0,
                        result: Err(ExtractError::WorkerFatal(format!(
                            "task panicked: {join_error}"
                        ))),
                    });
                }
            }
        }

        if let Err(error) = browser.shutdown().await {
            warn!("worker {} browser shutdown failed: {}", worker_id, error);
        }

        let fatal = resolutions.iter().find_map(|outcome| match &outcome.result {
            Err(ExtractError::WorkerFatal(reason)) => Some(reason.clone()),
            _ => None,
        });

        let outcome = WorkerOutcome {
            worker_id,
            resolutions,
            fatal,
        };
        info!(
            "worker {} finished: {} succeeded, {} failed",
            worker_id,
            outcome.success_count(),
            outcome.failure_count()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DepthLevel, Instrument, OrderBookSnapshot, Side};
    use crate::harvesting::driver::{BrowserHandle, ContextOptions, ExtractionContext};
    use crate::harvesting::retry::RetryPolicy;
    use crate::harvesting::session::{CapturedAuth, CredentialObserver, LoginFlow, SessionError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct InstantFlow;

    #[async_trait]
    impl LoginFlow for InstantFlow {
        async fn run(&self, observer: CredentialObserver) -> Result<(), SessionError> {
            observer.observe(CapturedAuth::default());
            Ok(())
        }
    }

    async fn logged_in_session() -> Arc<SessionManager> {
        let session = Arc::new(SessionManager::new(
            Arc::new(InstantFlow),
            Duration::from_secs(1),
        ));
        session.login().await.unwrap();
        session
    }

    fn settings() -> Arc<TaskSettings> {
        Arc::new(TaskSettings {
            policy: RetryPolicy {
                base_delay_ms: 1,
                rate_limit_delay_ms: 1,
                jitter_range_ms: 0,
                ..RetryPolicy::default()
            },
            blocked_resources: vec![],
            content_timeout: Duration::from_millis(100),
            artifacts: None,
        })
    }

    fn shard(codes: &[&str]) -> ShardAssignment {
        ShardAssignment {
            worker_id: 0,
            instruments: codes.iter().map(|code| Instrument::from(*code)).collect(),
        }
    }

    /// Per-instrument behavior: Ok = one-level ladder, Err = that failure,
    /// "PANIC" as an error reason makes the extract call panic
    #[derive(Default)]
    struct FakeLauncher {
        behaviors: HashMap<String, Result<(), ExtractError>>,
        launches: AtomicUsize,
        fail_launch: bool,
        gauge: Arc<Gauge>,
    }

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        max: AtomicUsize,
        delay_ms: u64,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, _worker_id: usize) -> Result<Arc<dyn BrowserHandle>, ExtractError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail_launch {
                return Err(ExtractError::WorkerFatal("no executable".to_string()));
            }
            Ok(Arc::new(FakeBrowser {
                behaviors: self.behaviors.clone(),
                gauge: Arc::clone(&self.gauge),
            }))
        }
    }

    struct FakeBrowser {
        behaviors: HashMap<String, Result<(), ExtractError>>,
        gauge: Arc<Gauge>,
    }

    #[async_trait]
    impl BrowserHandle for FakeBrowser {
        async fn new_context(
            &self,
            _options: ContextOptions,
        ) -> Result<Box<dyn ExtractionContext>, ExtractError> {
            Ok(Box::new(FakeContext {
                behaviors: self.behaviors.clone(),
                gauge: Arc::clone(&self.gauge),
            }))
        }

        async fn shutdown(&self) -> Result<(), ExtractError> {
            Ok(())
        }
    }

    struct FakeContext {
        behaviors: HashMap<String, Result<(), ExtractError>>,
        gauge: Arc<Gauge>,
    }

    #[async_trait]
    impl ExtractionContext for FakeContext {
        async fn extract(
            &mut self,
            instrument: &Instrument,
        ) -> Result<OrderBookSnapshot, ExtractError> {
            let in_flight = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.max.fetch_max(in_flight, Ordering::SeqCst);
            if self.gauge.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.gauge.delay_ms)).await;
            }
            self.gauge.current.fetch_sub(1, Ordering::SeqCst);

            match self.behaviors.get(instrument.code()) {
                Some(Err(error)) => {
                    if let ExtractError::WorkerFatal(reason) = error {
                        if reason == "PANIC" {
                            panic!("scripted panic for {instrument}");
                        }
                    }
                    Err(error.clone())
                }
                _ => Ok(OrderBookSnapshot::new(
                    instrument.clone(),
                    Utc::now(),
                    vec![DepthLevel {
                        side: Side::Bid,
                        rank: 1,
                        price: Some(100),
                        size: Some(5),
                    }],
                )),
            }
        }

        async fn reload(&mut self) -> Result<(), ExtractError> {
            Ok(())
        }

        async fn capture_artifact(
            &mut self,
            dir: &Path,
            stem: &str,
        ) -> Result<PathBuf, ExtractError> {
            Ok(dir.join(stem))
        }

        async fn close(&mut self) {}
    }

    async fn worker_with_session(
        launcher: Arc<FakeLauncher>,
        codes: &[&str],
        max_concurrent: usize,
    ) -> PoolWorker {
        PoolWorker::new(
            shard(codes),
            launcher,
            logged_in_session().await,
            settings(),
            max_concurrent,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_empty_shard_starts_no_browser() {
        let launcher = Arc::new(FakeLauncher::default());
        let outcome = worker_with_session(Arc::clone(&launcher), &[], 5).await.run().await;

        assert_eq!(outcome.resolutions.len(), 0);
        assert!(outcome.fatal.is_none());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_resolves_whole_shard_as_fatal() {
        let launcher = Arc::new(FakeLauncher {
            fail_launch: true,
            ..FakeLauncher::default()
        });
        let outcome = worker_with_session(launcher, &["AAA", "BBB", "CCC"], 5).await.run().await;

        assert_eq!(outcome.resolutions.len(), 3);
        assert!(outcome.fatal.is_some());
        assert!(outcome
            .resolutions
            .iter()
            .all(|r| matches!(r.result, Err(ExtractError::WorkerFatal(_)))));
    }

    #[tokio::test]
    async fn test_full_shard_resolves_with_bounded_concurrency() {
        let launcher = Arc::new(FakeLauncher {
            gauge: Arc::new(Gauge {
                delay_ms: 20,
                ..Gauge::default()
            }),
            ..FakeLauncher::default()
        });
        let outcome = worker_with_session(
            Arc::clone(&launcher),
            &["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"],
            2,
        )
        .await
        .run()
        .await;

        assert_eq!(outcome.resolutions.len(), 6);
        assert_eq!(outcome.success_count(), 6);
        assert!(launcher.gauge.max.load(Ordering::SeqCst) <= 2);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_task_short_circuits_queued_tasks() {
        let launcher = Arc::new(FakeLauncher {
            behaviors: HashMap::from([(
                "AAA".to_string(),
                Err(ExtractError::WorkerFatal("browser died".to_string())),
            )]),
            ..FakeLauncher::default()
        });
        let outcome = worker_with_session(launcher, &["AAA", "BBB", "CCC"], 1).await.run().await;

        assert_eq!(outcome.resolutions.len(), 3);
        assert!(outcome.fatal.is_some());
        assert!(outcome
            .resolutions
            .iter()
            .all(|r| matches!(r.result, Err(ExtractError::WorkerFatal(_)))));
        // Queued tasks never attempted once the worker went fatal
        assert!(outcome.resolutions.iter().filter(|r| r.attempts == 0).count() >= 2);
    }

    #[tokio::test]
    async fn test_panicked_task_still_resolves_its_instrument() {
        let launcher = Arc::new(FakeLauncher {
            behaviors: HashMap::from([(
                "BBB".to_string(),
                Err(ExtractError::WorkerFatal("PANIC".to_string())),
            )]),
            ..FakeLauncher::default()
        });
        let outcome = worker_with_session(launcher, &["AAA", "BBB", "CCC"], 3).await.run().await;

        assert_eq!(outcome.resolutions.len(), 3);
        let panicked = outcome
            .resolutions
            .iter()
            .find(|r| r.instrument.code() == "BBB")
            .unwrap();
        assert!(matches!(panicked.result, Err(ExtractError::WorkerFatal(_))));
    }
}
