//! # Extraction Task
//!
//! The retry/backoff state machine performing one instrument's extraction
//! attempts: `Pending -> Attempting -> {Succeeded, RetryWait, Failed}`.
//!
//! Every attempt runs in a fresh isolated context seeded with the
//! credential snapshot taken at attempt start. Auth expiry waits on the
//! shared renewal instead of burning retry budget; every other retryable
//! failure sleeps a linearly scaled backoff. The context is released on
//! every exit path, and failed attempts capture a best-effort diagnostic
//! artifact that can itself fail without failing the task.

use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Instrument, OrderBookSnapshot};
use crate::harvesting::driver::{BrowserHandle, ContextOptions, ExtractionContext};
use crate::harvesting::error::{ExtractError, ExtractionOutcome};
use crate::harvesting::retry::RetryPolicy;
use crate::harvesting::session::{Credential, SessionManager};

/// Task lifecycle states, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Attempting,
    RetryWait,
    Succeeded,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Attempting => "attempting",
            Self::RetryWait => "retry-wait",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Where failed attempts drop their diagnostic artifacts
#[derive(Debug, Clone)]
pub struct ArtifactPolicy {
    pub directory: PathBuf,
}

/// Per-worker settings shared by all of its tasks
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub policy: RetryPolicy,
    pub blocked_resources: Vec<String>,
    pub content_timeout: Duration,
    pub artifacts: Option<ArtifactPolicy>,
}

/// Final resolution of one instrument
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub instrument: Instrument,
    pub attempts: u32,
    pub result: Result<OrderBookSnapshot, ExtractError>,
}

impl TaskOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// One instrument's extraction attempts against one worker's browser
pub struct ExtractionTask {
    instrument: Instrument,
    settings: Arc<TaskSettings>,
    session: Arc<SessionManager>,
    cancel: CancellationToken,
    state: TaskState,
}

impl ExtractionTask {
    #[must_use]
    pub fn new(
        instrument: Instrument,
        settings: Arc<TaskSettings>,
        session: Arc<SessionManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            instrument,
            settings,
            session,
            cancel,
            state: TaskState::Pending,
        }
    }

    /// Runs attempts until success, exhausted budget, or a fatal failure.
    ///
    /// Attempts are strictly sequential; only the backoff sleeps and the
    /// renewal wait suspend this task.
    pub async fn run(mut self, browser: Arc<dyn BrowserHandle>) -> TaskOutcome {
        let cancel = self.cancel.clone();
        let mut attempt: u32 = 0;
        let mut charged: u32 = 0;
        let mut auth_waits: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return self.finish_failed(attempt, ExtractError::Cancelled);
            }

            attempt += 1;
            self.transition(TaskState::Attempting);

            // Credential snapshot at attempt start, never refreshed mid-attempt
            let credential = match self.session.credential().await {
                Ok(credential) => credential,
                Err(error) => {
                    return self.finish_failed(
                        attempt,
                        ExtractError::AuthExpired(format!("no usable credential: {error}")),
                    );
                }
            };
            let credential_generation = credential.generation;

            let raw = self.attempt_once(browser.as_ref(), credential, attempt).await;

            match ExtractionOutcome::classify(raw) {
                ExtractionOutcome::Success(snapshot) => {
                    self.transition(TaskState::Succeeded);
                    debug!(
                        "[{}] extracted {} levels on attempt {}",
                        self.instrument,
                        snapshot.levels.len(),
                        attempt
                    );
                    return TaskOutcome {
                        instrument: self.instrument,
                        attempts: attempt,
                        result: Ok(snapshot),
                    };
                }
                ExtractionOutcome::TerminalFailure(error) => {
                    return self.finish_failed(attempt, error);
                }
                ExtractionOutcome::RetryableFailure(error) => {
                    if SessionManager::needs_renewal(&error) {
                        // Session-wide recovery: wait on the coalesced
                        // renewal, not charged against the budget.
                        auth_waits += 1;
                        if auth_waits > self.settings.policy.max_retries {
                            return self.finish_failed(attempt, error);
                        }
                        debug!(
                            "[{}] auth expired on attempt {}, awaiting session renewal",
                            self.instrument, attempt
                        );
                        let renewed = tokio::select! {
                            renewed = self.session.renew(credential_generation) => renewed,
                            () = cancel.cancelled() => {
                                return self.finish_failed(attempt, ExtractError::Cancelled);
                            }
                        };
                        if let Err(renew_error) = renewed {
                            return self.finish_failed(
                                attempt,
                                ExtractError::AuthExpired(format!(
                                    "session renewal failed: {renew_error}"
                                )),
                            );
                        }
                    } else {
                        charged += 1;
                        if !self.settings.policy.has_budget(charged) {
                            return self.finish_failed(attempt, error);
                        }
                        let delay = self.settings.policy.backoff_for(&error, charged);
                        self.transition(TaskState::RetryWait);
                        debug!(
                            "[{}] attempt {} failed ({}), backing off {}ms",
                            self.instrument,
                            attempt,
                            error,
                            delay.as_millis()
                        );
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = cancel.cancelled() => {
                                return self.finish_failed(attempt, ExtractError::Cancelled);
                            }
                        }
                    }
                }
            }
        }
    }

    /// One attempt: fresh context, bounded in-attempt reloads, artifact on
    /// failure, context closed on every path.
    async fn attempt_once(
        &self,
        browser: &dyn BrowserHandle,
        credential: Arc<Credential>,
        attempt: u32,
    ) -> Result<OrderBookSnapshot, ExtractError> {
        let options = ContextOptions {
            credential,
            blocked_resources: self.settings.blocked_resources.clone(),
            content_timeout: self.settings.content_timeout,
        };
        let mut context = browser.new_context(options).await?;

        let result = self.extract_with_reloads(context.as_mut()).await;

        if let Err(error) = &result {
            if error.is_retryable() {
                self.capture_failure_artifact(context.as_mut(), attempt, error).await;
            }
        }

        context.close().await;
        result
    }

    /// Retries the content wait with forced reloads inside one attempt
    async fn extract_with_reloads(
        &self,
        context: &mut dyn ExtractionContext,
    ) -> Result<OrderBookSnapshot, ExtractError> {
        let mut reloads: u32 = 0;
        loop {
            match context.extract(&self.instrument).await {
                Err(ExtractError::TransientNavigation(reason))
                    if reloads < self.settings.policy.max_reloads_per_attempt =>
                {
                    reloads += 1;
                    debug!(
                        "[{}] content wait ran out ({}), reload {}/{}",
                        self.instrument,
                        reason,
                        reloads,
                        self.settings.policy.max_reloads_per_attempt
                    );
                    context.reload().await?;
                }
                other => return other,
            }
        }
    }

    /// Artifact capture is best-effort: its own failure is logged and
    /// swallowed.
    async fn capture_failure_artifact(
        &self,
        context: &mut dyn ExtractionContext,
        attempt: u32,
        error: &ExtractError,
    ) {
        let Some(artifacts) = &self.settings.artifacts else {
            return;
        };

        let stem = format!("{}_{}", self.instrument.code(), Utc::now().format("%H%M%S"));
        match context.capture_artifact(&artifacts.directory, &stem).await {
            Ok(path) => debug!(
                "[{}] captured failure artifact for attempt {} ({}): {}",
                self.instrument,
                attempt,
                error,
                path.display()
            ),
            Err(capture_error) => warn!(
                "[{}] artifact capture failed on attempt {}: {}",
                self.instrument, attempt, capture_error
            ),
        }
    }

    fn finish_failed(mut self, attempts: u32, error: ExtractError) -> TaskOutcome {
        self.transition(TaskState::Failed);
        warn!("[{}] resolved as failure after {} attempts: {}", self.instrument, attempts, error);
        TaskOutcome {
            instrument: self.instrument,
            attempts,
            result: Err(error),
        }
    }

    fn transition(&mut self, next: TaskState) {
        debug!("[{}] task state {} -> {}", self.instrument, self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DepthLevel, Side};
    use crate::harvesting::session::{CapturedAuth, CredentialObserver, LoginFlow, SessionError};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    struct InstantFlow;

    #[async_trait]
    impl LoginFlow for InstantFlow {
        async fn run(&self, observer: CredentialObserver) -> Result<(), SessionError> {
            observer.observe(CapturedAuth {
                headers: HashMap::from([("authorization".to_string(), "Bearer t".to_string())]),
                storage_state: None,
            });
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

    /// Scripted step for one `extract` call: Ok(level count) or a failure
    type Step = Result<usize, ExtractError>;

    #[derive(Default)]
    struct DriverCounters {
        contexts_opened: AtomicU32,
        contexts_closed: AtomicU32,
        reloads: AtomicU32,
        artifacts: AtomicU32,
    }

    struct ScriptedBrowser {
        steps: Arc<Mutex<VecDeque<Step>>>,
        counters: Arc<DriverCounters>,
    }

    impl ScriptedBrowser {
        fn new(steps: Vec<Step>) -> (Arc<Self>, Arc<DriverCounters>) {
            let counters = Arc::new(DriverCounters::default());
            let browser = Arc::new(Self {
                steps: Arc::new(Mutex::new(steps.into_iter().collect())),
                counters: Arc::clone(&counters),
            });
            (browser, counters)
        }
    }

    #[async_trait]
    impl BrowserHandle for ScriptedBrowser {
        async fn new_context(
            &self,
            _options: ContextOptions,
        ) -> Result<Box<dyn ExtractionContext>, ExtractError> {
            self.counters.contexts_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedContext {
                steps: Arc::clone(&self.steps),
                counters: Arc::clone(&self.counters),
            }))
        }

        async fn shutdown(&self) -> Result<(), ExtractError> {
            Ok(())
        }
    }

    struct ScriptedContext {
        steps: Arc<Mutex<VecDeque<Step>>>,
        counters: Arc<DriverCounters>,
    }

    #[async_trait]
    impl ExtractionContext for ScriptedContext {
        async fn extract(
            &mut self,
            instrument: &Instrument,
        ) -> Result<OrderBookSnapshot, ExtractError> {
            let step = self.steps.lock().await.pop_front().unwrap_or(Ok(0));
            step.map(|levels| {
                let levels = (1..=levels as u32)
                    .map(|rank| DepthLevel {
                        side: Side::Bid,
                        rank,
                        price: Some(1000 + i64::from(rank)),
                        size: Some(10),
                    })
                    .collect();
                OrderBookSnapshot::new(instrument.clone(), Utc::now(), levels)
            })
        }

        async fn reload(&mut self) -> Result<(), ExtractError> {
            self.counters.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn capture_artifact(
            &mut self,
            dir: &Path,
            stem: &str,
        ) -> Result<PathBuf, ExtractError> {
            self.counters.artifacts.fetch_add(1, Ordering::SeqCst);
            Ok(dir.join(format!("{stem}.png")))
        }

        async fn close(&mut self) {
            self.counters.contexts_closed.fetch_add(1, Ordering::SeqCst);
        }
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
            artifacts: Some(ArtifactPolicy {
                directory: PathBuf::from("artifacts"),
            }),
        })
    }

    fn task(session: Arc<SessionManager>) -> ExtractionTask {
        ExtractionTask::new(
            Instrument::from("BBCA"),
            settings(),
            session,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_retryable_failure_then_success_uses_fresh_contexts() {
        let session = logged_in_session().await;
        let (browser, counters) = ScriptedBrowser::new(vec![Err(ExtractError::EmptyResult), Ok(3)]);

        let outcome = task(session).run(browser).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(counters.contexts_opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.contexts_closed.load(Ordering::SeqCst), 2);
        assert_eq!(counters.artifacts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reloads_stay_within_one_attempt() {
        let session = logged_in_session().await;
        let (browser, counters) = ScriptedBrowser::new(vec![
            Err(ExtractError::TransientNavigation("wait timeout".into())),
            Err(ExtractError::TransientNavigation("wait timeout".into())),
            Ok(2),
        ]);

        let outcome = task(session).run(browser).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counters.reloads.load(Ordering::SeqCst), 2);
        assert_eq!(counters.contexts_opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.contexts_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_terminal_with_last_reason() {
        let session = logged_in_session().await;
        let (browser, counters) = ScriptedBrowser::new(vec![
            Err(ExtractError::EmptyResult),
            Err(ExtractError::EmptyResult),
            Err(ExtractError::EmptyResult),
        ]);

        let outcome = task(session).run(browser).await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.result, Err(ExtractError::EmptyResult)));
        assert_eq!(counters.contexts_opened.load(Ordering::SeqCst), 3);
        assert_eq!(counters.contexts_closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_row_snapshot_is_retried_not_succeeded() {
        let session = logged_in_session().await;
        // Ok(0) means a well-formed page with an empty ladder
        let (browser, _) = ScriptedBrowser::new(vec![Ok(0), Ok(0), Ok(0)]);

        let outcome = task(session).run(browser).await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.result, Err(ExtractError::EmptyResult)));
    }

    #[tokio::test]
    async fn test_auth_expiry_waits_for_renewal_without_charging_budget() {
        let session = logged_in_session().await;
        let (browser, _) = ScriptedBrowser::new(vec![
            Err(ExtractError::AuthExpired("401".into())),
            Ok(1),
        ]);

        let outcome = task(Arc::clone(&session)).run(browser).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(session.renewal_count(), 1);
    }

    #[tokio::test]
    async fn test_worker_fatal_resolves_immediately() {
        let session = logged_in_session().await;
        let (browser, counters) =
            ScriptedBrowser::new(vec![Err(ExtractError::WorkerFatal("browser died".into()))]);

        let outcome = task(session).run(browser).await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(ExtractError::WorkerFatal(_))));
        // Fatal attempts skip the artifact but still release the context
        assert_eq!(counters.artifacts.load(Ordering::SeqCst), 0);
        assert_eq!(counters.contexts_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_task_resolves_without_attempting() {
        let session = logged_in_session().await;
        let (browser, counters) = ScriptedBrowser::new(vec![Ok(1)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = ExtractionTask::new(Instrument::from("BBCA"), settings(), session, cancel)
            .run(browser)
            .await;

        assert_eq!(outcome.attempts, 0);
        assert!(matches!(outcome.result, Err(ExtractError::Cancelled)));
        assert_eq!(counters.contexts_opened.load(Ordering::SeqCst), 0);
    }
}
