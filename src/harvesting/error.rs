//! # Failure Taxonomy
//!
//! Every way an extraction attempt, a session, or a whole run can fail,
//! with the retry classification the task state machine branches on.
//! Callers branch on these tags, never on blanket error catching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::OrderBookSnapshot;

/// Per-attempt extraction failure.
///
/// Everything except `WorkerFatal` and `Cancelled` is retryable; only
/// retryable failures other than `AuthExpired` are charged against the
/// instrument's retry budget (auth recovery is session-wide, so the task
/// waits on renewal instead of burning an attempt).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ExtractError {
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("navigation failed: {0}")]
    TransientNavigation(String),

    #[error("empty order book")]
    EmptyResult,

    #[error("worker fatal: {0}")]
    WorkerFatal(String),

    #[error("task cancelled")]
    Cancelled,
}

impl ExtractError {
    /// True for failures the task may retry within its budget
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthExpired(_) | Self::RateLimited(_) | Self::TransientNavigation(_) | Self::EmptyResult
        )
    }

    /// True for failures that consume one unit of the retry budget.
    ///
    /// Auth expiry is excluded: recovery is a shared renewal, not another
    /// attempt against the same credential.
    #[must_use]
    pub const fn counts_against_budget(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::TransientNavigation(_) | Self::EmptyResult
        )
    }

    /// True when the owning worker's browser process is gone
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::WorkerFatal(_))
    }
}

/// Tagged outcome of classifying one extraction attempt
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Success(OrderBookSnapshot),
    RetryableFailure(ExtractError),
    TerminalFailure(ExtractError),
}

impl ExtractionOutcome {
    /// Classifies a raw attempt result into the tagged outcome.
    ///
    /// A snapshot with zero rows is a retryable failure, never success: a
    /// render-not-finished page is indistinguishable from a genuinely empty
    /// book on a single read.
    #[must_use]
    pub fn classify(result: Result<OrderBookSnapshot, ExtractError>) -> Self {
        match result {
            Ok(snapshot) if snapshot.has_levels() => Self::Success(snapshot),
            Ok(_) => Self::RetryableFailure(ExtractError::EmptyResult),
            Err(error) if error.is_retryable() => Self::RetryableFailure(error),
            Err(error) => Self::TerminalFailure(error),
        }
    }
}

/// Session establishment and renewal failures
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("required secret is not set: {0}")]
    MissingSecrets(String),

    #[error("login flow did not produce a credential within {waited_secs}s")]
    LoginTimeout { waited_secs: u64 },

    #[error("login flow failed: {0}")]
    FlowFailed(String),

    #[error("no credential established yet")]
    NotAuthenticated,
}

/// Run-level failures.
///
/// Per-instrument failures never surface here; they are recovered locally
/// and reported in the run result. Only a first login with zero usable
/// credential, a failed bulk insert, or external cancellation abort a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("run cancelled")]
    Cancelled,
}
