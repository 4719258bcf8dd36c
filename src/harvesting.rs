//! # Harvesting Engine
//!
//! The concurrent harvesting/orchestration core:
//! - a pool of isolated browser workers, each running bounded-concurrency
//!   extraction tasks over a contiguous shard of the instrument set
//! - a shared retry/backoff policy and an atomically-renewable session
//! - a result-aggregation step guaranteeing every instrument resolves
//!   exactly once per run

// Explicit module declarations (no mod.rs)
pub mod aggregate;
pub mod driver;
pub mod error;
pub mod pacing;
pub mod partition;
pub mod retry;
pub mod runner;
pub mod session;
pub mod sink;
pub mod task;
pub mod worker;

// Clean re-exports
pub use aggregate::{InstrumentFailure, ResultAggregator, RunId, RunResult};
pub use driver::{BrowserHandle, BrowserLauncher, ContextOptions, ExtractionContext};
pub use error::{ExtractError, ExtractionOutcome, RunError, SessionError};
pub use pacing::RequestPacer;
pub use partition::{partition, ShardAssignment};
pub use retry::RetryPolicy;
pub use runner::{HarvestRunner, RunnerSettings};
pub use session::{CapturedAuth, Credential, CredentialObserver, LoginFlow, SessionManager};
pub use sink::{DepthSink, SinkError};
pub use task::{ArtifactPolicy, ExtractionTask, TaskOutcome, TaskSettings, TaskState};
pub use worker::{PoolWorker, WorkerOutcome};
