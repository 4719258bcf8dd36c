//! # Extraction Driver Seam
//!
//! The opaque extractor capability: how a browser (or any other fetch
//! mechanism) is launched, how per-attempt contexts are opened, and how a
//! context extracts one instrument's ladder. The engine owns the lifecycle
//! rules (fresh context per attempt, guaranteed close on every exit path);
//! the driver owns the site-specific mechanics.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Instrument, OrderBookSnapshot};
use crate::harvesting::error::ExtractError;
use crate::harvesting::session::Credential;

/// Options for one isolated extraction context.
///
/// The credential is the snapshot taken at attempt start; it is never
/// refreshed mid-attempt. Blocked resource classes are a hint the driver
/// may ignore.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub credential: Arc<Credential>,
    pub blocked_resources: Vec<String>,
    pub content_timeout: Duration,
}

/// Launches one isolated browser process per worker
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, worker_id: usize) -> Result<Arc<dyn BrowserHandle>, ExtractError>;
}

/// One worker's browser process: the unit of fault isolation
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Opens a fresh isolated context seeded with the given options.
    /// Contexts are never reused across attempts.
    async fn new_context(
        &self,
        options: ContextOptions,
    ) -> Result<Box<dyn ExtractionContext>, ExtractError>;

    /// Shuts the browser process down once the shard is exhausted.
    /// Failures here are logged by the caller, never fatal.
    async fn shutdown(&self) -> Result<(), ExtractError>;
}

/// One isolated browsing context driving a single extraction attempt
#[async_trait]
pub trait ExtractionContext: Send {
    /// Extracts one instrument's ladder. Signals failure through the
    /// taxonomy; a well-formed but empty book may be returned as a
    /// zero-level snapshot and is classified by the caller.
    async fn extract(&mut self, instrument: &Instrument) -> Result<OrderBookSnapshot, ExtractError>;

    /// Forces a reload after a content wait ran out; called a bounded
    /// number of times within one attempt.
    async fn reload(&mut self) -> Result<(), ExtractError>;

    /// Best-effort diagnostic artifact (screenshot, payload dump) written
    /// under `dir` with the given file stem; the driver picks the
    /// extension. Returns the written path.
    async fn capture_artifact(&mut self, dir: &Path, stem: &str)
        -> Result<PathBuf, ExtractError>;

    /// Releases the context. Runs on every exit path; implementations
    /// swallow and log their own teardown errors.
    async fn close(&mut self);
}
