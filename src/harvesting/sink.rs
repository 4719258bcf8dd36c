//! # Depth Sink
//!
//! Append-only destination for harvested depth rows. One batch per run,
//! inserted atomically; rows are never updated or deleted.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::DepthRow;

#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),
}

#[async_trait]
pub trait DepthSink: Send + Sync {
    /// Inserts the whole batch atomically and returns the inserted row
    /// count. An empty batch is a no-op returning 0.
    async fn insert_batch(&self, rows: &[DepthRow]) -> Result<u64, SinkError>;
}
