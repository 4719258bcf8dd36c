//! SQLite-backed depth row store
//!
//! Owns the sink connection pool and the `depth_rows` schema. Each bulk
//! insert runs in its own transaction so a partially written batch is
//! never visible; rows are append-only and duplicate capture timestamps
//! across runs are expected.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use tracing::debug;

use crate::domain::DepthRow;
use crate::harvesting::sink::{DepthSink, SinkError};

pub struct DepthStore {
    pool: SqlitePool,
}

impl DepthStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if let Some(parent) = Path::new(db_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Ensure the database file exists by creating it if necessary
        if !Path::new(db_path).exists() {
            std::fs::File::create(db_path)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        // "rank" is a SQLite keyword and must stay quoted
        let create_depth_rows_sql = r#"
            CREATE TABLE IF NOT EXISTS depth_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument_code TEXT NOT NULL,
                side TEXT NOT NULL,
                price INTEGER,
                size INTEGER,
                "rank" INTEGER,
                captured_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_depth_rows_code_captured ON depth_rows (instrument_code, captured_at);
            CREATE INDEX IF NOT EXISTS idx_depth_rows_captured ON depth_rows (captured_at);
        "#;

        sqlx::query(create_depth_rows_sql).execute(&self.pool).await?;
        sqlx::query(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}

#[async_trait]
impl DepthSink for DepthStore {
    async fn insert_batch(&self, rows: &[DepthRow]) -> Result<u64, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SinkError::Database(format!("Failed to begin transaction: {e}")))?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO depth_rows (instrument_code, side, price, size, "rank", captured_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.instrument_code)
            .bind(row.side.code())
            .bind(row.price)
            .bind(row.size)
            .bind(row.rank)
            .bind(row.captured_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| SinkError::Database(format!("Failed to insert depth row: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| SinkError::Database(format!("Failed to commit batch: {e}")))?;

        debug!("committed batch of {} depth rows", rows.len());
        Ok(rows.len() as u64)
    }
}
