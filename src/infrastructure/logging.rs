//! Logging system configuration and initialization
//!
//! This module provides the logging setup with:
//! - File logging with startup rotation and cleanup
//! - Configuration file based log level control
//! - Structured JSON logging (optional)
//! - Console and file output support
//! - Log files stored relative to executable location
//! - WIB (Western Indonesia Time) timezone support

#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    fmt::{self, time::FormatTime},
    EnvFilter,
    Registry,
};
use chrono::{Utc, FixedOffset};
use lazy_static::lazy_static;
use std::sync::Mutex;

// Re-export LoggingConfig from config module
pub use crate::infrastructure::config::LoggingConfig;

/// Base name of the engine log file
const LOG_FILE_NAME: &str = "harvest.log";

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Custom time formatter for WIB (Western Indonesia Time, UTC+7), the
/// exchange's local timezone
struct WibTimeFormatter;

impl FormatTime for WibTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Utc::now();
        let wib_offset = FixedOffset::east_opt(7 * 3600).unwrap(); // UTC+7
        let wib_time = now.with_timezone(&wib_offset);
        write!(w, "{}", wib_time.format("%Y-%m-%d %H:%M:%S%.3f %Z"))
    }
}

/// Get the log directory relative to the executable location
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    let config = LoggingConfig::default();
    init_logging_with_config(config)
}

/// Rotate the existing log file by renaming it with a timestamp
fn rotate_existing_log_file(log_dir: &PathBuf, log_file_name: &str) -> Result<()> {
    let log_file_path = log_dir.join(log_file_name);

    if log_file_path.exists() {
        let metadata = std::fs::metadata(&log_file_path)
            .map_err(|e| anyhow!("Failed to get log file metadata: {}", e))?;

        let file_time = metadata.created()
            .or_else(|_| metadata.modified())
            .unwrap_or_else(|_| std::time::SystemTime::now());

        let datetime: chrono::DateTime<chrono::Utc> = file_time.into();
        let wib_datetime = datetime.with_timezone(&FixedOffset::east_opt(7 * 3600).unwrap());

        let file_stem = log_file_name.trim_end_matches(".log");
        let timestamped_name = format!("{}.{}.log", file_stem, wib_datetime.format("%Y%m%dT%H%M%S"));
        let timestamped_path = log_dir.join(&timestamped_name);

        std::fs::rename(&log_file_path, &timestamped_path)
            .map_err(|e| anyhow!("Failed to rotate log file {} to {}: {}",
                log_file_path.display(), timestamped_path.display(), e))?;

        info!("Rotated existing log file to: {}", timestamped_name);
    }

    Ok(())
}

/// Initialize logging with custom configuration
///
/// This function sets up optimized logging filters to reduce verbose output
/// from dependencies.
///
/// # Log Level Optimization
/// - When level != "trace": SQL queries, HTTP details, and runtime internals
///   are suppressed
/// - When level == "trace": All logs including verbose dependencies are shown
///
/// # Environment Variable Override
/// You can override the filtering using the RUST_LOG environment variable:
/// ```bash
/// # Show all SQL queries even on DEBUG level
/// RUST_LOG="debug,sqlx::query=debug" depth-harvest
///
/// # Show detailed HTTP logs
/// RUST_LOG="debug,reqwest=debug,hyper=debug" depth-harvest
/// ```
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let log_dir = get_log_directory();

    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

    // Rotate the existing log file before creating a new one
    rotate_existing_log_file(&log_dir, LOG_FILE_NAME)?;

    if config.auto_cleanup_logs {
        cleanup_old_logs(&log_dir, &config)?;
    }

    // Set up environment filter with quieted dependency targets
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let mut filter = EnvFilter::new(&config.level);

            // Suppress verbose dependency logs unless TRACE level is
            // specifically requested
            if !config.level.to_lowercase().contains("trace") {
                filter = filter
                    .add_directive("sqlx::query=warn".parse().unwrap())
                    .add_directive("sqlx::migrate=info".parse().unwrap())
                    .add_directive("sqlx::sqlite=warn".parse().unwrap())
                    .add_directive("reqwest=info".parse().unwrap())
                    .add_directive("hyper=warn".parse().unwrap())
                    .add_directive("h2=warn".parse().unwrap())
                    .add_directive("tokio=info".parse().unwrap())
                    .add_directive("runtime=warn".parse().unwrap());

                // Keep our own logs at the requested level
                if let Ok(directive) = format!("depth_harvest_lib={}", config.level).parse() {
                    filter = filter.add_directive(directive);
                }
            }

            // Per-module overrides from the config file
            for (module, level) in &config.module_filters {
                match format!("{}={}", module, level).parse() {
                    Ok(directive) => filter = filter.add_directive(directive),
                    Err(e) => warn!("Ignoring bad module filter {}={}: {}", module, level, e),
                }
            }

            filter
        });

    let registry = Registry::default().with(env_filter);

    // Handle different combinations of output types
    match (config.file_output, config.console_output) {
        (true, true) => {
            let file_appender = rolling::never(&log_dir, LOG_FILE_NAME);
            let (file_writer, file_guard) = non_blocking(file_appender);

            // Store the guard globally to prevent it from being dropped
            LOG_GUARDS.lock().unwrap().push(file_guard);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(WibTimeFormatter)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false);       // No ANSI color codes for file output
                let console_layer = fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_timer(WibTimeFormatter)
                    .with_target(false);

                registry.with(file_layer).with(console_layer).init();
            } else {
                // File layer with minimal formatting (time + level + message only)
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(WibTimeFormatter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false);       // No ANSI color codes for file output
                let console_layer = fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_timer(WibTimeFormatter)
                    .with_target(false);

                registry.with(file_layer).with(console_layer).init();
            }
        },
        (true, false) => {
            let file_appender = rolling::never(&log_dir, LOG_FILE_NAME);
            let (file_writer, file_guard) = non_blocking(file_appender);

            LOG_GUARDS.lock().unwrap().push(file_guard);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(WibTimeFormatter)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false);

                registry.with(file_layer).init();
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(WibTimeFormatter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false);

                registry.with(file_layer).init();
            }
        },
        (false, true) => {
            // Console output only with WIB time
            let console_layer = fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(WibTimeFormatter)
                .with_target(false);

            registry.with(console_layer).init();
        },
        (false, false) => {
            return Err(anyhow!("No logging output configured"));
        }
    }

    info!("Logging system initialized");
    info!("Log directory: {:?}", log_dir);
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    info!("Console output: {}", config.console_output);
    info!("File output: {}", config.file_output);

    if !config.level.to_lowercase().contains("trace") {
        info!("SQL and verbose logs suppressed (use TRACE level to see all logs)");
    } else {
        info!("TRACE level active - all logs including SQL queries will be shown");
    }

    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Depth Harvest System Information ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);

    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }

    info!("Log directory: {:?}", get_log_directory());
    info!("========================================");
}

/// Clean up old log files based on configuration
fn cleanup_old_logs(log_dir: &PathBuf, config: &LoggingConfig) -> Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let mut log_files = Vec::new();

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                if filename.ends_with(".log") {
                    if let Ok(metadata) = entry.metadata() {
                        if let Ok(modified) = metadata.modified() {
                            log_files.push((path, modified));
                        }
                    }
                }
            }
        }
    }

    // Sort by modification time (newest first)
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    if config.keep_only_latest && log_files.len() > 1 {
        info!("Keeping only the latest log file");
        for (path, _) in log_files.iter().skip(1) {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove old log file {:?}: {}", path, e);
            } else {
                info!("Removed old log file: {:?}", path);
            }
        }
        return Ok(());
    }

    if log_files.len() > config.max_files as usize {
        let files_to_remove = log_files.len() - config.max_files as usize;
        info!("Removing {} old log files (keeping {})", files_to_remove, config.max_files);

        for (path, _) in log_files.iter().skip(config.max_files as usize) {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove old log file {:?}: {}", path, e);
            } else {
                info!("Removed old log file: {:?}", path);
            }
        }
    }

    Ok(())
}
