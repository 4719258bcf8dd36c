//! Configuration infrastructure
//!
//! Contains configuration loading and management for the depth harvesting
//! engine.
//!
//! Configuration is organized into sections mirroring the engine layers:
//! worker pool, retry policy, session, request pacing, depth source,
//! persistence sink, diagnostic artifacts, logging, and the supervisor
//! job table. Login secrets never live in the config file; they come from
//! environment variables (see [`secrets`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::harvesting::RetryPolicy;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Worker pool sizing
    pub workers: WorkersConfig,

    /// Retry/backoff policy shared by all extraction tasks
    pub retry: RetryConfig,

    /// Session establishment and renewal
    pub session: SessionConfig,

    /// Request pacing for the HTTP-fetch driver
    pub pacing: PacingConfig,

    /// Where depth data comes from
    pub source: SourceConfig,

    /// Where depth rows go
    pub sink: SinkConfig,

    /// Diagnostic artifacts for failed attempts
    pub artifacts: ArtifactsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Supervisor job table and run interval
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of isolated browser workers per run
    pub num_workers: usize,

    /// Concurrency-slot count per worker; excess tasks queue
    pub max_concurrent_per_worker: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts charged to the budget before an instrument fails terminally
    pub max_retries: u32,

    /// Base backoff in milliseconds, scaled linearly by attempt number
    pub base_delay_ms: u64,

    /// Base backoff for rate-limit signals, also scaled linearly
    pub rate_limit_delay_ms: u64,

    /// Hard cap on any computed backoff
    pub max_delay_ms: u64,

    /// Random jitter added on top of each backoff
    pub jitter_range_ms: u64,

    /// Forced reloads within one attempt before it fails retryable
    pub max_reloads_per_attempt: u32,
}

impl RetryConfig {
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            rate_limit_delay_ms: self.rate_limit_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_range_ms: self.jitter_range_ms,
            max_reloads_per_attempt: self.max_reloads_per_attempt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on the wait for the post-login credential observation
    pub login_timeout_seconds: u64,

    /// Pre-captured auth state file; when present it is preferred over
    /// driving the login endpoint
    pub auth_state_path: Option<PathBuf>,

    /// Login endpoint for the HTTP flow; secrets come from the environment
    pub login_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Token-bucket rate beneath the fixed delay
    pub requests_per_second: u32,

    /// Fixed inter-request delay in milliseconds
    pub request_delay_ms: u64,

    /// Random jitter added to the fixed delay
    pub request_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Depth payload endpoint; `{code}` is replaced by the instrument code
    pub depth_endpoint: String,

    /// Bound on one navigation/fetch
    pub page_timeout_seconds: u64,

    /// Bound on one content wait within an attempt
    pub content_timeout_seconds: u64,

    /// Resource classes the driver should skip loading
    pub blocked_resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink database URL; defaults to a SQLite file under the data dir
    pub database_url: Option<String>,

    /// Pool size for the sink connection
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Capture diagnostic artifacts for failed attempts
    pub enabled: bool,

    /// Artifact directory; defaults to `artifacts` under the data dir
    pub directory: Option<PathBuf>,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Keep only the most recent log file (delete all others)
    pub keep_only_latest: bool,

    /// Module-specific log level overrides (e.g., "sqlx": "debug")
    pub module_filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Sleep between runs, used by both loop mode and the Supervisor
    pub interval_seconds: u64,

    /// Jobs the Supervisor runs; empty means one default harvest job
    pub jobs: Vec<JobConfig>,
}

/// One supervised job: a named command restarted every cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            max_concurrent_per_worker: defaults::MAX_CONCURRENT_PER_WORKER,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            rate_limit_delay_ms: defaults::RATE_LIMIT_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            jitter_range_ms: defaults::RETRY_JITTER_MS,
            max_reloads_per_attempt: defaults::MAX_RELOADS_PER_ATTEMPT,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_timeout_seconds: defaults::LOGIN_TIMEOUT_SECONDS,
            auth_state_path: None,
            login_endpoint: String::new(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            requests_per_second: defaults::REQUESTS_PER_SECOND,
            request_delay_ms: defaults::REQUEST_DELAY_MS,
            request_jitter_ms: defaults::REQUEST_JITTER_MS,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            depth_endpoint: String::new(),
            page_timeout_seconds: defaults::PAGE_TIMEOUT_SECONDS,
            content_timeout_seconds: defaults::CONTENT_TIMEOUT_SECONDS,
            blocked_resources: defaults::BLOCKED_RESOURCES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            keep_only_latest: defaults::LOG_KEEP_ONLY_LATEST,
            module_filters: HashMap::new(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: defaults::HARVEST_INTERVAL_SECONDS,
            jobs: Vec::new(),
        }
    }
}

impl HarvestConfig {
    /// Resolved sink database URL, defaulting to a SQLite file under the
    /// application data directory
    pub fn resolved_database_url(&self) -> Result<String> {
        if let Some(url) = &self.sink.database_url {
            return Ok(url.clone());
        }
        let data_dir = ConfigManager::get_app_data_dir()?;
        let db_path = data_dir.join("database").join("depth_harvest.db");
        Ok(format!("sqlite:{}", db_path.display()))
    }

    /// Resolved artifact directory, or `None` when capture is disabled
    pub fn resolved_artifact_dir(&self) -> Result<Option<PathBuf>> {
        if !self.artifacts.enabled {
            return Ok(None);
        }
        match &self.artifacts.directory {
            Some(dir) => Ok(Some(dir.clone())),
            None => Ok(Some(ConfigManager::get_app_data_dir()?.join("artifacts"))),
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("depth-harvest");

        Ok(config_dir)
    }

    /// Create a new configuration manager with automatic setup
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        let config_path = config_dir.join("harvest_config.json");

        Ok(Self { config_path })
    }

    /// Initialize configuration system on first run
    pub async fn initialize_on_first_run(&self) -> Result<HarvestConfig> {
        let config_dir = self.config_path.parent()
            .context("Failed to get config directory")?;

        if !config_dir.exists() {
            fs::create_dir_all(config_dir).await
                .context("Failed to create config directory")?;
            info!("✅ Created configuration directory: {:?}", config_dir);
        }

        let is_first_run = !self.config_path.exists();

        if is_first_run {
            info!("🎉 First run detected - initializing default configuration");

            let default_config = HarvestConfig::default();
            self.save_config(&default_config).await?;
            self.create_data_directories().await?;

            info!("✅ Initial configuration setup completed");
            Ok(default_config)
        } else {
            self.load_config().await
        }
    }

    /// Create necessary data directories
    async fn create_data_directories(&self) -> Result<()> {
        let app_data_dir = Self::get_app_data_dir()?;

        let directories = [
            app_data_dir.join("database"),
            app_data_dir.join("logs"),
            app_data_dir.join("artifacts"),
        ];

        for dir in &directories {
            if !dir.exists() {
                fs::create_dir_all(dir).await
                    .with_context(|| format!("Failed to create directory: {:?}", dir))?;
                info!("📁 Created directory: {:?}", dir);
            }
        }

        Ok(())
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join("depth-harvest");

        Ok(data_dir)
    }

    /// Load configuration from file, creating default if it doesn't exist.
    ///
    /// Unknown fields are ignored and missing fields filled from defaults,
    /// so older config files keep loading after upgrades. A file that does
    /// not parse at all is backed up and replaced with defaults.
    pub async fn load_config(&self) -> Result<HarvestConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = HarvestConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path).await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<HarvestConfig>(&content) {
            Ok(config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(parse_error) => {
                tracing::warn!("⚠️  Configuration file unreadable: {}", parse_error);
                tracing::warn!("⚠️  Resetting to default configuration");

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    tracing::warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    tracing::info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = HarvestConfig::default();
                self.save_config(&default_config).await
                    .context("Failed to save default configuration")?;

                tracing::info!("✅ Reset to default configuration");
                Ok(default_config)
            }
        }
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &HarvestConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(config)
            .context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content).await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

/// Environment variable names for login secrets.
///
/// Secrets are read from the environment at login time and never written
/// to the config file.
pub mod secrets {
    /// Login account email/user id
    pub const EMAIL: &str = "HARVEST_EMAIL";

    /// Login account password
    pub const PASSWORD: &str = "HARVEST_PASSWORD";

    /// Secondary verification PIN
    pub const PIN: &str = "HARVEST_PIN";
}

/// Default configuration values
pub mod defaults {
    /// Default number of browser workers
    pub const NUM_WORKERS: usize = 2;

    /// Default concurrency-slot count per worker
    pub const MAX_CONCURRENT_PER_WORKER: usize = 5;

    /// Default retry budget per instrument
    pub const MAX_RETRIES: u32 = 3;

    /// Default base backoff in milliseconds
    pub const RETRY_BASE_DELAY_MS: u64 = 2000;

    /// Default base backoff for rate-limit signals in milliseconds
    pub const RATE_LIMIT_DELAY_MS: u64 = 5000;

    /// Default cap on any computed backoff in milliseconds
    pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

    /// Default backoff jitter range in milliseconds
    pub const RETRY_JITTER_MS: u64 = 250;

    /// Default forced reloads within one attempt
    pub const MAX_RELOADS_PER_ATTEMPT: u32 = 3;

    /// Default bound on one navigation/fetch in seconds
    pub const PAGE_TIMEOUT_SECONDS: u64 = 30;

    /// Default bound on one content wait in seconds
    pub const CONTENT_TIMEOUT_SECONDS: u64 = 10;

    /// Default bound on the post-login observation wait in seconds
    pub const LOGIN_TIMEOUT_SECONDS: u64 = 60;

    /// Default sleep between harvest runs in seconds
    pub const HARVEST_INTERVAL_SECONDS: u64 = 900;

    /// Default token-bucket rate for the HTTP-fetch driver
    pub const REQUESTS_PER_SECOND: u32 = 5;

    /// Default fixed inter-request delay in milliseconds
    pub const REQUEST_DELAY_MS: u64 = 200;

    /// Default inter-request jitter in milliseconds
    pub const REQUEST_JITTER_MS: u64 = 100;

    /// Default sink connection pool size
    pub const DB_MAX_CONNECTIONS: u32 = 5;

    /// Default resource classes the driver should skip loading
    pub const BLOCKED_RESOURCES: &[&str] = &["image", "font", "media", "stylesheet"];

    // Log configuration defaults
    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    /// Default JSON format setting
    pub const LOG_JSON_FORMAT: bool = false;

    /// Default console output setting
    pub const LOG_CONSOLE_OUTPUT: bool = true;

    /// Default file output setting
    pub const LOG_FILE_OUTPUT: bool = true;

    /// Default maximum log files to keep
    pub const LOG_MAX_FILES: u32 = 5;

    /// Default auto cleanup logs setting
    pub const LOG_AUTO_CLEANUP: bool = true;

    /// Default keep only latest setting
    pub const LOG_KEEP_ONLY_LATEST: bool = false;
}
