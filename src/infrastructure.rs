//! Infrastructure layer for configuration, persistence, and the concrete
//! extraction/login drivers
//!
//! This module provides the configuration system, logging setup, the
//! SQLite depth store, instrument file loading, and the HTTP-fetch
//! implementations of the driver and login seams.

pub mod auth;  // Concrete login flows
pub mod config;  // Configuration tree, defaults, and ConfigManager
pub mod depth_store;  // SQLite-backed depth sink
pub mod http_fetch;  // HTTP-fetch extraction driver
pub mod instrument_file;  // Instrument list loading
pub mod logging;  // Logging infrastructure

// Re-export commonly used items
pub use auth::{HttpLoginFlow, StoredStateFlow};
pub use config::{ConfigManager, HarvestConfig, defaults, secrets};
pub use depth_store::DepthStore;
pub use http_fetch::{HttpFetchLauncher, HttpFetchSettings};
pub use instrument_file::load_instrument_file;
pub use logging::{get_log_directory, init_logging, init_logging_with_config, log_system_info};
