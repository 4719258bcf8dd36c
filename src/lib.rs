//! Depth Harvest - Concurrent Order-Book Depth Harvesting Engine
//!
//! Harvests real-time order-book depth (bid/ask price-volume ladders) for a
//! configurable set of stock instruments from authenticated, rate-limited web
//! sources on a recurring schedule, and writes normalized rows to a
//! relational sink for downstream analytics.

// Module declarations
pub mod domain;
pub mod harvesting;
pub mod infrastructure;

// Re-export the engine surface for binaries and integration tests
pub use domain::{Instrument, InstrumentSet, OrderBookSnapshot, Side};
pub use harvesting::{
    ExtractError, HarvestRunner, RetryPolicy, RunResult, SessionManager,
};
pub use infrastructure::{ConfigManager, HarvestConfig};
