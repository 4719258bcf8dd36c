//! Domain module - Core value types of the harvesting engine
//!
//! This module contains the data the engine moves around: instrument
//! identity and order-book snapshots. No IO and no policy here - just data
//! and its invariants.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod instrument;
pub mod snapshot;

// Re-export commonly used items for convenience
pub use instrument::{Instrument, InstrumentSet};
pub use snapshot::{DepthLevel, DepthRow, OrderBookSnapshot, Side};
