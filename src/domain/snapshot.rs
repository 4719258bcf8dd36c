//! # Order-Book Snapshots
//!
//! One point-in-time capture of an instrument's bid/ask ladder, and the
//! normalized row shape the persistence sink accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::instrument::Instrument;

/// Side of the book a price level belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Single-letter code stored in the sink: 'B' for bids, 'A' for asks
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Bid => "B",
            Self::Ask => "A",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One price level within a side of the book.
///
/// `rank` is the 1-based position within its side as reported by the source -
/// ordering only, not a price-time-priority guarantee. Price and size are
/// absent when the source renders a blank cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub side: Side,
    pub rank: u32,
    pub price: Option<i64>,
    pub size: Option<i64>,
}

/// One point-in-time capture of an instrument's bid/ask ladder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub instrument: Instrument,
    pub captured_at: DateTime<Utc>,
    pub levels: Vec<DepthLevel>,
}

impl OrderBookSnapshot {
    #[must_use]
    pub fn new(instrument: Instrument, captured_at: DateTime<Utc>, levels: Vec<DepthLevel>) -> Self {
        Self {
            instrument,
            captured_at,
            levels,
        }
    }

    /// True when at least one bid or ask row was extracted
    #[must_use]
    pub fn has_levels(&self) -> bool {
        !self.levels.is_empty()
    }

    #[must_use]
    pub fn bid_count(&self) -> usize {
        self.levels.iter().filter(|l| l.side == Side::Bid).count()
    }

    #[must_use]
    pub fn ask_count(&self) -> usize {
        self.levels.iter().filter(|l| l.side == Side::Ask).count()
    }

    /// Flattens the ladder into normalized sink rows, preserving level order
    #[must_use]
    pub fn to_rows(&self) -> Vec<DepthRow> {
        self.levels
            .iter()
            .map(|level| DepthRow {
                instrument_code: self.instrument.code().to_string(),
                side: level.side,
                price: level.price,
                size: level.size,
                rank: Some(i64::from(level.rank)),
                captured_at: self.captured_at,
            })
            .collect()
    }
}

/// Normalized row accepted by the persistence sink.
///
/// Append-only; duplicate timestamps across runs are expected, not upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthRow {
    pub instrument_code: String,
    pub side: Side,
    pub price: Option<i64>,
    pub size: Option<i64>,
    pub rank: Option<i64>,
    pub captured_at: DateTime<Utc>,
}
