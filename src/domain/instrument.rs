//! # Instrument Identity
//!
//! Ticker codes and the immutable ordered set of codes a run operates on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tradable stock ticker code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument(String);

impl Instrument {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Instrument {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl From<String> for Instrument {
    fn from(code: String) -> Self {
        Self(code)
    }
}

/// Immutable ordered list of instrument codes for one run.
///
/// Order is preserved for partitioning but carries no other meaning.
/// Deduplication and validation are the loader's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSet {
    codes: Vec<Instrument>,
}

impl InstrumentSet {
    #[must_use]
    pub fn new(codes: Vec<Instrument>) -> Self {
        Self { codes }
    }

    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(|c| Instrument::new(c)).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instrument> {
        self.codes.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Instrument] {
        &self.codes
    }

    #[must_use]
    pub fn contains(&self, instrument: &Instrument) -> bool {
        self.codes.contains(instrument)
    }
}

impl<'a> IntoIterator for &'a InstrumentSet {
    type Item = &'a Instrument;
    type IntoIter = std::slice::Iter<'a, Instrument>;

    fn into_iter(self) -> Self::IntoIter {
        self.codes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_display_roundtrip() {
        let instrument = Instrument::from("BBCA");
        assert_eq!(instrument.code(), "BBCA");
        assert_eq!(instrument.to_string(), "BBCA");
    }

    #[test]
    fn test_instrument_set_preserves_order() {
        let set = InstrumentSet::from_codes(["TLKM", "BBCA", "ASII"]);
        let codes: Vec<&str> = set.iter().map(Instrument::code).collect();
        assert_eq!(codes, vec!["TLKM", "BBCA", "ASII"]);
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_instrument_set_contains() {
        let set = InstrumentSet::from_codes(["TLKM", "BBCA"]);
        assert!(set.contains(&Instrument::from("BBCA")));
        assert!(!set.contains(&Instrument::from("GOTO")));
    }
}
