//! Instrument list loading
//!
//! The file is the engine's instrument source, so ordering, light
//! deduplication, and validation happen here; the engine itself takes
//! the set as given.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::{Instrument, InstrumentSet};

/// Loads an instrument set from a plain text file: one code per line,
/// whitespace trimmed, blank lines and `#` comments skipped. Duplicates
/// keep their first position.
pub async fn load_instrument_file(path: &Path) -> Result<InstrumentSet> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read instrument file: {}", path.display()))?;

    let mut seen = HashSet::new();
    let mut codes = Vec::new();
    for line in content.lines() {
        let code = line.trim();
        if code.is_empty() || code.starts_with('#') {
            continue;
        }
        if seen.insert(code.to_string()) {
            codes.push(Instrument::from(code));
        } else {
            warn!("duplicate instrument {} in {}, keeping first occurrence", code, path.display());
        }
    }

    if codes.is_empty() {
        warn!("instrument file {} contains no codes", path.display());
    } else {
        info!("📋 loaded {} instruments from {}", codes.len(), path.display());
    }

    Ok(InstrumentSet::new(codes))
}
