//! # Work Partitioner
//!
//! Splits the ordered instrument set into contiguous near-equal shards, one
//! per worker. Static assignment, no work stealing: per-instrument cost
//! variance is bounded by the retry budget, so simplicity wins.

use crate::domain::{Instrument, InstrumentSet};

/// One worker's contiguous slice of the instrument set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    pub worker_id: usize,
    pub instruments: Vec<Instrument>,
}

impl ShardAssignment {
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

/// Splits `set` into `num_workers` contiguous shards with size difference
/// at most 1.
///
/// The first `len % num_workers` shards carry the extra instrument. More
/// workers than instruments yields empty tail shards; workers tolerate an
/// empty shard by exiting immediately.
#[must_use]
pub fn partition(set: &InstrumentSet, num_workers: usize) -> Vec<ShardAssignment> {
    if num_workers == 0 {
        return Vec::new();
    }

    let codes = set.as_slice();
    let chunk = codes.len() / num_workers;
    let remainder = codes.len() % num_workers;

    let mut shards = Vec::with_capacity(num_workers);
    let mut offset = 0;
    for worker_id in 0..num_workers {
        let size = chunk + usize::from(worker_id < remainder);
        let instruments = codes[offset..offset + size].to_vec();
        offset += size;
        shards.push(ShardAssignment {
            worker_id,
            instruments,
        });
    }

    shards
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set_of(n: usize) -> InstrumentSet {
        InstrumentSet::from_codes((0..n).map(|i| format!("SYM{i:03}")))
    }

    #[test]
    fn test_three_into_two_splits_two_one() {
        let set = InstrumentSet::from_codes(["AAA", "BBB", "CCC"]);
        let shards = partition(&set, 2);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].len(), 2);
        assert_eq!(shards[1].len(), 1);
        assert_eq!(shards[0].instruments[0].code(), "AAA");
        assert_eq!(shards[1].instruments[0].code(), "CCC");
    }

    #[test]
    fn test_more_workers_than_instruments_yields_empty_tails() {
        let set = set_of(2);
        let shards = partition(&set, 5);
        assert_eq!(shards.len(), 5);
        assert_eq!(shards.iter().filter(|s| !s.is_empty()).count(), 2);
        assert!(shards[2..].iter().all(ShardAssignment::is_empty));
    }

    #[test]
    fn test_empty_set() {
        let shards = partition(&set_of(0), 3);
        assert_eq!(shards.len(), 3);
        assert!(shards.iter().all(ShardAssignment::is_empty));
    }

    #[test]
    fn test_zero_workers() {
        assert!(partition(&set_of(4), 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_shards_partition_exactly(n in 0usize..500, workers in 1usize..16) {
            let set = set_of(n);
            let shards = partition(&set, workers);

            prop_assert_eq!(shards.len(), workers);

            // Concatenation equals the input, in order
            let rejoined: Vec<_> = shards
                .iter()
                .flat_map(|s| s.instruments.iter().cloned())
                .collect();
            prop_assert_eq!(rejoined.as_slice(), set.as_slice());

            // Near-equal: max size minus min size is at most 1
            let sizes: Vec<usize> = shards.iter().map(ShardAssignment::len).collect();
            let max = sizes.iter().copied().max().unwrap_or(0);
            let min = sizes.iter().copied().min().unwrap_or(0);
            prop_assert!(max - min <= 1);
        }
    }
}
