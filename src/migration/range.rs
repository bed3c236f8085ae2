//! Parallel scans over contiguous slices of the iterator-key space.

use log::debug;
use num_bigint::BigUint;
use num_traits::One;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{MigrationError, MigrationResult};
use crate::zk::{LeafNode, MerkleTree};

/// Inclusive range of iterator keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRange {
    pub start: [u8; 32],
    pub end: [u8; 32],
}

impl HashRange {
    pub fn contains(&self, key: &[u8; 32]) -> bool {
        *key >= self.start && *key <= self.end
    }
}

/// Split `[0, 2^256)` into `n` contiguous ranges of equal width. The last
/// range ends at `2^256 - 1`.
pub fn split_ranges(n: usize) -> Vec<HashRange> {
    let n = n.max(1);
    let space = BigUint::one() << 256usize;
    let max = &space - BigUint::one();
    let count = BigUint::from(n);
    let step = (&space + &count - BigUint::one()) / &count;

    let mut ranges = Vec::with_capacity(n);
    let mut start = BigUint::default();
    while start <= max && ranges.len() < n {
        let mut end = &start + &step - BigUint::one();
        if end > max || ranges.len() + 1 == n {
            end = max.clone();
        }
        ranges.push(HashRange {
            start: to_word(&start),
            end: to_word(&end),
        });
        start = end + BigUint::one();
    }
    ranges
}

fn to_word(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    word
}

/// Visit every leaf of `tree` with `n` concurrent range workers.
///
/// `on_leaf` receives the iterator key and the leaf. The first error, or
/// cancellation of `cancel`, stops all workers and is returned.
pub fn hash_range_iterator<F>(
    tree: &MerkleTree,
    n: usize,
    cancel: &CancellationToken,
    on_leaf: F,
) -> MigrationResult<()>
where
    F: Fn(&[u8; 32], &LeafNode) -> MigrationResult<()> + Sync,
{
    let ranges = split_ranges(n);
    let stop = AtomicBool::new(false);
    let first_error: Mutex<Option<MigrationError>> = Mutex::new(None);

    let fail = |e: MigrationError| {
        stop.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = first_error.lock() {
            if slot.is_none() {
                *slot = Some(e);
            }
        }
    };

    ranges.par_iter().for_each(|range| {
        for item in tree.iter_from(&range.start) {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if cancel.is_cancelled() {
                fail(MigrationError::Cancelled);
                return;
            }
            let (key, leaf) = match item {
                Ok(item) => item,
                Err(e) => {
                    fail(e.into());
                    return;
                }
            };
            if key > range.end {
                break;
            }
            if let Err(e) = on_leaf(&key, &leaf) {
                fail(e);
                return;
            }
        }
        debug!("Finished range {}..{}", hex::encode(&range.start[..4]), hex::encode(&range.end[..4]));
    });

    let error = match first_error.into_inner() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
