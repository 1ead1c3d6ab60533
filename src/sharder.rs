//! Deterministic bucketing.
//!
//! Bucketing maps an identifier string to a bucket value in `[0, MAX_TRAFFIC_VALUE)` and then
//! resolves that value against an ordered list of [`TrafficAllocation`] ranges. Hashing must be
//! bit-for-bit identical across all SDKs sharing the protocol, so neither the hash function nor
//! the key construction rules may change.
use std::io::Cursor;

use crate::config::TrafficAllocation;

/// Exclusive upper bound of bucket values.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

/// Seed used for all bucketing hashes.
pub const BUCKETING_SEED: u32 = 1;

pub trait Sharder {
    /// Hash `input` into a 32-bit unsigned value.
    fn hash(&self, input: &str) -> u32;

    /// Hash `input` and map the result into `[0, MAX_TRAFFIC_VALUE)`.
    fn bucket(&self, input: &str) -> u32 {
        bucket_value(self.hash(input))
    }
}

/// The default (and only) sharder: MurmurHash3 x86_32.
#[derive(Debug, Clone, Copy)]
pub struct Murmur3Sharder {
    seed: u32,
}

impl Murmur3Sharder {
    pub const fn new(seed: u32) -> Murmur3Sharder {
        Murmur3Sharder { seed }
    }
}

impl Default for Murmur3Sharder {
    fn default() -> Self {
        Murmur3Sharder::new(BUCKETING_SEED)
    }
}

impl Sharder for Murmur3Sharder {
    fn hash(&self, input: &str) -> u32 {
        murmur3_32(input.as_bytes(), self.seed)
    }
}

/// MurmurHash3 x86_32 over an in-memory buffer.
pub(crate) fn murmur3_32(input: &[u8], seed: u32) -> u32 {
    // Reading from an in-memory cursor never fails.
    murmur3::murmur3_32(&mut Cursor::new(input), seed).unwrap()
}

/// Map a 32-bit hash into `[0, MAX_TRAFFIC_VALUE)` as `floor(MAX * hash / 2^32)`.
pub fn bucket_value(hash: u32) -> u32 {
    let ratio = f64::from(hash) / 4_294_967_296.0;
    (f64::from(MAX_TRAFFIC_VALUE) * ratio).floor() as u32
}

/// Key used to pick an experiment within a mutually-exclusive group.
pub fn group_bucketing_key(bucketing_id: &str, group_id: &str) -> String {
    format!("{bucketing_id}{group_id}")
}

/// Key used to pick a variation within an experiment (and to gate bandit traffic).
pub fn experiment_bucketing_key(bucketing_id: &str, experiment_id: &str) -> String {
    format!("{bucketing_id}{experiment_id}")
}

/// Find the entity whose range contains `bucket_value`.
///
/// Ranges are scanned in order and the first one with `end_of_range > bucket_value` wins. An
/// empty entity id in the winning range denotes unallocated traffic and yields `None`, as does
/// running past the last range.
pub fn find_bucket(bucket_value: u32, ranges: &[TrafficAllocation]) -> Option<&str> {
    let range = ranges
        .iter()
        .find(|range| bucket_value < range.end_of_range)?;
    if range.entity_id.is_empty() {
        None
    } else {
        Some(&range.entity_id)
    }
}
