//! Row routing for hash-partitioned exchanges.

use quarry_core::prelude::Value;

/// Bucket in `[0, buckets)` for a key tuple. Equal keys (including `I32` vs
/// `I64` of the same number) always land in the same bucket.
pub fn hash_partition(key: &[Value], buckets: usize) -> usize {
    if buckets <= 1 {
        return 0;
    }
    let mut hasher = blake3::Hasher::new();
    for v in key {
        v.hash_into(&mut hasher);
    }
    let hash = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[0..8]);
    (u64::from_le_bytes(head) % buckets as u64) as usize
}
