use std::sync::Arc;

use crate::slice::Slice;

/// Number of size tiers per ushard.
pub const MAX_TIERS: usize = 16;

/// Tier a slice of `key_count` records belongs to: one tier per factor of
/// 16 in size. 0 for an empty slice; the largest slices share the last tier.
pub fn tier_id_of(key_count: u64) -> usize {
    if key_count == 0 {
        return 0;
    }
    let log2 = 63 - key_count.leading_zeros() as usize;
    (log2 >> 2).min(MAX_TIERS - 1)
}

/// One shard of the key space: its slices bucketed by size tier.
///
/// Within a tier slices are kept in insertion order, oldest first, so a
/// merge snapshot is always a prefix of the tier and `remove()` drops that
/// prefix. Not synchronized: the owner holds the shard lock around every
/// call.
pub struct Ushard {
    tiers: Vec<Vec<Arc<Slice>>>,
    max_slices_per_tier: usize,
}

impl Ushard {
    pub fn new(max_slices_per_tier: usize) -> Self {
        Ushard {
            tiers: vec![Vec::new(); MAX_TIERS],
            max_slices_per_tier,
        }
    }

    /// Insert `slice` into the tier its size calls for. Returns that tier
    /// and whether it now needs a merge.
    pub fn add(&mut self, slice: Arc<Slice>) -> (usize, bool) {
        let tier = tier_id_of(slice.key_count());
        self.tiers[tier].push(slice);
        (tier, self.needs_merge(tier))
    }

    /// Drop the first `count` slices of `tier`. Returns whether the tier
    /// still needs a merge.
    pub fn remove(&mut self, tier: usize, count: usize) -> bool {
        let slices = &mut self.tiers[tier];
        slices.drain(..count.min(slices.len()));
        self.needs_merge(tier)
    }

    pub fn needs_merge(&self, tier: usize) -> bool {
        self.tiers[tier].len() > self.max_slices_per_tier
    }

    /// Snapshot of one tier, oldest first.
    pub fn get_tier(&self, tier: usize) -> Vec<Arc<Slice>> {
        self.tiers[tier].clone()
    }

    /// Snapshot of every slice in the shard, tier by tier.
    pub fn get(&self) -> Vec<Arc<Slice>> {
        self.tiers.iter().flatten().cloned().collect()
    }

    pub fn tier_len(&self, tier: usize) -> usize {
        self.tiers[tier].len()
    }

    pub fn slice_count(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }

    pub fn key_count(&self) -> u64 {
        self.tiers.iter().flatten().map(|s| s.key_count()).sum()
    }
}
