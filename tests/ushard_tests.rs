// Ushard tiering tests

use std::sync::Arc;

use tyrdbs::io::{MemoryReader, MemoryWriter};
use tyrdbs::ushard::{MAX_TIERS, Ushard, tier_id_of};
use tyrdbs::{Slice, SliceWriter};

fn slice_with(keys: u32) -> Arc<Slice> {
    let mut w = SliceWriter::new(MemoryWriter::new());
    for i in 0..keys {
        w.add(format!("{:08}", i).as_bytes(), b"v", true, false, 0).unwrap();
    }
    w.flush().unwrap();
    let reader = MemoryReader::from(w.commit().unwrap());
    let size = reader.len();
    Arc::new(Slice::open(reader, size).unwrap())
}

// =============================================================================
// Test 1: Slices land in the tier their size calls for
// =============================================================================
#[test]
fn add_places_by_size() {
    let mut shard = Ushard::new(4);
    assert_eq!(shard.add(slice_with(1)), (0, false));
    assert_eq!(shard.add(slice_with(16)), (1, false));
    assert_eq!(shard.add(slice_with(300)), (2, false));
    assert_eq!(shard.add(slice_with(5000)), (tier_id_of(5000), false));
    assert_eq!(shard.slice_count(), 4);
    assert_eq!(shard.key_count(), 1 + 16 + 300 + 5000);
}

#[test]
fn threshold_is_exceeded_not_reached() {
    let mut shard = Ushard::new(4);
    for _ in 0..4 {
        assert!(!shard.add(slice_with(2)).1);
    }
    assert!(!shard.needs_merge(0));
    assert!(shard.add(slice_with(2)).1);
    assert!(shard.needs_merge(0));
}

// =============================================================================
// Test 2: Removal drops the oldest prefix
// =============================================================================
#[test]
fn remove_drops_oldest_first() {
    let mut shard = Ushard::new(2);
    let slices: Vec<_> = (1..=4).map(slice_with).collect();
    for s in &slices {
        shard.add(s.clone());
    }
    assert!(shard.needs_merge(0));

    let snapshot = shard.get_tier(0);
    assert_eq!(snapshot.len(), 4);

    // A newer slice arrives while the merge runs.
    let late = slice_with(5);
    shard.add(late.clone());

    assert!(!shard.remove(0, snapshot.len()));
    let left = shard.get_tier(0);
    assert_eq!(left.len(), 1);
    assert!(Arc::ptr_eq(&left[0], &late));
}

#[test]
fn remove_reports_if_still_over() {
    let mut shard = Ushard::new(1);
    for n in 1..=4 {
        shard.add(slice_with(n));
    }
    assert!(shard.remove(0, 1));
    assert!(!shard.remove(0, 2));
    assert_eq!(shard.tier_len(0), 1);
}

#[test]
fn get_covers_all_tiers() {
    let mut shard = Ushard::new(4);
    shard.add(slice_with(1));
    shard.add(slice_with(100));
    shard.add(slice_with(2));
    let all = shard.get();
    assert_eq!(all.len(), 3);
    // Tier order: both tier-0 slices come first.
    assert_eq!(all[0].key_count(), 1);
    assert_eq!(all[1].key_count(), 2);
    assert_eq!(all[2].key_count(), 100);
    assert!((0..MAX_TIERS).map(|t| shard.tier_len(t)).sum::<usize>() == 3);
}
