use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use tyrdbs::io::{MemoryReader, MemoryWriter};
use tyrdbs::{OverwriteIterator, Slice, SliceWriter, collect_records};

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>),
    Del,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        // Mostly small values, sometimes big enough to span pages.
        4 => prop::collection::vec(any::<u8>(), 0..64).prop_map(Op::Put),
        1 => (0usize..40_000).prop_map(|n| Op::Put(vec![(n % 256) as u8; n])),
        1 => Just(Op::Del),
    ]
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..24)
}

fn write_slice(records: &BTreeMap<Vec<u8>, Op>, tid: u64) -> Arc<Slice> {
    let mut w = SliceWriter::new(MemoryWriter::new());
    for (key, op) in records {
        match op {
            Op::Put(v) => w.add(key, v, true, false, 0).expect("add"),
            Op::Del => w.add(key, b"", true, true, 0).expect("delete"),
        }
    }
    w.flush().expect("flush");
    let reader = MemoryReader::from(w.commit().expect("commit"));
    let size = reader.len();
    Arc::new(Slice::open(reader, size).expect("open").with_tid(tid))
}

fn expected_value(op: &Op) -> (Vec<u8>, bool) {
    match op {
        Op::Put(v) => (v.clone(), false),
        Op::Del => (Vec::new(), true),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn slice_roundtrip_and_ranges(
        records in prop::collection::btree_map(key_strategy(), op_strategy(), 0..300),
        bounds in (key_strategy(), key_strategy()),
    ) {
        let slice = write_slice(&records, 9);
        prop_assert_eq!(slice.key_count(), records.len() as u64);

        let scanned = match slice.begin().expect("begin") {
            Some(mut it) => collect_records(&mut it).expect("scan"),
            None => Vec::new(),
        };
        prop_assert_eq!(scanned.len(), records.len());
        for (record, (key, op)) in scanned.iter().zip(&records) {
            prop_assert_eq!(&record.key, key);
            let (value, deleted) = expected_value(op);
            prop_assert_eq!(&record.value, &value);
            prop_assert_eq!(record.deleted, deleted);
            prop_assert_eq!(record.tid, 9);
        }

        let (min, max) = if bounds.0 <= bounds.1 { bounds } else { (bounds.1, bounds.0) };
        let ranged = match slice.range(&min, &max).expect("range") {
            Some(mut it) => collect_records(&mut it).expect("range scan"),
            None => Vec::new(),
        };
        let expected: Vec<&Vec<u8>> =
            records.range(min.clone()..=max.clone()).map(|(k, _)| k).collect();
        let got: Vec<&Vec<u8>> = ranged.iter().map(|r| &r.key).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn overwrite_matches_last_writer_model(
        batches in prop::collection::vec(
            prop::collection::btree_map(
                prop::collection::vec(0u8..8, 1..3),
                op_strategy(),
                0..20,
            ),
            1..6,
        ),
    ) {
        let mut model: BTreeMap<Vec<u8>, (Vec<u8>, bool, u64)> = BTreeMap::new();
        let mut slices = Vec::new();
        for (i, batch) in batches.iter().enumerate() {
            let tid = i as u64 + 1;
            slices.push(write_slice(batch, tid));
            for (key, op) in batch {
                let (value, deleted) = expected_value(op);
                model.insert(key.clone(), (value, deleted, tid));
            }
        }
        // Source order must not matter.
        slices.reverse();

        let mut it = OverwriteIterator::new(&slices).expect("merge");
        let merged = collect_records(&mut it).expect("merge scan");

        prop_assert_eq!(merged.len(), model.len());
        for (record, (key, (value, deleted, tid))) in merged.iter().zip(&model) {
            prop_assert_eq!(&record.key, key);
            prop_assert_eq!(&record.value, value);
            prop_assert_eq!(record.deleted, *deleted);
            prop_assert_eq!(record.tid, *tid);
        }
    }
}
