//! Property tests: sorting yields a non-decreasing permutation, and stream
//! round-trips are bit-faithful.

use std::sync::Arc;

use proptest::prelude::*;

use sluice_rs::stream::writer_memory;
use sluice_rs::{ExternalSorter, SorterConfig, SpaceTracker, StreamReader, StreamWriter};

fn tiny_config() -> SorterConfig {
    // Small enough that a few hundred items spill into multiple runs.
    SorterConfig {
        memory: writer_memory(4096) + 9_000,
        min_item_size: 4,
        block_size: 4096,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sort_is_a_sorted_permutation(mut input in prop::collection::vec(any::<u32>(), 0..3_000)) {
        let tracker = Arc::new(SpaceTracker::new());
        let mut sorter = ExternalSorter::with_space_tracker(
            tiny_config(),
            |a: &u32, b: &u32| a.cmp(b),
            tracker.clone(),
        );
        sorter.begin().unwrap();
        for v in &input {
            sorter.push(v).unwrap();
        }
        sorter.end().unwrap();

        let mut output = Vec::with_capacity(input.len());
        while sorter.can_pull() {
            output.push(sorter.pull().unwrap());
        }
        drop(sorter);

        input.sort_unstable();
        prop_assert_eq!(output, input);
        prop_assert_eq!(tracker.used(), 0);
    }

    #[test]
    fn stream_roundtrip_is_bit_faithful(items in prop::collection::vec(".{0,64}", 0..100)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prop.bin");

        let mut writer = StreamWriter::create_with_block_size(&path, 256).unwrap();
        for item in &items {
            writer.serialize(item).unwrap();
        }
        writer.close().unwrap();

        let mut reader = StreamReader::open_with_block_size(&path, 256).unwrap();
        for item in &items {
            prop_assert!(reader.can_read());
            prop_assert_eq!(&reader.unserialize::<String>().unwrap(), item);
        }
        prop_assert!(!reader.can_read());
    }

    #[test]
    fn pairs_roundtrip(items in prop::collection::vec((any::<u64>(), ".{0,16}"), 0..50)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.bin");

        let mut writer = StreamWriter::create_with_block_size(&path, 64).unwrap();
        for item in &items {
            writer.serialize(item).unwrap();
        }
        writer.close().unwrap();

        let mut reader = StreamReader::open_with_block_size(&path, 64).unwrap();
        for item in &items {
            prop_assert_eq!(&reader.unserialize::<(u64, String)>().unwrap(), item);
        }
        prop_assert!(!reader.can_read());
    }
}
