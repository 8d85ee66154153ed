//! Sorter configuration and memory sizing.
//!
//! The sorter's whole budget lives in one validated struct. Run-formation
//! sizing reserves room for one stream writer, then binary-searches the
//! largest arena whose index reservation still fits; merge planning divides
//! what is left of the budget among one reader per input run.

use crate::stream::{reader_memory, writer_memory, BLOCK_SIZE};

use super::internal::InternalSorter;

/// External sorter tunables.
///
/// `memory` is the advisory ceiling for the whole sort, covering the run
/// buffer, its index, and every open stream during merges.
#[derive(Clone, Copy, Debug)]
pub struct SorterConfig {
    /// Advisory memory ceiling in bytes.
    pub memory: u64,

    /// Assumed lower bound on a serialized item's size.
    ///
    /// The index reservation is `buffer / min_item_size` slots. A smaller
    /// value reserves index space for more, smaller items and shrinks the
    /// arena accordingly; a larger value is the caller's assertion that
    /// items are big, and under-reserves the index when they are not (the
    /// index then grows past its estimate at push time).
    ///
    /// Default: 8 bytes.
    pub min_item_size: usize,

    /// Block size for run stream buffering.
    ///
    /// The on-disk format stores payload bytes contiguously, so this only
    /// tunes I/O granularity and per-stream memory. Smaller blocks let a
    /// constrained budget merge more runs at once.
    ///
    /// Default: 2 MiB.
    pub block_size: usize,
}

impl SorterConfig {
    /// Defaults with the given memory ceiling.
    #[must_use]
    pub const fn with_memory(memory: u64) -> Self {
        Self {
            memory,
            min_item_size: 8,
            block_size: BLOCK_SIZE,
        }
    }

    /// Validates that the configuration is internally consistent.
    ///
    /// # Panics
    /// Panics if any field is out of range (configuration bug).
    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.memory > 0, "sort memory must be > 0");
        assert!(self.min_item_size > 0, "min item size must be > 0");
        assert!(self.block_size > 0, "block size must be > 0");
        assert!(
            self.block_size <= 1024 * 1024 * 1024,
            "block size > 1GB is unreasonable"
        );
    }

    /// Memory one open run writer costs under this configuration.
    #[must_use]
    pub const fn writer_memory(&self) -> u64 {
        writer_memory(self.block_size)
    }

    /// Memory one open run reader costs under this configuration.
    #[must_use]
    pub const fn reader_memory(&self) -> u64 {
        reader_memory(self.block_size)
    }

    /// Smallest budget under which the sorter can merge at all: one writer
    /// plus two readers of maximal items.
    #[must_use]
    pub fn minimum_sort_memory(&self) -> u64 {
        self.writer_memory() + 2 * self.reader_memory() + MIN_RUN_BUFFER
    }

    /// Sizes the run-formation arena and index for this budget.
    ///
    /// Reserves one writer, then finds the largest buffer `b` such that
    /// `b + ceil(b / min_item_size) * size_of::<usize>()` fits the rest.
    /// Returns `(buffer_bytes, expected_items)`; a degenerate budget yields
    /// a tiny buffer and pushes fail item-too-large instead.
    #[must_use]
    pub fn run_formation_size(&self) -> (usize, usize) {
        let budget = self.memory.saturating_sub(self.writer_memory());
        let fits = |buffer: u64| {
            let items = buffer.div_ceil(self.min_item_size as u64);
            InternalSorter::<u8, fn(&u8, &u8) -> std::cmp::Ordering>::memory_usage(buffer, items)
                <= budget
        };

        let mut lo = 0u64;
        let mut hi = budget;
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if fits(mid) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        let buffer = lo.max(1);
        let items = buffer.div_ceil(self.min_item_size as u64);
        (buffer as usize, items as usize)
    }

    /// Merge fanout for runs whose largest item is `largest_item` bytes.
    ///
    /// One writer is reserved; each merge input costs a reader plus one
    /// buffered item.
    #[must_use]
    pub fn merge_fanout(&self, largest_item: usize) -> u64 {
        let avail = self.memory.saturating_sub(self.writer_memory());
        let per_input = largest_item as u64 + self.reader_memory();
        avail / per_input
    }
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self::with_memory(DEFAULT_SORT_MEMORY)
    }
}

/// Default sort memory when none is configured (128 MiB).
pub const DEFAULT_SORT_MEMORY: u64 = 128 * 1024 * 1024;

/// Floor on the run buffer within `minimum_sort_memory`.
const MIN_RUN_BUFFER: u64 = 64 * 1024;

const _: () = SorterConfig::with_memory(DEFAULT_SORT_MEMORY).validate();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_formation_size_maximizes_buffer() {
        let config = SorterConfig {
            memory: writer_memory(4096) + 30_000,
            min_item_size: 4,
            block_size: 4096,
        };
        // buffer + 8 * buffer/4 = 3 * buffer <= 30000
        let (buffer, items) = config.run_formation_size();
        assert_eq!(buffer, 10_000);
        assert_eq!(items, 2_500);
    }

    #[test]
    fn sizing_honors_the_budget_exactly() {
        for budget in [100u64, 1_000, 65_536, 1_000_000] {
            let config = SorterConfig {
                memory: writer_memory(4096) + budget,
                min_item_size: 8,
                block_size: 4096,
            };
            let (buffer, items) = config.run_formation_size();
            let used =
                buffer as u64 + items as u64 * std::mem::size_of::<usize>() as u64;
            assert!(used <= budget, "{used} > {budget}");
            // One more arena byte would overflow the budget.
            let bigger = buffer as u64 + 1;
            let bigger_items = bigger.div_ceil(8);
            assert!(bigger + bigger_items * 8 > budget);
        }
    }

    #[test]
    fn fanout_counts_reader_overhead() {
        let config = SorterConfig {
            memory: writer_memory(4096) + 30_000,
            min_item_size: 4,
            block_size: 4096,
        };
        let fanout = config.merge_fanout(4);
        assert_eq!(fanout, 30_000 / (4 + reader_memory(4096)));
        assert!(fanout >= 2);
    }

    #[test]
    fn degenerate_budget_still_yields_a_buffer() {
        let config = SorterConfig {
            memory: 1,
            min_item_size: 8,
            block_size: 4096,
        };
        let (buffer, items) = config.run_formation_size();
        assert_eq!(buffer, 1);
        assert_eq!(items, 1);
    }
}
