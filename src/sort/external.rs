//! External sorting over serialization streams.
//!
//! The sorter fills an in-memory run, spills each sorted run to its own
//! numbered stream file in a private scratch directory, then merges runs in
//! fanout-sized batches with a binary heap until exactly one sorted run
//! remains, which `pull` drains lazily.
//!
//! # Lifecycle
//! `Idle -> RunForming -> Merging -> Draining`. `begin` enters run
//! formation; `push` is legal only there; `end` merges and enters draining;
//! `pull`/`can_pull` are legal only while draining. Calls out of order are
//! precondition violations and panic.
//!
//! # Resources
//! Run files live under a unique scratch directory owned by the sorter and
//! are deleted as soon as a merge consumes them. Dropping the sorter removes
//! every remaining file and returns its bytes to the space tracker, so
//! accounted temp space goes back to zero even after a failure mid-sort.

use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tracing::debug;

use crate::errors::{SortError, StreamError};
use crate::memory::{temp_space, SpaceTracker};
use crate::serial::Serial;
use crate::stdx::CmpHeap;
use crate::stream::{StreamReader, StreamWriter};

use super::config::SorterConfig;
use super::internal::InternalSorter;

/// Sort lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SortState {
    Idle,
    RunForming,
    Merging,
    Draining,
}

/// Counters describing one sort.
#[derive(Clone, Copy, Debug, Default)]
pub struct SortStats {
    /// Items accepted by `push`.
    pub items: u64,
    /// Sorted runs written during run formation.
    pub runs_formed: u64,
    /// Merge passes over the run set.
    pub merge_passes: u64,
    /// Total bytes written to scratch files, merge outputs included.
    pub bytes_spilled: u64,
}

struct RunFile {
    path: PathBuf,
    bytes: u64,
}

/// Memory-bounded external sorter.
///
/// `T` is the item type; `C` is a strict-weak-order comparator. The output
/// is a non-decreasing permutation of the input under `C`; ties break
/// arbitrarily.
pub struct ExternalSorter<T, C> {
    config: SorterConfig,
    cmp: C,
    state: SortState,
    former: Option<InternalSorter<T, C>>,
    scratch: Option<TempDir>,
    runs: Vec<RunFile>,
    next_run_index: u64,
    largest_item: usize,
    reader: Option<StreamReader>,
    stats: SortStats,
    tracker: Arc<SpaceTracker>,
}

impl<T, C> ExternalSorter<T, C>
where
    T: Serial,
    C: Fn(&T, &T) -> Ordering + Clone,
{
    /// Creates a sorter accounting against the process-wide space tracker.
    ///
    /// # Panics
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn new(config: SorterConfig, cmp: C) -> Self {
        Self::with_space_tracker(config, cmp, temp_space())
    }

    /// Creates a sorter with an explicit space tracker (tests inject their
    /// own to observe accounting in isolation).
    #[must_use]
    pub fn with_space_tracker(config: SorterConfig, cmp: C, tracker: Arc<SpaceTracker>) -> Self {
        config.validate();
        Self {
            config,
            cmp,
            state: SortState::Idle,
            former: None,
            scratch: None,
            runs: Vec::new(),
            next_run_index: 0,
            largest_item: 0,
            reader: None,
            stats: SortStats::default(),
            tracker,
        }
    }

    /// Replaces the memory ceiling before the sort begins.
    ///
    /// The pipelining executor calls this with the node's assigned budget.
    pub fn set_memory(&mut self, bytes: u64) {
        assert!(
            self.state == SortState::Idle,
            "set_memory after begin"
        );
        self.config.memory = bytes;
    }

    /// Enters run formation: allocates the run buffer and scratch directory.
    pub fn begin(&mut self) -> Result<(), SortError> {
        assert!(self.state == SortState::Idle, "begin called twice");
        let (buffer, expected_items) = self.config.run_formation_size();
        self.former = Some(InternalSorter::new(buffer, expected_items, self.cmp.clone()));
        self.scratch = Some(
            tempfile::Builder::new()
                .prefix("sluice-sort-")
                .tempdir()?,
        );
        self.state = SortState::RunForming;
        debug!(buffer, expected_items, "external sort began");
        Ok(())
    }

    /// Adds one item to the sort.
    ///
    /// # Errors
    /// `SortError::ItemTooLarge` if the item does not fit even in an empty
    /// run buffer.
    ///
    /// # Panics
    /// Panics unless the sorter is between `begin` and `end`.
    pub fn push(&mut self, item: &T) -> Result<(), SortError> {
        assert!(
            self.state == SortState::RunForming,
            "push outside run formation"
        );
        let former = self.former.as_mut().expect("run former present");
        if former.push(item) {
            self.stats.items += 1;
            return Ok(());
        }
        self.end_run()?;
        let former = self.former.as_mut().expect("run former present");
        if former.push(item) {
            self.stats.items += 1;
            Ok(())
        } else {
            Err(SortError::ItemTooLarge {
                buffer_bytes: self.config.run_formation_size().0,
            })
        }
    }

    /// Finishes input, merges runs down to one, and enters draining.
    ///
    /// # Errors
    /// `SortError::NotEnoughMemoryForMerge` when more than one run exists
    /// and the budget cannot hold two merge inputs plus the output writer.
    pub fn end(&mut self) -> Result<(), SortError> {
        assert!(
            self.state == SortState::RunForming,
            "end outside run formation"
        );
        self.state = SortState::Merging;
        self.end_run()?;
        self.former = None;

        if self.runs.len() > 1 {
            let fanout = self.config.merge_fanout(self.largest_item);
            if fanout < 2 {
                return Err(SortError::NotEnoughMemoryForMerge {
                    available: self.config.memory,
                    required: self.config.writer_memory()
                        + 2 * (self.largest_item as u64 + self.config.reader_memory()),
                });
            }
            while self.runs.len() > 1 {
                debug!(
                    runs = self.runs.len(),
                    fanout, "merging sorted runs"
                );
                let current = std::mem::take(&mut self.runs);
                let mut pending = current.into_iter().peekable();
                while pending.peek().is_some() {
                    let batch: Vec<RunFile> =
                        pending.by_ref().take(fanout as usize).collect();
                    if batch.len() == 1 {
                        self.runs.extend(batch);
                        continue;
                    }
                    self.merge_batch(batch)?;
                }
                self.stats.merge_passes += 1;
            }
        }
        self.state = SortState::Draining;
        Ok(())
    }

    /// True while sorted output remains.
    ///
    /// # Panics
    /// Panics unless `end` has completed.
    #[must_use]
    pub fn can_pull(&self) -> bool {
        assert!(
            self.state == SortState::Draining,
            "can_pull before end"
        );
        match &self.reader {
            Some(reader) => reader.can_read(),
            None => !self.runs.is_empty(),
        }
    }

    /// Reads the next item of the sorted output.
    ///
    /// The reader over the final run is opened on the first call.
    ///
    /// # Panics
    /// Panics unless `end` has completed.
    pub fn pull(&mut self) -> Result<T, SortError> {
        assert!(self.state == SortState::Draining, "pull before end");
        if self.reader.is_none() {
            let run = self.runs.first().ok_or(SortError::Stream(StreamError::EndOfStream))?;
            self.reader = Some(StreamReader::open_with_block_size(
                &run.path,
                self.config.block_size,
            )?);
        }
        let reader = self.reader.as_mut().expect("drain reader open");
        reader.unserialize::<T>().map_err(SortError::from)
    }

    /// Counters for the sort so far.
    #[must_use]
    pub fn stats(&self) -> SortStats {
        self.stats
    }

    /// Run files currently on disk.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// True when buffers have already been surrendered to disk.
    ///
    /// The executor evacuates completed phases through this pair; after
    /// `end` all state is on disk until draining opens its reader.
    #[must_use]
    pub fn can_evacuate(&self) -> bool {
        self.state == SortState::Draining && self.reader.is_none()
    }

    /// Releases in-memory buffers; all runs already live on disk.
    pub fn evacuate(&mut self) {
        debug_assert!(self.can_evacuate(), "evacuate while buffers are live");
        debug!("sorter evacuated between phases");
    }

    /// Sorts the current run and spills it to a numbered run file.
    fn end_run(&mut self) -> Result<(), SortError> {
        {
            let former = self.former.as_mut().expect("run former present");
            former.sort();
            if former.is_empty() {
                return Ok(());
            }
        }

        let index = self.next_run_index;
        self.next_run_index += 1;
        let path = self.run_path(index);
        let mut writer =
            StreamWriter::create_with_block_size(&path, self.config.block_size)?;

        let former = self.former.as_mut().expect("run former present");
        let mut items = 0u64;
        while former.can_pull() {
            let item = former.pull();
            writer.serialize(&item)?;
            items += 1;
        }
        writer.close()?;
        let bytes = writer.file_size();
        let largest = former.largest_item();
        former.reset();

        self.largest_item = self.largest_item.max(largest);
        self.tracker.add(bytes);
        self.stats.runs_formed += 1;
        self.stats.bytes_spilled += bytes;
        debug!(index, items, bytes, "sorted run spilled");
        self.runs.push(RunFile { path, bytes });
        Ok(())
    }

    /// Merges one batch of runs into a new run, deleting the inputs.
    fn merge_batch(&mut self, batch: Vec<RunFile>) -> Result<(), SortError> {
        let index = self.next_run_index;
        self.next_run_index += 1;
        let out_path = self.run_path(index);
        let block_size = self.config.block_size;

        let mut writer = StreamWriter::create_with_block_size(&out_path, block_size)?;
        let mut readers = Vec::with_capacity(batch.len());
        for run in &batch {
            readers.push(StreamReader::open_with_block_size(&run.path, block_size)?);
        }

        // The heap is keyed by the head item of each input; ties break by
        // run index so the merge is deterministic.
        let cmp = &self.cmp;
        let mut heap_cmp = |a: &MergeEntry<T>, b: &MergeEntry<T>| {
            cmp(&a.item, &b.item).then_with(|| a.source.cmp(&b.source))
        };
        let mut heap = CmpHeap::with_capacity(readers.len());
        for (source, reader) in readers.iter_mut().enumerate() {
            if reader.can_read() {
                let item = reader.unserialize::<T>()?;
                heap.push(MergeEntry { item, source }, &mut heap_cmp);
            }
        }
        while let Some(entry) = heap.pop(&mut heap_cmp) {
            writer.serialize(&entry.item)?;
            let reader = &mut readers[entry.source];
            if reader.can_read() {
                let item = reader.unserialize::<T>()?;
                heap.push(
                    MergeEntry {
                        item,
                        source: entry.source,
                    },
                    &mut heap_cmp,
                );
            }
        }

        writer.close()?;
        let bytes = writer.file_size();
        drop(readers);
        for run in &batch {
            fs::remove_file(&run.path)?;
            self.tracker.sub(run.bytes);
        }
        self.tracker.add(bytes);
        self.stats.bytes_spilled += bytes;
        self.runs.push(RunFile {
            path: out_path,
            bytes,
        });
        Ok(())
    }

    fn run_path(&self, index: u64) -> PathBuf {
        self.scratch
            .as_ref()
            .expect("scratch directory present")
            .path()
            .join(format!("{index}.bin"))
    }
}

struct MergeEntry<T> {
    item: T,
    source: usize,
}

impl<T, C> Drop for ExternalSorter<T, C> {
    fn drop(&mut self) {
        // Close the drain reader before unlinking its file.
        self.reader = None;
        for run in self.runs.drain(..) {
            let _ = fs::remove_file(&run.path);
            self.tracker.sub(run.bytes);
        }
        // The scratch TempDir removes the directory itself.
    }
}
