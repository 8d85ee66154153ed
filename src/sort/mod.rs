//! External serialization sort.
//!
//! Sorting an arbitrarily large sequence under bounded memory happens in
//! three stages:
//!
//! 1. **Run formation** ([`InternalSorter`]): items are serialized into a
//!    byte arena until it fills; the index is sorted by a comparator that
//!    deserializes on the fly; the sorted run is spilled to a stream file.
//! 2. **Merging** ([`ExternalSorter::end`]): run files are merged in
//!    fanout-sized batches with a binary heap keyed by each input's head
//!    item, until one run remains.
//! 3. **Draining**: `pull` streams the final run back.
//!
//! Memory arithmetic lives in [`SorterConfig`]; all of it is advisory, with
//! the spill files carrying the weight the budget cannot.

mod config;
mod external;
mod internal;

pub use config::{SorterConfig, DEFAULT_SORT_MEMORY};
pub use external::{ExternalSorter, SortStats};
pub use internal::InternalSorter;
