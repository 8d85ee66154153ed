//! Out-of-core data processing with bounded memory and explicit budgets.
//!
//! Two subsystems carry the weight:
//! - An **external serialization sort**: items are serialized into an
//!   in-memory run, sorted runs spill to a block-structured stream format,
//!   and a heap-based k-way merge reduces them to one sorted run under an
//!   advisory memory ceiling.
//! - A **pipelining runtime**: a dataflow graph of nodes joined by push,
//!   pull, and depends edges, partitioned into topologically ordered
//!   phases, each memory-budgeted and driven by its initiator with
//!   per-phase progress reporting.
//!
//! Sort flow: push -> run former (arena + sorted offsets) -> run files ->
//! fanout-batched merges -> pull.
//!
//! Pipeline flow: compose nodes bottom-up (maps union) -> plan phases
//! (components under push/pull, ordered by depends) -> per phase: assign
//! memory, begin, go, end, evacuate predecessors when nothing downstream
//! reads them.
//!
//! The stream layer underneath both ([`stream`]) stores payload bytes as
//! contiguous blocks behind a validated header with a clean-close bit;
//! readers reject interrupted streams unless asked not to.

pub mod block_io;
pub mod errors;
pub mod memory;
pub mod pipeline;
pub mod progress;
pub mod serial;
pub mod sort;
pub mod stdx;
pub mod stream;

pub use block_io::{BlockFile, CacheHint};
pub use errors::{NodeError, PipelineError, PlanError, SortError, StreamError};
pub use memory::{global_memory, temp_space, MemoryManager, SpaceTracker};
pub use pipeline::Pipeline;
pub use progress::{FractionalProgress, NullProgress, Progress};
pub use serial::{Serial, Sink, SliceSource, Source};
pub use sort::{ExternalSorter, InternalSorter, SortStats, SorterConfig};
pub use stream::{RwStream, StreamHeader, StreamReader, StreamWriter, BLOCK_SIZE};
