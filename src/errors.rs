//! Error types for the stream, sort, and pipelining stages.
//!
//! Errors are stage-specific to keep diagnostics precise and avoid a single
//! monolithic error enum that grows unbounded. All enums are
//! `#[non_exhaustive]` to allow adding variants without breaking callers;
//! consumers should include a fallback match arm.
//!
//! # Design Notes
//! - Variants with `detail` carry human-readable context and are not stable
//!   for machine parsing.
//! - I/O errors preserve their source to keep diagnostics actionable.
//! - Lifecycle misuse (pushing into a drained sorter, running `go` on a
//!   non-initiator) is a programming error and panics rather than returning
//!   an error variant.

use std::fmt;
use std::io;

/// Errors from serialization stream access.
///
/// These cover header validation on open, block I/O failures, and reads past
/// the recorded payload size.
#[derive(Debug)]
#[non_exhaustive]
pub enum StreamError {
    /// I/O error during file operations.
    Io(io::Error),
    /// Header validation failed (bad magic, version, or clean-close state).
    Format { detail: &'static str },
    /// Read past the stream's payload.
    EndOfStream,
}

impl StreamError {
    /// Converts an I/O error, mapping `UnexpectedEof` to `EndOfStream`.
    ///
    /// The serialization traits speak `io::Error`; a short read through them
    /// always means the payload ran out.
    pub fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::EndOfStream
        } else {
            Self::Io(err)
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "stream I/O error: {err}"),
            Self::Format { detail } => write!(f, "{detail}"),
            Self::EndOfStream => write!(f, "read past end of stream"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from external sorting.
///
/// Run formation and merging surface stream failures unchanged; the two
/// sort-specific variants are both fatal for the sort.
#[derive(Debug)]
#[non_exhaustive]
pub enum SortError {
    /// Underlying stream failure while writing or merging runs.
    Stream(StreamError),
    /// I/O error outside the stream layer (scratch directory management).
    Io(io::Error),
    /// A single item does not fit in the run buffer.
    ItemTooLarge { buffer_bytes: usize },
    /// Merge planning found a fanout below two.
    NotEnoughMemoryForMerge { available: u64, required: u64 },
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "sort I/O error: {err}"),
            Self::ItemTooLarge { buffer_bytes } => {
                write!(f, "item does not fit in run buffer of {buffer_bytes} bytes")
            }
            Self::NotEnoughMemoryForMerge {
                available,
                required,
            } => {
                write!(
                    f,
                    "not enough memory to merge runs: have {available} bytes, need {required}"
                )
            }
        }
    }
}

impl std::error::Error for SortError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stream(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StreamError> for SortError {
    fn from(err: StreamError) -> Self {
        Self::Stream(err)
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from phase planning.
///
/// These indicate a malformed pipeline graph and occur before any node has
/// run.
#[derive(Debug)]
#[non_exhaustive]
pub enum PlanError {
    /// Depends edges induce a cycle among phases.
    PhaseCycle { from: usize, to: usize },
    /// A phase has no node free of inbound push/pull edges.
    NoInitiator { phase: String },
    /// The node map contains no live nodes.
    EmptyPipeline,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhaseCycle { from, to } => {
                write!(f, "depends edges form a cycle between phases {from} and {to}")
            }
            Self::NoInitiator { phase } => {
                write!(f, "phase '{phase}' has no initiator")
            }
            Self::EmptyPipeline => write!(f, "pipeline contains no nodes"),
        }
    }
}

impl std::error::Error for PlanError {}

/// Errors surfaced by node operations during pipeline execution.
///
/// Built-in nodes wrap their stream/sort failures; user nodes report through
/// the `Node` variant.
#[derive(Debug)]
#[non_exhaustive]
pub enum NodeError {
    /// External sort failure inside a sort node.
    Sort(SortError),
    /// Stream failure inside a stream-backed node.
    Stream(StreamError),
    /// I/O error from a node's own file handling.
    Io(io::Error),
    /// Failure reported by a user-written node.
    Node { detail: String },
}

impl NodeError {
    /// Creates a user-node error from a message.
    pub fn node(detail: impl Into<String>) -> Self {
        Self::Node {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sort(err) => write!(f, "{err}"),
            Self::Stream(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "node I/O error: {err}"),
            Self::Node { detail } => write!(f, "node error: {detail}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sort(err) => Some(err),
            Self::Stream(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SortError> for NodeError {
    fn from(err: SortError) -> Self {
        Self::Sort(err)
    }
}

impl From<StreamError> for NodeError {
    fn from(err: StreamError) -> Self {
        Self::Stream(err)
    }
}

impl From<io::Error> for NodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from running a pipeline end to end.
#[derive(Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// Planning rejected the graph.
    Plan(PlanError),
    /// A node failed during execution.
    Node(NodeError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan(err) => write!(f, "{err}"),
            Self::Node(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Plan(err) => Some(err),
            Self::Node(err) => Some(err),
        }
    }
}

impl From<PlanError> for PipelineError {
    fn from(err: PlanError) -> Self {
        Self::Plan(err)
    }
}

impl From<NodeError> for PipelineError {
    fn from(err: NodeError) -> Self {
        Self::Node(err)
    }
}
