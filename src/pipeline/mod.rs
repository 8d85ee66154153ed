//! Phase-scheduled pipelining runtime.
//!
//! A pipeline is a dataflow graph of nodes connected by push, pull, and
//! depends edges. Construction is bottom-up: node constructors union their
//! node maps ([`tokens`]) so a finished expression resolves to one
//! authority. Planning ([`graph`]) partitions nodes into phases, orders
//! them, and decides evacuation; execution ([`runner`]) budgets memory,
//! runs the begin/go/end lifecycle, and fans progress out per phase.
//!
//! Within one run everything is single-threaded and cooperative: the
//! initiator's `go` drives every other node through direct push and pull
//! calls, and the node map is read-only once execution starts.

pub mod graph;
pub mod node;
pub mod nodes;
pub mod runner;
pub mod tokens;

use std::io::Write;

use crate::errors::{PipelineError, PlanError};
use crate::memory::global_memory;
use crate::progress::{NullProgress, Progress};

pub use graph::{Phase, PhasePlan};
pub use node::{
    register_node, InitiatorHandle, Node, NodeHandle, NodeMeta, PullHandle, PullSource,
    PushHandle, PushTarget, NAME_PRIORITY_DEFAULT, NAME_PRIORITY_INSIGNIFICANT,
    NAME_PRIORITY_USER,
};
pub use nodes::{
    filter, map, merge, pull_map, pull_vec_sink, pull_vec_source, sort_by, stream_sink,
    stream_source, vec_sink, vec_source,
};
pub use tokens::{NodeId, NodeMap, Relation, Token};

/// A complete pipeline expression, ready to run.
///
/// The pipeline owns its nodes through the initiator's handle chain; the
/// node map holds only weak back-references. Nodes registered outside that
/// chain must be kept alive by the caller for the duration of `run`.
pub struct Pipeline {
    root: InitiatorHandle,
}

impl Pipeline {
    /// Wraps a finished expression rooted at `initiator`.
    #[must_use]
    pub fn new(initiator: InitiatorHandle) -> Self {
        Self { root: initiator }
    }

    /// The root initiator handle.
    #[must_use]
    pub fn root(&self) -> &InitiatorHandle {
        &self.root
    }

    /// Plans this pipeline's phases without running them.
    pub fn plan(&self) -> Result<PhasePlan, PlanError> {
        PhasePlan::build(&self.root.token().map())
    }

    /// Runs the pipeline.
    ///
    /// `items` is the nominal item count used to weight progress; `memory`
    /// is the per-phase budget in bytes.
    pub fn run(
        &mut self,
        items: u64,
        progress: &mut dyn Progress,
        memory: u64,
    ) -> Result<(), PipelineError> {
        let map = self.root.token().map();
        let plan = PhasePlan::build(&map)?;
        runner::run_plan(&map, &plan, items, progress, memory)
    }

    /// Runs with no progress reporting and the process memory manager's
    /// advisory budget.
    pub fn run_default(&mut self, items: u64) -> Result<(), PipelineError> {
        let mut progress = NullProgress;
        self.run(items, &mut progress, global_memory().available_bytes())
    }

    /// Writes the node graph as a GraphViz digraph.
    ///
    /// Push edges are solid, pull edges dashed, depends edges dotted.
    pub fn plot<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let map = self.root.token().map();
        writeln!(out, "digraph pipeline {{")?;
        for id in map.node_ids() {
            let name = map
                .get_node(id)
                .map(|node| node.borrow().meta().name.clone())
                .unwrap_or_else(|| String::from("?"));
            writeln!(out, "  n{id} [label=\"{name}\"];")?;
        }
        for (from, to, relation) in map.relations() {
            let style = match relation {
                Relation::Pushes => "solid",
                Relation::Pulls => "dashed",
                Relation::Depends => "dotted",
            };
            writeln!(out, "  n{from} -> n{to} [style={style}];")?;
        }
        writeln!(out, "}}")
    }
}
