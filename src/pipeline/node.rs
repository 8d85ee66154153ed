//! The node contract.
//!
//! A node's lifecycle surface ([`Node`]) is object-safe so the planner and
//! executor can hold heterogeneous nodes behind one handle type. Data
//! movement stays monomorphized: a filter owns a typed [`PushHandle`] to
//! its downstream destination and pushes concrete items through it, so no
//! boxing happens per item.
//!
//! Lifecycle order within a phase: `prepare`, memory assignment, `begin`
//! (topological order), the initiator's `go`, `end`. Nodes that can release
//! large buffers after their phase completes report `can_evacuate` and get
//! an `evacuate` call when the next phase does not consume their state
//! directly.

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::NodeError;
use crate::progress::Progress;

use super::tokens::Token;

/// Name priority for structural nodes whose name rarely matters.
pub const NAME_PRIORITY_INSIGNIFICANT: i32 = 0;
/// Name priority for built-in operator names.
pub const NAME_PRIORITY_DEFAULT: i32 = 10;
/// Name priority for caller-assigned names; wins phase naming.
pub const NAME_PRIORITY_USER: i32 = 20;

/// Descriptive and memory metadata every node carries.
#[derive(Clone, Debug)]
pub struct NodeMeta {
    /// Human-readable name; the highest-priority name in a phase names the
    /// phase.
    pub name: String,
    /// Priority of `name` in phase naming.
    pub name_priority: i32,
    /// Nominal share of the phase budget relative to its peers.
    pub memory_fraction: f64,
    /// Bytes below which the node cannot operate.
    pub minimum_memory: u64,
    /// Bytes assigned by the executor for the current run.
    pub available_memory: u64,
}

impl NodeMeta {
    /// Metadata with a name and no memory requirements.
    #[must_use]
    pub fn named(name: impl Into<String>, name_priority: i32) -> Self {
        Self {
            name: name.into(),
            name_priority,
            memory_fraction: 0.0,
            minimum_memory: 0,
            available_memory: 0,
        }
    }

    /// Sets the nominal fraction and minimum memory.
    #[must_use]
    pub fn with_memory(mut self, fraction: f64, minimum: u64) -> Self {
        self.memory_fraction = fraction;
        self.minimum_memory = minimum;
        self
    }
}

/// Object-safe lifecycle surface of a pipeline node.
pub trait Node {
    /// Node metadata.
    fn meta(&self) -> &NodeMeta;

    /// Mutable metadata; the executor writes `available_memory` here.
    fn meta_mut(&mut self) -> &mut NodeMeta;

    /// Called for every node, in topological order, before memory is
    /// assigned.
    fn prepare(&mut self) {}

    /// Called for every node, in topological order, before the phase runs.
    fn begin(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Drives the phase. Only the initiator is called.
    ///
    /// # Panics
    /// The default panics: calling `go` on a non-initiator is a
    /// precondition violation.
    fn go(&mut self, progress: &mut dyn Progress) -> Result<(), NodeError> {
        let _ = progress;
        panic!("go invoked on non-initiator node '{}'", self.meta().name);
    }

    /// Called for every node, in topological order, after the phase runs.
    fn end(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// True if the node can release large buffers once its phase is done.
    fn can_evacuate(&self) -> bool {
        false
    }

    /// Releases large buffers; called only when `can_evacuate` holds.
    fn evacuate(&mut self) {}

    /// Progress steps this node will contribute, summed per phase after
    /// `begin`.
    fn steps(&self) -> u64 {
        0
    }
}

/// Typed receiving end of a push edge.
pub trait PushTarget<T>: Node {
    /// Accepts one item; ownership transfers for the duration of the call.
    fn push(&mut self, item: T) -> Result<(), NodeError>;
}

/// Typed producing end of a pull edge.
pub trait PullSource<T>: Node {
    /// True while items remain.
    fn can_pull(&mut self) -> bool;

    /// Produces the next item.
    fn pull(&mut self) -> Result<T, NodeError>;
}

/// Shared handle to any node's lifecycle surface.
pub type NodeHandle = Rc<RefCell<dyn Node>>;

/// Handle to a node that accepts pushed items of type `T`.
pub struct PushHandle<T> {
    target: Rc<RefCell<dyn PushTarget<T>>>,
    token: Token,
}

impl<T> PushHandle<T> {
    /// Wraps a registered push target and its token.
    #[must_use]
    pub fn new(target: Rc<RefCell<dyn PushTarget<T>>>, token: Token) -> Self {
        Self { target, token }
    }

    /// The target node's token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Pushes one item into the target.
    pub fn push(&self, item: T) -> Result<(), NodeError> {
        self.target.borrow_mut().push(item)
    }
}

/// Handle to a node that produces pulled items of type `T`.
pub struct PullHandle<T> {
    source: Rc<RefCell<dyn PullSource<T>>>,
    token: Token,
}

impl<T> PullHandle<T> {
    /// Wraps a registered pull source and its token.
    #[must_use]
    pub fn new(source: Rc<RefCell<dyn PullSource<T>>>, token: Token) -> Self {
        Self { source, token }
    }

    /// The source node's token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// True while the source has items.
    #[must_use]
    pub fn can_pull(&self) -> bool {
        self.source.borrow_mut().can_pull()
    }

    /// Pulls one item from the source.
    pub fn pull(&self) -> Result<T, NodeError> {
        self.source.borrow_mut().pull()
    }
}

/// Handle to a phase-driving node, the root of a finished pipeline
/// expression.
pub struct InitiatorHandle {
    node: NodeHandle,
    token: Token,
}

impl InitiatorHandle {
    /// Wraps a registered initiator and its token.
    #[must_use]
    pub fn new(node: NodeHandle, token: Token) -> Self {
        Self { node, token }
    }

    /// The initiator's lifecycle handle.
    #[must_use]
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// The initiator's token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }
}

/// Registers a node under its token and returns the owning handle.
///
/// The map keeps only a weak back-reference; the returned `Rc` (and the
/// chain of handles built from it) owns the node.
pub fn register_node<N: Node + 'static>(node: N, token: &Token) -> Rc<RefCell<N>> {
    let rc = Rc::new(RefCell::new(node));
    let as_node: NodeHandle = rc.clone();
    token.map().set_node(token.id(), Rc::downgrade(&as_node));
    rc
}
