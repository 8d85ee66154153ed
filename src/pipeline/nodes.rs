//! Built-in pipeline nodes.
//!
//! Constructors compose inside-out: the terminator is built first, each
//! filter wraps the handle of its destination, and the initiator closes the
//! expression. Every constructor allocates a token, joins it with its
//! neighbors' maps, and declares its edges, so the finished expression
//! resolves to one authoritative node map.
//!
//! The sort operator spans two phases: a terminator feeds the external
//! sorter during the first, and an initiator with a depends edge back to it
//! drains the sorted output into the downstream chain during the second.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::errors::NodeError;
use crate::progress::Progress;
use crate::serial::Serial;
use crate::sort::{ExternalSorter, SorterConfig};
use crate::stream::{reader_memory, writer_memory, StreamReader, StreamWriter, BLOCK_SIZE};

use super::node::{
    register_node, InitiatorHandle, Node, NodeMeta, PullHandle, PullSource, PushHandle,
    PushTarget, NAME_PRIORITY_DEFAULT, NAME_PRIORITY_INSIGNIFICANT,
};
use super::tokens::{Relation, Token};

// ---------------------------------------------------------------------------
// Push chain
// ---------------------------------------------------------------------------

/// Initiator pushing the contents of a `Vec` downstream.
struct VecSource<T> {
    meta: NodeMeta,
    items: Vec<T>,
    dest: PushHandle<T>,
}

impl<T> Node for VecSource<T> {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
    fn steps(&self) -> u64 {
        self.items.len() as u64
    }
    fn go(&mut self, progress: &mut dyn Progress) -> Result<(), NodeError> {
        for item in std::mem::take(&mut self.items) {
            self.dest.push(item)?;
            progress.step(1);
        }
        Ok(())
    }
}

/// Creates a push initiator over `items`.
pub fn vec_source<T: 'static>(items: Vec<T>, dest: PushHandle<T>) -> InitiatorHandle {
    let mut token = Token::fresh();
    token.join(dest.token());
    token.declare(Relation::Pushes, dest.token());
    let node = VecSource {
        meta: NodeMeta::named("input", NAME_PRIORITY_DEFAULT),
        items,
        dest,
    };
    let rc = register_node(node, &token);
    InitiatorHandle::new(rc, token)
}

/// Filter applying a function to each pushed item.
struct MapNode<A, B, F> {
    meta: NodeMeta,
    f: F,
    dest: PushHandle<B>,
    _in: PhantomData<fn(A)>,
}

impl<A, B, F> Node for MapNode<A, B, F>
where
    F: FnMut(A) -> B,
{
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
}

impl<A, B, F> PushTarget<A> for MapNode<A, B, F>
where
    F: FnMut(A) -> B,
{
    fn push(&mut self, item: A) -> Result<(), NodeError> {
        let out = (self.f)(item);
        self.dest.push(out)
    }
}

/// Creates a mapping filter in front of `dest`.
pub fn map<A, B, F>(f: F, dest: PushHandle<B>) -> PushHandle<A>
where
    A: 'static,
    B: 'static,
    F: FnMut(A) -> B + 'static,
{
    let mut token = Token::fresh();
    token.join(dest.token());
    token.declare(Relation::Pushes, dest.token());
    let node = MapNode {
        meta: NodeMeta::named("map", NAME_PRIORITY_INSIGNIFICANT),
        f,
        dest,
        _in: PhantomData,
    };
    let rc = register_node(node, &token);
    PushHandle::new(rc, token)
}

/// Filter dropping items that fail a predicate.
struct FilterNode<T, P> {
    meta: NodeMeta,
    pred: P,
    dest: PushHandle<T>,
}

impl<T, P> Node for FilterNode<T, P>
where
    P: FnMut(&T) -> bool,
{
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
}

impl<T, P> PushTarget<T> for FilterNode<T, P>
where
    P: FnMut(&T) -> bool,
{
    fn push(&mut self, item: T) -> Result<(), NodeError> {
        if (self.pred)(&item) {
            self.dest.push(item)?;
        }
        Ok(())
    }
}

/// Creates a predicate filter in front of `dest`.
pub fn filter<T, P>(pred: P, dest: PushHandle<T>) -> PushHandle<T>
where
    T: 'static,
    P: FnMut(&T) -> bool + 'static,
{
    let mut token = Token::fresh();
    token.join(dest.token());
    token.declare(Relation::Pushes, dest.token());
    let node = FilterNode {
        meta: NodeMeta::named("filter", NAME_PRIORITY_INSIGNIFICANT),
        pred,
        dest,
    };
    let rc = register_node(node, &token);
    PushHandle::new(rc, token)
}

/// Filter interleaving a pull chain into a push chain.
///
/// For every pushed item, the item is forwarded and one item is pulled from
/// the side chain and forwarded after it.
struct MergeNode<T> {
    meta: NodeMeta,
    with: PullHandle<T>,
    dest: PushHandle<T>,
}

impl<T> Node for MergeNode<T> {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
}

impl<T> PushTarget<T> for MergeNode<T> {
    fn push(&mut self, item: T) -> Result<(), NodeError> {
        self.dest.push(item)?;
        let side = self.with.pull()?;
        self.dest.push(side)
    }
}

/// Creates a merge of a pull chain into the push chain ending at `dest`.
///
/// The side chain must produce at least as many items as are pushed.
pub fn merge<T: 'static>(with: PullHandle<T>, dest: PushHandle<T>) -> PushHandle<T> {
    let mut token = Token::fresh();
    token.join(dest.token());
    token.declare(Relation::Pushes, dest.token());
    token.join(with.token());
    token.declare(Relation::Pulls, with.token());
    let node = MergeNode {
        meta: NodeMeta::named("merge", NAME_PRIORITY_INSIGNIFICANT),
        with,
        dest,
    };
    let rc = register_node(node, &token);
    PushHandle::new(rc, token)
}

/// Terminator collecting pushed items into a shared `Vec`.
struct VecSink<T> {
    meta: NodeMeta,
    out: Rc<RefCell<Vec<T>>>,
}

impl<T> Node for VecSink<T> {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
}

impl<T> PushTarget<T> for VecSink<T> {
    fn push(&mut self, item: T) -> Result<(), NodeError> {
        self.out.borrow_mut().push(item);
        Ok(())
    }
}

/// Creates a collecting terminator; the second return value receives the
/// output after the pipeline runs.
pub fn vec_sink<T: 'static>() -> (PushHandle<T>, Rc<RefCell<Vec<T>>>) {
    let token = Token::fresh();
    let out = Rc::new(RefCell::new(Vec::new()));
    let node = VecSink {
        meta: NodeMeta::named("output", NAME_PRIORITY_DEFAULT),
        out: out.clone(),
    };
    let rc = register_node(node, &token);
    (PushHandle::new(rc, token), out)
}

// ---------------------------------------------------------------------------
// Stream-backed endpoints
// ---------------------------------------------------------------------------

/// Initiator pushing the items of a stream file downstream.
struct StreamSourceNode<T> {
    meta: NodeMeta,
    path: PathBuf,
    reader: Option<StreamReader>,
    dest: PushHandle<T>,
    _items: PhantomData<fn() -> T>,
}

impl<T: Serial + 'static> Node for StreamSourceNode<T> {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
    fn begin(&mut self) -> Result<(), NodeError> {
        self.reader = Some(StreamReader::open(&self.path)?);
        Ok(())
    }
    fn go(&mut self, progress: &mut dyn Progress) -> Result<(), NodeError> {
        let reader = self.reader.as_mut().expect("stream source begun");
        while reader.can_read() {
            let item = reader.unserialize::<T>()?;
            self.dest.push(item)?;
            progress.step(1);
        }
        Ok(())
    }
    fn end(&mut self) -> Result<(), NodeError> {
        self.reader = None;
        Ok(())
    }
}

/// Creates a push initiator over the stream file at `path`.
pub fn stream_source<T: Serial + 'static>(path: &Path, dest: PushHandle<T>) -> InitiatorHandle {
    let mut token = Token::fresh();
    token.join(dest.token());
    token.declare(Relation::Pushes, dest.token());
    let node = StreamSourceNode {
        meta: NodeMeta::named("read", NAME_PRIORITY_DEFAULT)
            .with_memory(0.0, reader_memory(BLOCK_SIZE)),
        path: path.to_path_buf(),
        reader: None,
        dest,
        _items: PhantomData,
    };
    let rc = register_node(node, &token);
    InitiatorHandle::new(rc, token)
}

/// Terminator writing pushed items to a stream file.
struct StreamSinkNode<T> {
    meta: NodeMeta,
    path: PathBuf,
    writer: Option<StreamWriter>,
    _items: PhantomData<fn(T)>,
}

impl<T: Serial + 'static> Node for StreamSinkNode<T> {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
    fn begin(&mut self) -> Result<(), NodeError> {
        self.writer = Some(StreamWriter::create(&self.path)?);
        Ok(())
    }
    fn end(&mut self) -> Result<(), NodeError> {
        if let Some(mut writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

impl<T: Serial + 'static> PushTarget<T> for StreamSinkNode<T> {
    fn push(&mut self, item: T) -> Result<(), NodeError> {
        let writer = self.writer.as_mut().expect("stream sink begun");
        writer.serialize(&item).map_err(NodeError::from)
    }
}

/// Creates a stream-writing terminator at `path`.
pub fn stream_sink<T: Serial + 'static>(path: &Path) -> PushHandle<T> {
    let token = Token::fresh();
    let node = StreamSinkNode {
        meta: NodeMeta::named("write", NAME_PRIORITY_DEFAULT)
            .with_memory(0.0, writer_memory(BLOCK_SIZE)),
        path: path.to_path_buf(),
        writer: None,
        _items: PhantomData,
    };
    let rc = register_node(node, &token);
    PushHandle::new(rc, token)
}

// ---------------------------------------------------------------------------
// Pull chain
// ---------------------------------------------------------------------------

/// Pull source over a queue of items.
struct PullVecSource<T> {
    meta: NodeMeta,
    items: VecDeque<T>,
}

impl<T> Node for PullVecSource<T> {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
}

impl<T> PullSource<T> for PullVecSource<T> {
    fn can_pull(&mut self) -> bool {
        !self.items.is_empty()
    }
    fn pull(&mut self) -> Result<T, NodeError> {
        self.items
            .pop_front()
            .ok_or_else(|| NodeError::node("pull past end of source"))
    }
}

/// Creates a pull source over `items`.
pub fn pull_vec_source<T: 'static>(items: Vec<T>) -> PullHandle<T> {
    let token = Token::fresh();
    let node = PullVecSource {
        meta: NodeMeta::named("pull input", NAME_PRIORITY_DEFAULT),
        items: items.into(),
    };
    let rc = register_node(node, &token);
    PullHandle::new(rc, token)
}

/// Pull filter applying a function to each pulled item.
struct PullMapNode<A, B, F> {
    meta: NodeMeta,
    f: F,
    source: PullHandle<A>,
    _out: PhantomData<fn() -> B>,
}

impl<A, B, F> Node for PullMapNode<A, B, F>
where
    F: FnMut(A) -> B,
{
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
}

impl<A, B, F> PullSource<B> for PullMapNode<A, B, F>
where
    F: FnMut(A) -> B,
{
    fn can_pull(&mut self) -> bool {
        self.source.can_pull()
    }
    fn pull(&mut self) -> Result<B, NodeError> {
        let item = self.source.pull()?;
        Ok((self.f)(item))
    }
}

/// Creates a mapping pull filter behind `source`.
pub fn pull_map<A, B, F>(f: F, source: PullHandle<A>) -> PullHandle<B>
where
    A: 'static,
    B: 'static,
    F: FnMut(A) -> B + 'static,
{
    let mut token = Token::fresh();
    token.join(source.token());
    token.declare(Relation::Pulls, source.token());
    let node = PullMapNode {
        meta: NodeMeta::named("pull map", NAME_PRIORITY_INSIGNIFICANT),
        f,
        source,
        _out: PhantomData,
    };
    let rc = register_node(node, &token);
    PullHandle::new(rc, token)
}

/// Initiator draining a pull chain into a shared `Vec`.
struct PullVecSink<T> {
    meta: NodeMeta,
    source: PullHandle<T>,
    out: Rc<RefCell<Vec<T>>>,
}

impl<T> Node for PullVecSink<T> {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
    fn go(&mut self, progress: &mut dyn Progress) -> Result<(), NodeError> {
        while self.source.can_pull() {
            let item = self.source.pull()?;
            self.out.borrow_mut().push(item);
            progress.step(1);
        }
        Ok(())
    }
}

/// Creates the pulling initiator that closes a pull chain.
pub fn pull_vec_sink<T: 'static>(
    source: PullHandle<T>,
) -> (InitiatorHandle, Rc<RefCell<Vec<T>>>) {
    let mut token = Token::fresh();
    token.join(source.token());
    token.declare(Relation::Pulls, source.token());
    let out = Rc::new(RefCell::new(Vec::new()));
    let node = PullVecSink {
        meta: NodeMeta::named("pull output", NAME_PRIORITY_DEFAULT),
        source,
        out: out.clone(),
    };
    let rc = register_node(node, &token);
    (InitiatorHandle::new(rc, token), out)
}

// ---------------------------------------------------------------------------
// Sort operator
// ---------------------------------------------------------------------------

type SharedSorter<T, C> = Rc<RefCell<ExternalSorter<T, C>>>;

/// Terminator of the run-formation phase.
struct SortCalc<T, C> {
    meta: NodeMeta,
    sorter: SharedSorter<T, C>,
    // Keeps the output node alive; ownership flows down the chain.
    _output: Rc<RefCell<SortOutput<T, C>>>,
}

impl<T, C> Node for SortCalc<T, C>
where
    T: Serial + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + 'static,
{
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
    fn begin(&mut self) -> Result<(), NodeError> {
        let mut sorter = self.sorter.borrow_mut();
        if self.meta.available_memory > 0 {
            sorter.set_memory(self.meta.available_memory);
        }
        sorter.begin().map_err(NodeError::from)
    }
    fn end(&mut self) -> Result<(), NodeError> {
        self.sorter.borrow_mut().end().map_err(NodeError::from)
    }
    fn can_evacuate(&self) -> bool {
        self.sorter.borrow().can_evacuate()
    }
    fn evacuate(&mut self) {
        self.sorter.borrow_mut().evacuate();
    }
}

impl<T, C> PushTarget<T> for SortCalc<T, C>
where
    T: Serial + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + 'static,
{
    fn push(&mut self, item: T) -> Result<(), NodeError> {
        self.sorter.borrow_mut().push(&item).map_err(NodeError::from)
    }
}

/// Initiator of the drain phase.
struct SortOutput<T, C> {
    meta: NodeMeta,
    sorter: SharedSorter<T, C>,
    dest: PushHandle<T>,
}

impl<T, C> Node for SortOutput<T, C>
where
    T: Serial + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + 'static,
{
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
    fn go(&mut self, progress: &mut dyn Progress) -> Result<(), NodeError> {
        loop {
            let item = {
                let mut sorter = self.sorter.borrow_mut();
                if !sorter.can_pull() {
                    break;
                }
                sorter.pull().map_err(NodeError::from)?
            };
            self.dest.push(item)?;
            progress.step(1);
        }
        Ok(())
    }
}

/// Creates a two-phase external sort in front of `dest`.
///
/// The upstream chain pushes unsorted items in; after the run-formation
/// phase ends, a second phase drains the sorted sequence into `dest`. The
/// sorter's memory ceiling is replaced by the executor's assignment.
pub fn sort_by<T, C>(cmp: C, config: SorterConfig, dest: PushHandle<T>) -> PushHandle<T>
where
    T: Serial + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + 'static,
{
    let sorter: SharedSorter<T, C> =
        Rc::new(RefCell::new(ExternalSorter::new(config, cmp)));

    let mut out_token = Token::fresh();
    out_token.join(dest.token());
    out_token.declare(Relation::Pushes, dest.token());
    let output = SortOutput {
        meta: NodeMeta::named("sort output", NAME_PRIORITY_INSIGNIFICANT)
            .with_memory(0.0, config.reader_memory()),
        sorter: sorter.clone(),
        dest,
    };
    let out_rc = register_node(output, &out_token);

    let mut calc_token = Token::fresh();
    calc_token.join(&out_token);
    out_token.declare(Relation::Depends, &calc_token);
    let calc = SortCalc {
        meta: NodeMeta::named("sort", NAME_PRIORITY_DEFAULT)
            .with_memory(1.0, config.minimum_sort_memory()),
        sorter,
        _output: out_rc,
    };
    let calc_rc = register_node(calc, &calc_token);
    PushHandle::new(calc_rc, calc_token)
}
