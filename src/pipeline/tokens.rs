//! Node identity and the union-find of node maps.
//!
//! Pipelines are composed bottom-up from independently constructed
//! sub-expressions, each carrying its own node map. Composition unions the
//! maps, relocating the loser's id-to-node entries and relation edges into
//! the winner and leaving an authority pointer behind. By the time a
//! pipeline is complete, every token in it resolves to one authoritative
//! map holding the whole graph.
//!
//! The map stores only weak back-references: nodes are owned by the
//! pipeline (through the chain of handles the constructors build), never by
//! the map.
//!
//! # Invariants
//! - An authority pointer is never a self-loop (identity is checked before
//!   linking).
//! - Node ids are unique process-wide.
//! - Relation edges live in the authoritative map once composition is done.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::node::Node;

/// Stable node identity, unique within the process.
pub type NodeId = u64;

/// Edge kinds between nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// `from` pushes items into `to`; joins them into one phase.
    Pushes,
    /// `from` pulls items out of `to`; joins them into one phase.
    Pulls,
    /// `from`'s phase must run after `to`'s phase.
    Depends,
}

fn next_node_id() -> NodeId {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

struct MapInner {
    nodes: BTreeMap<NodeId, Weak<RefCell<dyn Node>>>,
    relations: Vec<(NodeId, NodeId, Relation)>,
    authority: Option<NodeMap>,
    rank: u32,
}

/// Shared, unionable map from node ids to node handles and relations.
#[derive(Clone)]
pub struct NodeMap {
    inner: Rc<RefCell<MapInner>>,
}

impl NodeMap {
    /// Creates an empty map that is its own authority.
    #[must_use]
    pub fn create() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MapInner {
                nodes: BTreeMap::new(),
                relations: Vec::new(),
                authority: None,
                rank: 0,
            })),
        }
    }

    /// True if both handles refer to the same map object.
    #[must_use]
    pub fn same(&self, other: &NodeMap) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves the authoritative map, compressing the path walked.
    #[must_use]
    pub fn find_authority(&self) -> NodeMap {
        let mut root = self.clone();
        loop {
            let next = root.inner.borrow().authority.clone();
            match next {
                Some(map) => root = map,
                None => break,
            }
        }

        let mut cur = self.clone();
        while !cur.same(&root) {
            let next = {
                let mut inner = cur.inner.borrow_mut();
                let next = inner.authority.clone();
                inner.authority = Some(root.clone());
                next
            };
            match next {
                Some(map) => cur = map,
                None => break,
            }
        }
        root
    }

    /// Unions the sets containing `self` and `other`.
    pub fn union_with(&self, other: &NodeMap) {
        self.find_authority().link(&other.find_authority());
    }

    /// Links two authoritative maps by rank, moving the loser's contents.
    fn link(&self, other: &NodeMap) {
        if self.same(other) {
            // A map must never become its own authority.
            return;
        }
        let (self_rank, other_rank) =
            (self.inner.borrow().rank, other.inner.borrow().rank);
        if other_rank > self_rank {
            other.link(self);
            return;
        }

        let mut loser = other.inner.borrow_mut();
        let mut winner = self.inner.borrow_mut();
        let nodes = std::mem::take(&mut loser.nodes);
        winner.nodes.extend(nodes);
        let mut relations = std::mem::take(&mut loser.relations);
        winner.relations.append(&mut relations);
        loser.authority = Some(self.clone());
        if other_rank == self_rank {
            winner.rank += 1;
        }
    }

    /// Associates `id` with a node handle in the authoritative map.
    pub fn set_node(&self, id: NodeId, node: Weak<RefCell<dyn Node>>) {
        self.find_authority().inner.borrow_mut().nodes.insert(id, node);
    }

    /// Resolves a node id to a live handle.
    #[must_use]
    pub fn get_node(&self, id: NodeId) -> Option<Rc<RefCell<dyn Node>>> {
        self.find_authority()
            .inner
            .borrow()
            .nodes
            .get(&id)
            .and_then(Weak::upgrade)
    }

    /// Records a relation edge in the authoritative map.
    pub fn add_relation(&self, from: NodeId, to: NodeId, relation: Relation) {
        self.find_authority()
            .inner
            .borrow_mut()
            .relations
            .push((from, to, relation));
    }

    /// Node ids known to the authoritative map, ascending.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.find_authority()
            .inner
            .borrow()
            .nodes
            .keys()
            .copied()
            .collect()
    }

    /// Snapshot of the authoritative map's relation edges.
    #[must_use]
    pub fn relations(&self) -> Vec<(NodeId, NodeId, Relation)> {
        self.find_authority().inner.borrow().relations.clone()
    }
}

/// A node's identity plus a handle on its (possibly superseded) map.
///
/// A fresh token owns a one-element map; joining tokens during composition
/// unions the maps so the finished expression sees a single authority.
#[derive(Clone)]
pub struct Token {
    map: NodeMap,
    id: NodeId,
}

impl Token {
    /// Allocates an id in a fresh one-element map.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            map: NodeMap::create(),
            id: next_node_id(),
        }
    }

    /// This token's node id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The authoritative map this token currently belongs to.
    #[must_use]
    pub fn map(&self) -> NodeMap {
        self.map.find_authority()
    }

    /// Unions this token's map with another's and returns the authority.
    pub fn join(&mut self, other: &Token) -> NodeMap {
        if !self.map.same(&other.map) {
            self.map.union_with(&other.map);
        }
        let authority = self.map.find_authority();
        self.map = authority.clone();
        authority
    }

    /// Declares a relation edge from this node to `to`.
    ///
    /// Call `join` first; the edge lands in the shared authority.
    pub fn declare(&self, relation: Relation, to: &Token) {
        self.map().add_relation(self.id, to.id(), relation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NodeError;
    use crate::pipeline::node::{register_node, Node, NodeMeta};
    use crate::progress::Progress;

    struct Dummy {
        meta: NodeMeta,
    }

    impl Dummy {
        fn new(name: &str) -> Self {
            Self {
                meta: NodeMeta::named(name, 0),
            }
        }
    }

    impl Node for Dummy {
        fn meta(&self) -> &NodeMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut NodeMeta {
            &mut self.meta
        }
        fn go(&mut self, _progress: &mut dyn Progress) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[test]
    fn fresh_tokens_have_unique_ids() {
        let a = Token::fresh();
        let b = Token::fresh();
        assert_ne!(a.id(), b.id());
        assert!(!a.map().same(&b.map()));
    }

    #[test]
    fn join_unifies_the_authority() {
        let mut a = Token::fresh();
        let b = Token::fresh();
        let authority = a.join(&b);
        assert!(a.map().same(&authority));
        assert!(b.map().same(&authority));
    }

    #[test]
    fn join_same_map_is_noop() {
        let mut a = Token::fresh();
        let b = Token::fresh();
        a.join(&b);
        let before = a.map();
        a.join(&b);
        assert!(a.map().same(&before));
    }

    #[test]
    fn contents_move_to_the_winner() {
        let mut a = Token::fresh();
        let b = Token::fresh();
        let _node_a = register_node(Dummy::new("a"), &a);
        let _node_b = register_node(Dummy::new("b"), &b);
        a.declare(Relation::Pushes, &a);

        let authority = a.join(&b);
        let ids = authority.node_ids();
        assert!(ids.contains(&a.id()));
        assert!(ids.contains(&b.id()));
        assert_eq!(authority.relations().len(), 1);
    }

    #[test]
    fn chained_unions_resolve_transitively() {
        let mut a = Token::fresh();
        let mut b = Token::fresh();
        let mut c = Token::fresh();
        let d = Token::fresh();

        a.join(&b);
        c.join(&d);
        b.join(&c);

        let authority = a.map();
        assert!(b.map().same(&authority));
        assert!(c.map().same(&authority));
        assert!(d.map().same(&authority));
    }

    #[test]
    fn dead_nodes_resolve_to_none() {
        let token = Token::fresh();
        {
            let _node = register_node(Dummy::new("ephemeral"), &token);
        }
        assert!(token.map().get_node(token.id()).is_none());
    }
}
