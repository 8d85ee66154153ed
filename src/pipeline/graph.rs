//! Phase planning.
//!
//! Nodes connected by push or pull edges must run together; depends edges
//! order whole groups. The planner:
//!
//! 1. unions node ids over every non-depends edge — each set is a phase;
//! 2. builds a graph between phase representatives from depends edges;
//! 3. orders phases by decreasing DFS finish time and rejects cycles;
//! 4. marks a phase for evacuating its predecessor when no depends edge
//!    runs from it into that predecessor (nothing downstream reads those
//!    buffers directly, so they can be released).
//!
//! Each phase also carries its intra-phase successor DAG (push direction,
//! pulls reversed), which the executor topologically sorts for the
//! begin/end lifecycle order.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::PlanError;
use crate::stdx::DisjointSets;

use super::tokens::{NodeId, NodeMap, Relation};

/// One schedulable group of nodes.
#[derive(Debug)]
pub struct Phase {
    /// Name of the highest-priority member.
    pub name: String,
    /// Sum of member memory fractions.
    pub memory_fraction: f64,
    /// Sum of member minimum-memory requirements.
    pub minimum_memory: u64,
    nodes: Vec<NodeId>,
    successors: BTreeMap<NodeId, Vec<NodeId>>,
    initiator: NodeId,
}

impl Phase {
    /// Member node ids in id order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// The member with no inbound push or pull edges.
    #[must_use]
    pub fn initiator(&self) -> NodeId {
        self.initiator
    }

    /// Members in intra-phase topological order (producers first).
    #[must_use]
    pub fn topo_order(&self) -> Vec<NodeId> {
        let index: BTreeMap<NodeId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let mut edges = vec![Vec::new(); self.nodes.len()];
        for (from, targets) in &self.successors {
            let Some(&f) = index.get(from) else { continue };
            for to in targets {
                if let Some(&t) = index.get(to) {
                    edges[f].push(t);
                }
            }
        }
        toposort_by_finish(self.nodes.len(), &edges)
            .into_iter()
            .map(|i| self.nodes[i])
            .collect()
    }
}

/// Execution-ordered phases plus evacuation decisions.
#[derive(Debug)]
pub struct PhasePlan {
    /// Phases in execution order.
    pub phases: Vec<Phase>,
    /// `evacuate_previous[i]` is true when phase `i` does not depend
    /// directly on phase `i - 1`.
    pub evacuate_previous: Vec<bool>,
}

impl PhasePlan {
    /// Plans the phases of the authoritative map's graph.
    ///
    /// # Errors
    /// - `PlanError::EmptyPipeline` if no live nodes exist.
    /// - `PlanError::PhaseCycle` if depends edges are circular.
    /// - `PlanError::NoInitiator` if some phase has no drivable node.
    pub fn build(map: &NodeMap) -> Result<Self, PlanError> {
        let map = map.find_authority();
        let ids: Vec<NodeId> = map
            .node_ids()
            .into_iter()
            .filter(|&id| map.get_node(id).is_some())
            .collect();
        if ids.is_empty() {
            return Err(PlanError::EmptyPipeline);
        }
        let index: BTreeMap<NodeId, usize> =
            ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let relations = map.relations();

        // Phases are connected components under push/pull edges.
        let mut sets = DisjointSets::new(ids.len());
        for &(from, to, relation) in &relations {
            if relation == Relation::Depends {
                continue;
            }
            let (Some(&f), Some(&t)) = (index.get(&from), index.get(&to)) else {
                continue;
            };
            sets.union(f, t);
        }

        let mut phase_of_rep: BTreeMap<usize, usize> = BTreeMap::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for i in 0..ids.len() {
            let rep = sets.find(i);
            let next = members.len();
            let phase = *phase_of_rep.entry(rep).or_insert(next);
            if phase == members.len() {
                members.push(Vec::new());
            }
            members[phase].push(i);
        }
        let count = members.len();

        // Depends edges between phase representatives. `dependers` points
        // dependee -> depender so the DFS finishes dependees last.
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        let mut dependers: Vec<Vec<usize>> = vec![Vec::new(); count];
        for &(from, to, relation) in &relations {
            if relation != Relation::Depends {
                continue;
            }
            let (Some(&f), Some(&t)) = (index.get(&from), index.get(&to)) else {
                continue;
            };
            let pf = phase_of_rep[&sets.find(f)];
            let pt = phase_of_rep[&sets.find(t)];
            if pf == pt {
                continue;
            }
            deps[pf].insert(pt);
            dependers[pt].push(pf);
        }

        let order = toposort_by_finish(count, &dependers);
        let mut position = vec![0usize; count];
        for (pos, &p) in order.iter().enumerate() {
            position[p] = pos;
        }
        for p in 0..count {
            for &dependee in &deps[p] {
                if position[dependee] > position[p] {
                    return Err(PlanError::PhaseCycle {
                        from: position[p],
                        to: position[dependee],
                    });
                }
            }
        }

        let mut evacuate_previous = vec![false; order.len()];
        for i in 1..order.len() {
            evacuate_previous[i] = !deps[order[i]].contains(&order[i - 1]);
        }

        // Inbound push/pull degree decides initiators; successor edges give
        // the intra-phase execution order (pull edges reversed so data
        // producers come first).
        let mut in_degree = vec![0usize; ids.len()];
        let mut successors_by_phase: Vec<BTreeMap<NodeId, Vec<NodeId>>> =
            vec![BTreeMap::new(); count];
        for &(from, to, relation) in &relations {
            if relation == Relation::Depends {
                continue;
            }
            let (Some(&f), Some(&t)) = (index.get(&from), index.get(&to)) else {
                continue;
            };
            in_degree[t] += 1;
            let phase = phase_of_rep[&sets.find(f)];
            let (succ_from, succ_to) = if relation == Relation::Pulls {
                (to, from)
            } else {
                (from, to)
            };
            successors_by_phase[phase]
                .entry(succ_from)
                .or_default()
                .push(succ_to);
        }

        let mut phases = Vec::with_capacity(order.len());
        for &p in &order {
            let node_ids: Vec<NodeId> = members[p].iter().map(|&i| ids[i]).collect();
            let mut memory_fraction = 0.0;
            let mut minimum_memory = 0u64;
            let mut name = String::new();
            let mut name_priority = i32::MIN;
            for &id in &node_ids {
                let node = map.get_node(id).expect("planned node alive");
                let node = node.borrow();
                let meta = node.meta();
                memory_fraction += meta.memory_fraction;
                minimum_memory += meta.minimum_memory;
                if meta.name_priority > name_priority {
                    name_priority = meta.name_priority;
                    name.clone_from(&meta.name);
                }
            }
            let initiator = members[p]
                .iter()
                .copied()
                .find(|&i| in_degree[i] == 0)
                .map(|i| ids[i])
                .ok_or_else(|| PlanError::NoInitiator {
                    phase: name.clone(),
                })?;
            phases.push(Phase {
                name,
                memory_fraction,
                minimum_memory,
                nodes: node_ids,
                successors: std::mem::take(&mut successors_by_phase[p]),
                initiator,
            });
        }

        Ok(Self {
            phases,
            evacuate_previous,
        })
    }
}

/// Topological order by decreasing DFS finish time.
fn toposort_by_finish(count: usize, edges: &[Vec<usize>]) -> Vec<usize> {
    let mut finish = vec![0u64; count];
    let mut time = 1u64;
    for start in 0..count {
        if finish[start] == 0 {
            time = dfs_from(start, time, &mut finish, edges);
        }
    }
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&n| std::cmp::Reverse(finish[n]));
    order
}

fn dfs_from(node: usize, mut time: u64, finish: &mut [u64], edges: &[Vec<usize>]) -> u64 {
    finish[node] = time; // discovery time doubles as the visited mark
    time += 1;
    for &next in &edges[node] {
        if finish[next] != 0 {
            continue;
        }
        time = dfs_from(next, time, finish, edges);
    }
    finish[node] = time;
    time + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toposort_respects_edges() {
        // 0 -> 1 -> 2, 0 -> 2
        let edges = vec![vec![1, 2], vec![2], vec![]];
        let order = toposort_by_finish(3, &edges);
        let pos = |n: usize| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(2));
    }

    #[test]
    fn toposort_handles_disconnected_nodes() {
        let edges = vec![vec![], vec![0], vec![]];
        let order = toposort_by_finish(3, &edges);
        assert_eq!(order.len(), 3);
        let pos = |n: usize| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(1) < pos(0));
    }
}
