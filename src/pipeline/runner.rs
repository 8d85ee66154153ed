//! Phase execution.
//!
//! The executor walks the planned phases in order. Per phase: prepare every
//! node in topological order, assign memory, run `begin` while summing step
//! counts, let the initiator's `go` drive all data movement, then `end`.
//! Before a phase whose plan entry says so, the previous phase's evacuable
//! nodes are asked to release their buffers.
//!
//! Memory assignment follows a fixpoint: any node whose proportional share
//! falls below its minimum is pinned at the minimum and removed from the
//! pool, then shares are recomputed; the survivors split the remainder in
//! proportion to their fractions. A budget below the phase's minimum sum is
//! logged and every node gets exactly its minimum.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::progress::{FractionalProgress, Progress};

use super::graph::{Phase, PhasePlan};
use super::node::Node;
use super::tokens::{NodeId, NodeMap};

/// Runs every phase of `plan` against a budget of `memory` bytes.
///
/// `items` weights each phase's share of `progress`; pass the nominal item
/// count of the pipeline.
pub fn run_plan(
    map: &NodeMap,
    plan: &PhasePlan,
    items: u64,
    progress: &mut dyn Progress,
    memory: u64,
) -> Result<(), PipelineError> {
    let map = map.find_authority();
    let weight = items.max(1);
    let mut fraction = FractionalProgress::new(progress, weight * plan.phases.len() as u64);
    fraction.init();
    for (i, phase) in plan.phases.iter().enumerate() {
        if plan.evacuate_previous[i] {
            evacuate_phase(&map, &plan.phases[i - 1]);
        }
        debug!(phase = %phase.name, "running phase");
        let mut sub = fraction.sub(weight);
        run_phase(&map, phase, memory, &mut sub)?;
    }
    fraction.done();
    Ok(())
}

fn resolve(map: &NodeMap, id: NodeId) -> Rc<RefCell<dyn Node>> {
    map.get_node(id)
        .expect("pipeline node dropped during execution")
}

fn run_phase(
    map: &NodeMap,
    phase: &Phase,
    memory: u64,
    progress: &mut dyn Progress,
) -> Result<(), PipelineError> {
    let order = phase.topo_order();
    for &id in &order {
        resolve(map, id).borrow_mut().prepare();
    }
    assign_memory(map, phase, memory);

    let mut total_steps = 0u64;
    for &id in &order {
        let node = resolve(map, id);
        let mut node = node.borrow_mut();
        node.begin().map_err(PipelineError::from)?;
        total_steps += node.steps();
    }
    progress.init(total_steps);

    resolve(map, phase.initiator())
        .borrow_mut()
        .go(progress)
        .map_err(PipelineError::from)?;

    for &id in &order {
        resolve(map, id).borrow_mut().end().map_err(PipelineError::from)?;
    }
    progress.done();
    Ok(())
}

fn evacuate_phase(map: &NodeMap, phase: &Phase) {
    for &id in phase.nodes() {
        let node = resolve(map, id);
        let mut node = node.borrow_mut();
        if node.can_evacuate() {
            debug!(node = %node.meta().name, "evacuating");
            node.evacuate();
        }
    }
}

/// Distributes `budget` bytes across the phase's nodes.
fn assign_memory(map: &NodeMap, phase: &Phase, budget: u64) {
    let nodes: Vec<Rc<RefCell<dyn Node>>> =
        phase.nodes().iter().map(|&id| resolve(map, id)).collect();

    if budget < phase.minimum_memory {
        warn!(
            budget,
            required = phase.minimum_memory,
            phase = %phase.name,
            "phase budget below minimum; assigning minimums"
        );
        assign_minimums(&nodes);
        return;
    }
    let mut fraction = phase.memory_fraction;
    if fraction < 1e-9 {
        assign_minimums(&nodes);
        return;
    }

    let mut remaining = budget;
    let mut assigned = vec![false; nodes.len()];
    loop {
        let mut changed = false;
        for (i, node) in nodes.iter().enumerate() {
            if assigned[i] {
                continue;
            }
            let (minimum, frac) = {
                let node = node.borrow();
                (node.meta().minimum_memory, node.meta().memory_fraction)
            };
            let share = if fraction <= 0.0 {
                0.0
            } else {
                frac / fraction * remaining as f64
            };
            if (share as u64) < minimum {
                node.borrow_mut().meta_mut().available_memory = minimum;
                assigned[i] = true;
                remaining = remaining.saturating_sub(minimum);
                fraction -= frac;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for (i, node) in nodes.iter().enumerate() {
        if assigned[i] {
            continue;
        }
        let frac = node.borrow().meta().memory_fraction;
        let share = if fraction <= 0.0 {
            0.0
        } else {
            frac / fraction * remaining as f64
        };
        node.borrow_mut().meta_mut().available_memory = share as u64;
    }
}

fn assign_minimums(nodes: &[Rc<RefCell<dyn Node>>]) {
    for node in nodes {
        let mut node = node.borrow_mut();
        let minimum = node.meta().minimum_memory;
        node.meta_mut().available_memory = minimum;
    }
}
