//! Pipeline planning and execution: phase ordering, evacuation decisions,
//! lifecycle order, memory assignment, and end-to-end runs.

use std::cell::RefCell;
use std::rc::Rc;

use sluice_rs::errors::{NodeError, PlanError};
use sluice_rs::pipeline::{
    filter, map, merge, pull_map, pull_vec_sink, pull_vec_source, register_node, runner,
    sort_by, stream_sink, stream_source, vec_sink, vec_source, Node, NodeMeta, PhasePlan,
    Pipeline, Relation, Token,
};
use sluice_rs::progress::{NullProgress, Progress};
use sluice_rs::SorterConfig;

/// Node that records its lifecycle events into a shared log.
struct TestNode {
    meta: NodeMeta,
    log: Rc<RefCell<Vec<String>>>,
    evacuable: bool,
}

impl Node for TestNode {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }
    fn begin(&mut self) -> Result<(), NodeError> {
        self.log.borrow_mut().push(format!("begin {}", self.meta.name));
        Ok(())
    }
    fn go(&mut self, _progress: &mut dyn Progress) -> Result<(), NodeError> {
        self.log.borrow_mut().push(format!("go {}", self.meta.name));
        Ok(())
    }
    fn end(&mut self) -> Result<(), NodeError> {
        self.log.borrow_mut().push(format!("end {}", self.meta.name));
        Ok(())
    }
    fn can_evacuate(&self) -> bool {
        self.evacuable
    }
    fn evacuate(&mut self) {
        self.log
            .borrow_mut()
            .push(format!("evacuate {}", self.meta.name));
    }
}

type Log = Rc<RefCell<Vec<String>>>;

fn test_node(name: &str, log: &Log, evacuable: bool) -> (Token, Rc<RefCell<TestNode>>) {
    let token = Token::fresh();
    let node = TestNode {
        meta: NodeMeta::named(name, 10),
        log: log.clone(),
        evacuable,
    };
    let rc = register_node(node, &token);
    (token, rc)
}

/// Progress sink recording totals.
#[derive(Default)]
struct CountingProgress {
    inited: Option<u64>,
    stepped: u64,
    done: bool,
}

impl Progress for CountingProgress {
    fn init(&mut self, steps: u64) {
        self.inited = Some(steps);
    }
    fn step(&mut self, n: u64) {
        self.stepped += n;
    }
    fn done(&mut self) {
        self.done = true;
    }
}

#[test]
fn push_pipeline_with_sort_runs_two_phases() {
    let (sink, out) = vec_sink::<u32>();
    let config = SorterConfig {
        memory: 1 << 20,
        min_item_size: 4,
        block_size: 4096,
    };
    let sorted = sort_by(|a: &u32, b: &u32| a.cmp(b), config, sink);
    let items: Vec<u32> = (0..5_000u32).rev().collect();
    let source = vec_source(items, sorted);
    let mut pipeline = Pipeline::new(source);

    let plan = pipeline.plan().unwrap();
    assert_eq!(plan.phases.len(), 2);
    // The drain phase depends directly on the sort phase, so nothing is
    // evacuated between them.
    assert_eq!(plan.evacuate_previous, vec![false, false]);

    let mut progress = CountingProgress::default();
    pipeline.run(5_000, &mut progress, 1 << 20).unwrap();

    let expected: Vec<u32> = (0..5_000).collect();
    assert_eq!(*out.borrow(), expected);
    assert_eq!(progress.inited, Some(10_000));
    assert_eq!(progress.stepped, 10_000);
    assert!(progress.done);
}

#[test]
fn map_filter_transforms_mid_pipeline() {
    let (sink, out) = vec_sink::<u64>();
    let widened = map(|v: u32| u64::from(v) * 2, sink);
    let source = vec_source(vec![1u32, 2, 3], widened);
    let mut pipeline = Pipeline::new(source);
    pipeline.run_default(3).unwrap();
    assert_eq!(*out.borrow(), vec![2u64, 4, 6]);
}

#[test]
fn filter_drops_failing_items() {
    let (sink, out) = vec_sink::<u32>();
    let evens = filter(|v: &u32| v % 2 == 0, sink);
    let source = vec_source((0..10u32).collect(), evens);
    let mut pipeline = Pipeline::new(source);
    pipeline.run_default(10).unwrap();
    assert_eq!(*out.borrow(), vec![0u32, 2, 4, 6, 8]);
}

#[test]
fn merge_interleaves_a_pull_chain() {
    let (sink, out) = vec_sink::<u32>();
    let side = pull_vec_source(vec![2u32, 4, 6]);
    let merged = merge(side, sink);
    let source = vec_source(vec![1u32, 3, 5], merged);
    let mut pipeline = Pipeline::new(source);

    // The pull side joins the push chain's phase.
    assert_eq!(pipeline.plan().unwrap().phases.len(), 1);
    pipeline.run_default(3).unwrap();
    assert_eq!(*out.borrow(), vec![1u32, 2, 3, 4, 5, 6]);
}

#[test]
fn stream_endpoints_carry_items_between_files() {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("in.bin");
    let out_path = dir.path().join("out.bin");

    {
        let mut writer = sluice_rs::StreamWriter::create(&in_path).unwrap();
        for i in 0..100u64 {
            writer.serialize(&i).unwrap();
        }
        writer.close().unwrap();
    }

    let sink = stream_sink::<u64>(&out_path);
    let tripled = map(|v: u64| v * 3, sink);
    let source = stream_source::<u64>(&in_path, tripled);
    let mut pipeline = Pipeline::new(source);
    pipeline.run_default(100).unwrap();

    let mut reader = sluice_rs::StreamReader::open(&out_path).unwrap();
    for i in 0..100u64 {
        assert_eq!(reader.unserialize::<u64>().unwrap(), i * 3);
    }
    assert!(!reader.can_read());
}

#[test]
fn pull_pipeline_drains_through_filters() {
    let source = pull_vec_source(vec![1u32, 2, 3, 4]);
    let doubled = pull_map(|v: u32| v * 10, source);
    let (initiator, out) = pull_vec_sink(doubled);
    let mut pipeline = Pipeline::new(initiator);
    pipeline.run_default(4).unwrap();
    assert_eq!(*out.borrow(), vec![10u32, 20, 30, 40]);
}

#[test]
fn depends_edges_order_phases() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let (a, _na) = test_node("alpha", &log, false);
    let (mut b, _nb) = test_node("beta", &log, false);
    let (mut c, _nc) = test_node("gamma", &log, true);

    // beta's phase depends on alpha's; gamma is independent.
    b.join(&a);
    b.declare(Relation::Depends, &a);
    c.join(&a);

    let plan = PhasePlan::build(&a.map()).unwrap();
    assert_eq!(plan.phases.len(), 3);
    let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
    let pos = |name: &str| names.iter().position(|&n| n == name).unwrap();
    assert!(pos("alpha") < pos("beta"));

    // beta depends directly on alpha, so no evacuation between them; any
    // phase following an unrelated one evacuates it.
    assert!(!plan.evacuate_previous[pos("beta")]);
    assert!(!plan.evacuate_previous[0]);
    if pos("gamma") > 0 {
        assert!(plan.evacuate_previous[pos("gamma")]);
    }
}

#[test]
fn executor_respects_lifecycle_and_evacuates() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let (a, _na) = test_node("alpha", &log, false);
    let (mut b, _nb) = test_node("beta", &log, false);
    let (mut c, _nc) = test_node("gamma", &log, true);
    b.join(&a);
    b.declare(Relation::Depends, &a);
    c.join(&a);

    let map = a.map();
    let plan = PhasePlan::build(&map).unwrap();
    assert_eq!(plan.phases.len(), 3);

    let mut progress = NullProgress;
    runner::run_plan(&map, &plan, 1, &mut progress, 1 << 20).unwrap();

    let events = log.borrow();
    let pos = |e: &str| {
        events
            .iter()
            .position(|x| x == e)
            .unwrap_or_else(|| panic!("missing event '{e}' in {events:?}"))
    };
    // Each phase runs begin/go/end in order.
    assert!(pos("begin alpha") < pos("go alpha"));
    assert!(pos("go alpha") < pos("end alpha"));
    assert!(pos("end alpha") < pos("begin beta"));
    // gamma's phase has no depends edge from its successor, so it is
    // evacuated before the next phase begins; the alpha -> beta boundary
    // carries a depends edge and is not.
    assert!(pos("end gamma") < pos("evacuate gamma"));
    assert!(!events.contains(&"evacuate alpha".to_string()));
}

#[test]
fn intra_phase_order_follows_push_edges() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let (a, _na) = test_node("producer", &log, false);
    let (mut b, _nb) = test_node("middle", &log, false);
    let (mut c, _nc) = test_node("consumer", &log, false);

    // producer pushes to middle pushes to consumer: one phase, begin order
    // must follow the data direction.
    b.join(&a);
    a.declare(Relation::Pushes, &b);
    c.join(&b);
    b.declare(Relation::Pushes, &c);

    let map = a.map();
    let plan = PhasePlan::build(&map).unwrap();
    assert_eq!(plan.phases.len(), 1);
    assert_eq!(plan.phases[0].initiator(), a.id());

    let mut progress = NullProgress;
    runner::run_plan(&map, &plan, 1, &mut progress, 1 << 20).unwrap();

    let events = log.borrow();
    let pos = |e: &str| events.iter().position(|x| x == e).unwrap();
    assert!(pos("begin producer") < pos("begin middle"));
    assert!(pos("begin middle") < pos("begin consumer"));
    assert!(pos("end producer") < pos("end middle"));
}

#[test]
fn depends_cycle_is_rejected() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let (a, _na) = test_node("first", &log, false);
    let (mut b, _nb) = test_node("second", &log, false);
    b.join(&a);
    a.declare(Relation::Depends, &b);
    b.declare(Relation::Depends, &a);

    let err = PhasePlan::build(&a.map()).unwrap_err();
    assert!(matches!(err, PlanError::PhaseCycle { .. }));
}

#[test]
fn push_cycle_has_no_initiator() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let (a, _na) = test_node("ouro", &log, false);
    let (mut b, _nb) = test_node("boros", &log, false);
    b.join(&a);
    a.declare(Relation::Pushes, &b);
    b.declare(Relation::Pushes, &a);

    let err = PhasePlan::build(&a.map()).unwrap_err();
    assert!(matches!(err, PlanError::NoInitiator { .. }));
}

#[test]
fn memory_assignment_is_proportional_with_pinned_minimums() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let (a, na) = test_node("src", &log, false);
    let (mut b, nb) = test_node("mid", &log, false);
    let (mut c, nc) = test_node("dst", &log, false);
    na.borrow_mut().meta_mut().memory_fraction = 1.0;
    nb.borrow_mut().meta_mut().memory_fraction = 3.0;
    nc.borrow_mut().meta_mut().minimum_memory = 100;

    b.join(&a);
    a.declare(Relation::Pushes, &b);
    c.join(&b);
    b.declare(Relation::Pushes, &c);

    let map = a.map();
    let plan = PhasePlan::build(&map).unwrap();
    let mut progress = NullProgress;
    runner::run_plan(&map, &plan, 1, &mut progress, 500).unwrap();

    // dst's zero fraction pins it at its minimum; src and mid split the
    // remaining 400 bytes 1:3.
    assert_eq!(nc.borrow().meta().available_memory, 100);
    assert_eq!(na.borrow().meta().available_memory, 100);
    assert_eq!(nb.borrow().meta().available_memory, 300);
}

#[test]
fn short_budget_assigns_minimums() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let (a, na) = test_node("src", &log, false);
    let (mut b, nb) = test_node("dst", &log, false);
    na.borrow_mut().meta_mut().memory_fraction = 1.0;
    na.borrow_mut().meta_mut().minimum_memory = 64;
    nb.borrow_mut().meta_mut().minimum_memory = 128;

    b.join(&a);
    a.declare(Relation::Pushes, &b);

    let map = a.map();
    let plan = PhasePlan::build(&map).unwrap();
    let mut progress = NullProgress;
    runner::run_plan(&map, &plan, 1, &mut progress, 100).unwrap();

    assert_eq!(na.borrow().meta().available_memory, 64);
    assert_eq!(nb.borrow().meta().available_memory, 128);
}

#[test]
fn plot_emits_graphviz() {
    let (sink, _out) = vec_sink::<u32>();
    let source = vec_source(vec![1u32], sink);
    let pipeline = Pipeline::new(source);

    let mut dot = Vec::new();
    pipeline.plot(&mut dot).unwrap();
    let dot = String::from_utf8(dot).unwrap();
    assert!(dot.starts_with("digraph pipeline {"));
    assert!(dot.contains("input"));
    assert!(dot.contains("output"));
    assert!(dot.contains("style=solid"));
}

#[test]
fn empty_map_fails_to_plan() {
    let token = Token::fresh();
    let err = PhasePlan::build(&token.map()).unwrap_err();
    assert!(matches!(err, PlanError::EmptyPipeline));
}
