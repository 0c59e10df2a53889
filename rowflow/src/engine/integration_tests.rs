//! End-to-end scenarios: build a graph, run it on real threads, check the
//! result.

use super::*;
use crate::core::{FieldMeta, Row, RowShape, Value, ValueType};
use crate::errors::StepError;
use crate::events::CollectingEventSink;
use crate::pipeline::{GraphBuilder, HopDef};
use crate::routing::{Distribution, ErrorHandling};
use crate::stages::{
    CollectingRowListener, FnStage, InputHandle, PassThrough, RowEventKind, Stage, StageMeta,
    StepContext,
};
use crate::testing::*;
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

fn config() -> EngineConfig {
    EngineConfig::new().with_poll_interval(Duration::from_millis(10))
}

fn run(desc: GraphDescription) -> RunResult {
    Engine::build(desc, config())
        .expect("graph should build")
        .run()
        .expect("supervisor should not fail")
}

#[test]
fn test_even_odd_filter() {
    let evens = CollectorSink::new();
    let odds = CollectorSink::new();
    let desc = GraphBuilder::new("even-odd")
        .stage("numbers", RowGenerator::sequence("n", 1..=10))
        .stage(
            "is_even",
            PredicateFilter::new("n", |v| v.as_i64().is_some_and(|n| n % 2 == 0)),
        )
        .stage("evens", evens.clone())
        .stage("odds", odds.clone())
        .hop("numbers", "is_even")
        .target_hop("is_even", "true", "evens")
        .target_hop("is_even", "false", "odds")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_succeeded(&result);
    assert_eq!(evens.sorted_ints(0), vec![2, 4, 6, 8, 10]);
    assert_eq!(odds.sorted_ints(0), vec![1, 3, 5, 7, 9]);
    assert_eq!(result.rows_written, 10);
    assert_eq!(result.errors, 0);
    assert_stage_written(&result, "is_even", 10);
}

#[test]
fn test_sink_failing_on_third_row() {
    let desc = GraphBuilder::new("fail-third")
        .stage("numbers", RowGenerator::sequence("n", 1..=10))
        .stage("sink", FailOnRow::new(3))
        .hop("numbers", "sink")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_failed(&result);
    assert!(result.errors >= 1);
    assert!(result.cancelled);
    assert_failed_at(&result, "sink", ErrorKind::Transform);
    assert_eq!(result.stage_metrics("sink").rows_written, 2);
    assert_eq!(result.rows_written, 2);
    assert_eq!(
        result.cancel_reason,
        Some(CancelReason::NodeFailed {
            node: NodeId::new("sink", 0)
        })
    );
}

#[test]
fn test_failure_is_surfaced_as_error() {
    let desc = GraphBuilder::new("fail-first")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage("sink", FailOnRow::new(1))
        .hop("numbers", "sink")
        .build()
        .unwrap();

    let err = run_graph(desc, config()).unwrap_err();
    assert!(matches!(err, RowflowError::Transform(ref e) if e.node.stage == "sink"));
}

#[test]
fn test_round_robin_spreads_rows_evenly() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("rr")
        .stage("numbers", RowGenerator::sequence("n", 1..=9))
        .stage_copies("sink", sink.clone(), 3)
        .hop("numbers", "sink")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_succeeded(&result);
    assert_eq!(sink.sorted_ints(0), (1..=9).collect::<Vec<_>>());
    for copy in 0..3 {
        assert_eq!(result.node("sink", copy).unwrap().metrics.rows_read, 3);
    }
}

#[test]
fn test_copy_to_all_duplicates_rows() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("broadcast")
        .stage("numbers", RowGenerator::sequence("n", 1..=4))
        .stage_copies("sink", sink.clone(), 3)
        .distributed_hop("numbers", "sink", Distribution::CopyToAll)
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_succeeded(&result);
    assert_eq!(sink.len(), 12);
    assert_eq!(result.rows_written, 12);
    assert_stage_written(&result, "numbers", 4);
}

#[derive(Default)]
struct KeysPerNode {
    seen: parking_lot::Mutex<HashMap<NodeId, HashSet<String>>>,
}

impl RowListener for KeysPerNode {
    fn row_read(&self, node: &NodeId, _shape: Option<&RowShape>, row: &Row) {
        if let Some(key) = row.get(0).and_then(Value::as_str) {
            self.seen
                .lock()
                .entry(node.clone())
                .or_default()
                .insert(key.to_string());
        }
    }
}

#[test]
fn test_partitioned_hop_keeps_keys_together() {
    let shape = RowShape::builder()
        .field("key", ValueType::String)
        .field("n", ValueType::Integer)
        .build()
        .unwrap();
    let rows: Vec<Row> = (0..60_i64)
        .map(|i| crate::row![format!("k{}", i % 7), i])
        .collect();
    let desc = GraphBuilder::new("partitioned")
        .stage_copies("source", RowGenerator::from_rows(shape, rows), 2)
        .stage_copies("sink", CollectorSink::new(), 3)
        .distributed_hop("source", "sink", Distribution::partitioned("key"))
        .build()
        .unwrap();

    let engine = Engine::build(desc, config()).unwrap();
    let keys = Arc::new(KeysPerNode::default());
    engine.add_row_listener("sink", keys.clone()).unwrap();
    let result = engine.run().unwrap();

    assert_run_succeeded(&result);
    assert_eq!(result.rows_read, 120);
    let seen = keys.seen.lock();
    let mut owners: HashMap<&str, usize> = HashMap::new();
    for set in seen.values() {
        for key in set {
            *owners.entry(key.as_str()).or_default() += 1;
        }
    }
    assert_eq!(owners.len(), 7);
    assert!(owners.values().all(|&n| n == 1), "a key reached two copies: {owners:?}");
}

#[test]
fn test_matching_copies_connect_one_to_one() {
    let desc = GraphBuilder::new("n-n")
        .stage_copies("numbers", RowGenerator::sequence("n", 1..=5), 2)
        .stage_copies("work", PassThrough, 2)
        .stage("sink", CollectorSink::new())
        .hop("numbers", "work")
        .hop("work", "sink")
        .build()
        .unwrap();

    let engine = Engine::build(desc, config()).unwrap();
    assert_eq!(engine.channel_stats().len(), 4);
    let result = engine.run().unwrap();

    assert_run_succeeded(&result);
    assert_eq!(result.rows_written, 10);
    assert_eq!(result.node("work", 0).unwrap().metrics.rows_read, 5);
    assert_eq!(result.node("work", 1).unwrap().metrics.rows_read, 5);
}

#[test]
fn test_init_failure_aborts_before_processing() {
    let upstream = LifecycleRecorder::new();
    let broken = LifecycleRecorder::failing_init();
    let desc = GraphBuilder::new("bad-init")
        .stage("numbers", RowGenerator::sequence("n", 1..=100))
        .stage_copies("counted", upstream.clone(), 2)
        .stage("broken", broken.clone())
        .hop("numbers", "counted")
        .hop("counted", "broken")
        .build()
        .unwrap();

    let engine = Engine::build(desc, config()).unwrap();
    let result = engine.run().unwrap();

    assert_run_failed(&result);
    assert_failed_at(&result, "broken", ErrorKind::Init);
    assert_eq!(
        result.cancel_reason,
        Some(CancelReason::InitFailed {
            node: NodeId::new("broken", 0)
        })
    );
    assert_eq!(upstream.counts().inits(), 2);
    assert_eq!(upstream.counts().transforms(), 0);
    assert_eq!(upstream.counts().disposes(), 2);
    assert_eq!(broken.counts().disposes(), 1);
    assert_stage_outcome(&result, "counted", NodeOutcome::Aborted);
    assert_stage_outcome(&result, "broken", NodeOutcome::Failed);
    assert_stage_written(&result, "numbers", 0);
    assert!(engine
        .node_states()
        .iter()
        .all(|(_, state)| *state == NodeState::Done));
}

#[test]
fn test_invalid_config_fails_build() {
    let desc = GraphBuilder::new("cfg")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .build()
        .unwrap();
    let err = Engine::build(desc, EngineConfig::new().with_channel_capacity(0)).unwrap_err();
    assert_eq!(err.code(), Some("CONFIG-INVALID"));
}

#[test]
fn test_undeclared_target_fails_build() {
    let desc = GraphBuilder::new("g")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage("filter", PredicateFilter::new("n", |_| true))
        .stage("sink", CollectorSink::new())
        .hop("numbers", "filter")
        .target_hop("filter", "true", "sink")
        .build();
    assert_eq!(
        desc.unwrap_err().code(),
        Some("GRAPH-UNDECLARED-TARGET")
    );
}

#[test]
fn test_row_with_wrong_arity_fails_node() {
    let widen = FnStage::new(|row: &Row| Ok(Some(row.extended([Value::from("extra")]))));
    let desc = GraphBuilder::new("arity")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage("widen", widen)
        .stage("sink", CollectorSink::new())
        .hop("numbers", "widen")
        .hop("widen", "sink")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_failed(&result);
    assert_failed_at(&result, "widen", ErrorKind::Schema);
}

#[test]
fn test_declared_output_field_flows_downstream() {
    let doubled = FnStage::new(|row: &Row| {
        let n = row
            .get(0)
            .and_then(Value::as_i64)
            .ok_or_else(|| StepError::failed("n is not an integer"))?;
        Ok(Some(row.extended([Value::Integer(n * 2)])))
    })
    .with_referenced_field("n")
    .with_output_field(FieldMeta::new("doubled", ValueType::Integer));
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("derive")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage("double", doubled)
        .stage("sink", sink.clone())
        .hop("numbers", "double")
        .hop("double", "sink")
        .build()
        .unwrap();

    let result = Engine::build(desc, config().with_safe_mode(true))
        .unwrap()
        .run()
        .unwrap();

    assert_run_succeeded(&result);
    assert_eq!(sink.sorted_ints(1), vec![2, 4, 6]);
}

#[test]
fn test_external_cancel_unblocks_everything() {
    let desc = GraphBuilder::new("endless")
        .stage("numbers", RowGenerator::infinite("n"))
        .stage("slow", CollectorSink::new().with_delay(Duration::from_millis(2)))
        .hop_with(HopDef::new("numbers", "slow").with_capacity(1))
        .build()
        .unwrap();
    let engine = Arc::new(Engine::build(desc, config()).unwrap());

    let canceller = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            engine.cancel();
        })
    };
    let started = Instant::now();
    let result = engine.run().unwrap();
    canceller.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_run_failed(&result);
    assert!(result.cancelled);
    assert_eq!(result.cancel_reason, Some(CancelReason::Requested));
    assert_eq!(result.errors, 0);
    assert!(result.failure.is_none());
    assert!(result
        .nodes
        .iter()
        .all(|n| n.outcome != NodeOutcome::Failed));
}

#[test]
fn test_safe_stop_drains_and_succeeds() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("stoppable")
        .stage("numbers", RowGenerator::infinite("n").with_delay(Duration::from_millis(1)))
        .stage("sink", sink.clone())
        .hop("numbers", "sink")
        .build()
        .unwrap();
    let engine = Arc::new(Engine::build(desc, config()).unwrap());

    let stopper = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            engine.safe_stop();
        })
    };
    let result = engine.run().unwrap();
    stopper.join().unwrap();

    assert_run_succeeded(&result);
    assert!(result.stopped);
    assert!(!result.cancelled);
    let produced = result.stage_metrics("numbers").rows_written;
    assert!(produced > 0);
    assert_eq!(sink.len() as u64, produced);
    assert_eq!(result.rows_written, produced);
}

#[test]
fn test_error_hop_receives_rejected_rows() {
    let good = CollectorSink::new();
    let bad = CollectorSink::new();
    let desc = GraphBuilder::new("validate")
        .stage("numbers", RowGenerator::sequence("n", 1..=10))
        .stage(
            "check",
            RowValidator::new("n", "ODD", |v| v.as_i64().is_some_and(|n| n % 2 == 0)),
        )
        .stage("good", good.clone())
        .stage("bad", bad.clone())
        .hop("numbers", "check")
        .hop("check", "good")
        .error_hop("check", "bad")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_succeeded(&result);
    assert_eq!(good.sorted_ints(0), vec![2, 4, 6, 8, 10]);
    assert_eq!(bad.sorted_ints(0), vec![1, 3, 5, 7, 9]);
    assert_eq!(result.rows_rejected, 5);
    assert_eq!(result.stage_metrics("check").rows_rejected, 5);

    let rejected = &bad.rows()[0];
    assert_eq!(rejected.len(), 5);
    assert_eq!(rejected.get(1), Some(&Value::Integer(1)));
    assert_eq!(rejected.get(3).and_then(Value::as_str), Some("n"));
    assert_eq!(rejected.get(4).and_then(Value::as_str), Some("ODD"));
}

#[test]
fn test_rejection_limit_fails_node() {
    let desc = GraphBuilder::new("strict")
        .stage("numbers", RowGenerator::sequence("n", 1..=10))
        .stage("check", RowValidator::new("n", "SMALL", |v| v.as_i64() > Some(5)))
        .stage("good", CollectorSink::new())
        .stage("bad", CollectorSink::new())
        .hop("numbers", "check")
        .hop("check", "good")
        .error_hop("check", "bad")
        .error_handling("check", ErrorHandling::new().with_max_errors(2))
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_failed(&result);
    assert_failed_at(&result, "check", ErrorKind::Transform);
    assert_eq!(result.stage_metrics("check").rows_rejected, 3);
}

#[test]
fn test_put_error_without_error_hop_is_fatal() {
    let desc = GraphBuilder::new("no-error-hop")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage("check", RowValidator::new("n", "NEVER", |_| false))
        .hop("numbers", "check")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_failed(&result);
    assert_failed_at(&result, "check", ErrorKind::Transform);
}

#[test]
fn test_unconfigured_target_drops_rows() {
    let evens = CollectorSink::new();
    let desc = GraphBuilder::new("half")
        .stage("numbers", RowGenerator::sequence("n", 1..=10))
        .stage(
            "is_even",
            PredicateFilter::new("n", |v| v.as_i64().is_some_and(|n| n % 2 == 0)),
        )
        .stage("evens", evens.clone())
        .hop("numbers", "is_even")
        .target_hop("is_even", "true", "evens")
        .declare_target("is_even", "false")
        .build()
        .unwrap();

    let engine = Engine::build(desc, config()).unwrap();
    let routed = Arc::new(CollectingRowListener::new());
    engine.add_row_listener("is_even", routed.clone()).unwrap();
    let result = engine.run().unwrap();

    assert_run_succeeded(&result);
    assert_eq!(evens.sorted_ints(0), vec![2, 4, 6, 8, 10]);
    assert_stage_written(&result, "is_even", 5);
    assert_eq!(result.rows_written, 5);
    assert_eq!(routed.rows(RowEventKind::Written).len(), 5);
}

#[test]
fn test_multiple_inputs_are_merged() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("merge")
        .stage("low", RowGenerator::sequence("n", 1..=3))
        .stage("high", RowGenerator::sequence("n", 100..=103))
        .stage("sink", sink.clone())
        .hop("low", "sink")
        .hop("high", "sink")
        .build()
        .unwrap();

    let result = Engine::build(desc, config().with_rows_per_input_block(1))
        .unwrap()
        .run()
        .unwrap();

    assert_run_succeeded(&result);
    assert_eq!(sink.sorted_ints(0), vec![1, 2, 3, 100, 101, 102, 103]);
}

/// Keeps main rows whose `n` appears in the `allowed` stream.
#[derive(Debug)]
struct AllowList;

impl StageMeta for AllowList {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(AllowListCopy {
            allowed: None,
            lookup: None,
        })
    }

    fn reads_inputs_separately(&self) -> bool {
        true
    }
}

struct AllowListCopy {
    allowed: Option<HashSet<i64>>,
    lookup: Option<InputHandle>,
}

impl Stage for AllowListCopy {
    fn init(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        self.lookup = Some(ctx.take_input("allowed")?);
        Ok(true)
    }

    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        if self.allowed.is_none() {
            let handle = self
                .lookup
                .ok_or_else(|| StepError::failed("lookup input not taken"))?;
            let mut allowed = HashSet::new();
            while let Some(row) = ctx.get_row_from(handle)? {
                allowed.extend(row.get(0).and_then(Value::as_i64));
            }
            self.allowed = Some(allowed);
        }
        let Some(row) = ctx.get_row()? else {
            return Ok(false);
        };
        let keep = row
            .get(0)
            .and_then(Value::as_i64)
            .is_some_and(|n| self.allowed.as_ref().is_some_and(|a| a.contains(&n)));
        if keep {
            ctx.put_row(row)?;
        }
        Ok(true)
    }
}

#[test]
fn test_dedicated_input_stream() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("lookup")
        .stage("allowed", RowGenerator::sequence("n", [2, 3, 5, 7]))
        .stage("numbers", RowGenerator::sequence("n", 1..=10))
        .stage("filter", AllowList)
        .stage("sink", sink.clone())
        .hop("allowed", "filter")
        .hop("numbers", "filter")
        .hop("filter", "sink")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_succeeded(&result);
    assert_eq!(sink.sorted_ints(0), vec![2, 3, 5, 7]);
    assert_eq!(result.stage_metrics("filter").rows_read, 14);
}

#[test]
fn test_lifecycle_events() {
    let desc = GraphBuilder::new("events")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage_copies("sink", CollectorSink::new(), 2)
        .hop("numbers", "sink")
        .build()
        .unwrap();
    let engine = Engine::build(desc, config()).unwrap();
    let sink = Arc::new(CollectingEventSink::new());
    engine.set_event_sink(sink.clone());

    let result = engine.run().unwrap();

    assert_run_succeeded(&result);
    assert_eq!(sink.events_of_type(events::RUN_STARTED).len(), 1);
    assert_eq!(sink.events_of_type(events::NODE_INITIALIZED).len(), 3);
    assert_eq!(sink.events_of_type(events::NODE_FINISHED).len(), 3);
    assert!(sink.events_of_type(events::NODE_FAILED).is_empty());

    let completed = sink.events_of_type(events::RUN_COMPLETED);
    assert_eq!(completed.len(), 1);
    let data = completed[0].1.as_ref().unwrap();
    assert_eq!(data["success"], true);
    assert_eq!(data["rows_written"], 3);
}

#[test]
fn test_failure_event_names_node() {
    let desc = GraphBuilder::new("events-fail")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage("sink", FailOnRow::new(2))
        .hop("numbers", "sink")
        .build()
        .unwrap();
    let engine = Engine::build(desc, config()).unwrap();
    let sink = Arc::new(CollectingEventSink::new());
    engine.set_event_sink(sink.clone());

    engine.run().unwrap();

    let failed = sink.events_of_type(events::NODE_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].1.as_ref().unwrap()["node"], "sink.0");
}

#[test]
fn test_row_listeners() {
    let desc = GraphBuilder::new("listen")
        .stage("numbers", RowGenerator::sequence("n", 1..=4))
        .stage("sink", CollectorSink::new())
        .hop("numbers", "sink")
        .build()
        .unwrap();
    let engine = Engine::build(desc, config()).unwrap();
    let produced = Arc::new(CollectingRowListener::new());
    let consumed = Arc::new(CollectingRowListener::new());
    engine.add_row_listener("numbers", produced.clone()).unwrap();
    engine.add_row_listener("sink", consumed.clone()).unwrap();
    assert!(engine
        .add_row_listener("nowhere", Arc::new(CollectingRowListener::new()))
        .is_err());

    engine.run().unwrap();

    assert_eq!(produced.rows(RowEventKind::Written).len(), 4);
    assert!(produced.rows(RowEventKind::Read).is_empty());
    assert_eq!(consumed.rows(RowEventKind::Read).len(), 4);
    assert_eq!(consumed.rows(RowEventKind::Read)[0], crate::row![1]);
}

#[test]
fn test_run_twice_is_rejected() {
    let desc = GraphBuilder::new("once")
        .stage("numbers", RowGenerator::sequence("n", 1..=2))
        .build()
        .unwrap();
    let engine = Engine::build(desc, config()).unwrap();
    assert!(engine.run().unwrap().success);
    assert!(matches!(engine.run(), Err(EngineError::AlreadyStarted(_))));
}

#[test]
fn test_introspection_after_run() {
    let desc = GraphBuilder::new("stats")
        .stage("numbers", RowGenerator::sequence("n", 1..=10))
        .stage("sink", CollectorSink::new())
        .hop_with(HopDef::new("numbers", "sink").with_capacity(2))
        .build()
        .unwrap();
    let engine = Engine::build(desc, config()).unwrap();
    assert!(engine
        .node_states()
        .iter()
        .all(|(_, state)| *state == NodeState::Created));

    engine.run().unwrap();

    let stats = engine.channel_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].capacity, 2);
    assert_eq!(stats[0].pushed, 10);
    assert_eq!(stats[0].popped, 10);
    assert!(stats[0].producer_done);
    let metrics: HashMap<_, _> = engine.node_metrics().into_iter().collect();
    assert_eq!(metrics[&NodeId::new("sink", 0)].rows_read, 10);
    assert!(engine
        .node_states()
        .iter()
        .all(|(_, state)| *state == NodeState::Done));
}

#[test]
fn test_panicking_stage_fails_run() {
    let boom = FnStage::new(|row: &Row| {
        if row.get(0).and_then(Value::as_i64) == Some(2) {
            panic!("cannot handle 2");
        }
        Ok(Some(row.clone()))
    });
    let desc = GraphBuilder::new("panic")
        .stage("numbers", RowGenerator::sequence("n", 1..=5))
        .stage("boom", boom)
        .stage("sink", CollectorSink::new())
        .hop("numbers", "boom")
        .hop("boom", "sink")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_failed(&result);
    assert_failed_at(&result, "boom", ErrorKind::Transform);
    assert!(result.failure.unwrap().message.contains("cannot handle 2"));
}

#[tokio::test]
async fn test_run_async() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("async")
        .stage("numbers", RowGenerator::sequence("n", 1..=5))
        .stage("sink", sink.clone())
        .hop("numbers", "sink")
        .build()
        .unwrap();
    let engine = Arc::new(Engine::build(desc, config()).unwrap());

    let result = engine.run_async().await.unwrap();

    assert_run_succeeded(&result);
    assert_eq!(sink.len(), 5);
}

#[test]
fn test_wrong_value_type_fails_node() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("mistyped")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage(
            "stringify",
            FnStage::new(|_: &Row| Ok(Some(crate::row!["not an int"]))),
        )
        .stage("sink", sink.clone())
        .hop("numbers", "stringify")
        .hop("stringify", "sink")
        .build()
        .unwrap();

    let result = Engine::build(desc, EngineConfig::default())
        .unwrap()
        .run()
        .unwrap();

    assert_run_failed(&result);
    assert_failed_at(&result, "stringify", ErrorKind::Schema);
    assert!(sink.is_empty());
    assert_eq!(result.errors, 1);
}

#[test]
fn test_missing_referenced_field_fails_on_first_row() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("missing-field")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage(
            "calc",
            FnStage::new(|row: &Row| Ok(Some(row.clone()))).with_referenced_field("amount"),
        )
        .stage("sink", sink.clone())
        .hop("numbers", "calc")
        .hop("calc", "sink")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_failed(&result);
    assert_failed_at(&result, "calc", ErrorKind::Schema);
    assert!(result.cancelled);
    assert_eq!(
        result.cancel_reason,
        Some(CancelReason::NodeFailed {
            node: NodeId::new("calc", 0)
        })
    );
    assert!(result.failure.unwrap().message.contains("amount"));
    assert!(sink.is_empty());
}

/// Passes the first `limit` rows on, then stops.
#[derive(Debug, Clone)]
struct TakeFirst {
    limit: u64,
}

impl StageMeta for TakeFirst {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(self.clone())
    }
}

impl Stage for TakeFirst {
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        if ctx.rows_read() >= self.limit {
            return Ok(false);
        }
        let Some(row) = ctx.get_row()? else {
            return Ok(false);
        };
        ctx.put_row(row)?;
        Ok(true)
    }
}

#[test]
fn test_stage_stopping_early_does_not_fail_upstream() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("limit")
        .stage("numbers", RowGenerator::sequence("n", 1..=10_000))
        .stage("limit", TakeFirst { limit: 3 })
        .stage("sink", sink.clone())
        .hop_with(HopDef::new("numbers", "limit").with_capacity(1))
        .hop("limit", "sink")
        .build()
        .unwrap();

    let result = run(desc);

    assert_run_succeeded(&result);
    assert_eq!(sink.sorted_ints(0), vec![1, 2, 3]);
    assert_stage_written(&result, "numbers", 10_000);
    assert_stage_outcome(&result, "numbers", NodeOutcome::Completed);
    assert_eq!(result.stage_metrics("limit").rows_read, 3);
}

#[test]
fn test_paused_run_holds_rows_until_resumed() {
    let sink = CollectorSink::new();
    let desc = GraphBuilder::new("pausable")
        .stage("numbers", RowGenerator::sequence("n", 1..=100))
        .stage("sink", sink.clone())
        .hop("numbers", "sink")
        .build()
        .unwrap();
    let engine = Arc::new(Engine::build(desc, config()).unwrap());
    engine.pause();

    let runner = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run())
    };
    thread::sleep(Duration::from_millis(150));

    assert!(engine.is_paused());
    assert!(!runner.is_finished());
    assert!(engine
        .node_metrics()
        .iter()
        .all(|(_, m)| m.rows_read == 0 && m.rows_written == 0));
    assert!(sink.is_empty());

    engine.resume();
    let result = runner.join().unwrap().unwrap();

    assert_run_succeeded(&result);
    assert_eq!(sink.len(), 100);
    assert!(!engine.is_paused());
}

#[test]
fn test_cancel_wakes_paused_run() {
    let desc = GraphBuilder::new("paused-forever")
        .stage("numbers", RowGenerator::infinite("n"))
        .stage("sink", CollectorSink::new())
        .hop("numbers", "sink")
        .build()
        .unwrap();
    let engine = Arc::new(Engine::build(desc, config()).unwrap());
    engine.pause();

    let runner = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run())
    };
    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    engine.cancel();
    let result = runner.join().unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_run_failed(&result);
    assert_eq!(result.cancel_reason, Some(CancelReason::Requested));
    assert_eq!(result.errors, 0);
}

#[test]
fn test_spawn_failure_settles_every_node() {
    let recorder = LifecycleRecorder::new();
    let desc = GraphBuilder::new("unspawned")
        .stage("numbers", RowGenerator::sequence("n", 1..=3))
        .stage_copies("counted", recorder.clone(), 2)
        .hop("numbers", "counted")
        .build()
        .unwrap();
    let engine = Engine::build(desc, config()).unwrap();
    let mut nodes = engine.nodes.lock().take().unwrap();
    assert!(engine.init_all(&mut nodes).is_none());

    let reports = engine.settle_after_spawn_failure(nodes.into_iter(), Vec::new());

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.outcome == NodeOutcome::Aborted));
    assert!(reports.iter().all(|r| r.state == NodeState::Done));
    assert_eq!(recorder.counts().disposes(), 2);
    assert_eq!(recorder.counts().transforms(), 0);
}
