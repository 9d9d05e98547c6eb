//! Integration tests for graph construction and pipeline execution
//!
//! These tests verify end-to-end workflow behaviour using mock stages.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quizflow_rs::flow::config::EngineConfig;
use quizflow_rs::flow::graph::{Engine, GraphBuilder, NodeSpec, RouteTable, RunOutcome, END};
use quizflow_rs::flow::metrics::{MetricsAggregator, QualitySignals};
use quizflow_rs::flow::pipeline::{channels, stages, ContentPipeline};
use quizflow_rs::flow::registry::StageRegistry;
use quizflow_rs::flow::state::{ReducerType, StateUpdate, WorkflowState};
use quizflow_rs::flow::types::{ExecutionPath, ExecutionResult, ExecutionStatus, RunInput};
use quizflow_rs::stage::{FlowEvent, HealthProbe, Stage, StageError, StaticProbe};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

fn init_logger() {
    Lazy::force(&LOGGER);
}

// ============================================================================
// Mock Components
// ============================================================================

type Script = Box<dyn Fn(usize, &WorkflowState) -> Result<StateUpdate, StageError> + Send + Sync>;

/// Mock stage driven by a script of (call index, state) -> outcome
struct MockStage {
    name: String,
    calls: AtomicUsize,
    delay: Duration,
    script: Script,
}

impl MockStage {
    fn new<F>(name: &str, script: F) -> Arc<Self>
    where
        F: Fn(usize, &WorkflowState) -> Result<StateUpdate, StageError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            script: Box::new(script),
        })
    }

    fn delayed<F>(name: &str, delay: Duration, script: F) -> Arc<Self>
    where
        F: Fn(usize, &WorkflowState) -> Result<StateUpdate, StageError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            delay,
            script: Box::new(script),
        })
    }

    fn writing(name: &str, channel: &'static str, value: Value) -> Arc<Self> {
        Self::new(name, move |_, _| Ok(StateUpdate::new().set(channel, value.clone())))
    }

    fn failing(name: &str) -> Arc<Self> {
        let message = format!("{} backend error", name);
        Self::new(name, move |_, _| Err(StageError::failed(message.clone())))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, state: &WorkflowState) -> Result<StateUpdate, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(call, state)
    }
}

/// Probe that never answers in time
struct HangingProbe;

#[async_trait]
impl HealthProbe for HangingProbe {
    fn name(&self) -> &str {
        "search-backend"
    }

    async fn check(&self) -> bool {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        true
    }
}

/// One mock per standard stage, so call counts can be inspected
struct Harness {
    calibrate: Arc<MockStage>,
    generate: Arc<MockStage>,
    validate: Arc<MockStage>,
    accuracy: Arc<MockStage>,
    alignment: Arc<MockStage>,
    enhance: Arc<MockStage>,
}

fn generated_items(state: &WorkflowState) -> Value {
    let items: Vec<Value> = (0..state.input().item_count)
        .map(|i| json!({ "id": i, "topic": state.input().topic }))
        .collect();
    Value::Array(items)
}

fn report(passed: bool, quality: f64) -> Value {
    json!({ "passed": passed, "quality": quality })
}

impl Harness {
    fn new(passed: bool, quality: f64) -> Self {
        let verdict = report(passed, quality);
        Self {
            calibrate: MockStage::writing(
                stages::CALIBRATE,
                channels::CALIBRATION,
                json!({ "difficulty": "medium" }),
            ),
            generate: MockStage::new(stages::GENERATE, |_, state| {
                Ok(StateUpdate::new().set(channels::ITEMS, generated_items(state)))
            }),
            validate: MockStage::writing(stages::VALIDATE, channels::VALIDATION, verdict.clone()),
            accuracy: MockStage::writing(
                stages::VALIDATE_ACCURACY,
                channels::VALIDATION_REPORTS,
                json!({ "accuracy": verdict.clone() }),
            ),
            alignment: MockStage::writing(
                stages::VALIDATE_ALIGNMENT,
                channels::VALIDATION_REPORTS,
                json!({ "alignment": verdict }),
            ),
            enhance: MockStage::new(stages::ENHANCE, |_, state| {
                let items = state.get(channels::ITEMS).cloned().unwrap_or(json!([]));
                Ok(StateUpdate::new()
                    .set(channels::ENHANCED_ITEMS, items)
                    .set(channels::NOTES, json!("hints added")))
            }),
        }
    }

    fn registry(&self) -> StageRegistry {
        let mut registry = StageRegistry::new();
        for stage in [
            &self.calibrate,
            &self.generate,
            &self.validate,
            &self.accuracy,
            &self.alignment,
            &self.enhance,
        ] {
            registry.register(stage.clone());
        }
        registry
    }

    fn total_calls(&self) -> usize {
        [
            &self.calibrate,
            &self.generate,
            &self.validate,
            &self.accuracy,
            &self.alignment,
            &self.enhance,
        ]
        .iter()
        .map(|s| s.calls())
        .sum()
    }
}

fn pipeline(
    config: EngineConfig,
    registry: StageRegistry,
    probe: impl HealthProbe + 'static,
) -> ContentPipeline {
    ContentPipeline::new(config, registry, Arc::new(probe)).unwrap()
}

fn result_keys(result: &ExecutionResult) -> Vec<String> {
    serde_json::to_value(result)
        .unwrap()
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect()
}

// ============================================================================
// Engine Tests
// ============================================================================

#[tokio::test]
async fn test_linear_graph_scores_base_plus_bonuses() {
    init_logger();

    let mut builder = GraphBuilder::new("abc").channel("trail", ReducerType::Append);
    for id in ["A", "B", "C"] {
        let stage = MockStage::writing(id, "trail", json!(id));
        builder = builder.node(NodeSpec::new(id, stage).writes(["trail"]));
    }
    let graph = builder
        .edge("A", "B")
        .edge("B", "C")
        .edge("C", END)
        .entry("A")
        .compile()
        .unwrap();

    let config = EngineConfig::default();
    let state = WorkflowState::new(graph.channels(), RunInput::new("math", "sets", 1));
    let report = Engine::new(&config).execute(&graph, state).await;

    assert_eq!(report.state.completed(), ["A", "B", "C"]);
    assert_eq!(report.state.get("trail"), Some(&json!(["A", "B", "C"])));

    let signals = QualitySignals::from_report(&report);
    let scoring = config.scoring;
    let expected = scoring.base + scoring.no_retries_bonus + scoring.path_completed_bonus;
    assert_eq!(MetricsAggregator::new(scoring).score(&signals), expected);
}

#[tokio::test]
async fn test_always_retry_router_terminates() {
    init_logger();

    let work = MockStage::writing("work", "trail", json!("tick"));
    let table = RouteTable::new(
        "always_retry",
        Arc::new(|_: &WorkflowState| "retry".to_string()),
    )
    .retry_route("retry", "work")
    .route("give_up", END)
    .exhausted("give_up");

    let graph = GraphBuilder::new("retry_loop")
        .channel("trail", ReducerType::Append)
        .node(NodeSpec::new("work", work.clone()).writes(["trail"]))
        .conditional_edge("work", table)
        .entry("work")
        .compile()
        .unwrap();

    let state = WorkflowState::new(graph.channels(), RunInput::new("math", "sets", 1));
    let report = Engine::with_limits(3, 100).execute(&graph, state).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(work.calls(), 3);
    assert_eq!(
        report.state.routing_decisions().last().map(String::as_str),
        Some("work:retry->give_up")
    );
}

#[tokio::test]
async fn test_always_regenerate_is_bounded_by_budget() {
    init_logger();

    for budget in 1..=4u32 {
        let generate = MockStage::writing("generate", "items", json!([1, 2]));
        let check = MockStage::writing("check", "verdict", json!("bad"));
        let table = RouteTable::new(
            "always_regenerate",
            Arc::new(|_: &WorkflowState| "regenerate".to_string()),
        )
        .retry_route("regenerate", "generate")
        .route("done", END)
        .exhausted("done");

        let graph = GraphBuilder::new("regenerate_loop")
            .channel("items", ReducerType::Overwrite)
            .channel("verdict", ReducerType::Overwrite)
            .node(NodeSpec::new("generate", generate.clone()).writes(["items"]))
            .node(NodeSpec::new("check", check.clone()).writes(["verdict"]))
            .edge("generate", "check")
            .conditional_edge("check", table)
            .entry("generate")
            .compile()
            .unwrap();

        let state = WorkflowState::new(graph.channels(), RunInput::new("math", "sets", 1));
        let report = Engine::with_limits(budget, 100).execute(&graph, state).await;

        assert!(report.reached_terminal());
        assert_eq!(generate.calls(), budget as usize);
        assert_eq!(report.state.visits("generate"), budget);
    }
}

#[tokio::test]
async fn test_out_of_bounds_write_is_rejected_whole() {
    init_logger();

    let first = MockStage::writing("first", "owned", json!("kept"));
    let rogue = MockStage::new("rogue", |_, _| {
        Ok(StateUpdate::new()
            .set("mine", json!("new"))
            .set("owned", json!("clobbered")))
    });

    let graph = GraphBuilder::new("ownership")
        .channel("owned", ReducerType::Overwrite)
        .channel("mine", ReducerType::Overwrite)
        .node(NodeSpec::new("first", first).writes(["owned"]))
        .node(NodeSpec::new("rogue", rogue).writes(["mine"]))
        .edge("first", "rogue")
        .edge("rogue", END)
        .entry("first")
        .compile()
        .unwrap();

    let state = WorkflowState::new(graph.channels(), RunInput::new("math", "sets", 1));
    let report = Engine::with_limits(3, 100).execute(&graph, state).await;

    assert_eq!(report.state.get("owned"), Some(&json!("kept")));
    assert_eq!(report.state.get("mine"), None);
    assert_eq!(report.state.completed(), ["first"]);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("rogue:"));
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_small_request_validates_sequentially() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let p = pipeline(EngineConfig::default(), harness.registry(), StaticProbe::available());
    let result = p.run(RunInput::new("biology", "cells", 3)).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.path, ExecutionPath::Primary);
    assert!(!result.degraded);
    assert!(result.errors.is_empty());
    assert_eq!(
        result.completed_nodes,
        vec!["calibrate", "generate", "validate", "enhance"]
    );
    assert_eq!(result.items.len(), 3);
    assert_eq!(harness.accuracy.calls(), 0);
    assert_eq!(result.state[channels::NOTES], json!(["hints added"]));
}

#[tokio::test]
async fn test_failed_validation_regenerates_within_budget() {
    init_logger();

    let harness = Harness::new(false, 0.3);
    let p = pipeline(EngineConfig::default(), harness.registry(), StaticProbe::available());
    let result = p.run(RunInput::new("biology", "cells", 2)).await;

    assert_eq!(harness.generate.calls(), 3);
    assert_eq!(harness.validate.calls(), 3);
    assert_eq!(harness.enhance.calls(), 1);
    assert_eq!(
        result.routing_decisions,
        vec![
            "generate:validate_sequential",
            "validate:regenerate",
            "generate:validate_sequential",
            "validate:regenerate",
            "generate:validate_sequential",
            "validate:enhance",
        ]
    );
    // validation failed and retries happened, so only the completion bonus applies
    assert!((result.quality_score - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_generation_is_retried() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let mut registry = harness.registry();
    let generate = MockStage::new(stages::GENERATE, |call, state| {
        let items = if call == 0 {
            json!([])
        } else {
            generated_items(state)
        };
        Ok(StateUpdate::new().set(channels::ITEMS, items))
    });
    registry.register(generate.clone());

    let p = pipeline(EngineConfig::default(), registry, StaticProbe::available());
    let result = p.run(RunInput::new("chemistry", "bonds", 2)).await;

    assert_eq!(generate.calls(), 2);
    assert_eq!(result.routing_decisions[0], "generate:retry");
    assert_eq!(result.routing_decisions[1], "generate:validate_sequential");
    assert_eq!(result.items.len(), 2);
}

#[tokio::test]
async fn test_generation_that_never_yields_moves_on() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let mut registry = harness.registry();
    registry.register(MockStage::writing(stages::GENERATE, channels::ITEMS, json!([])));

    let p = pipeline(EngineConfig::default(), registry, StaticProbe::available());
    let result = p.run(RunInput::new("chemistry", "bonds", 2)).await;

    assert_eq!(
        result.routing_decisions[..3],
        [
            "generate:retry",
            "generate:retry",
            "generate:retry->validate_sequential"
        ]
    );
    assert!(result.items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parallel_validation_is_concurrent() {
    init_logger();

    let harness = Harness::new(true, 0.97);
    let mut registry = harness.registry();
    let slow = MockStage::delayed(
        stages::VALIDATE_ACCURACY,
        Duration::from_millis(100),
        |_, _| Ok(StateUpdate::new().set(channels::VALIDATION_REPORTS, json!({ "accuracy": report(true, 0.97) }))),
    );
    let fast = MockStage::delayed(
        stages::VALIDATE_ALIGNMENT,
        Duration::from_millis(10),
        |_, _| Ok(StateUpdate::new().set(channels::VALIDATION_REPORTS, json!({ "alignment": report(true, 0.99) }))),
    );
    registry.register(slow.clone());
    registry.register(fast.clone());

    let p = pipeline(EngineConfig::default(), registry, StaticProbe::available());
    let result = p.run(RunInput::new("physics", "motion", 8)).await;

    assert_eq!(slow.calls(), 1);
    assert_eq!(fast.calls(), 1);
    let join_ms = result.per_node_timings_ms["validate_parallel"];
    assert!(join_ms >= 100, "join took {}ms", join_ms);
    assert!(join_ms < 110, "join took {}ms", join_ms);

    // declared member order, not completion order
    assert_eq!(
        result.completed_nodes,
        vec!["calibrate", "generate", "validate_accuracy", "validate_alignment"]
    );
    assert_eq!(
        result.routing_decisions.last().map(String::as_str),
        Some("validate_parallel:finish")
    );
    assert_eq!(harness.enhance.calls(), 0);
    assert!((result.quality_score - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn test_one_parallel_validator_failing_degrades() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let mut registry = harness.registry();
    registry.register(MockStage::failing(stages::VALIDATE_ALIGNMENT));

    let p = pipeline(EngineConfig::default(), registry, StaticProbe::available());
    let result = p.run(RunInput::new("physics", "motion", 8)).await;

    assert_eq!(result.status, ExecutionStatus::Degraded);
    assert!(result.degraded);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("validate_alignment:"));
    assert!(result.completed_nodes.contains(&"enhance".to_string()));
    assert!(result.state[channels::VALIDATION_REPORTS]
        .get("accuracy")
        .is_some());
}

#[tokio::test]
async fn test_entry_failure_returns_synthetic_result() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let mut registry = harness.registry();
    registry.register(MockStage::failing(stages::CALIBRATE));

    let p = pipeline(EngineConfig::default(), registry, StaticProbe::available());
    let result = p.run(RunInput::new("history", "rome", 4)).await;

    assert!(result.degraded);
    assert!(result.completed_nodes.is_empty());
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.path, ExecutionPath::Synthetic);
    assert!(result
        .errors
        .iter()
        .any(|e| e.starts_with("calibrate: calibrate backend error")));
    assert_eq!(harness.generate.calls(), 0);
}

#[tokio::test]
async fn test_unavailable_dependency_skips_graph() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let config = EngineConfig::default();
    let probe_timeout_ms = config.probe_timeout_ms;
    let p = pipeline(config, harness.registry(), StaticProbe::unavailable());
    let result = p.run(RunInput::new("history", "rome", 4)).await;

    assert_eq!(harness.total_calls(), 0);
    assert!(result.total_time_ms < probe_timeout_ms);
    assert_eq!(result.path, ExecutionPath::Synthetic);
    assert!(result.degraded);
    assert!(result.completed_nodes.is_empty());
    assert!((result.quality_score - 0.6).abs() < 1e-9);
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_probe_is_bounded_by_timeout() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let config = EngineConfig {
        probe_timeout_ms: 200,
        ..EngineConfig::default()
    };
    let p = pipeline(config, harness.registry(), HangingProbe);

    let started = tokio::time::Instant::now();
    let result = p.run(RunInput::new("history", "rome", 4)).await;

    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(harness.total_calls(), 0);
    assert!(result.errors[0].contains("search-backend"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_stage_times_out_and_run_continues() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let mut registry = harness.registry();
    let slow_enhance = MockStage::delayed(stages::ENHANCE, Duration::from_secs(5), |_, _| {
        Ok(StateUpdate::new().set(channels::ENHANCED_ITEMS, json!([])))
    });
    registry.register(slow_enhance);

    let config = EngineConfig {
        node_timeout_ms: 1_000,
        ..EngineConfig::default()
    };
    let p = pipeline(config, registry, StaticProbe::available());
    let result = p.run(RunInput::new("art", "color", 2)).await;

    assert_eq!(result.status, ExecutionStatus::Degraded);
    assert_eq!(result.errors, vec!["enhance: timed out after 1000ms".to_string()]);
    assert!(result.per_node_timings_ms.contains_key("enhance"));
    // enhancement never landed, so the raw items are returned
    assert_eq!(result.items.len(), 2);
}

#[tokio::test]
async fn test_panicking_stage_is_captured() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let mut registry = harness.registry();
    registry.register(MockStage::new(stages::VALIDATE, |_, _| panic!("validator exploded")));

    let p = pipeline(EngineConfig::default(), registry, StaticProbe::available());
    let result = p.run(RunInput::new("art", "color", 2)).await;

    assert!(result.degraded);
    assert!(result.errors[0].contains("validator exploded"));
    assert_eq!(
        result.completed_nodes,
        vec!["calibrate", "generate", "enhance"]
    );
}

#[tokio::test]
async fn test_result_shape_is_identical_on_every_path() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let primary = pipeline(EngineConfig::default(), harness.registry(), StaticProbe::available())
        .run(RunInput::new("math", "sets", 3))
        .await;

    let mut registry = StageRegistry::new();
    for stage in [
        &harness.calibrate,
        &harness.generate,
        &harness.validate,
        &harness.enhance,
    ] {
        registry.register(stage.clone());
    }
    let linear = pipeline(EngineConfig::default(), registry, StaticProbe::available())
        .run(RunInput::new("math", "sets", 3))
        .await;

    let synthetic = pipeline(EngineConfig::default(), harness.registry(), StaticProbe::unavailable())
        .run(RunInput::new("math", "sets", 3))
        .await;

    assert_eq!(primary.path, ExecutionPath::Primary);
    assert_eq!(linear.path, ExecutionPath::LinearFallback);
    assert_eq!(synthetic.path, ExecutionPath::Synthetic);

    let keys = result_keys(&primary);
    assert_eq!(keys, result_keys(&linear));
    assert_eq!(keys, result_keys(&synthetic));
    for key in [
        "items",
        "qualityScore",
        "completedNodes",
        "routingDecisions",
        "perNodeTimingsMs",
        "totalTimeMs",
        "degraded",
        "errors",
    ] {
        assert!(keys.iter().any(|k| k == key), "missing {}", key);
    }
}

#[tokio::test]
async fn test_pipeline_streams_events() {
    init_logger();

    let harness = Harness::new(true, 0.8);
    let p = pipeline(EngineConfig::default(), harness.registry(), StaticProbe::available());

    let (tx, mut rx) = mpsc::channel(128);
    let result = p.run_with_events(RunInput::new("math", "sets", 3), tx).await;
    assert_eq!(result.status, ExecutionStatus::Success);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(
        events.first(),
        Some(&FlowEvent::NodeStarted {
            node: "calibrate".to_string()
        })
    );
    assert!(events.contains(&FlowEvent::Routed {
        from: "generate".to_string(),
        label: "validate_sequential".to_string(),
        target: "validate".to_string(),
    }));
    assert_eq!(
        events.last(),
        Some(&FlowEvent::Finished {
            completed: 4,
            errors: 0,
        })
    );
}

#[tokio::test]
async fn test_small_event_channel_drained_concurrently() {
    init_logger();

    let harness = Harness::new(false, 0.3);
    let p = pipeline(EngineConfig::default(), harness.registry(), StaticProbe::available());

    let (tx, mut rx) = mpsc::channel(1);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });

    let result = p.run_with_events(RunInput::new("math", "sets", 2), tx).await;
    let events = collector.await.unwrap();

    assert_eq!(harness.generate.calls(), 3);
    let routed = events
        .iter()
        .filter(|e| matches!(e, FlowEvent::Routed { .. }))
        .count();
    assert_eq!(routed, result.routing_decisions.len());
    assert!(matches!(events.last(), Some(FlowEvent::Finished { .. })));
}
