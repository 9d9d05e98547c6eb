// SPDX-License-Identifier: MIT

//! Content pipeline - the single entry point callers use
//!
//! A pipeline owns the stage registry, compiles its graph once on first use
//! and runs it per request. Every runtime failure ends up inside the
//! returned `ExecutionResult`; only construction can fail with an error.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::flow::config::EngineConfig;
use crate::flow::fallback::{FallbackController, SelectedGraph};
use crate::flow::graph::{
    CompiledGraph, Engine, GraphBuilder, GraphDefinition, NodeSpec, RunOutcome,
};
use crate::flow::metrics::{MetricsAggregator, RunMeta};
use crate::flow::registry::StageRegistry;
use crate::flow::router;
use crate::flow::state::{ChannelDef, ChannelRegistry, FieldType, ReducerType, WorkflowState};
use crate::flow::types::{ExecutionPath, ExecutionResult, RunInput};
use crate::stage::{FlowError, FlowEvent, GraphError, HealthProbe};

/// Registered stage names of the standard pipeline
pub mod stages {
    pub const CALIBRATE: &str = "calibrate";
    pub const GENERATE: &str = "generate";
    pub const VALIDATE: &str = "validate";
    pub const VALIDATE_ACCURACY: &str = "validate_accuracy";
    pub const VALIDATE_ALIGNMENT: &str = "validate_alignment";
    pub const ENHANCE: &str = "enhance";
}

/// Channels of the standard pipeline
pub mod channels {
    pub const CALIBRATION: &str = "calibration";
    pub const ITEMS: &str = "items";
    pub const VALIDATION: &str = "validation";
    /// Per-validator verdicts of a parallel validation, keyed by validator
    pub const VALIDATION_REPORTS: &str = "validation_reports";
    pub const ENHANCED_ITEMS: &str = "enhanced_items";
    pub const NOTES: &str = "notes";
}

/// Router names the standard graph refers to
pub mod routers {
    pub const POST_GENERATION: &str = "post_generation";
    pub const POST_VALIDATION: &str = "post_validation";
}

/// Stages the linear fallback runs, in order
pub const LINEAR_STAGES: [&str; 4] = [
    stages::CALIBRATE,
    stages::GENERATE,
    stages::VALIDATE,
    stages::ENHANCE,
];

/// The primary graph
pub const STANDARD_PIPELINE: &str = r#"
name: standard_pipeline
description: Calibrate, generate, validate and enhance a set of assessment items
entry: calibrate

channels:
  calibration:
    type: object
  items:
    type: array
  validation:
    type: object
  validation_reports:
    type: object
    reducer: merge
  enhanced_items:
    type: array
  notes:
    type: array
    reducer: append

nodes:
  - id: calibrate
    writes: [calibration, notes]
  - id: generate
    writes: [items, notes]
  - id: validate
    writes: [validation, notes]
  - id: validate_accuracy
    writes: [validation_reports, notes]
  - id: validate_alignment
    writes: [validation_reports, notes]
  - id: enhance
    writes: [enhanced_items, notes]

fan_outs:
  - id: validate_parallel
    members: [validate_accuracy, validate_alignment]

edges:
  - from: calibrate
    to: generate
  - from: generate
    router: post_generation
    routes:
      retry: generate
      validate_sequential: validate
      validate_parallel: validate_parallel
    retry: [retry]
    exhausted: validate_sequential
  - from: validate
    router: post_validation
    routes:
      finish: __end__
      regenerate: generate
      enhance: enhance
    retry: [regenerate]
    exhausted: enhance
  - from: validate_parallel
    router: post_validation
    routes:
      finish: __end__
      regenerate: generate
      enhance: enhance
    retry: [regenerate]
    exhausted: enhance
  - from: enhance
    to: __end__
"#;

/// Channel set shared by the primary and the linear graph
pub fn standard_channels() -> ChannelRegistry {
    let mut registry = ChannelRegistry::new();
    let defs = [
        (channels::CALIBRATION, FieldType::Object, ReducerType::Overwrite),
        (channels::ITEMS, FieldType::Array, ReducerType::Overwrite),
        (channels::VALIDATION, FieldType::Object, ReducerType::Overwrite),
        (channels::VALIDATION_REPORTS, FieldType::Object, ReducerType::Merge),
        (channels::ENHANCED_ITEMS, FieldType::Array, ReducerType::Overwrite),
        (channels::NOTES, FieldType::Array, ReducerType::Append),
    ];
    for (name, field_type, reducer) in defs {
        registry.register_def(name, ChannelDef::new(field_type, reducer));
    }
    registry
}

fn linear_writes(stage: &str) -> [&'static str; 2] {
    let owned = match stage {
        stages::CALIBRATE => channels::CALIBRATION,
        stages::GENERATE => channels::ITEMS,
        stages::VALIDATE => channels::VALIDATION,
        _ => channels::ENHANCED_ITEMS,
    };
    [owned, channels::NOTES]
}

/// Multi-stage content pipeline with built-in fallbacks
pub struct ContentPipeline {
    config: EngineConfig,
    registry: StageRegistry,
    definition: GraphDefinition,
    engine: Engine,
    fallback: FallbackController,
    metrics: MetricsAggregator,
    linear: Arc<CompiledGraph>,
    selected: OnceCell<SelectedGraph>,
}

impl ContentPipeline {
    /// Create a pipeline running the standard graph.
    ///
    /// Fails only on an invalid config or when a stage the linear fallback
    /// needs is missing from `registry`.
    pub fn new(
        config: EngineConfig,
        mut registry: StageRegistry,
        probe: Arc<dyn HealthProbe>,
    ) -> Result<Self, FlowError> {
        config.validate()?;

        let mut specs = Vec::with_capacity(LINEAR_STAGES.len());
        for name in LINEAR_STAGES {
            let stage = registry
                .stage(name)
                .ok_or_else(|| GraphError::UnknownStage(name.to_string()))?;
            specs.push(NodeSpec::new(name, stage).writes(linear_writes(name)));
        }

        if !registry.has_router(routers::POST_GENERATION) {
            let route = router::post_generation(config.routing);
            registry.register_router(routers::POST_GENERATION, move |s: &WorkflowState| route(s));
        }
        if !registry.has_router(routers::POST_VALIDATION) {
            let route = router::post_validation(config.routing, config.retry_budget);
            registry.register_router(routers::POST_VALIDATION, move |s: &WorkflowState| route(s));
        }

        let linear = FallbackController::linear_graph(
            "linear_fallback",
            specs,
            standard_channels(),
            config.node_timeout(),
        )?;
        let definition: GraphDefinition = serde_yaml::from_str(STANDARD_PIPELINE)?;

        Ok(Self {
            engine: Engine::new(&config),
            fallback: FallbackController::new(probe, &config),
            metrics: MetricsAggregator::new(config.scoring),
            linear: Arc::new(linear),
            selected: OnceCell::new(),
            definition,
            registry,
            config,
        })
    }

    /// Replace the primary graph with one declared in YAML
    pub fn with_definition(mut self, yaml: &str) -> Result<Self, FlowError> {
        self.definition = serde_yaml::from_str(yaml)?;
        self.selected = OnceCell::new();
        Ok(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    /// The graph runs execute, compiled on first use
    pub fn graph(&self) -> &SelectedGraph {
        self.selected.get_or_init(|| {
            FallbackController::select_graph(self.compile_primary(), self.linear.clone())
        })
    }

    fn compile_primary(&self) -> Result<CompiledGraph, GraphError> {
        GraphBuilder::from_definition(&self.definition, &self.registry, self.config.node_timeout())?
            .compile()
    }

    /// Run the pipeline for one request
    pub async fn run(&self, input: RunInput) -> ExecutionResult {
        self.run_inner(input, None).await
    }

    /// Run the pipeline, streaming progress events to `tx`.
    ///
    /// Drain the receiver while the run is in flight; a full channel holds
    /// the run until there is room.
    pub async fn run_with_events(
        &self,
        input: RunInput,
        tx: mpsc::Sender<FlowEvent>,
    ) -> ExecutionResult {
        self.run_inner(input, Some(tx)).await
    }

    async fn run_inner(&self, input: RunInput, tx: Option<mpsc::Sender<FlowEvent>>) -> ExecutionResult {
        let started = Instant::now();
        let mut meta = RunMeta::new(ExecutionPath::Primary);

        log::info!(
            "Starting run {} for {}/{} ({} items)",
            meta.run_id,
            input.subject,
            input.topic,
            input.item_count
        );

        if !self.fallback.dependency_available().await {
            meta.path = ExecutionPath::Synthetic;
            meta.notes.push(format!(
                "{} unavailable, returned conservative defaults without running the graph",
                self.fallback.probe_name()
            ));
            meta.total_time_ms = started.elapsed().as_millis() as u64;
            return self.fallback.synthetic_result(meta, Vec::new());
        }

        let selected = self.graph();
        meta.path = selected.path;
        if let Some(note) = &selected.note {
            meta.notes.push(note.clone());
        }

        let state = WorkflowState::new(selected.graph.channels(), input);
        let report = match tx {
            Some(tx) => {
                self.engine
                    .execute_with_events(&selected.graph, state, tx)
                    .await
            }
            None => self.engine.execute(&selected.graph, state).await,
        };
        meta.total_time_ms = started.elapsed().as_millis() as u64;

        if let RunOutcome::EntryFailed(reason) = &report.outcome {
            log::warn!("Run {} lost its entry node: {}", meta.run_id, reason);
            meta.path = ExecutionPath::Synthetic;
            meta.notes
                .push("entry node failed, returned conservative defaults".to_string());
            return self.fallback.synthetic_result(meta, report.errors);
        }

        let result = self.metrics.assemble(report, meta);
        log::info!(
            "Run {} finished: {:?} via {:?}, score {:.2}, {}ms",
            result.run_id,
            result.status,
            result.path,
            result.quality_score,
            result.total_time_ms
        );
        result
    }
}
