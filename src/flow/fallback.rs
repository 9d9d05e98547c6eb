// SPDX-License-Identifier: MIT

//! Fallback controller
//!
//! Two tiers keep a caller from ever seeing a hard failure: a compiled-in
//! linear graph replaces a primary graph that fails to build, and a synthetic
//! result replaces a run whose dependency is unreachable or whose entry
//! node failed.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::flow::config::EngineConfig;
use crate::flow::graph::{CompiledGraph, GraphBuilder, NodeSpec, END};
use crate::flow::metrics::RunMeta;
use crate::flow::state::ChannelRegistry;
use crate::flow::types::{ExecutionPath, ExecutionResult, ExecutionStatus};
use crate::stage::{GraphError, HealthProbe};

/// The graph a pipeline will run, and why it was chosen
#[derive(Debug, Clone)]
pub struct SelectedGraph {
    pub graph: Arc<CompiledGraph>,
    pub path: ExecutionPath,
    /// Set when the primary graph was replaced
    pub note: Option<String>,
}

pub struct FallbackController {
    probe: Arc<dyn HealthProbe>,
    probe_timeout: Duration,
    fallback_confidence: f64,
}

impl FallbackController {
    pub fn new(probe: Arc<dyn HealthProbe>, config: &EngineConfig) -> Self {
        Self {
            probe,
            probe_timeout: config.probe_timeout(),
            fallback_confidence: config.fallback_confidence,
        }
    }

    pub fn probe_name(&self) -> &str {
        self.probe.name()
    }

    /// Probe the dependency; a probe slower than the timeout counts as down
    pub async fn dependency_available(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.probe.check()).await {
            Ok(available) => {
                if !available {
                    log::warn!("Health probe '{}' reports unavailable", self.probe.name());
                }
                available
            }
            Err(_) => {
                log::warn!(
                    "Health probe '{}' timed out after {:?}",
                    self.probe.name(),
                    self.probe_timeout
                );
                false
            }
        }
    }

    /// Keep the primary graph if it compiled, otherwise fall back to `linear`
    pub fn select_graph(
        primary: Result<CompiledGraph, GraphError>,
        linear: Arc<CompiledGraph>,
    ) -> SelectedGraph {
        match primary {
            Ok(graph) => SelectedGraph {
                graph: Arc::new(graph),
                path: ExecutionPath::Primary,
                note: None,
            },
            Err(e) => {
                log::error!(
                    "Primary graph failed to compile ({}), using linear graph '{}'",
                    e,
                    linear.name()
                );
                SelectedGraph {
                    graph: linear,
                    path: ExecutionPath::LinearFallback,
                    note: Some(format!("primary graph unavailable, ran linear fallback: {}", e)),
                }
            }
        }
    }

    /// Chain `specs` in order with static edges, ending at `END`
    pub fn linear_graph(
        name: &str,
        specs: Vec<NodeSpec>,
        channels: ChannelRegistry,
        default_timeout: Duration,
    ) -> Result<CompiledGraph, GraphError> {
        let ids: Vec<String> = specs.iter().map(|s| s.id().to_string()).collect();
        let first = ids.first().cloned().ok_or(GraphError::MissingEntry)?;

        let mut builder = GraphBuilder::new(name)
            .default_timeout(default_timeout)
            .channels(channels)
            .entry(first);
        for spec in specs {
            builder = builder.node(spec);
        }
        for pair in ids.windows(2) {
            builder = builder.edge(pair[0].as_str(), pair[1].as_str());
        }
        if let Some(last) = ids.last() {
            builder = builder.edge(last.as_str(), END);
        }
        builder.compile()
    }

    /// Result carrying conservative defaults, in the same shape as a real run
    pub fn synthetic_result(&self, meta: RunMeta, errors: Vec<String>) -> ExecutionResult {
        let mut all_errors = meta.notes;
        all_errors.extend(errors);

        ExecutionResult {
            run_id: meta.run_id,
            started_at: meta.started_at,
            status: ExecutionStatus::Failed,
            path: ExecutionPath::Synthetic,
            items: Vec::new(),
            quality_score: self.fallback_confidence,
            completed_nodes: Vec::new(),
            routing_decisions: Vec::new(),
            per_node_timings_ms: BTreeMap::new(),
            total_time_ms: meta.total_time_ms,
            degraded: true,
            errors: all_errors,
            state: Value::Object(Map::new()),
        }
    }
}
