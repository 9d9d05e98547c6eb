// SPDX-License-Identifier: MIT

//! Standard routers of the content pipeline
//!
//! Routers are pure functions over state. Each returns one label from a
//! closed set; the graph maps labels to nodes, and the engine enforces the
//! retry budget on top of whatever a router picks.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::flow::config::RoutingConfig;
use crate::flow::graph::RouterFn;
use crate::flow::pipeline::{channels, stages};
use crate::flow::state::WorkflowState;

/// Labels returned by the standard routers
pub mod labels {
    pub const RETRY: &str = "retry";
    pub const VALIDATE_SEQUENTIAL: &str = "validate_sequential";
    pub const VALIDATE_PARALLEL: &str = "validate_parallel";
    pub const FINISH: &str = "finish";
    pub const REGENERATE: &str = "regenerate";
    pub const ENHANCE: &str = "enhance";
}

/// Validation outcome as the routers and the scorer see it
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    #[serde(default)]
    pub quality: f64,
}

impl Verdict {
    /// Read the verdict from state.
    ///
    /// The sequential `validation` channel wins when present. Otherwise the
    /// per-validator reports of a parallel run are combined: passed only if
    /// every report passed, quality is the lowest reported.
    pub fn from_state(state: &WorkflowState) -> Option<Verdict> {
        if let Some(verdict) = state.get_as::<Verdict>(channels::VALIDATION) {
            return Some(verdict);
        }

        let reports = match state.get(channels::VALIDATION_REPORTS) {
            Some(Value::Object(reports)) if !reports.is_empty() => reports,
            _ => return None,
        };

        let mut combined = Verdict {
            passed: true,
            quality: f64::INFINITY,
        };
        for report in reports.values() {
            let verdict: Verdict = serde_json::from_value(report.clone()).ok()?;
            combined.passed &= verdict.passed;
            combined.quality = combined.quality.min(verdict.quality);
        }
        Some(combined)
    }
}

fn has_items(state: &WorkflowState) -> bool {
    state
        .get(channels::ITEMS)
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty())
}

/// Decide how to continue after generation.
///
/// An attempt that produced nothing asks for a retry. Larger requests
/// validate in parallel, smaller ones sequentially.
pub fn route_after_generation(state: &WorkflowState, config: &RoutingConfig) -> &'static str {
    if state.visits(stages::GENERATE) > 0 && !has_items(state) {
        labels::RETRY
    } else if state.input().item_count > config.parallel_item_threshold {
        labels::VALIDATE_PARALLEL
    } else {
        labels::VALIDATE_SEQUENTIAL
    }
}

/// Decide how to continue after validation
pub fn route_after_validation(
    state: &WorkflowState,
    config: &RoutingConfig,
    retry_budget: u32,
) -> &'static str {
    match Verdict::from_state(state) {
        Some(v) if v.quality > config.finish_quality_threshold => labels::FINISH,
        Some(v) if !v.passed && state.visits(stages::GENERATE) < retry_budget => {
            labels::REGENERATE
        }
        _ => labels::ENHANCE,
    }
}

pub fn post_generation(config: RoutingConfig) -> RouterFn {
    Arc::new(move |state: &WorkflowState| route_after_generation(state, &config).to_string())
}

pub fn post_validation(config: RoutingConfig, retry_budget: u32) -> RouterFn {
    Arc::new(move |state: &WorkflowState| route_after_validation(state, &config, retry_budget).to_string())
}
