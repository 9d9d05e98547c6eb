// SPDX-License-Identifier: MIT

//! Metrics aggregator - scores a finished run and assembles its result
//!
//! Scoring is a pure function of the run report: a base score plus one
//! fixed bonus per quality signal, capped below 1.0.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::flow::config::ScoringConfig;
use crate::flow::graph::RunReport;
use crate::flow::pipeline::channels;
use crate::flow::router::Verdict;
use crate::flow::types::{ExecutionPath, ExecutionResult, ExecutionStatus};

/// Quality signals observed in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualitySignals {
    pub validation_passed: bool,
    pub no_retries: bool,
    pub path_completed: bool,
    pub concurrent_validation: bool,
}

impl QualitySignals {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            validation_passed: Verdict::from_state(&report.state).is_some_and(|v| v.passed),
            no_retries: report.state.max_visits() <= 1,
            path_completed: report.reached_terminal() && report.errors.is_empty(),
            concurrent_validation: !report.fan_outs.is_empty()
                && report.fan_outs.iter().all(|f| f.failed == 0),
        }
    }
}

/// Per-run facts the engine does not know about
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub path: ExecutionPath,
    /// Explanations recorded ahead of any node error, e.g. why a fallback ran
    pub notes: Vec<String>,
    pub total_time_ms: u64,
}

impl RunMeta {
    pub fn new(path: ExecutionPath) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            path,
            notes: Vec::new(),
            total_time_ms: 0,
        }
    }
}

/// Turns run reports into scored results
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    scoring: ScoringConfig,
    item_channels: Vec<String>,
}

impl MetricsAggregator {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self {
            scoring,
            item_channels: vec![
                channels::ENHANCED_ITEMS.to_string(),
                channels::ITEMS.to_string(),
            ],
        }
    }

    /// Channels searched, in order, for the result items
    pub fn with_item_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.item_channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn score(&self, signals: &QualitySignals) -> f64 {
        let s = &self.scoring;
        let mut score = s.base;
        if signals.validation_passed {
            score += s.validation_passed_bonus;
        }
        if signals.no_retries {
            score += s.no_retries_bonus;
        }
        if signals.path_completed {
            score += s.path_completed_bonus;
        }
        if signals.concurrent_validation {
            score += s.concurrent_validation_bonus;
        }
        score.min(s.max_score)
    }

    /// Items of the first item channel holding an array
    pub fn items(&self, report: &RunReport) -> Vec<Value> {
        self.item_channels
            .iter()
            .find_map(|channel| report.state.get(channel).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default()
    }

    pub fn assemble(&self, report: RunReport, meta: RunMeta) -> ExecutionResult {
        let signals = QualitySignals::from_report(&report);
        let quality_score = self.score(&signals);
        let items = self.items(&report);

        let mut errors = meta.notes;
        errors.extend(report.errors);

        let degraded = meta.path != ExecutionPath::Primary || !errors.is_empty();
        let status = if degraded {
            ExecutionStatus::Degraded
        } else {
            ExecutionStatus::Success
        };

        log::debug!(
            "Run {} scored {:.2} from {:?}",
            meta.run_id,
            quality_score,
            signals
        );

        let state = report.state;
        ExecutionResult {
            run_id: meta.run_id,
            started_at: meta.started_at,
            status,
            path: meta.path,
            items,
            quality_score,
            completed_nodes: state.completed().to_vec(),
            routing_decisions: state.routing_decisions().to_vec(),
            per_node_timings_ms: state.timings().clone(),
            total_time_ms: meta.total_time_ms,
            degraded,
            errors,
            state: state.to_json(),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}
