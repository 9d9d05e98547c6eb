// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Every field has a default. Values can come from YAML (see `ConfigLoader`)
//! and from `QUIZFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::stage::FlowError;

/// Thresholds used by the standard routers
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Validation quality above which the run finishes without enhancement
    pub finish_quality_threshold: f64,
    /// Requested item count above which validation fans out
    pub parallel_item_threshold: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            finish_quality_threshold: 0.95,
            parallel_item_threshold: 5,
        }
    }
}

/// Weights of the confidence score
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub base: f64,
    pub validation_passed_bonus: f64,
    pub no_retries_bonus: f64,
    pub path_completed_bonus: f64,
    pub concurrent_validation_bonus: f64,
    /// Cap on the total; kept below 1.0
    pub max_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base: 0.5,
            validation_passed_bonus: 0.2,
            no_retries_bonus: 0.1,
            path_completed_bonus: 0.1,
            concurrent_validation_bonus: 0.05,
            max_score: 0.95,
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum executions of any single node in one run
    pub retry_budget: u32,
    /// Hard cap on scheduling steps in one run
    pub max_steps: u32,
    /// Timeout for nodes that do not declare their own
    pub node_timeout_ms: u64,
    /// Timeout for the pre-run health probe
    pub probe_timeout_ms: u64,
    /// Score reported by synthetic fallback results
    pub fallback_confidence: f64,
    pub routing: RoutingConfig,
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            max_steps: 100,
            node_timeout_ms: 30_000,
            probe_timeout_ms: 2_000,
            fallback_confidence: 0.6,
            routing: RoutingConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `.env` and `QUIZFLOW_*` environment variables
    pub fn from_env() -> Result<Self, FlowError> {
        dotenv::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment, in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("QUIZFLOW_RETRY_BUDGET") {
            self.retry_budget = parse_var("QUIZFLOW_RETRY_BUDGET", &raw)?;
        }
        if let Some(raw) = lookup("QUIZFLOW_MAX_STEPS") {
            self.max_steps = parse_var("QUIZFLOW_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("QUIZFLOW_NODE_TIMEOUT_MS") {
            self.node_timeout_ms = parse_var("QUIZFLOW_NODE_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("QUIZFLOW_PROBE_TIMEOUT_MS") {
            self.probe_timeout_ms = parse_var("QUIZFLOW_PROBE_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("QUIZFLOW_FINISH_THRESHOLD") {
            self.routing.finish_quality_threshold = parse_var("QUIZFLOW_FINISH_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("QUIZFLOW_PARALLEL_THRESHOLD") {
            self.routing.parallel_item_threshold = parse_var("QUIZFLOW_PARALLEL_THRESHOLD", &raw)?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.retry_budget == 0 {
            return Err(FlowError::config("retry_budget must be at least 1"));
        }
        if self.max_steps == 0 {
            return Err(FlowError::config("max_steps must be at least 1"));
        }
        if self.node_timeout_ms == 0 {
            return Err(FlowError::config("node_timeout_ms must be at least 1"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(FlowError::config("probe_timeout_ms must be at least 1"));
        }
        let unit = [
            ("fallback_confidence", self.fallback_confidence),
            (
                "routing.finish_quality_threshold",
                self.routing.finish_quality_threshold,
            ),
            ("scoring.base", self.scoring.base),
            (
                "scoring.validation_passed_bonus",
                self.scoring.validation_passed_bonus,
            ),
            ("scoring.no_retries_bonus", self.scoring.no_retries_bonus),
            ("scoring.path_completed_bonus", self.scoring.path_completed_bonus),
            (
                "scoring.concurrent_validation_bonus",
                self.scoring.concurrent_validation_bonus,
            ),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(FlowError::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(0.0..1.0).contains(&self.scoring.max_score) {
            return Err(FlowError::config(format!(
                "scoring.max_score must be within [0, 1), got {}",
                self.scoring.max_score
            )));
        }
        Ok(())
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, FlowError> {
    raw.trim()
        .parse()
        .map_err(|_| FlowError::config(format!("invalid value for {}: '{}'", key, raw)))
}
