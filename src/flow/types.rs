// SPDX-License-Identifier: MIT

//! Input and result types for pipeline runs
//!
//! `RunInput` is fixed at entry and never mutated. `ExecutionResult` is the
//! only thing a caller observes, and has the same shape on every path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Requested difficulty of generated items
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Profile of the learner the content is generated for
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct LearnerProfile {
    #[serde(default)]
    pub learning_preferences: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    pub grade_level: Option<String>,
}

/// Input parameters for one run
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunInput {
    pub subject: String,
    pub topic: String,
    pub item_count: u32,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub profile: LearnerProfile,
}

impl RunInput {
    pub fn new(subject: impl Into<String>, topic: impl Into<String>, item_count: u32) -> Self {
        Self {
            subject: subject.into(),
            topic: topic.into(),
            item_count,
            difficulty: Difficulty::default(),
            profile: LearnerProfile::default(),
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_profile(mut self, profile: LearnerProfile) -> Self {
        self.profile = profile;
        self
    }
}

/// Top-level classification of a run
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Primary graph ran with no recovered errors
    Success,
    /// A result was produced, but a fallback graph ran or some stage failed
    Degraded,
    /// No node output was usable; the result carries conservative defaults
    Failed,
}

/// Which execution route produced the result
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionPath {
    Primary,
    LinearFallback,
    Synthetic,
}

/// Immutable snapshot of a finished run
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub path: ExecutionPath,
    pub items: Vec<Value>,
    pub quality_score: f64,
    pub completed_nodes: Vec<String>,
    pub routing_decisions: Vec<String>,
    pub per_node_timings_ms: BTreeMap<String, u64>,
    pub total_time_ms: u64,
    pub degraded: bool,
    pub errors: Vec<String>,
    /// Final channel values
    pub state: Value,
}

impl ExecutionResult {
    pub fn is_fallback(&self) -> bool {
        self.path != ExecutionPath::Primary
    }
}
