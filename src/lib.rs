// SPDX-License-Identifier: MIT

//! Workflow orchestration for multi-stage content-generation pipelines.
//!
//! `stage` holds what a stage author needs: the `Stage` trait, errors and
//! health probes. `flow` holds the engine: channels, graphs, scheduling,
//! fallbacks and scoring.

pub mod flow;
pub mod stage;

pub use flow::config::EngineConfig;
pub use flow::pipeline::ContentPipeline;
pub use flow::registry::StageRegistry;
pub use flow::types::{ExecutionResult, RunInput};
pub use stage::{HealthProbe, Stage};
