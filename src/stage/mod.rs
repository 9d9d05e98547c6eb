// SPDX-License-Identifier: MIT

//! Stage module - the contract between the engine and the units it runs
//!
//! This module provides:
//! - `Stage` - an opaque processing unit that reads state and returns a partial update
//! - `HealthProbe` - availability check for the external dependency stages rely on
//! - `FlowEvent` - progress events emitted while a graph executes

mod error;
mod probe;

pub use error::{FlowError, GraphError, StageError, StateError};
pub use probe::{HealthProbe, HttpHealthProbe, StaticProbe};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::flow::state::{StateUpdate, WorkflowState};

/// Core stage trait for every processing unit in a pipeline
///
/// A stage sees a read-only view of the workflow state and returns the
/// channel writes it wants applied. It never mutates state itself.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Returns the stage name (its key in a `StageRegistry`)
    fn name(&self) -> &str;

    /// Process the current state into a partial update
    async fn process(&self, state: &WorkflowState) -> Result<StateUpdate, StageError>;
}

/// Progress events emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FlowEvent {
    NodeStarted {
        node: String,
    },
    NodeCompleted {
        node: String,
        elapsed_ms: u64,
    },
    NodeFailed {
        node: String,
        error: String,
        elapsed_ms: u64,
    },
    Routed {
        from: String,
        label: String,
        target: String,
    },
    BudgetExhausted {
        from: String,
        label: String,
        substitute: String,
    },
    Finished {
        completed: usize,
        errors: usize,
    },
}
