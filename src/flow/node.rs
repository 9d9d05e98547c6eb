// SPDX-License-Identifier: MIT

//! Node executor - runs exactly one stage safely
//!
//! The stage runs on its own task against a shared snapshot, bounded by the
//! node's timeout. Failures, timeouts and panics all come back as a
//! `StageError` alongside the elapsed time; nothing propagates past here.

use std::any::Any;
use std::sync::Arc;
use tokio::time::Instant;

use crate::flow::graph::CompiledNode;
use crate::flow::state::{StateUpdate, WorkflowState};
use crate::stage::StageError;

/// Result of one node invocation
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub node: String,
    pub result: Result<StateUpdate, StageError>,
    pub elapsed_ms: u64,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Executes compiled nodes
pub struct NodeExecutor;

impl NodeExecutor {
    /// Run `node` against a read-only snapshot of the state
    pub async fn run(node: &CompiledNode, snapshot: Arc<WorkflowState>) -> NodeOutcome {
        log::info!("Executing node: {}", node.id);
        let started = Instant::now();

        let stage = node.stage.clone();
        let handle = tokio::spawn(async move { stage.process(&snapshot).await });
        let abort = handle.abort_handle();

        let result = match tokio::time::timeout(node.timeout, handle).await {
            Ok(Ok(Ok(update))) => update
                .check_writes(&node.id, &node.writes)
                .map(|_| update)
                .map_err(StageError::from),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                Err(StageError::Panicked(message))
            }
            Err(_) => {
                abort.abort();
                Err(StageError::Timeout {
                    ms: node.timeout.as_millis() as u64,
                })
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(update) => log::info!(
                "Node {} completed in {}ms with {} writes",
                node.id,
                elapsed_ms,
                update.len()
            ),
            Err(e) => log::error!("Node {} failed after {}ms: {}", node.id, elapsed_ms, e),
        }

        NodeOutcome {
            node: node.id.clone(),
            result,
            elapsed_ms,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
