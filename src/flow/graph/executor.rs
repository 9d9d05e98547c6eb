// SPDX-License-Identifier: MIT

//! Graph workflow executor
//!
//! Walks a compiled graph from its entry to `END`. After every node the
//! delta is merged through the channel reducers; a failed node is recorded
//! and skipped over, except the entry node, whose failure ends the run.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::types::{CompiledGraph, CompiledNode, Edge, FanOut, Vertex, END};
use crate::flow::config::EngineConfig;
use crate::flow::node::{NodeExecutor, NodeOutcome};
use crate::flow::state::WorkflowState;
use crate::stage::{FlowEvent, StageError};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Reached `END`
    Completed,
    /// The entry vertex failed; nothing downstream ran
    EntryFailed(String),
    /// Stopped early by the step cap, an exhausted static edge, or a router bug
    Aborted(String),
}

/// Outcome of one fan-out execution
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutRecord {
    pub id: String,
    pub succeeded: usize,
    pub failed: usize,
}

/// Everything the engine knows once a run stops
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: WorkflowState,
    pub outcome: RunOutcome,
    pub errors: Vec<String>,
    pub fan_outs: Vec<FanOutRecord>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn reached_terminal(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

struct Events(Option<mpsc::Sender<FlowEvent>>);

impl Events {
    async fn emit(&self, event: FlowEvent) {
        if let Some(tx) = &self.0 {
            // A dropped receiver only means nobody is listening
            let _ = tx.send(event).await;
        }
    }
}

/// Graph scheduler
#[derive(Debug, Clone)]
pub struct Engine {
    retry_budget: u32,
    max_steps: u32,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_limits(config.retry_budget, config.max_steps)
    }

    pub fn with_limits(retry_budget: u32, max_steps: u32) -> Self {
        Self {
            retry_budget: retry_budget.max(1),
            max_steps: max_steps.max(1),
        }
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// Run `graph` to completion from `state`
    pub async fn execute(&self, graph: &CompiledGraph, state: WorkflowState) -> RunReport {
        self.run(graph, state, Events(None)).await
    }

    /// Like `execute`, streaming progress events to `tx`.
    ///
    /// Each event is sent with backpressure, so the receiver must be drained
    /// concurrently (or sized for the whole run). Dropping the receiver is
    /// fine: later events are discarded.
    pub async fn execute_with_events(
        &self,
        graph: &CompiledGraph,
        state: WorkflowState,
        tx: mpsc::Sender<FlowEvent>,
    ) -> RunReport {
        self.run(graph, state, Events(Some(tx))).await
    }

    async fn run(&self, graph: &CompiledGraph, mut state: WorkflowState, events: Events) -> RunReport {
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut fan_outs = Vec::new();
        let mut outcome = RunOutcome::Completed;
        let mut current = graph.entry().to_string();
        let mut steps = 0u32;

        log::info!("Running graph '{}' from '{}'", graph.name(), current);

        while current != END {
            steps += 1;
            if steps > self.max_steps {
                let msg = format!("step limit of {} reached at '{}'", self.max_steps, current);
                log::error!("Graph '{}': {}", graph.name(), msg);
                errors.push(msg.clone());
                outcome = RunOutcome::Aborted(msg);
                break;
            }

            let succeeded = match graph.vertex(&current) {
                Some(Vertex::Node(node)) => {
                    self.step_node(node, &mut state, &mut errors, &events).await
                }
                Some(Vertex::FanOut(group)) => {
                    let record = self
                        .step_fan_out(graph, group, &mut state, &mut errors, &events)
                        .await;
                    let ok = record.succeeded > 0;
                    fan_outs.push(record);
                    ok
                }
                None => {
                    let msg = format!("unknown vertex '{}'", current);
                    errors.push(msg.clone());
                    outcome = RunOutcome::Aborted(msg);
                    break;
                }
            };

            if steps == 1 && !succeeded {
                let msg = state
                    .error()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("entry '{}' failed", current));
                log::error!("Entry '{}' failed, abandoning graph run", current);
                outcome = RunOutcome::EntryFailed(msg);
                break;
            }

            match self.next(graph, &current, &mut state, &mut errors, &events).await {
                Ok(next) => current = next,
                Err(msg) => {
                    log::error!("Graph '{}': {}", graph.name(), msg);
                    errors.push(msg.clone());
                    outcome = RunOutcome::Aborted(msg);
                    break;
                }
            }
        }

        events
            .emit(FlowEvent::Finished {
                completed: state.completed().len(),
                errors: errors.len(),
            })
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Graph '{}' finished in {}ms: {} nodes completed, {} errors",
            graph.name(),
            elapsed_ms,
            state.completed().len(),
            errors.len()
        );

        RunReport {
            state,
            outcome,
            errors,
            fan_outs,
            elapsed_ms,
        }
    }

    async fn step_node(
        &self,
        node: &CompiledNode,
        state: &mut WorkflowState,
        errors: &mut Vec<String>,
        events: &Events,
    ) -> bool {
        state.record_visit(&node.id);
        events
            .emit(FlowEvent::NodeStarted {
                node: node.id.clone(),
            })
            .await;

        let outcome = NodeExecutor::run(node, Arc::new(state.clone())).await;
        self.absorb(outcome, state, errors, events).await
    }

    /// Launch every member on one snapshot, wait for all, merge in declared order
    async fn step_fan_out(
        &self,
        graph: &CompiledGraph,
        group: &FanOut,
        state: &mut WorkflowState,
        errors: &mut Vec<String>,
        events: &Events,
    ) -> FanOutRecord {
        let started = Instant::now();
        state.record_visit(&group.id);

        let members: Vec<&CompiledNode> = group
            .members
            .iter()
            .filter_map(|id| graph.node(id))
            .collect();
        for node in &members {
            state.record_visit(&node.id);
            events
                .emit(FlowEvent::NodeStarted {
                    node: node.id.clone(),
                })
                .await;
        }

        log::info!(
            "Fan-out '{}': executing {} nodes: {:?}",
            group.id,
            members.len(),
            group.members
        );

        let snapshot = Arc::new(state.clone());
        let outcomes = join_all(
            members
                .iter()
                .map(|node| NodeExecutor::run(node, snapshot.clone())),
        )
        .await;

        let mut record = FanOutRecord {
            id: group.id.clone(),
            succeeded: 0,
            failed: 0,
        };
        for outcome in outcomes {
            if self.absorb(outcome, state, errors, events).await {
                record.succeeded += 1;
            } else {
                record.failed += 1;
            }
        }

        state.record_timing(&group.id, started.elapsed().as_millis() as u64);
        record
    }

    /// Merge a node outcome into state; returns whether the node succeeded
    async fn absorb(
        &self,
        outcome: NodeOutcome,
        state: &mut WorkflowState,
        errors: &mut Vec<String>,
        events: &Events,
    ) -> bool {
        state.record_timing(&outcome.node, outcome.elapsed_ms);

        let applied = outcome
            .result
            .and_then(|update| state.apply(update).map_err(StageError::from));

        match applied {
            Ok(()) => {
                state.record_completion(&outcome.node);
                events
                    .emit(FlowEvent::NodeCompleted {
                        node: outcome.node,
                        elapsed_ms: outcome.elapsed_ms,
                    })
                    .await;
                true
            }
            Err(e) => {
                let msg = format!("{}: {}", outcome.node, e);
                state.set_error(Some(msg.clone()));
                errors.push(msg);
                events
                    .emit(FlowEvent::NodeFailed {
                        node: outcome.node,
                        error: e.to_string(),
                        elapsed_ms: outcome.elapsed_ms,
                    })
                    .await;
                false
            }
        }
    }

    fn exhausted(&self, state: &WorkflowState, target: &str) -> bool {
        target != END && state.visits(target) >= self.retry_budget
    }

    /// Pick the successor of `from`, applying the retry budget
    async fn next(
        &self,
        graph: &CompiledGraph,
        from: &str,
        state: &mut WorkflowState,
        errors: &mut Vec<String>,
        events: &Events,
    ) -> Result<String, String> {
        let table = match graph.edge(from) {
            Some(Edge::Static(to)) => {
                if self.exhausted(state, to) {
                    return Err(format!(
                        "visit budget exhausted for '{}' on static edge from '{}'",
                        to, from
                    ));
                }
                return Ok(to.clone());
            }
            Some(Edge::Conditional(table)) => table,
            None => return Err(format!("no outgoing edge from '{}'", from)),
        };

        let chosen = (table.router)(&*state);
        let label = if table.routes.contains_key(&chosen) {
            chosen
        } else {
            let msg = format!(
                "router '{}' returned undeclared label '{}'",
                table.router_name, chosen
            );
            match &table.exhausted {
                Some(fallback) => {
                    log::error!("{}, using '{}'", msg, fallback);
                    errors.push(msg);
                    fallback.clone()
                }
                None => return Err(msg),
            }
        };

        let mut target = table.target(&label).unwrap_or(END);
        let mut decision = format!("{}:{}", from, label);

        if table.retry.contains(&label) && self.exhausted(state, target) {
            if let Some(substitute) = &table.exhausted {
                log::warn!(
                    "Retry budget of {} exhausted for '{}', routing '{}' instead of '{}'",
                    self.retry_budget,
                    target,
                    substitute,
                    label
                );
                events
                    .emit(FlowEvent::BudgetExhausted {
                        from: from.to_string(),
                        label: label.clone(),
                        substitute: substitute.clone(),
                    })
                    .await;
                decision = format!("{}:{}->{}", from, label, substitute);
                target = table.target(substitute).unwrap_or(END);
            }
        }

        log::info!("Routing {} -> {}", decision, target);
        state.record_route(decision);
        events
            .emit(FlowEvent::Routed {
                from: from.to_string(),
                label,
                target: target.to_string(),
            })
            .await;

        if self.exhausted(state, target) {
            return Err(format!("visit budget exhausted for '{}'", target));
        }
        Ok(target.to_string())
    }
}
