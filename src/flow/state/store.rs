// SPDX-License-Identifier: MIT

//! Runtime state storage for workflow execution

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::schema::ChannelRegistry;
use super::update::StateUpdate;
use crate::flow::types::RunInput;
use crate::stage::StateError;

/// Runtime workflow state: immutable input, channel values, and engine bookkeeping
#[derive(Debug, Clone)]
pub struct WorkflowState {
    input: Arc<RunInput>,
    registry: Arc<ChannelRegistry>,
    channels: HashMap<String, Value>,
    completed: Vec<String>,
    timings: BTreeMap<String, u64>,
    routing: Vec<String>,
    visits: HashMap<String, u32>,
    error: Option<String>,
}

impl WorkflowState {
    /// Create fresh state for one run, seeded with channel defaults
    pub fn new(registry: Arc<ChannelRegistry>, input: RunInput) -> Self {
        Self {
            input: Arc::new(input),
            channels: registry.defaults(),
            registry,
            completed: Vec::new(),
            timings: BTreeMap::new(),
            routing: Vec::new(),
            visits: HashMap::new(),
            error: None,
        }
    }

    pub fn input(&self) -> &RunInput {
        &self.input
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Get a channel value
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.channels.get(channel)
    }

    /// Get a channel value deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, channel: &str) -> Option<T> {
        self.get(channel)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a nested value using dot notation (e.g., "validation.quality")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.channels.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Apply an update through the channel reducers.
    ///
    /// All writes are merged first and committed together, so a rejected
    /// update leaves every channel untouched.
    pub fn apply(&mut self, update: StateUpdate) -> Result<(), StateError> {
        let mut staged: HashMap<String, Value> = HashMap::new();
        for (channel, delta) in update {
            let current = staged.get(&channel).or_else(|| self.channels.get(&channel));
            let merged = self.registry.merge(&channel, current, delta)?;
            staged.insert(channel, merged);
        }
        self.channels.extend(staged);
        Ok(())
    }

    /// Channel values as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.channels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Get all channel names that currently hold a value
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.channels.keys()
    }

    /// Nodes that completed successfully, in completion order
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    /// Accumulated elapsed milliseconds per executed node
    pub fn timings(&self) -> &BTreeMap<String, u64> {
        &self.timings
    }

    /// Routing decisions taken so far
    pub fn routing_decisions(&self) -> &[String] {
        &self.routing
    }

    /// How many times a node (or fan-out group) has been executed this run
    pub fn visits(&self, node: &str) -> u32 {
        self.visits.get(node).copied().unwrap_or(0)
    }

    /// Highest visit count of any node
    pub fn max_visits(&self) -> u32 {
        self.visits.values().copied().max().unwrap_or(0)
    }

    /// Most recent stage error, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn record_visit(&mut self, node: &str) -> u32 {
        let count = self.visits.entry(node.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub(crate) fn record_timing(&mut self, node: &str, elapsed_ms: u64) {
        *self.timings.entry(node.to_string()).or_insert(0) += elapsed_ms;
    }

    pub(crate) fn record_completion(&mut self, node: &str) {
        self.completed.push(node.to_string());
    }

    pub(crate) fn record_route(&mut self, decision: String) {
        self.routing.push(decision);
    }

    pub(crate) fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }
}
