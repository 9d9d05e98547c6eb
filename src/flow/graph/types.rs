// SPDX-License-Identifier: MIT

//! Graph workflow type definitions
//!
//! Two layers live here: the serde definitions a graph is declared with
//! (`GraphDefinition` and friends), and the compiled, validated form the
//! engine walks (`CompiledGraph`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::flow::state::{ChannelRegistry, StateSchema, WorkflowState};
use crate::stage::Stage;

/// Terminal marker; routing here ends the run
pub const END: &str = "__end__";

/// Router: inspects state and returns one label from its route table
pub type RouterFn = Arc<dyn Fn(&WorkflowState) -> String + Send + Sync>;

/// A graph workflow definition
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GraphDefinition {
    /// Name of the workflow
    pub name: String,
    /// Description of the workflow
    #[serde(default)]
    pub description: String,
    /// Node (or fan-out) the run starts at
    pub entry: String,
    /// Channel schema
    #[serde(default)]
    pub channels: StateSchema,
    /// Nodes in the graph
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    /// Groups of nodes executed concurrently
    #[serde(default)]
    pub fan_outs: Vec<FanOutDefinition>,
    /// Outgoing edge of every node
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

/// A node in the workflow graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NodeDefinition {
    /// Unique identifier for this node
    pub id: String,
    /// Registered stage to run; defaults to the node id
    pub stage: Option<String>,
    /// Per-node timeout override
    pub timeout_ms: Option<u64>,
    /// Channels this node may write
    #[serde(default)]
    pub writes: Vec<String>,
}

impl NodeDefinition {
    pub fn stage_name(&self) -> &str {
        self.stage.as_deref().unwrap_or(&self.id)
    }
}

/// Concurrent group: members run on the same snapshot, then join
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FanOutDefinition {
    pub id: String,
    pub members: Vec<String>,
}

/// Outgoing edge of a node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EdgeDefinition {
    /// Router-selected successor
    Conditional {
        from: String,
        router: String,
        routes: BTreeMap<String, String>,
        /// Labels that loop back and count against the retry budget
        #[serde(default)]
        retry: Vec<String>,
        /// Label used once a retry label's target is out of budget
        exhausted: Option<String>,
    },
    /// Unconditional successor
    Static { from: String, to: String },
}

impl EdgeDefinition {
    pub fn from(&self) -> &str {
        match self {
            EdgeDefinition::Conditional { from, .. } | EdgeDefinition::Static { from, .. } => from,
        }
    }
}

/// Compiled node ready for execution
#[derive(Clone)]
pub struct CompiledNode {
    pub id: String,
    pub stage: Arc<dyn Stage>,
    pub timeout: Duration,
    pub writes: Vec<String>,
}

impl std::fmt::Debug for CompiledNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledNode")
            .field("id", &self.id)
            .field("stage", &self.stage.name())
            .field("timeout", &self.timeout)
            .field("writes", &self.writes)
            .finish()
    }
}

/// Compiled fan-out group
#[derive(Debug, Clone, PartialEq)]
pub struct FanOut {
    pub id: String,
    pub members: Vec<String>,
}

/// Route table of a conditional edge
#[derive(Clone)]
pub struct RouteTable {
    pub router_name: String,
    pub router: RouterFn,
    pub routes: BTreeMap<String, String>,
    pub retry: BTreeSet<String>,
    pub exhausted: Option<String>,
}

impl RouteTable {
    pub fn new(router_name: impl Into<String>, router: RouterFn) -> Self {
        Self {
            router_name: router_name.into(),
            router,
            routes: BTreeMap::new(),
            retry: BTreeSet::new(),
            exhausted: None,
        }
    }

    /// Ordinary route
    pub fn route(mut self, label: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.insert(label.into(), target.into());
        self
    }

    /// Route that loops back and is subject to the retry budget
    pub fn retry_route(mut self, label: impl Into<String>, target: impl Into<String>) -> Self {
        let label = label.into();
        self.retry.insert(label.clone());
        self.routes.insert(label, target.into());
        self
    }

    /// Label substituted when a retry route is out of budget
    pub fn exhausted(mut self, label: impl Into<String>) -> Self {
        self.exhausted = Some(label.into());
        self
    }

    pub fn target(&self, label: &str) -> Option<&str> {
        self.routes.get(label).map(String::as_str)
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("router", &self.router_name)
            .field("routes", &self.routes)
            .field("retry", &self.retry)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Outgoing edge of a compiled vertex
#[derive(Debug, Clone)]
pub enum Edge {
    Static(String),
    Conditional(RouteTable),
}

/// A vertex the engine can step onto
#[derive(Debug, Clone, Copy)]
pub enum Vertex<'a> {
    Node(&'a CompiledNode),
    FanOut(&'a FanOut),
}

/// Validated, immutable graph
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub(crate) name: String,
    pub(crate) entry: String,
    pub(crate) channels: Arc<ChannelRegistry>,
    pub(crate) nodes: HashMap<String, CompiledNode>,
    pub(crate) fan_outs: HashMap<String, FanOut>,
    pub(crate) edges: HashMap<String, Edge>,
    /// Declaration order of nodes
    pub(crate) order: Vec<String>,
}

impl CompiledGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn channels(&self) -> Arc<ChannelRegistry> {
        self.channels.clone()
    }

    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.get(id)
    }

    pub fn fan_out(&self, id: &str) -> Option<&FanOut> {
        self.fan_outs.get(id)
    }

    pub fn vertex(&self, id: &str) -> Option<Vertex<'_>> {
        self.nodes
            .get(id)
            .map(Vertex::Node)
            .or_else(|| self.fan_outs.get(id).map(Vertex::FanOut))
    }

    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    /// Node ids in declaration order
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
