// SPDX-License-Identifier: MIT

//! Graph builder - assembles and validates executable graphs
//!
//! Graphs come either from the fluent Rust API or from a `GraphDefinition`
//! whose stage and router names are resolved against a `StageRegistry`.
//! `compile` performs every structural check up front, so the engine never
//! meets a dangling edge at run time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::types::{
    CompiledGraph, CompiledNode, Edge, EdgeDefinition, FanOut, GraphDefinition, RouteTable, END,
};
use crate::flow::registry::StageRegistry;
use crate::flow::state::{ChannelDef, ChannelRegistry, ReducerType};
use crate::stage::{GraphError, Stage};

/// Node declaration before compilation
#[derive(Clone)]
pub struct NodeSpec {
    id: String,
    stage: Arc<dyn Stage>,
    timeout: Option<Duration>,
    writes: Vec<String>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
        Self {
            id: id.into(),
            stage,
            timeout: None,
            writes: Vec::new(),
        }
    }

    pub fn writes<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// High-level builder for constructing graphs
pub struct GraphBuilder {
    name: String,
    entry: Option<String>,
    channels: ChannelRegistry,
    duplicate_channels: Vec<String>,
    nodes: Vec<NodeSpec>,
    fan_outs: Vec<FanOut>,
    edges: Vec<(String, Edge)>,
    default_timeout: Duration,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            channels: ChannelRegistry::new(),
            duplicate_channels: Vec::new(),
            nodes: Vec::new(),
            fan_outs: Vec::new(),
            edges: Vec::new(),
            default_timeout: Duration::from_secs(30),
        }
    }

    /// Build from a parsed definition, resolving names against `registry`
    pub fn from_definition(
        def: &GraphDefinition,
        registry: &StageRegistry,
        default_timeout: Duration,
    ) -> Result<Self, GraphError> {
        let mut builder = Self::new(def.name.clone())
            .default_timeout(default_timeout)
            .entry(def.entry.clone());

        let mut channel_names: Vec<_> = def.channels.fields.keys().collect();
        channel_names.sort();
        for name in channel_names {
            builder = builder.channel_def(name.clone(), def.channels.fields[name].clone());
        }

        for node_def in &def.nodes {
            let stage = registry
                .stage(node_def.stage_name())
                .ok_or_else(|| GraphError::UnknownStage(node_def.stage_name().to_string()))?;

            let mut spec = NodeSpec::new(node_def.id.clone(), stage).writes(node_def.writes.clone());
            if let Some(ms) = node_def.timeout_ms {
                spec = spec.timeout(Duration::from_millis(ms));
            }
            builder = builder.node(spec);
        }

        for group in &def.fan_outs {
            builder = builder.fan_out(group.id.clone(), group.members.clone());
        }

        for edge in &def.edges {
            builder = match edge {
                EdgeDefinition::Static { from, to } => builder.edge(from.clone(), to.clone()),
                EdgeDefinition::Conditional {
                    from,
                    router,
                    routes,
                    retry,
                    exhausted,
                } => {
                    let router_fn = registry
                        .router(router)
                        .ok_or_else(|| GraphError::UnknownRouter(router.clone()))?;

                    let mut table = RouteTable::new(router.clone(), router_fn);
                    for (label, target) in routes {
                        table = if retry.contains(label) {
                            table.retry_route(label.clone(), target.clone())
                        } else {
                            table.route(label.clone(), target.clone())
                        };
                    }
                    for label in retry.iter().filter(|l| !routes.contains_key(*l)) {
                        return Err(GraphError::UnknownLabel {
                            from: from.clone(),
                            label: label.clone(),
                        });
                    }
                    if let Some(label) = exhausted {
                        table = table.exhausted(label.clone());
                    }
                    builder.conditional_edge(from.clone(), table)
                }
            };
        }

        Ok(builder)
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn entry(mut self, id: impl Into<String>) -> Self {
        self.entry = Some(id.into());
        self
    }

    /// Declare a channel with the given reducer
    pub fn channel(self, name: impl Into<String>, reducer: ReducerType) -> Self {
        self.channel_def(name, ChannelDef::new(Default::default(), reducer))
    }

    pub fn channel_def(mut self, name: impl Into<String>, def: ChannelDef) -> Self {
        let name = name.into();
        if !self.channels.register_def(name.clone(), def) {
            self.duplicate_channels.push(name);
        }
        self
    }

    /// Use an existing registry as the channel set
    pub fn channels(mut self, registry: ChannelRegistry) -> Self {
        self.channels = registry;
        self
    }

    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    pub fn fan_out<I, S>(mut self, id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fan_outs.push(FanOut {
            id: id.into(),
            members: members.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), Edge::Static(to.into())));
        self
    }

    pub fn conditional_edge(mut self, from: impl Into<String>, table: RouteTable) -> Self {
        self.edges.push((from.into(), Edge::Conditional(table)));
        self
    }

    /// Validate and freeze the graph
    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        if let Some(name) = self.duplicate_channels.first() {
            return Err(GraphError::DuplicateChannel(name.clone()));
        }
        let entry = self.entry.clone().ok_or(GraphError::MissingEntry)?;

        // Node and fan-out ids share one namespace
        let mut nodes: HashMap<String, CompiledNode> = HashMap::new();
        let mut order = Vec::new();
        for spec in self.nodes {
            if spec.id == END || nodes.contains_key(&spec.id) {
                return Err(GraphError::DuplicateNode(spec.id));
            }
            if let Some(channel) = spec.writes.iter().find(|c| !self.channels.contains(c)) {
                return Err(GraphError::UndeclaredChannel {
                    node: spec.id.clone(),
                    channel: channel.clone(),
                });
            }
            order.push(spec.id.clone());
            nodes.insert(
                spec.id.clone(),
                CompiledNode {
                    id: spec.id,
                    stage: spec.stage,
                    timeout: spec.timeout.unwrap_or(self.default_timeout),
                    writes: spec.writes,
                },
            );
        }

        let mut fan_outs: HashMap<String, FanOut> = HashMap::new();
        let mut members: HashSet<String> = HashSet::new();
        for group in self.fan_outs {
            if group.id == END || nodes.contains_key(&group.id) || fan_outs.contains_key(&group.id)
            {
                return Err(GraphError::DuplicateNode(group.id));
            }
            if group.members.is_empty() {
                return Err(GraphError::EmptyFanOut(group.id));
            }
            for member in &group.members {
                if !nodes.contains_key(member) || member == &entry || !members.insert(member.clone())
                {
                    return Err(GraphError::InvalidFanOutMember {
                        group: group.id.clone(),
                        member: member.clone(),
                    });
                }
            }
            fan_outs.insert(group.id.clone(), group);
        }

        let is_vertex = |id: &str| nodes.contains_key(id) || fan_outs.contains_key(id);

        if !is_vertex(&entry) {
            return Err(GraphError::UnknownEntry(entry));
        }

        let mut edges: HashMap<String, Edge> = HashMap::new();
        for (from, edge) in self.edges {
            if !is_vertex(&from) {
                return Err(GraphError::UnknownSource(from));
            }
            if members.contains(&from) {
                return Err(GraphError::InvalidFanOutMember {
                    group: group_of(&fan_outs, &from),
                    member: from,
                });
            }
            if edges.contains_key(&from) {
                return Err(GraphError::DuplicateEdge(from));
            }

            let targets: Vec<&String> = match &edge {
                Edge::Static(to) => vec![to],
                Edge::Conditional(table) => {
                    if table.routes.is_empty() {
                        return Err(GraphError::EmptyRoutes(from));
                    }
                    if let Some(label) = &table.exhausted {
                        if !table.routes.contains_key(label) || table.retry.contains(label) {
                            return Err(GraphError::UnknownLabel {
                                from,
                                label: label.clone(),
                            });
                        }
                    } else if !table.retry.is_empty() {
                        return Err(GraphError::MissingExhaustedRoute(from));
                    }
                    table.routes.values().collect()
                }
            };
            if let Some(target) = targets.iter().find(|t| **t != END && !is_vertex(t)) {
                return Err(GraphError::UnknownTarget {
                    from,
                    target: (*target).clone(),
                });
            }
            // Members are only reachable through their fan-out
            if let Some(member) = targets.into_iter().find(|t| members.contains(*t)) {
                return Err(GraphError::InvalidFanOutMember {
                    group: group_of(&fan_outs, member),
                    member: member.clone(),
                });
            }
            edges.insert(from, edge);
        }

        // Every vertex outside a fan-out needs a way forward
        for id in order.iter().chain(fan_outs.keys()) {
            if !members.contains(id) && !edges.contains_key(id) {
                return Err(GraphError::MissingEdge(id.clone()));
            }
        }

        if !terminal_reachable(&entry, &edges) {
            return Err(GraphError::TerminalUnreachable(entry));
        }

        log::debug!(
            "Compiled graph '{}' with {} nodes and {} fan-outs",
            self.name,
            nodes.len(),
            fan_outs.len()
        );

        Ok(CompiledGraph {
            name: self.name,
            entry,
            channels: Arc::new(self.channels),
            nodes,
            fan_outs,
            edges,
            order,
        })
    }
}

/// Breadth-first search from the entry for any edge into END
fn terminal_reachable(entry: &str, edges: &HashMap<String, Edge>) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([entry]);

    while let Some(id) = queue.pop_front() {
        if id == END {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        match edges.get(id) {
            Some(Edge::Static(to)) => queue.push_back(to),
            Some(Edge::Conditional(table)) => {
                queue.extend(table.routes.values().map(String::as_str))
            }
            None => {}
        }
    }
    false
}

fn group_of(fan_outs: &HashMap<String, FanOut>, member: &str) -> String {
    fan_outs
        .values()
        .find(|g| g.members.iter().any(|m| m == member))
        .map(|g| g.id.clone())
        .unwrap_or_default()
}
