// SPDX-License-Identifier: MIT

//! Graph-based workflow execution
//!
//! Graphs are declared (in code or YAML), validated once by the builder, then
//! run any number of times by the engine.

mod builder;
pub mod executor;
pub mod types;

pub use builder::{GraphBuilder, NodeSpec};
pub use executor::{Engine, FanOutRecord, RunOutcome, RunReport};
pub use types::{
    CompiledGraph, CompiledNode, Edge, EdgeDefinition, FanOut, FanOutDefinition,
    GraphDefinition, NodeDefinition, RouteTable, RouterFn, Vertex, END,
};
