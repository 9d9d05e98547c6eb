// SPDX-License-Identifier: MIT

//! State management for graph workflows
//!
//! This module provides:
//! - `StateSchema` / `ChannelRegistry` - the declared channels and their reducers
//! - `WorkflowState` - runtime state threaded through a run
//! - `StateUpdate` - the partial update a stage returns

mod schema;
mod store;
mod update;

pub use schema::{ChannelDef, ChannelRegistry, FieldType, ReducerType, StateSchema};
pub use store::WorkflowState;
pub use update::StateUpdate;
