// SPDX-License-Identifier: MIT

pub mod config;
pub mod fallback;
pub mod graph;
pub mod loader;
pub mod metrics;
pub mod node;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod state;
pub mod types;
