// SPDX-License-Identifier: MIT

//! Config loader - YAML file loading and parsing
//!
//! Loads engine configs and graph definitions from YAML files.

use std::fs;
use std::path::Path;

use crate::flow::config::EngineConfig;
use crate::flow::graph::GraphDefinition;
use crate::stage::FlowError;

/// Loads engine configuration and graph definitions from YAML
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load and validate an engine config from a YAML file
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<EngineConfig, FlowError> {
        let content = fs::read_to_string(path)?;
        Self::parse_config(&content)
    }

    /// Parse and validate an engine config; omitted fields keep their defaults
    pub fn parse_config(content: &str) -> Result<EngineConfig, FlowError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a graph definition from a YAML file
    pub fn load_graph<P: AsRef<Path>>(&self, path: P) -> Result<GraphDefinition, FlowError> {
        let content = fs::read_to_string(path)?;
        Self::parse_graph(&content)
    }

    /// Parse a graph definition from a YAML string
    pub fn parse_graph(content: &str) -> Result<GraphDefinition, FlowError> {
        let def: GraphDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
