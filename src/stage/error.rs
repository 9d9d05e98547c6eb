// SPDX-License-Identifier: MIT

//! Typed error handling for quizflow
//!
//! Construction problems surface as `FlowError` / `GraphError` and reach the
//! caller. Anything that goes wrong while a run is in flight is captured as a
//! `StageError` and reported inside the execution result instead.

use thiserror::Error;

/// Top-level error type for quizflow
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed graph definition
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Configuration errors (bad env vars, invalid thresholds)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl FlowError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Errors detected while validating a graph at construction time
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("Graph has no entry node")]
    MissingEntry,

    #[error("Entry node '{0}' is not declared")]
    UnknownEntry(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Channel '{0}' declared twice")]
    DuplicateChannel(String),

    #[error("Edge from '{from}' targets unknown node '{target}'")]
    UnknownTarget { from: String, target: String },

    #[error("Edge declared from unknown node '{0}'")]
    UnknownSource(String),

    #[error("Node '{0}' has more than one outgoing edge")]
    DuplicateEdge(String),

    #[error("Node '{0}' has no outgoing edge")]
    MissingEdge(String),

    #[error("No path from '{0}' reaches the terminal")]
    TerminalUnreachable(String),

    #[error("Stage '{0}' is not registered")]
    UnknownStage(String),

    #[error("Router '{0}' is not registered")]
    UnknownRouter(String),

    #[error("Fan-out '{0}' has no members")]
    EmptyFanOut(String),

    #[error("Fan-out '{group}' member '{member}' is not a plain node")]
    InvalidFanOutMember { group: String, member: String },

    #[error("Conditional edge from '{0}' has no routes")]
    EmptyRoutes(String),

    #[error("Conditional edge from '{from}' names unknown label '{label}'")]
    UnknownLabel { from: String, label: String },

    #[error("Conditional edge from '{0}' has retry routes but no exhausted route")]
    MissingExhaustedRoute(String),

    #[error("Node '{node}' writes undeclared channel '{channel}'")]
    UndeclaredChannel { node: String, channel: String },
}

/// Channel registry and state update errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Channel '{0}' is not declared")]
    UndeclaredChannel(String),

    #[error("Node '{node}' may not write channel '{channel}'")]
    UnauthorizedWrite { node: String, channel: String },

    #[error("Channel '{channel}' expects {expected}, got {found}")]
    TypeMismatch {
        channel: String,
        expected: String,
        found: String,
    },
}

/// Failure of a single stage invocation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StageError {
    /// The stage reported a failure
    #[error("{0}")]
    Failed(String),

    /// The stage exceeded its declared timeout
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The stage panicked or its task was cancelled
    #[error("stage panicked: {0}")]
    Panicked(String),

    /// An external service the stage relies on is unavailable
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    /// The stage returned an update the channel registry rejected
    #[error("rejected update: {0}")]
    InvalidUpdate(#[from] StateError),
}

impl StageError {
    /// Create a generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Create an unavailable-service error
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl From<&str> for StageError {
    fn from(s: &str) -> Self {
        Self::Failed(s.to_string())
    }
}

impl From<String> for StageError {
    fn from(s: String) -> Self {
        Self::Failed(s)
    }
}
