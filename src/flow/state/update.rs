// SPDX-License-Identifier: MIT

//! Partial state updates returned by stages

use serde_json::Value;

use crate::stage::StateError;

/// Ordered set of channel writes produced by one stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    writes: Vec<(String, Value)>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write, builder style
    pub fn set(mut self, channel: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(channel, value);
        self
    }

    /// Add a write
    pub fn insert(&mut self, channel: impl Into<String>, value: impl Into<Value>) {
        self.writes.push((channel.into(), value.into()));
    }

    /// Last value written to `channel` in this update
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.writes
            .iter()
            .rev()
            .find(|(name, _)| name == channel)
            .map(|(_, value)| value)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Reject the update if it touches a channel the node does not own
    pub fn check_writes(&self, node: &str, allowed: &[String]) -> Result<(), StateError> {
        match self
            .channels()
            .find(|channel| !allowed.iter().any(|a| a == channel))
        {
            Some(channel) => Err(StateError::UnauthorizedWrite {
                node: node.to_string(),
                channel: channel.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl IntoIterator for StateUpdate {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}
