// SPDX-License-Identifier: MIT

//! Channel declarations and the reducer registry

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::stage::StateError;

/// Schema declaring the workflow state channels, as written in YAML
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StateSchema {
    /// Channel definitions
    #[serde(flatten)]
    pub fields: HashMap<String, ChannelDef>,
}

/// Definition of a single channel
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChannelDef {
    /// Type of the channel value
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// Reducer for merging values
    #[serde(default)]
    pub reducer: ReducerType,
    /// Value seeded into fresh state
    pub default: Option<Value>,
}

impl ChannelDef {
    pub fn new(field_type: FieldType, reducer: ReducerType) -> Self {
        Self {
            field_type,
            reducer,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Supported channel types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    /// Whether a value may be stored in a channel of this type. Null clears any channel.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Any, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldType::Any => "any",
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reducer types for merging values into state
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Append to array
    Append,
    /// Keep maximum value
    Max,
    /// Keep minimum value
    Min,
    /// Shallow-merge objects
    Merge,
}

/// Closed set of channels, each with exactly one reducer
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, ChannelDef>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a parsed schema
    pub fn from_schema(schema: &StateSchema) -> Self {
        let mut registry = Self::new();
        for (name, def) in &schema.fields {
            registry.channels.insert(name.clone(), def.clone());
        }
        registry
    }

    /// Declare a channel with the given reducer. Returns false if it was already declared.
    pub fn register(&mut self, channel: impl Into<String>, reducer: ReducerType) -> bool {
        self.register_def(channel, ChannelDef::new(FieldType::Any, reducer))
    }

    /// Declare a channel with a full definition. Returns false if it was already declared.
    pub fn register_def(&mut self, channel: impl Into<String>, def: ChannelDef) -> bool {
        let channel = channel.into();
        if self.channels.contains_key(&channel) {
            return false;
        }
        self.channels.insert(channel, def);
        true
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn reducer(&self, channel: &str) -> Option<ReducerType> {
        self.channels.get(channel).map(|def| def.reducer)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&String, &ChannelDef)> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Default values for every channel that declares one
    pub fn defaults(&self) -> HashMap<String, Value> {
        self.channels
            .iter()
            .filter_map(|(name, def)| def.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Compute the new value of `channel` after applying `delta` to `current`.
    ///
    /// Pure: nothing is stored. Merging into an undeclared channel is an error.
    pub fn merge(
        &self,
        channel: &str,
        current: Option<&Value>,
        delta: Value,
    ) -> Result<Value, StateError> {
        let def = self
            .channels
            .get(channel)
            .ok_or_else(|| StateError::UndeclaredChannel(channel.to_string()))?;

        let mismatch = |expected: &str, found: &Value| StateError::TypeMismatch {
            channel: channel.to_string(),
            expected: expected.to_string(),
            found: kind_of(found).to_string(),
        };

        match def.reducer {
            ReducerType::Overwrite => {
                if !def.field_type.accepts(&delta) {
                    return Err(mismatch(def.field_type.label(), &delta));
                }
                Ok(delta)
            }
            ReducerType::Append => {
                let mut items = match current {
                    Some(Value::Array(existing)) => existing.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other.clone()],
                };
                match delta {
                    Value::Array(new_items) => items.extend(new_items),
                    Value::Null => {}
                    other => items.push(other),
                }
                Ok(Value::Array(items))
            }
            ReducerType::Merge => {
                let mut merged = match current {
                    Some(Value::Object(existing)) => existing.clone(),
                    _ => Map::new(),
                };
                match delta {
                    Value::Object(new_obj) => {
                        for (k, v) in new_obj {
                            merged.insert(k, v);
                        }
                    }
                    Value::Null => {}
                    other => return Err(mismatch("object", &other)),
                }
                Ok(Value::Object(merged))
            }
            ReducerType::Max | ReducerType::Min => {
                let new = delta.as_f64().ok_or_else(|| mismatch("number", &delta))?;
                let keep_current = current.and_then(Value::as_f64).is_some_and(|cur| {
                    if def.reducer == ReducerType::Max {
                        cur >= new
                    } else {
                        cur <= new
                    }
                });
                match current {
                    Some(existing) if keep_current => Ok(existing.clone()),
                    _ => Ok(delta),
                }
            }
        }
    }
}
