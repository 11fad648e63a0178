//! Graph parameter tables
//!
//! Promoted node properties live in a graph's parameter table under
//! `"<node id>.<parameter name>"`. Custom parameters belong to the graph itself
//! and are addressed by name. Nodes never read the tables directly; each
//! evaluation cycle they receive a fresh [`ParameterSnapshot`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::function_graph::FunctionGraph;
use super::graph::GraphData;
use super::value::Value;
use crate::error::Result;

/// Table key for a promoted node property
pub fn parameter_key(node: &str, name: &str) -> String {
    format!("{}.{}", node, name)
}

/// Split a table key into node id and parameter name
pub fn split_parameter_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('.')
}

/// Where a parameter's value comes from
#[derive(Debug)]
pub enum ParameterBinding {
    /// A fixed value
    Constant(Value),
    /// Bound to the identically named custom parameter of the enclosing graph
    Reference(String),
    /// Computed on demand by a function graph
    Function(Box<FunctionGraph>),
}

/// A parameter owned by exactly one graph
#[derive(Debug)]
pub struct GraphParameterValue {
    pub name: String,
    pub description: String,
    binding: ParameterBinding,
    override_value: Option<Value>,
    owner: Option<String>,
}

impl GraphParameterValue {
    fn with_binding(name: impl Into<String>, binding: ParameterBinding) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            binding,
            override_value: None,
            owner: None,
        }
    }

    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        Self::with_binding(name, ParameterBinding::Constant(value))
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_binding(name, ParameterBinding::Reference(target.into()))
    }

    pub fn function(name: impl Into<String>, function: FunctionGraph) -> Self {
        Self::with_binding(name, ParameterBinding::Function(Box::new(function)))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn binding(&self) -> &ParameterBinding {
        &self.binding
    }

    pub fn is_function(&self) -> bool {
        matches!(self.binding, ParameterBinding::Function(_))
    }

    /// Id of the graph holding this parameter. Informational only.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub(crate) fn set_owner(&mut self, graph: &str) {
        self.owner = Some(graph.to_string());
    }

    /// Value applied from an enclosing graph, if any
    pub fn override_value(&self) -> Option<Value> {
        self.override_value
    }

    /// Effective value without evaluating functions
    pub fn value(&self) -> Option<Value> {
        if let Some(value) = self.override_value {
            return Some(value);
        }
        match &self.binding {
            ParameterBinding::Constant(value) => Some(*value),
            ParameterBinding::Reference(_) => None,
            ParameterBinding::Function(function) => function.result(),
        }
    }

    /// Effective value, evaluating a function binding
    pub fn resolve(&mut self) -> Option<Value> {
        if let Some(value) = self.override_value {
            return Some(value);
        }
        match &mut self.binding {
            ParameterBinding::Constant(value) => Some(*value),
            ParameterBinding::Reference(_) => None,
            ParameterBinding::Function(function) => function.evaluate(),
        }
    }

    /// Replace the binding with a constant
    pub fn set_value(&mut self, value: Value) {
        self.binding = ParameterBinding::Constant(value);
    }

    /// Apply or clear an override from the enclosing graph. Returns true if it changed.
    pub(crate) fn assign_override(&mut self, value: Option<Value>) -> bool {
        if self.override_value == value {
            return false;
        }
        self.override_value = value;
        true
    }

    pub fn to_record(&self) -> ParameterRecord {
        let binding = match &self.binding {
            ParameterBinding::Constant(value) => BindingRecord::Constant { value: *value },
            ParameterBinding::Reference(target) => BindingRecord::Reference { target: target.clone() },
            ParameterBinding::Function(function) => BindingRecord::Function {
                graph: Box::new(function.to_data()),
            },
        };
        ParameterRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            binding,
        }
    }

    pub fn from_record(record: &ParameterRecord) -> Result<Self> {
        let binding = match &record.binding {
            BindingRecord::Constant { value } => ParameterBinding::Constant(*value),
            BindingRecord::Reference { target } => ParameterBinding::Reference(target.clone()),
            BindingRecord::Function { graph } => {
                ParameterBinding::Function(Box::new(FunctionGraph::from_data(graph)?))
            }
        };
        Ok(Self::with_binding(record.name.clone(), binding).with_description(record.description.clone()))
    }
}

/// Persisted form of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub binding: BindingRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingRecord {
    Constant { value: Value },
    Reference { target: String },
    Function { graph: Box<GraphData> },
}

/// Parameter values resolved for one evaluation cycle
#[derive(Debug, Clone, Default)]
pub struct ParameterSnapshot {
    values: HashMap<String, Value>,
    custom: HashMap<String, Value>,
}

impl ParameterSnapshot {
    /// A graph-level value exists for this node property
    pub fn has(&self, node: &str, name: &str) -> bool {
        self.values.contains_key(&parameter_key(node, name))
    }

    pub fn get(&self, node: &str, name: &str) -> Option<Value> {
        self.values.get(&parameter_key(node, name)).copied()
    }

    /// Value of a custom parameter of the graph
    pub fn custom(&self, name: &str) -> Option<Value> {
        self.custom.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.custom.is_empty()
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.values.insert(key, value);
    }

    pub(crate) fn insert_custom(&mut self, name: String, value: Value) {
        self.custom.insert(name, value);
    }
}

/// Published whenever a graph parameter value changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterUpdate {
    pub graph: String,
    pub name: String,
}
