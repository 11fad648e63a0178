//! Shader source composition for math nodes
//!
//! Math nodes do not render into buffers. Each one contributes a few
//! statements declaring variables named `<shader id><output index>`, and a
//! [`ShaderBuilder`] concatenates those contributions upstream-first so every
//! variable is declared before it is read.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use super::graph::Graph;
use super::node::NodeId;
use super::port::{NodeInput, PortId, PortType};

static NEXT_SHADER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique variable prefix
pub fn next_shader_id() -> String {
    format!("s{}_", NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Variable holding output `index` of the node with prefix `shader_id`
pub fn variable(shader_id: &str, index: PortId) -> String {
    format!("{}{}", shader_id, index)
}

/// Read access to the graph while a node writes its statements
pub struct ShaderContext<'a> {
    graph: &'a Graph,
    emitted: Option<&'a HashSet<NodeId>>,
}

impl<'a> ShaderContext<'a> {
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph, emitted: None }
    }

    /// Context that only resolves upstream nodes found in `emitted`
    pub fn with_emitted(graph: &'a Graph, emitted: &'a HashSet<NodeId>) -> Self {
        Self {
            graph,
            emitted: Some(emitted),
        }
    }

    /// Variable and concrete type feeding `input`.
    ///
    /// None when the input is unconnected, its upstream node has no shader
    /// representation, or that node wrote no statements.
    pub fn upstream(&self, input: &NodeInput) -> Option<(String, PortType)> {
        let connection = input.connection()?;
        if self.emitted.is_some_and(|emitted| !emitted.contains(&connection.node)) {
            return None;
        }
        let node = self.graph.node(&connection.node)?;
        let shader_id = node.shader_id()?;
        let port_type = node.output_type(connection.port, self);
        Some((variable(shader_id, connection.port), port_type))
    }
}

/// Accumulates statements for a set of target nodes
#[derive(Debug, Default)]
pub struct ShaderBuilder {
    source: String,
    visited: HashSet<NodeId>,
    emitted: HashSet<NodeId>,
}

impl ShaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `node` and everything upstream of it, each node at most once
    pub fn emit(&mut self, graph: &Graph, node: &str) {
        if !self.visited.insert(node.to_string()) {
            return;
        }
        let Some(target) = graph.node(node) else {
            return;
        };

        for input in &target.base().inputs {
            if let Some(connection) = input.connection() {
                self.emit(graph, &connection.node);
            }
        }

        let part = target.shader_part(&ShaderContext::with_emitted(graph, &self.emitted));
        if part.is_empty() {
            debug!("Node {} ({}) contributes no shader code yet", target.base().name, node);
            return;
        }
        self.source.push_str(&part);
        self.emitted.insert(node.to_string());
    }

    /// Whether `node` wrote any statements
    pub fn has_emitted(&self, node: &str) -> bool {
        self.emitted.contains(node)
    }

    /// Text emitted so far
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn finish(self) -> String {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullDevice;
    use crate::nodes::math::{AddNode, BreakFloat3Node, ConstantNode};
    use crate::nodes::value::Value;
    use std::sync::Arc;

    #[test]
    fn test_shader_ids_are_unique() {
        let a = next_shader_id();
        let b = next_shader_id();
        assert_ne!(a, b);
        assert!(a.starts_with('s') && a.ends_with('_'));
    }

    #[test]
    fn test_silent_upstream_is_not_read() {
        let mut graph = Graph::new("silent", Arc::new(NullDevice));
        let split = graph.add_node(Box::new(BreakFloat3Node::new(1, 1))).unwrap();
        let one = graph
            .add_node(Box::new(ConstantNode::new(Value::Float(1.0), 1, 1)))
            .unwrap();
        let add = graph.add_node(Box::new(AddNode::new(1, 1))).unwrap();
        assert!(graph.connect(&split, 0, &add, 0).unwrap());
        assert!(graph.connect(&one, 0, &add, 1).unwrap());

        let mut builder = ShaderBuilder::new();
        builder.emit(&graph, &add);
        assert!(!builder.has_emitted(&split));
        assert!(builder.has_emitted(&one));
        assert!(!builder.has_emitted(&add));

        let source = builder.finish();
        let split_sid = graph.node(&split).unwrap().shader_id().unwrap().to_string();
        assert!(!source.contains(&split_sid));
        assert_eq!(source.lines().count(), 1);
    }

    #[test]
    fn test_variable_name() {
        assert_eq!(variable("s12_", 0), "s12_0");
        assert_eq!(variable("s12_", 2), "s12_2");
    }
}
