//! Function graphs: small math graphs evaluated on demand
//!
//! A function graph backs a parameter whose value is computed rather than
//! stored. It runs on the CPU through the math nodes' `process` path and can
//! also be compiled to shader source from its designated result node.

use std::sync::Arc;

use super::graph::{Graph, GraphData};
use super::node::{Node, NodeId};
use super::value::Value;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::gpu::NullDevice;

#[derive(Debug)]
pub struct FunctionGraph {
    graph: Graph,
}

impl FunctionGraph {
    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = Graph::new(name, Arc::new(NullDevice));
        graph.set_synchronized(true);
        graph.enable_result_slot();
        Self { graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Adds a node to the function body
    pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<NodeId> {
        self.graph.add_node(node)
    }

    /// Designates the node whose value becomes the result. False for unknown ids.
    pub fn set_output_node(&mut self, id: &str) -> bool {
        if self.graph.node(id).is_none() {
            return false;
        }
        if let Some(slot) = self.graph.result_slot_mut() {
            slot.node = Some(id.to_string());
            slot.value = None;
        }
        true
    }

    pub fn output_node(&self) -> Option<&str> {
        self.graph.result_slot().and_then(|slot| slot.node.as_deref())
    }

    /// Value published by the result node during the last evaluation
    pub fn result(&self) -> Option<Value> {
        self.graph.result_slot().and_then(|slot| slot.value)
    }

    /// Runs the body and returns the result node's value
    pub fn evaluate(&mut self) -> Option<Value> {
        if let Some(slot) = self.graph.result_slot_mut() {
            slot.value = None;
        }
        self.graph.try_and_process();
        self.result()
    }

    /// Shader source computing the result node
    pub fn compile_shader(&self) -> String {
        match self.output_node() {
            Some(node) => self.graph.compile_shader(node),
            None => String::new(),
        }
    }

    pub fn to_data(&self) -> GraphData {
        self.graph.to_data()
    }

    pub fn from_data(data: &GraphData) -> Result<Self> {
        let mut graph = Graph::from_data(data, Arc::new(NullDevice), EngineConfig::default())?;
        graph.set_synchronized(true);
        graph.enable_result_slot();
        Ok(Self { graph })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::math::{AddNode, BreakFloat3Node, ConstantNode, DotProductNode};
    use glam::Vec3;

    fn dot_function() -> (FunctionGraph, NodeId) {
        let mut function = FunctionGraph::new("dot");
        let a = function
            .add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(1.0, 2.0, 3.0)), 1, 1)))
            .unwrap();
        let b = function
            .add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(4.0, 5.0, 6.0)), 1, 1)))
            .unwrap();
        let dot = function.add_node(Box::new(DotProductNode::new(1, 1))).unwrap();
        function.graph_mut().connect(&a, 0, &dot, 0).unwrap();
        function.graph_mut().connect(&b, 0, &dot, 1).unwrap();
        (function, dot)
    }

    #[test]
    fn test_evaluate_result_node() {
        let (mut function, dot) = dot_function();
        assert_eq!(function.evaluate(), None);

        assert!(function.set_output_node(&dot));
        assert_eq!(function.evaluate(), Some(Value::Float(32.0)));
        assert!(!function.set_output_node("missing"));
    }

    #[test]
    fn test_result_only_from_designated_node() {
        let mut function = FunctionGraph::new("split");
        let v = function
            .add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(1.0, 2.0, 3.0)), 1, 1)))
            .unwrap();
        let split = function.add_node(Box::new(BreakFloat3Node::new(1, 1))).unwrap();
        let add = function.add_node(Box::new(AddNode::new(1, 1))).unwrap();
        function.graph_mut().connect(&v, 0, &split, 0).unwrap();
        function.graph_mut().connect(&split, 1, &add, 0).unwrap();
        function.graph_mut().connect(&split, 2, &add, 1).unwrap();
        function.set_output_node(&add);

        assert_eq!(function.evaluate(), Some(Value::Float(5.0)));
    }

    #[test]
    fn test_compile_shader_from_result() {
        let (mut function, dot) = dot_function();
        assert!(function.compile_shader().is_empty());
        function.set_output_node(&dot);
        let source = function.compile_shader();
        assert_eq!(source.matches("dot(").count(), 1);
        assert_eq!(source.lines().count(), 3);
    }

    #[test]
    fn test_data_roundtrip_keeps_result_node() {
        let (mut function, dot) = dot_function();
        function.set_output_node(&dot);
        let data = function.to_data();
        let mut restored = FunctionGraph::from_data(&data).unwrap();
        assert_eq!(restored.output_node(), Some(dot.as_str()));
        assert_eq!(restored.evaluate(), Some(Value::Float(32.0)));
        assert_eq!(restored.to_data(), data);
    }
}
