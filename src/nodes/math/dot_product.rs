//! Dot product of two vectors

use std::any::Any;

use crate::nodes::node::{Node, NodeBase, NodeReaction, ProcessContext};
use crate::nodes::port::{NodeInput, NodeOutput, PortEvent, PortId, PortType};
use crate::nodes::shader::{next_shader_id, variable, ShaderContext};
use crate::nodes::value::Value;

use super::{math_base, math_reaction};

/// Dot product of two vectors of equal arity
pub fn dot_values(a: Value, b: Value) -> Option<f32> {
    match (a, b) {
        (Value::Float2(a), Value::Float2(b)) => Some(a.dot(b)),
        (Value::Float3(a), Value::Float3(b)) => Some(a.dot(b)),
        (Value::Float4(a), Value::Float4(b)) => Some(a.dot(b)),
        _ => None,
    }
}

pub struct DotProductNode {
    base: NodeBase,
    shader_id: String,
}

impl DotProductNode {
    pub fn new(width: u32, height: u32) -> Self {
        let mut base = math_base("Dot Product", width, height);
        base.inputs.push(NodeInput::new(PortType::VECTOR, "A"));
        base.inputs.push(NodeInput::new(PortType::VECTOR, "B"));
        base.outputs.push(NodeOutput::new(PortType::FLOAT, "Float"));
        Self {
            base,
            shader_id: next_shader_id(),
        }
    }
}

impl Node for DotProductNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "DotProduct"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_schedulable(&self) -> bool {
        false
    }

    fn on_input_event(&mut self, _index: PortId, event: PortEvent) -> NodeReaction {
        math_reaction(event)
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let (Some(a), Some(b)) = (self.base.input_data(0).copied(), self.base.input_data(1).copied()) else {
            return;
        };
        let Some(dot) = dot_values(a, b) else {
            return;
        };
        self.base.outputs[0].set_data(Value::Float(dot));
        ctx.offer_result(&self.base.id, Value::Float(dot));
    }

    fn shader_id(&self) -> Option<&str> {
        Some(&self.shader_id)
    }

    fn shader_part(&self, ctx: &ShaderContext<'_>) -> String {
        let (Some((a, a_type)), Some((b, b_type))) =
            (ctx.upstream(&self.base.inputs[0]), ctx.upstream(&self.base.inputs[1]))
        else {
            return String::new();
        };
        if a_type != b_type || !PortType::VECTOR.contains(a_type) || a_type == PortType::NONE {
            return String::new();
        }
        format!("float {} = dot({}, {});\n", variable(&self.shader_id, 0), a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullDevice;
    use crate::nodes::graph::Graph;
    use crate::nodes::math::ConstantNode;
    use glam::{Vec2, Vec3};
    use std::sync::Arc;

    fn wired(a: Value, b: Value) -> (Graph, String) {
        let mut graph = Graph::new("dot", Arc::new(NullDevice));
        let a = graph.add_node(Box::new(ConstantNode::new(a, 1, 1))).unwrap();
        let b = graph.add_node(Box::new(ConstantNode::new(b, 1, 1))).unwrap();
        let dot = graph.add_node(Box::new(DotProductNode::new(1, 1))).unwrap();
        graph.connect(&a, 0, &dot, 0).unwrap();
        graph.connect(&b, 0, &dot, 1).unwrap();
        (graph, dot)
    }

    #[test]
    fn test_matching_arity() {
        let (mut graph, dot) = wired(Value::Float3(Vec3::new(1.0, 0.0, 2.0)), Value::Float3(Vec3::new(3.0, 5.0, 1.0)));
        graph.try_and_process();
        assert_eq!(graph.output_data(&dot, 0), Some(Value::Float(5.0)));

        let node = graph.node(&dot).unwrap();
        let part = node.shader_part(&ShaderContext::new(&graph));
        assert!(part.starts_with(&format!("float {}0 = dot(", node.shader_id().unwrap())));
    }

    #[test]
    fn test_mismatched_arity_emits_nothing() {
        let (mut graph, dot) = wired(Value::Float3(Vec3::ONE), Value::Float2(Vec2::ONE));
        graph.try_and_process();

        let node = graph.node(&dot).unwrap();
        assert_eq!(node.shader_part(&ShaderContext::new(&graph)), "");
        assert!(node.base().outputs[0].data().is_none());
    }

    #[test]
    fn test_unconnected_emits_nothing() {
        let graph = Graph::new("dot", Arc::new(NullDevice));
        let node = DotProductNode::new(1, 1);
        assert!(node.shader_part(&ShaderContext::new(&graph)).is_empty());
    }
}
