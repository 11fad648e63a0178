//! Composes a 3-vector from scalars

use std::any::Any;

use glam::Vec3;

use crate::nodes::node::{Node, NodeBase, NodeReaction, ProcessContext};
use crate::nodes::port::{NodeInput, NodeOutput, PortEvent, PortId, PortType};
use crate::nodes::shader::{next_shader_id, variable, ShaderContext};
use crate::nodes::value::Value;

use super::{math_base, math_reaction};

pub struct MakeFloat3Node {
    base: NodeBase,
    shader_id: String,
}

impl MakeFloat3Node {
    pub fn new(width: u32, height: u32) -> Self {
        let mut base = math_base("Make Float3", width, height);
        for axis in ["X", "Y", "Z"] {
            base.inputs.push(NodeInput::new(PortType::FLOAT | PortType::INT, axis));
        }
        base.outputs.push(NodeOutput::new(PortType::FLOAT3, "Float3"));
        Self {
            base,
            shader_id: next_shader_id(),
        }
    }

    fn component(&self, index: PortId) -> Option<f32> {
        self.base.input_data(index).and_then(|value| match value {
            Value::Float(_) | Value::Int(_) => value.as_f32(),
            _ => None,
        })
    }
}

impl Node for MakeFloat3Node {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "MakeFloat3"
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
        let (Some(x), Some(y), Some(z)) = (self.component(0), self.component(1), self.component(2)) else {
            return;
        };
        let value = Value::Float3(Vec3::new(x, y, z));
        self.base.outputs[0].set_data(value);
        ctx.offer_result(&self.base.id, value);
    }

    fn shader_id(&self) -> Option<&str> {
        Some(&self.shader_id)
    }

    fn shader_part(&self, ctx: &ShaderContext<'_>) -> String {
        let mut components = Vec::with_capacity(3);
        for input in &self.base.inputs {
            match ctx.upstream(input) {
                Some((name, port_type)) if port_type == PortType::FLOAT || port_type == PortType::INT => {
                    components.push(name)
                }
                _ => return String::new(),
            }
        }
        format!(
            "vec3 {} = vec3({});\n",
            variable(&self.shader_id, 0),
            components.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::function_graph::FunctionGraph;
    use crate::nodes::math::ConstantNode;

    #[test]
    fn test_compose_and_emit() {
        let mut function = FunctionGraph::new("make");
        let x = function.add_node(Box::new(ConstantNode::new(Value::Float(1.0), 1, 1))).unwrap();
        let y = function.add_node(Box::new(ConstantNode::new(Value::Int(2), 1, 1))).unwrap();
        let z = function.add_node(Box::new(ConstantNode::new(Value::Float(3.0), 1, 1))).unwrap();
        let make = function.add_node(Box::new(MakeFloat3Node::new(1, 1))).unwrap();
        for (port, source) in [&x, &y, &z].into_iter().enumerate() {
            function.graph_mut().connect(source, 0, &make, port).unwrap();
        }
        function.set_output_node(&make);

        assert_eq!(function.evaluate(), Some(Value::Float3(Vec3::new(1.0, 2.0, 3.0))));
        let source = function.compile_shader();
        assert_eq!(source.lines().count(), 4);
        assert!(source.lines().last().unwrap().starts_with("vec3 "));
    }

    #[test]
    fn test_partial_inputs_emit_nothing() {
        let mut function = FunctionGraph::new("make");
        let x = function.add_node(Box::new(ConstantNode::new(Value::Float(1.0), 1, 1))).unwrap();
        let make = function.add_node(Box::new(MakeFloat3Node::new(1, 1))).unwrap();
        function.graph_mut().connect(&x, 0, &make, 0).unwrap();

        let graph = function.graph();
        let node = graph.node(&make).unwrap();
        assert!(node.shader_part(&ShaderContext::new(graph)).is_empty());
    }
}
