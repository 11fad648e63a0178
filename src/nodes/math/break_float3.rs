//! Splits a 3-vector into its components

use std::any::Any;

use crate::nodes::node::{Node, NodeBase, NodeReaction, ProcessContext};
use crate::nodes::port::{NodeInput, NodeOutput, PortEvent, PortId, PortType};
use crate::nodes::shader::{next_shader_id, variable, ShaderContext};
use crate::nodes::value::Value;

use super::{math_base, math_reaction};

const AXES: [&str; 3] = ["x", "y", "z"];

pub struct BreakFloat3Node {
    base: NodeBase,
    shader_id: String,
}

impl BreakFloat3Node {
    pub fn new(width: u32, height: u32) -> Self {
        let mut base = math_base("Break Float3", width, height);
        base.inputs.push(NodeInput::new(PortType::FLOAT3, "Float3"));
        for axis in AXES {
            base.outputs.push(NodeOutput::new(PortType::FLOAT, axis.to_uppercase()));
        }
        Self {
            base,
            shader_id: next_shader_id(),
        }
    }
}

impl Node for BreakFloat3Node {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "BreakFloat3"
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
        let Some(Value::Float3(v)) = self.base.input_data(0).copied() else {
            return;
        };
        for (index, component) in v.to_array().into_iter().enumerate() {
            self.base.outputs[index].set_data(Value::Float(component));
        }
        ctx.offer_result(&self.base.id, Value::Float(v.x));
    }

    fn shader_id(&self) -> Option<&str> {
        Some(&self.shader_id)
    }

    fn shader_part(&self, ctx: &ShaderContext<'_>) -> String {
        let Some((source, source_type)) = ctx.upstream(&self.base.inputs[0]) else {
            return String::new();
        };
        if source_type != PortType::FLOAT3 {
            return String::new();
        }
        AXES.iter()
            .enumerate()
            .map(|(index, axis)| format!("float {} = {}.{};\n", variable(&self.shader_id, index), source, axis))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullDevice;
    use crate::nodes::graph::Graph;
    use crate::nodes::math::ConstantNode;
    use glam::Vec3;
    use std::sync::Arc;

    #[test]
    fn test_one_statement_per_axis() {
        let mut graph = Graph::new("break", Arc::new(NullDevice));
        let v = graph
            .add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(1.0, 2.0, 3.0)), 1, 1)))
            .unwrap();
        let split = graph.add_node(Box::new(BreakFloat3Node::new(1, 1))).unwrap();
        graph.connect(&v, 0, &split, 0).unwrap();

        let node = graph.node(&split).unwrap();
        let part = node.shader_part(&ShaderContext::new(&graph));
        let sid = node.shader_id().unwrap();
        assert_eq!(part.lines().count(), 3);
        assert!(part.contains(&format!("float {}2 = ", sid)));
        assert!(part.ends_with(".z;\n"));

        graph.try_and_process();
        assert_eq!(graph.output_data(&split, 1), Some(Value::Float(2.0)));
    }

    #[test]
    fn test_absent_input_leaves_outputs() {
        let graph = Graph::new("break", Arc::new(NullDevice));
        let mut node = BreakFloat3Node::new(1, 1);
        node.base_mut().outputs[0].set_data(Value::Float(9.0));
        assert!(node.shader_part(&ShaderContext::new(&graph)).is_empty());

        let params = crate::nodes::parameters::ParameterSnapshot::default();
        let mut ctx = ProcessContext::new(&NullDevice, &params, 0);
        node.process(&mut ctx);
        assert_eq!(node.base().outputs[0].data(), Some(&Value::Float(9.0)));
    }
}
