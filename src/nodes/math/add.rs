//! Component-wise addition

use std::any::Any;

use crate::nodes::node::{Node, NodeBase, NodeReaction, ProcessContext};
use crate::nodes::port::{NodeInput, NodeOutput, PortEvent, PortId, PortType};
use crate::nodes::shader::{next_shader_id, variable, ShaderContext};
use crate::nodes::value::Value;

use super::{math_base, math_reaction};

/// Adds two values of the same type. Mixed types produce nothing.
pub fn add_values(a: Value, b: Value) -> Option<Value> {
    match (a, b) {
        (Value::Float(a), Value::Float(b)) => Some(Value::Float(a + b)),
        (Value::Int(a), Value::Int(b)) => Some(Value::Int(a.wrapping_add(b))),
        (Value::Float2(a), Value::Float2(b)) => Some(Value::Float2(a + b)),
        (Value::Float3(a), Value::Float3(b)) => Some(Value::Float3(a + b)),
        (Value::Float4(a), Value::Float4(b)) => Some(Value::Float4(a + b)),
        _ => None,
    }
}

pub struct AddNode {
    base: NodeBase,
    shader_id: String,
}

impl AddNode {
    pub fn new(width: u32, height: u32) -> Self {
        let mut base = math_base("Add", width, height);
        base.inputs.push(NodeInput::new(PortType::NUMERIC | PortType::INT, "A"));
        base.inputs.push(NodeInput::new(PortType::NUMERIC | PortType::INT, "B"));
        base.outputs.push(NodeOutput::new(PortType::NUMERIC | PortType::INT, "Result"));
        Self {
            base,
            shader_id: next_shader_id(),
        }
    }
}

impl Node for AddNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Add"
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
        let Some(sum) = add_values(a, b) else {
            return;
        };
        self.base.outputs[0].set_data(sum);
        ctx.offer_result(&self.base.id, sum);
    }

    fn shader_id(&self) -> Option<&str> {
        Some(&self.shader_id)
    }

    fn output_type(&self, _index: PortId, ctx: &ShaderContext<'_>) -> PortType {
        match (ctx.upstream(&self.base.inputs[0]), ctx.upstream(&self.base.inputs[1])) {
            (Some((_, a)), Some((_, b))) if a == b => a,
            _ => PortType::NONE,
        }
    }

    fn shader_part(&self, ctx: &ShaderContext<'_>) -> String {
        let (Some((a, a_type)), Some((b, b_type))) =
            (ctx.upstream(&self.base.inputs[0]), ctx.upstream(&self.base.inputs[1]))
        else {
            return String::new();
        };
        if a_type != b_type {
            return String::new();
        }
        let Some(glsl_type) = a_type.glsl_name() else {
            return String::new();
        };
        format!("{} {} = {} + {};\n", glsl_type, variable(&self.shader_id, 0), a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    #[test]
    fn test_add_values() {
        assert_eq!(add_values(Value::Float(1.5), Value::Float(2.0)), Some(Value::Float(3.5)));
        assert_eq!(add_values(Value::Int(2), Value::Int(3)), Some(Value::Int(5)));
        assert_eq!(
            add_values(Value::Float3(Vec3::ONE), Value::Float3(Vec3::new(1.0, 2.0, 3.0))),
            Some(Value::Float3(Vec3::new(2.0, 3.0, 4.0)))
        );
        assert_eq!(add_values(Value::Float2(Vec2::ONE), Value::Float3(Vec3::ONE)), None);
        assert_eq!(add_values(Value::Float(1.0), Value::Int(1)), None);
    }
}
