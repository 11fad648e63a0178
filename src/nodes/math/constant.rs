//! Scalar and vector literals

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::nodes::node::{Node, NodeBase, NodeReaction, PrepareContext, ProcessContext};
use crate::nodes::port::{NodeOutput, PortEvent, PortId};
use crate::nodes::shader::{next_shader_id, variable, ShaderContext};
use crate::nodes::value::Value;

use super::{math_base, math_reaction};

pub struct ConstantNode {
    base: NodeBase,
    shader_id: String,
    value: Value,
    resolved: Value,
}

#[derive(Serialize, Deserialize)]
struct ConstantFields {
    value: Value,
}

impl ConstantNode {
    pub fn new(value: Value, width: u32, height: u32) -> Self {
        let mut base = math_base("Constant", width, height);
        base.outputs.push(NodeOutput::new(value.port_type(), "Value"));
        Self {
            base,
            shader_id: next_shader_id(),
            value,
            resolved: value,
        }
    }

    pub fn value(&self) -> Value {
        self.value
    }

    /// Replaces the literal; the output type follows the value
    pub fn set_value(&mut self, value: Value) {
        self.value = value;
        self.resolved = value;
        self.base.outputs[0].set_port_type(value.port_type());
    }
}

impl Node for ConstantNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Constant"
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

    fn promoted_parameters(&self) -> Vec<String> {
        vec!["Value".to_string()]
    }

    fn parameter_value(&self, name: &str) -> Option<Value> {
        (name == "Value").then_some(self.value)
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) {
        // only a value of the same type may replace the literal
        self.resolved = ctx
            .parameters
            .get(&self.base.id, "Value")
            .filter(|value| value.port_type() == self.value.port_type())
            .unwrap_or(self.value);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        self.base.outputs[0].set_data(self.resolved);
        ctx.offer_result(&self.base.id, self.resolved);
    }

    fn shader_id(&self) -> Option<&str> {
        Some(&self.shader_id)
    }

    fn shader_part(&self, _ctx: &ShaderContext<'_>) -> String {
        let (Some(glsl_type), Some(literal)) = (self.resolved.port_type().glsl_name(), self.resolved.glsl_literal())
        else {
            return String::new();
        };
        format!("{} {} = {};\n", glsl_type, variable(&self.shader_id, 0), literal)
    }

    fn save_fields(&self) -> serde_json::Value {
        serde_json::to_value(ConstantFields { value: self.value }).unwrap_or_default()
    }

    fn load_fields(&mut self, fields: &serde_json::Value) -> Result<()> {
        if fields.is_null() {
            return Ok(());
        }
        let fields: ConstantFields = serde_json::from_value(fields.clone())?;
        self.set_value(fields.value);
        Ok(())
    }
}
