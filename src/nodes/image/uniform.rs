//! Uniform color fill

use std::any::Any;

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpu::{BufferHandle, GpuDevice, KernelKind, KernelParams};
use crate::nodes::defaults::ColorDefaults;
use crate::nodes::node::{Node, NodeBase, PrepareContext, ProcessContext};
use crate::nodes::port::{NodeOutput, PortType};
use crate::nodes::value::Value;

use super::{ImageBuffer, Kernel};

/// Fills its buffer with a single color. Has no inputs, so it is always a
/// source of its graph.
pub struct UniformColorNode {
    base: NodeBase,
    color: [f32; 4],
    resolved_color: [f32; 4],
    buffer: ImageBuffer,
    fill: Kernel,
}

#[derive(Serialize, Deserialize)]
struct UniformFields {
    color: [f32; 4],
}

impl UniformColorNode {
    pub fn new(width: u32, height: u32) -> Self {
        let mut base = NodeBase::new("Uniform Color", width, height);
        base.outputs.push(NodeOutput::new(PortType::IMAGE, "Output"));
        Self {
            base,
            color: ColorDefaults::COLOR_DEFAULT,
            resolved_color: ColorDefaults::COLOR_DEFAULT,
            buffer: ImageBuffer::default(),
            fill: Kernel::new(KernelKind::Fill),
        }
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub fn set_color(&mut self, color: [f32; 4]) {
        self.color = color;
        self.resolved_color = color;
    }
}

impl Node for UniformColorNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "UniformColor"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_buffer_backed(&self) -> bool {
        true
    }

    fn promoted_parameters(&self) -> Vec<String> {
        vec!["Color".to_string()]
    }

    fn parameter_value(&self, name: &str) -> Option<Value> {
        match name {
            "Color" => Some(Value::Float4(Vec4::from_array(self.color))),
            _ => None,
        }
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) {
        self.resolved_color = match ctx.parameters.get(&self.base.id, "Color") {
            Some(Value::Float4(color)) => color.to_array(),
            _ => self.color,
        };
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let (width, height) = (self.base.width, self.base.height);
        let buffer = self.buffer.ensure(ctx.device, width, height, self.base.pixel_format);
        let fill = self.fill.get(ctx.device);
        fill.process(width, height, &[], buffer, &KernelParams::default().with_color(self.resolved_color));
        fill.complete();

        self.base.mark_updated();
        self.base.outputs[0].set_data(Value::Buffer(buffer));
    }

    fn active_buffer(&self) -> Option<BufferHandle> {
        self.buffer.handle()
    }

    fn release_buffer(&mut self, device: &dyn GpuDevice) -> Option<BufferHandle> {
        self.buffer.release(device)
    }

    fn dispose(&mut self, device: &dyn GpuDevice) {
        let _ = self.buffer.release(device);
        self.fill.release();
    }

    fn save_fields(&self) -> serde_json::Value {
        serde_json::to_value(UniformFields { color: self.color }).unwrap_or_default()
    }

    fn load_fields(&mut self, fields: &serde_json::Value) -> Result<()> {
        if fields.is_null() {
            return Ok(());
        }
        let fields: UniformFields = serde_json::from_value(fields.clone())?;
        self.set_color(fields.color);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareDevice;
    use crate::nodes::parameters::{parameter_key, ParameterSnapshot};

    #[test]
    fn test_fill_uses_graph_override() {
        let device = SoftwareDevice::new();
        let mut node = UniformColorNode::new(2, 2);
        node.set_color([1.0, 0.0, 0.0, 1.0]);

        let mut params = ParameterSnapshot::default();
        params.insert(
            parameter_key(&node.base().id, "Color"),
            Value::Float4(Vec4::new(0.0, 1.0, 0.0, 1.0)),
        );
        node.prepare(&PrepareContext {
            parameters: &params,
            random_seed: 0,
        });
        let mut ctx = ProcessContext::new(&device, &params, 0);
        node.process(&mut ctx);

        let buffer = node.active_buffer().unwrap();
        assert_eq!(device.pixel(buffer, 1, 1), Some([0.0, 1.0, 0.0, 1.0]));
        // the node's own field is untouched by the override
        assert_eq!(node.color(), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_color_fields_roundtrip() {
        let mut node = UniformColorNode::new(1, 1);
        node.set_color([0.1, 0.2, 0.3, 1.0]);
        let mut other = UniformColorNode::new(1, 1);
        other.load_fields(&node.save_fields()).unwrap();
        assert_eq!(other.color(), [0.1, 0.2, 0.3, 1.0]);
    }
}
