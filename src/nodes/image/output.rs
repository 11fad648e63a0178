//! Graph output boundary node

use std::any::Any;

use crate::gpu::{BufferHandle, GpuDevice, KernelKind, KernelParams};
use crate::nodes::node::{Boundary, Node, NodeBase, ProcessContext};
use crate::nodes::port::{NodeInput, NodeOutput, PortType};
use crate::nodes::value::Value;

use super::{ImageBuffer, Kernel};

/// Copies its input into a buffer of its own so the result survives the
/// release of interior buffers. Non-buffer values pass through unchanged.
pub struct OutputNode {
    base: NodeBase,
    buffer: ImageBuffer,
    copy: Kernel,
}

impl OutputNode {
    pub fn new(width: u32, height: u32) -> Self {
        let mut base = NodeBase::new("Output", width, height);
        base.inputs.push(NodeInput::new(PortType::IMAGE | PortType::NUMERIC, "Input"));
        base.outputs.push(NodeOutput::new(PortType::IMAGE | PortType::NUMERIC, "Output"));
        Self {
            base,
            buffer: ImageBuffer::default(),
            copy: Kernel::new(KernelKind::Copy),
        }
    }
}

impl Node for OutputNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Output"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn boundary(&self) -> Option<Boundary> {
        Some(Boundary::Output)
    }

    fn is_buffer_backed(&self) -> bool {
        true
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let Some(value) = self.base.input_data(0).copied() else {
            return;
        };
        let Value::Buffer(source) = value else {
            self.base.outputs[0].set_data(value);
            self.base.mark_updated();
            return;
        };

        let (width, height) = (self.base.width, self.base.height);
        let buffer = self.buffer.ensure(ctx.device, width, height, self.base.pixel_format);
        let copy = self.copy.get(ctx.device);
        copy.process(width, height, &[source], buffer, &KernelParams::default());
        copy.complete();

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
        self.copy.release();
    }
}
