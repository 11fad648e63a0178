//! Ambient occlusion node
//!
//! Two passes into the same buffer: blur the gray input with the ray count as
//! intensity, then estimate occlusion from the blurred buffer against the
//! original input. Tiling applies to the occlusion pass only.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpu::{BufferHandle, GpuDevice, KernelKind, KernelParams};
use crate::nodes::defaults::AoDefaults;
use crate::nodes::node::{Node, NodeBase, PrepareContext, ProcessContext};
use crate::nodes::port::{NodeInput, NodeOutput, PortType};
use crate::nodes::value::Value;

use super::{ImageBuffer, Kernel};

pub struct AoNode {
    base: NodeBase,
    rays: i32,
    resolved_rays: i32,
    buffer: ImageBuffer,
    blur: Kernel,
    occlusion: Kernel,
}

#[derive(Serialize, Deserialize)]
struct AoFields {
    rays: i32,
}

impl AoNode {
    pub fn new(width: u32, height: u32) -> Self {
        let mut base = NodeBase::new("AO", width, height);
        base.inputs.push(NodeInput::new(PortType::GRAY, "Gray Input"));
        base.outputs.push(NodeOutput::new(PortType::GRAY, "Output"));
        Self {
            base,
            rays: AoDefaults::RAYS_DEFAULT,
            resolved_rays: AoDefaults::RAYS_DEFAULT,
            buffer: ImageBuffer::default(),
            blur: Kernel::new(KernelKind::Blur),
            occlusion: Kernel::new(KernelKind::Occlusion),
        }
    }

    pub fn rays(&self) -> i32 {
        self.rays
    }

    /// Sets the ray count, clamped to the supported range
    pub fn set_rays(&mut self, rays: i32) {
        self.rays = rays.max(AoDefaults::RAYS_MIN);
        self.resolved_rays = self.rays;
    }

    /// Ray count used by the last parameter resolution
    pub fn resolved_rays(&self) -> i32 {
        self.resolved_rays
    }

    pub fn set_tile(&mut self, tile_x: f32, tile_y: f32) {
        self.base.tile_x = tile_x;
        self.base.tile_y = tile_y;
    }
}

impl Node for AoNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "AO"
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
        vec!["Rays".to_string()]
    }

    fn parameter_value(&self, name: &str) -> Option<Value> {
        match name {
            "Rays" => Some(Value::Int(self.rays)),
            _ => None,
        }
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) {
        let rays = ctx
            .parameters
            .get(&self.base.id, "Rays")
            .and_then(|value| value.as_f32())
            .map(|rays| rays as i32)
            .unwrap_or(self.rays);
        self.resolved_rays = rays.max(AoDefaults::RAYS_MIN);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let Some(source) = self.base.input_buffer(0) else {
            return;
        };
        if !source.is_valid() {
            return;
        }

        let (width, height) = (self.base.width, self.base.height);
        let buffer = self.buffer.ensure(ctx.device, width, height, self.base.pixel_format);

        let blur = self.blur.get(ctx.device);
        blur.process(
            width,
            height,
            &[source],
            buffer,
            &KernelParams::default().with_intensity(self.resolved_rays as f32),
        );
        blur.complete();

        let occlusion = self.occlusion.get(ctx.device);
        occlusion.process(
            width,
            height,
            &[buffer, source],
            buffer,
            &KernelParams::default().with_tile(self.base.tile_x, self.base.tile_y),
        );
        occlusion.complete();

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
        self.blur.release();
        self.occlusion.release();
    }

    fn save_fields(&self) -> serde_json::Value {
        serde_json::to_value(AoFields { rays: self.rays }).unwrap_or_default()
    }

    fn load_fields(&mut self, fields: &serde_json::Value) -> Result<()> {
        if fields.is_null() {
            return Ok(());
        }
        let fields: AoFields = serde_json::from_value(fields.clone())?;
        self.set_rays(fields.rays);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{PixelFormat, SoftwareDevice};
    use crate::nodes::parameters::{parameter_key, ParameterSnapshot};
    use crate::nodes::port::PortRef;

    #[test]
    fn test_rays_clamp() {
        let mut node = AoNode::new(4, 4);
        assert_eq!(node.rays(), AoDefaults::RAYS_DEFAULT);
        node.set_rays(0);
        assert_eq!(node.rays(), 1);
        node.set_rays(-5);
        assert_eq!(node.rays(), 1);
        node.set_rays(1000);
        assert_eq!(node.rays(), 1000);
    }

    #[test]
    fn test_prepare_prefers_graph_value() {
        let mut node = AoNode::new(4, 4);
        let mut params = ParameterSnapshot::default();
        let ctx = PrepareContext {
            parameters: &params,
            random_seed: 0,
        };
        node.prepare(&ctx);
        assert_eq!(node.resolved_rays(), 4);

        params.insert(parameter_key(&node.base().id, "Rays"), Value::Int(0));
        node.prepare(&PrepareContext {
            parameters: &params,
            random_seed: 0,
        });
        assert_eq!(node.resolved_rays(), 1);
        assert_eq!(node.rays(), 4);
    }

    #[test]
    fn test_process_without_input_is_noop() {
        let device = SoftwareDevice::new();
        let mut node = AoNode::new(16, 16);
        let params = ParameterSnapshot::default();
        let mut ctx = ProcessContext::new(&device, &params, 0);
        node.process(&mut ctx);

        assert!(node.base().outputs[0].data().is_none());
        assert_eq!(device.stats().dispatches, 0);
        assert_eq!(device.stats().allocations, 0);
    }

    #[test]
    fn test_two_pass_pipeline() {
        let device = SoftwareDevice::new();
        let source = device.create_buffer(16, 16, PixelFormat::Luminance32F);
        let mut node = AoNode::new(16, 16);
        node.set_tile(4.0, 2.0);
        node.base_mut().inputs[0].attach(PortRef::new("up", 0), Some(Value::Buffer(source)));

        let params = ParameterSnapshot::default();
        let mut ctx = ProcessContext::new(&device, &params, 0);
        node.process(&mut ctx);

        let dispatches = device.dispatches();
        assert_eq!(dispatches.len(), 2);
        assert_eq!(dispatches[0].kind, KernelKind::Blur);
        assert_eq!(dispatches[0].inputs, vec![source.id]);
        assert_eq!(dispatches[0].params().tile, [1.0, 1.0]);
        assert_eq!(dispatches[1].kind, KernelKind::Occlusion);
        assert_eq!(dispatches[1].params().tile, [4.0, 2.0]);
        assert_eq!(dispatches[0].output, dispatches[1].output);
        assert_eq!(node.base().revision(), 1);
    }
}
