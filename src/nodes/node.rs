//! Node types and core node functionality

use std::any::Any;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parameters::ParameterSnapshot;
use super::port::{NodeInput, NodeOutput, PortEvent, PortId, PortType};
use super::scheduler::TaskStep;
use super::shader::ShaderContext;
use super::value::Value;
use super::defaults::ImageDefaults;
use crate::error::Result;
use crate::gpu::{BufferHandle, GpuDevice, PixelFormat};

/// Unique identifier for a node
pub type NodeId = String;

/// Creates a fresh process-wide unique node id
pub fn new_node_id() -> NodeId {
    Uuid::new_v4().to_string()
}

/// Role of a node on the boundary of its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Input,
    Output,
}

/// What a node wants done after one of its inputs fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReaction {
    /// Re-evaluate (inline or scheduled, depending on the node's mode)
    Process,
    /// Drop all output data and notify downstream
    ClearOutputs,
    /// Only raise the node-level update notification
    Updated,
    Ignore,
}

/// State shared by every node
#[derive(Debug, Clone)]
pub struct NodeBase {
    pub id: NodeId,
    pub name: String,
    pub position: [f32; 2],
    pub inputs: Vec<NodeInput>,
    pub outputs: Vec<NodeOutput>,
    pub width: u32,
    pub height: u32,
    pub tile_x: f32,
    pub tile_y: f32,
    pub pixel_format: PixelFormat,
    pub can_preview: bool,
    pub is_async: bool,
    revision: u64,
}

impl NodeBase {
    /// Creates a base with a fresh id and default tiling
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: new_node_id(),
            name: name.into(),
            position: [0.0, 0.0],
            inputs: Vec::new(),
            outputs: Vec::new(),
            width,
            height,
            tile_x: ImageDefaults::TILE_DEFAULT,
            tile_y: ImageDefaults::TILE_DEFAULT,
            pixel_format: PixelFormat::default(),
            can_preview: true,
            is_async: false,
            revision: 0,
        }
    }

    /// Raises the node-level update notification
    pub fn mark_updated(&mut self) {
        self.revision += 1;
    }

    /// Number of update notifications raised so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Every required input holds data
    pub fn inputs_ready(&self) -> bool {
        self.inputs
            .iter()
            .filter(|input| input.is_required())
            .all(|input| input.has_input() && input.data().is_some())
    }

    pub fn input_data(&self, index: PortId) -> Option<&Value> {
        self.inputs.get(index).and_then(|input| input.data())
    }

    pub fn input_buffer(&self, index: PortId) -> Option<BufferHandle> {
        self.input_data(index).and_then(|value| value.as_buffer())
    }

    /// Writes the base fields into a persistence record
    pub fn to_record(&self, type_name: &str, fields: serde_json::Value) -> NodeRecord {
        NodeRecord {
            id: self.id.clone(),
            type_name: type_name.to_string(),
            name: self.name.clone(),
            position: self.position,
            width: self.width,
            height: self.height,
            tile_x: self.tile_x,
            tile_y: self.tile_y,
            pixel_format: self.pixel_format,
            fields,
        }
    }

    /// Restores the base fields from a persistence record
    pub fn apply_record(&mut self, record: &NodeRecord) {
        self.id = record.id.clone();
        self.name = record.name.clone();
        self.position = record.position;
        self.width = record.width;
        self.height = record.height;
        self.tile_x = record.tile_x;
        self.tile_y = record.tile_y;
        self.pixel_format = record.pixel_format;
    }
}

/// Persisted form of a node: base identity plus node-specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub position: [f32; 2],
    pub width: u32,
    pub height: u32,
    pub tile_x: f32,
    pub tile_y: f32,
    #[serde(default)]
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Read-only view handed to parameter resolution. Safe to share across workers.
pub struct PrepareContext<'a> {
    pub parameters: &'a ParameterSnapshot,
    pub random_seed: i32,
}

/// Slot a function graph exposes for its designated result node
#[derive(Debug, Clone, Default)]
pub struct ResultSlot {
    pub node: Option<NodeId>,
    pub value: Option<Value>,
}

/// Everything a node may touch while processing on the pipeline context
pub struct ProcessContext<'a> {
    pub device: &'a dyn GpuDevice,
    pub parameters: &'a ParameterSnapshot,
    pub random_seed: i32,
    pub(crate) result: Option<&'a mut ResultSlot>,
}

impl<'a> ProcessContext<'a> {
    pub fn new(device: &'a dyn GpuDevice, parameters: &'a ParameterSnapshot, random_seed: i32) -> Self {
        Self {
            device,
            parameters,
            random_seed,
            result: None,
        }
    }

    /// Publishes `value` as the enclosing function graph's result when
    /// `node` is its designated result node
    pub fn offer_result(&mut self, node: &str, value: Value) {
        if let Some(slot) = self.result.as_deref_mut() {
            if slot.node.as_deref() == Some(node) {
                slot.value = Some(value);
            }
        }
    }
}

/// A unit of computation in a graph
pub trait Node: Send {
    fn base(&self) -> &NodeBase;

    fn base_mut(&mut self) -> &mut NodeBase;

    /// Name used for this node type in persisted graphs
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn id(&self) -> &str {
        &self.base().id
    }

    fn boundary(&self) -> Option<Boundary> {
        None
    }

    /// Whether the node owns a device buffer sized to its width and height
    fn is_buffer_backed(&self) -> bool {
        false
    }

    /// Whether the node may be deferred to the scheduler. Math nodes always run inline.
    fn is_schedulable(&self) -> bool {
        true
    }

    /// All requirements for `process` are met
    fn is_ready(&self) -> bool {
        self.base().inputs_ready()
    }

    /// False while the node's port set is not usable for new links
    fn exposes_ports(&self) -> bool {
        true
    }

    fn on_input_event(&mut self, _index: PortId, event: PortEvent) -> NodeReaction {
        match event {
            PortEvent::Added | PortEvent::Changed => NodeReaction::Process,
            PortEvent::Removed => NodeReaction::ClearOutputs,
        }
    }

    /// Names this node exposes for override through the graph parameter table
    fn promoted_parameters(&self) -> Vec<String> {
        Vec::new()
    }

    /// Current own value of a promoted parameter
    fn parameter_value(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Resolve parameter overrides. May run on any worker.
    fn prepare(&mut self, _ctx: &PrepareContext<'_>) {}

    /// Compute outputs. Runs on the pipeline context.
    fn process(&mut self, ctx: &mut ProcessContext<'_>);

    /// Steps this node's scheduled task is made of
    fn task(&self) -> Vec<TaskStep> {
        vec![TaskStep::ResolveParameters, TaskStep::Process]
    }

    /// Run one pipeline-affine step of the task
    fn run_pipeline_step(&mut self, step: TaskStep, ctx: &mut ProcessContext<'_>) {
        if step == TaskStep::Process && self.is_ready() {
            self.process(ctx);
        }
    }

    /// Shader statements for this node, empty when it cannot contribute yet
    fn shader_part(&self, _ctx: &ShaderContext<'_>) -> String {
        String::new()
    }

    /// Variable-name prefix for shader statements
    fn shader_id(&self) -> Option<&str> {
        None
    }

    /// Concrete type an output carries in shader code
    fn output_type(&self, index: PortId, _ctx: &ShaderContext<'_>) -> PortType {
        self.base()
            .outputs
            .get(index)
            .map(|output| output.port_type())
            .unwrap_or(PortType::NONE)
    }

    fn active_buffer(&self) -> Option<BufferHandle> {
        None
    }

    /// RGBA8 preview of the active buffer
    fn preview(&self, device: &dyn GpuDevice) -> Option<Vec<u8>> {
        if !self.base().can_preview {
            return None;
        }
        self.active_buffer().and_then(|buffer| device.read_pixels(buffer))
    }

    fn set_size(&mut self, width: u32, height: u32) {
        let base = self.base_mut();
        base.width = width;
        base.height = height;
    }

    fn set_async(&mut self, is_async: bool) {
        self.base_mut().is_async = is_async;
    }

    /// Drain pending parameter notifications; true when the node should reprocess
    fn poll_updates(&mut self) -> bool {
        false
    }

    /// Give back the owned buffer between evaluations, returning the released handle
    fn release_buffer(&mut self, _device: &dyn GpuDevice) -> Option<BufferHandle> {
        None
    }

    /// Release every owned device resource. Safe to call repeatedly.
    fn dispose(&mut self, device: &dyn GpuDevice) {
        let _ = self.release_buffer(device);
    }

    fn save_fields(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn load_fields(&mut self, _fields: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn to_record(&self) -> NodeRecord {
        self.base().to_record(self.type_name(), self.save_fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::port::PortRef;

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeBase::new("A", 16, 16);
        let b = NodeBase::new("B", 16, 16);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_readiness_ignores_optional_inputs() {
        let mut base = NodeBase::new("Blend", 16, 16);
        base.inputs.push(NodeInput::new(PortType::IMAGE, "A"));
        base.inputs.push(NodeInput::new(PortType::IMAGE, "Mask").optional());
        assert!(!base.inputs_ready());

        base.inputs[0].attach(PortRef::new("up", 0), Some(Value::Float(1.0)));
        assert!(base.inputs_ready());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut base = NodeBase::new("AO", 128, 64);
        base.tile_x = 2.0;
        base.position = [10.0, 20.0];
        let record = base.to_record("AO", serde_json::json!({ "rays": 8 }));

        let json = serde_json::to_string(&record).unwrap();
        let parsed: NodeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);

        let mut other = NodeBase::new("x", 1, 1);
        other.apply_record(&parsed);
        assert_eq!(other.id, base.id);
        assert_eq!(other.width, 128);
        assert_eq!(other.tile_x, 2.0);
    }
}
