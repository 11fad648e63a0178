//! Graph input boundary node

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpu::BufferHandle;
use crate::nodes::node::{Boundary, Node, NodeBase, ProcessContext};
use crate::nodes::port::{NodeOutput, PortType};
use crate::nodes::value::Value;

/// Passes an externally supplied value to its output.
///
/// An embedding [`GraphInstanceNode`](crate::nodes::instance::GraphInstanceNode)
/// exposes one input port per input node of the embedded graph.
pub struct InputNode {
    base: NodeBase,
    external: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct InputFields {
    port_type: PortType,
}

impl InputNode {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_type(PortType::IMAGE, width, height)
    }

    /// Input node producing `port_type` values
    pub fn with_type(port_type: PortType, width: u32, height: u32) -> Self {
        let mut base = NodeBase::new("Input", width, height);
        base.outputs.push(NodeOutput::new(port_type, "Output"));
        Self { base, external: None }
    }

    pub fn external(&self) -> Option<Value> {
        self.external
    }

    pub fn set_external(&mut self, value: Option<Value>) {
        self.external = value;
    }

    /// Type produced on the output port
    pub fn port_type(&self) -> PortType {
        self.base.outputs[0].port_type()
    }
}

impl Node for InputNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Input"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn boundary(&self) -> Option<Boundary> {
        Some(Boundary::Input)
    }

    fn is_ready(&self) -> bool {
        self.external.is_some()
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) {
        match self.external {
            Some(value) => self.base.outputs[0].set_data(value),
            None => return,
        }
        self.base.mark_updated();
    }

    fn active_buffer(&self) -> Option<BufferHandle> {
        self.external.and_then(|value| value.as_buffer())
    }

    fn save_fields(&self) -> serde_json::Value {
        serde_json::to_value(InputFields {
            port_type: self.port_type(),
        })
        .unwrap_or_default()
    }

    fn load_fields(&mut self, fields: &serde_json::Value) -> Result<()> {
        if fields.is_null() {
            return Ok(());
        }
        let fields: InputFields = serde_json::from_value(fields.clone())?;
        self.base.outputs[0].set_port_type(fields.port_type);
        Ok(())
    }
}
