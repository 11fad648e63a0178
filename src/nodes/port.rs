//! Port types and functionality for node connections

use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::value::Value;

/// Index of a port within its node's input or output list
pub type PortId = usize;

/// Set of data types a port produces or accepts
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PortType(u32);

impl PortType {
    pub const NONE: PortType = PortType(0);
    pub const GRAY: PortType = PortType(1);
    pub const COLOR: PortType = PortType(1 << 1);
    pub const FLOAT: PortType = PortType(1 << 2);
    pub const FLOAT2: PortType = PortType(1 << 3);
    pub const FLOAT3: PortType = PortType(1 << 4);
    pub const FLOAT4: PortType = PortType(1 << 5);
    pub const BOOL: PortType = PortType(1 << 6);
    pub const INT: PortType = PortType(1 << 7);

    /// Every vector arity
    pub const VECTOR: PortType = PortType(Self::FLOAT2.0 | Self::FLOAT3.0 | Self::FLOAT4.0);
    /// Scalars and vectors
    pub const NUMERIC: PortType = PortType(Self::FLOAT.0 | Self::VECTOR.0);
    /// Image buffers of either channel layout
    pub const IMAGE: PortType = PortType(Self::GRAY.0 | Self::COLOR.0);

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check whether two masks share at least one type
    pub fn intersects(&self, other: PortType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(&self, other: PortType) -> bool {
        self.0 & other.0 == other.0
    }

    /// GLSL type name for single-type masks
    pub fn glsl_name(&self) -> Option<&'static str> {
        match *self {
            PortType::FLOAT | PortType::INT | PortType::BOOL => Some("float"),
            PortType::FLOAT2 => Some("vec2"),
            PortType::FLOAT3 => Some("vec3"),
            PortType::FLOAT4 => Some("vec4"),
            _ => None,
        }
    }
}

impl BitOr for PortType {
    type Output = PortType;

    fn bitor(self, rhs: PortType) -> PortType {
        PortType(self.0 | rhs.0)
    }
}

impl BitAnd for PortType {
    type Output = PortType;

    fn bitand(self, rhs: PortType) -> PortType {
        PortType(self.0 & rhs.0)
    }
}

impl fmt::Debug for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PortType, &str); 8] = [
            (PortType::GRAY, "Gray"),
            (PortType::COLOR, "Color"),
            (PortType::FLOAT, "Float"),
            (PortType::FLOAT2, "Float2"),
            (PortType::FLOAT3, "Float3"),
            (PortType::FLOAT4, "Float4"),
            (PortType::BOOL, "Bool"),
            (PortType::INT, "Int"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(t, _)| self.contains(*t))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Notification delivered to the node owning an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    /// A connection was formed
    Added,
    /// Upstream data changed
    Changed,
    /// The connection was torn down
    Removed,
}

/// Address of a port on a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: PortId,
}

impl PortRef {
    pub fn new(node: impl Into<NodeId>, port: PortId) -> Self {
        Self { node: node.into(), port }
    }
}

/// Input endpoint: at most one upstream output
#[derive(Debug, Clone)]
pub struct NodeInput {
    pub name: String,
    accepts: PortType,
    required: bool,
    connection: Option<PortRef>,
    data: Option<Value>,
}

impl NodeInput {
    /// Creates a required input accepting `accepts`
    pub fn new(accepts: PortType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accepts,
            required: true,
            connection: None,
            data: None,
        }
    }

    /// Marks the input as optional for readiness checks
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn accepts(&self) -> PortType {
        self.accepts
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Upstream output this input listens to
    pub fn connection(&self) -> Option<&PortRef> {
        self.connection.as_ref()
    }

    /// True while connected to a live upstream output
    pub fn has_input(&self) -> bool {
        self.connection.is_some()
    }

    /// Last value delivered from upstream
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub(crate) fn attach(&mut self, upstream: PortRef, data: Option<Value>) -> Option<PortRef> {
        self.data = data;
        self.connection.replace(upstream)
    }

    pub(crate) fn detach(&mut self) -> Option<PortRef> {
        self.data = None;
        self.connection.take()
    }

    pub(crate) fn set_data(&mut self, data: Option<Value>) {
        self.data = data;
    }
}

/// Output endpoint: fans out to any number of inputs
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub name: String,
    port_type: PortType,
    data: Option<Value>,
    subscribers: Vec<PortRef>,
    changed: bool,
}

impl NodeOutput {
    pub fn new(port_type: PortType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_type,
            data: None,
            subscribers: Vec::new(),
            changed: false,
        }
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    /// Narrows or widens the produced type, e.g. for constants
    pub fn set_port_type(&mut self, port_type: PortType) {
        self.port_type = port_type;
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Downstream inputs listening to this output
    pub fn subscribers(&self) -> &[PortRef] {
        &self.subscribers
    }

    /// Stores a value and flags the output for notification
    pub fn set_data(&mut self, data: Value) {
        self.data = Some(data);
        self.changed = true;
    }

    /// Drops the value and flags the output for notification
    pub fn clear_data(&mut self) {
        self.data = None;
        self.changed = true;
    }

    /// Re-announces the current value to all subscribers
    pub fn notify_changed(&mut self) {
        self.changed = true;
    }

    /// Drops the value without notifying, used when a buffer is reclaimed
    pub(crate) fn forget_data(&mut self) {
        self.data = None;
    }

    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub(crate) fn subscribe(&mut self, input: PortRef) {
        if !self.subscribers.contains(&input) {
            self.subscribers.push(input);
        }
    }

    pub(crate) fn unsubscribe(&mut self, input: &PortRef) {
        self.subscribers.retain(|s| s != input);
    }
}
