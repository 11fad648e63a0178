//! matgraph core library
//!
//! A procedural image and material dataflow engine. Image nodes render into
//! device buffers, math nodes compute values or emit shader source, and whole
//! graphs can be embedded in other graphs as single nodes.

pub mod config;
pub mod error;
pub mod gpu;
pub mod nodes;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{GraphError, Result};
pub use gpu::{GpuDevice, NullDevice, SoftwareDevice};
pub use nodes::{FunctionGraph, Graph, GraphData, GraphInstanceNode, Node, NodeId, PortType, Value};
