//! Node system - graphs, ports, parameters and the built-in node types

// Core node system modules
pub mod defaults;
pub mod graph;
pub mod node;
pub mod parameters;
pub mod port;
pub mod registry;
pub mod scheduler;
pub mod shader;
pub mod value;

// Graph composition
pub mod function_graph;
pub mod instance;

// Built-in node implementations
pub mod image;
pub mod math;

// Re-export core types
pub use function_graph::FunctionGraph;
pub use graph::{Connection, Graph, GraphData};
pub use instance::{GraphInstanceNode, InstanceState};
pub use node::{Boundary, Node, NodeBase, NodeId, NodeReaction, NodeRecord, PrepareContext, ProcessContext};
pub use parameters::{GraphParameterValue, ParameterBinding, ParameterSnapshot, ParameterUpdate};
pub use port::{NodeInput, NodeOutput, PortEvent, PortId, PortRef, PortType};
pub use registry::{NodeCategory, NodeRegistry};
pub use scheduler::{ProcessingStatus, TaskStep};
pub use value::Value;
