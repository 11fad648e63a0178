//! Math nodes
//!
//! Math nodes hold no buffers. They either compute concrete values on the CPU
//! (inside function graphs) or contribute statements to shader source through
//! [`Node::shader_part`](crate::nodes::node::Node::shader_part). They always
//! run inline, even in graphs that schedule their image nodes.

pub mod add;
pub mod break_float3;
pub mod constant;
pub mod dot_product;
pub mod make_float3;

pub use add::AddNode;
pub use break_float3::BreakFloat3Node;
pub use constant::ConstantNode;
pub use dot_product::DotProductNode;
pub use make_float3::MakeFloat3Node;

use crate::nodes::node::{NodeBase, NodeReaction};
use crate::nodes::port::PortEvent;

/// Base shared by math nodes: never previewed
pub(crate) fn math_base(name: &str, width: u32, height: u32) -> NodeBase {
    let mut base = NodeBase::new(name, width, height);
    base.can_preview = false;
    base
}

/// A new link only marks the node updated; data changes recompute it
pub(crate) fn math_reaction(event: PortEvent) -> NodeReaction {
    match event {
        PortEvent::Added | PortEvent::Removed => NodeReaction::Updated,
        PortEvent::Changed => NodeReaction::Process,
    }
}
