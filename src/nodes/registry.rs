//! Node registry
//!
//! Maps saved type names to constructors so graphs can be rebuilt from their
//! serialized form.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::config::EngineConfig;
use crate::gpu::GpuDevice;
use crate::nodes::image::{AoNode, InputNode, OutputNode, UniformColorNode};
use crate::nodes::instance::GraphInstanceNode;
use crate::nodes::math::{AddNode, BreakFloat3Node, ConstantNode, DotProductNode, MakeFloat3Node};
use crate::nodes::node::Node;
use crate::nodes::value::Value;

/// Everything a constructor may need besides its size
pub struct CreateContext<'a> {
    pub width: u32,
    pub height: u32,
    pub device: &'a Arc<dyn GpuDevice>,
    pub config: &'a EngineConfig,
}

/// Node creation function
pub type NodeCreator = fn(&CreateContext<'_>) -> Box<dyn Node>;

/// Broad grouping of node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeCategory {
    Boundary,
    Image,
    Math,
    Graph,
}

pub struct NodeRegistry {
    creators: BTreeMap<String, (NodeCategory, NodeCreator)>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            creators: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in node type
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Input", NodeCategory::Boundary, |ctx| {
            Box::new(InputNode::new(ctx.width, ctx.height))
        });
        registry.register("Output", NodeCategory::Boundary, |ctx| {
            Box::new(OutputNode::new(ctx.width, ctx.height))
        });
        registry.register("UniformColor", NodeCategory::Image, |ctx| {
            Box::new(UniformColorNode::new(ctx.width, ctx.height))
        });
        registry.register("AO", NodeCategory::Image, |ctx| {
            Box::new(AoNode::new(ctx.width, ctx.height))
        });
        registry.register("Constant", NodeCategory::Math, |ctx| {
            Box::new(ConstantNode::new(Value::Float(0.0), ctx.width, ctx.height))
        });
        registry.register("Add", NodeCategory::Math, |ctx| {
            Box::new(AddNode::new(ctx.width, ctx.height))
        });
        registry.register("DotProduct", NodeCategory::Math, |ctx| {
            Box::new(DotProductNode::new(ctx.width, ctx.height))
        });
        registry.register("BreakFloat3", NodeCategory::Math, |ctx| {
            Box::new(BreakFloat3Node::new(ctx.width, ctx.height))
        });
        registry.register("MakeFloat3", NodeCategory::Math, |ctx| {
            Box::new(MakeFloat3Node::new(ctx.width, ctx.height))
        });
        registry.register("GraphInstance", NodeCategory::Graph, |ctx| {
            Box::new(GraphInstanceNode::new(
                ctx.width,
                ctx.height,
                Arc::clone(ctx.device),
                ctx.config.clone(),
            ))
        });
        registry
    }

    /// Register a constructor, replacing any previous one for the type
    pub fn register(&mut self, type_name: &str, category: NodeCategory, creator: NodeCreator) {
        self.creators.insert(type_name.to_string(), (category, creator));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.creators.contains_key(type_name)
    }

    /// Registered type names in sorted order
    pub fn node_types(&self) -> Vec<&str> {
        self.creators.keys().map(String::as_str).collect()
    }

    pub fn types_in_category(&self, category: NodeCategory) -> Vec<&str> {
        self.creators
            .iter()
            .filter(|(_, (c, _))| *c == category)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Create a node by type name
    pub fn create_node(&self, type_name: &str, ctx: &CreateContext<'_>) -> Option<Box<dyn Node>> {
        let Some((_, creator)) = self.creators.get(type_name) else {
            debug!("No node type registered as {}", type_name);
            return None;
        };
        let mut node = creator(ctx);
        node.base_mut().pixel_format = ctx.config.pixel_format;
        Some(node)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Create a built-in node by its saved type name
pub fn create_node(
    type_name: &str,
    width: u32,
    height: u32,
    device: &Arc<dyn GpuDevice>,
    config: &EngineConfig,
) -> Option<Box<dyn Node>> {
    let ctx = CreateContext {
        width,
        height,
        device,
        config,
    };
    NodeRegistry::builtin().create_node(type_name, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullDevice;

    #[test]
    fn test_every_builtin_type_round_trips_its_name() {
        let registry = NodeRegistry::builtin();
        let device: Arc<dyn GpuDevice> = Arc::new(NullDevice);
        let config = EngineConfig::default();
        let ctx = CreateContext {
            width: 4,
            height: 4,
            device: &device,
            config: &config,
        };
        for type_name in registry.node_types() {
            let node = registry.create_node(type_name, &ctx).unwrap();
            assert_eq!(node.type_name(), type_name);
            assert_eq!(node.base().width, 4);
        }
    }

    #[test]
    fn test_unknown_type() {
        let device: Arc<dyn GpuDevice> = Arc::new(NullDevice);
        assert!(create_node("Nope", 1, 1, &device, &EngineConfig::default()).is_none());
    }

    #[test]
    fn test_categories() {
        let registry = NodeRegistry::builtin();
        assert_eq!(registry.types_in_category(NodeCategory::Boundary), vec!["Input", "Output"]);
        assert_eq!(registry.types_in_category(NodeCategory::Graph), vec!["GraphInstance"]);
        assert_eq!(registry.node_types().len(), 10);
    }
}
