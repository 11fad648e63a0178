//! Builds a small occlusion graph, overrides a promoted parameter and
//! compiles a math graph to shader source.
//!
//! Run with `RUST_LOG=debug` to see graph activity.

use std::sync::Arc;

use glam::Vec3;
use log::info;

use matgraph::gpu::SoftwareDevice;
use matgraph::nodes::image::{AoNode, OutputNode, UniformColorNode};
use matgraph::nodes::math::{BreakFloat3Node, ConstantNode, DotProductNode};
use matgraph::{FunctionGraph, Graph, Result, Value};

fn main() -> Result<()> {
    env_logger::init();

    let device = SoftwareDevice::new();
    let mut graph = Graph::new("occlusion", Arc::new(device.clone()));

    let mut color = UniformColorNode::new(64, 64);
    color.set_color([0.5, 0.5, 0.5, 1.0]);
    let color = graph.add_node(Box::new(color))?;
    let ao = graph.add_node(Box::new(AoNode::new(64, 64)))?;
    let output = graph.add_node(Box::new(OutputNode::new(64, 64)))?;
    graph.connect(&color, 0, &ao, 0)?;
    graph.connect(&ao, 0, &output, 0)?;

    graph.promote_parameter(&ao, "Rays")?;
    graph.set_parameter_value(&ao, "Rays", Value::Int(12))?;
    graph.try_and_process();

    let stats = device.stats();
    info!(
        "Graph {} finished {} rounds with {} live buffers",
        graph.name,
        graph.rounds(),
        stats.live_buffers
    );
    if let Some(preview) = graph.preview() {
        println!("preview: {} bytes", preview.len());
    }

    let mut function = FunctionGraph::new("shade");
    let normal = function.add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(0.0, 0.0, 1.0)), 1, 1)))?;
    let light = function.add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(0.3, 0.4, 0.8)), 1, 1)))?;
    let dot = function.add_node(Box::new(DotProductNode::new(1, 1)))?;
    let split = function.add_node(Box::new(BreakFloat3Node::new(1, 1)))?;
    function.graph_mut().connect(&normal, 0, &dot, 0)?;
    function.graph_mut().connect(&light, 0, &dot, 1)?;
    function.graph_mut().connect(&light, 0, &split, 0)?;
    function.set_output_node(&dot);

    println!("lambert = {:?}", function.evaluate());
    println!("{}", function.compile_shader());

    graph.save_file(std::env::temp_dir().join("occlusion.mgraph"))?;
    Ok(())
}
