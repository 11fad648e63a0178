use std::sync::Arc;

use glam::{Vec3, Vec4};
use matgraph::gpu::{GpuDevice, NullDevice, SoftwareDevice};
use matgraph::nodes::image::{AoNode, InputNode, OutputNode, UniformColorNode};
use matgraph::nodes::math::{AddNode, ConstantNode, DotProductNode, MakeFloat3Node};
use matgraph::nodes::GraphParameterValue;
use matgraph::{EngineConfig, FunctionGraph, Graph, GraphError, Node, Value};

fn reload(graph: &Graph, device: Arc<dyn GpuDevice>) -> Graph {
    let json = graph.to_json().unwrap();
    Graph::from_json(&json, device).unwrap()
}

#[test]
fn test_empty_graph() {
    let graph = Graph::new("empty", Arc::new(NullDevice));
    let loaded = reload(&graph, Arc::new(NullDevice));

    assert!(loaded.is_empty());
    assert_eq!(loaded.to_data(), graph.to_data());
}

#[test]
fn test_single_node() {
    let mut graph = Graph::new("single", Arc::new(NullDevice));
    let mut color = UniformColorNode::new(32, 16);
    color.set_color([0.25, 0.5, 0.75, 1.0]);
    let id = graph.add_node(Box::new(color)).unwrap();

    let loaded = reload(&graph, Arc::new(NullDevice));
    assert_eq!(loaded.node_ids(), &[id.clone()]);
    let node = loaded.node_as::<UniformColorNode>(&id).unwrap();
    assert_eq!(node.color(), [0.25, 0.5, 0.75, 1.0]);
    assert_eq!(node.base().width, 32);
    assert_eq!(node.base().height, 16);
    assert_eq!(loaded.to_data(), graph.to_data());
}

#[test]
fn test_larger_graph_keeps_wiring_and_parameters() {
    let device = SoftwareDevice::new();
    let mut graph = Graph::new("material", Arc::new(device.clone()));

    let input = graph.add_node(Box::new(InputNode::new(16, 16))).unwrap();
    let color = graph.add_node(Box::new(UniformColorNode::new(16, 16))).unwrap();
    let ao = graph.add_node(Box::new(AoNode::new(16, 16))).unwrap();
    let output = graph.add_node(Box::new(OutputNode::new(16, 16))).unwrap();
    let a = graph
        .add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::ONE), 1, 1)))
        .unwrap();
    let b = graph
        .add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(1.0, 2.0, 3.0)), 1, 1)))
        .unwrap();
    let add = graph.add_node(Box::new(AddNode::new(1, 1))).unwrap();
    let dot = graph.add_node(Box::new(DotProductNode::new(1, 1))).unwrap();
    let make = graph.add_node(Box::new(MakeFloat3Node::new(1, 1))).unwrap();

    assert!(graph.connect(&color, 0, &ao, 0).unwrap());
    assert!(graph.connect(&ao, 0, &output, 0).unwrap());
    assert!(graph.connect(&a, 0, &add, 0).unwrap());
    assert!(graph.connect(&b, 0, &add, 1).unwrap());
    assert!(graph.connect(&add, 0, &dot, 0).unwrap());
    assert!(graph.connect(&b, 0, &dot, 1).unwrap());
    assert!(graph.connect(&dot, 0, &make, 0).unwrap());

    graph.promote_parameter(&ao, "Rays").unwrap();
    graph.set_parameter_value(&ao, "Rays", Value::Int(9)).unwrap();
    graph.add_custom_parameter(GraphParameterValue::constant("Tint", Value::Float4(Vec4::ONE)));

    let mut scale = FunctionGraph::new("scale");
    let two = scale
        .add_node(Box::new(ConstantNode::new(Value::Float4(Vec4::splat(2.0)), 1, 1)))
        .unwrap();
    scale.set_output_node(&two);
    graph
        .set_parameter_binding(&color, "Color", GraphParameterValue::function("Color", scale))
        .unwrap();

    let loaded = reload(&graph, Arc::new(device.clone()));

    assert_eq!(loaded.len(), 9);
    assert_eq!(loaded.input_nodes(), &[input]);
    assert_eq!(loaded.output_nodes(), &[output]);
    assert_eq!(loaded.connections().len(), 7);
    assert_eq!(loaded.random_seed(), graph.random_seed());
    assert_eq!(loaded.parameter_value_by_name(&format!("{}.Rays", ao)), Some(Value::Int(9)));
    assert!(loaded.parameter(&color, "Color").unwrap().is_function());
    assert_eq!(loaded.to_data(), graph.to_data());
}

#[test]
fn test_file_roundtrip_requires_extension() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = Graph::new("on disk", Arc::new(NullDevice));
    graph.add_node(Box::new(AoNode::new(8, 8))).unwrap();

    let wrong = dir.path().join("graph.json");
    assert!(matches!(graph.save_file(&wrong), Err(GraphError::InvalidGraphFile(_))));

    let path = dir.path().join("graph.mgraph");
    graph.save_file(&path).unwrap();
    let loaded = Graph::load_file(&path, Arc::new(NullDevice), EngineConfig::default()).unwrap();
    assert_eq!(loaded.to_data(), graph.to_data());
}

#[test]
fn test_unknown_node_type_fails_the_load() {
    let graph = Graph::new("broken", Arc::new(NullDevice));
    let mut data = graph.to_data();
    let mut record = UniformColorNode::new(4, 4).to_record();
    record.type_name = "Teapot".to_string();
    data.nodes.push(record);

    let result = Graph::from_data(&data, Arc::new(NullDevice), EngineConfig::default());
    assert!(matches!(result, Err(GraphError::UnknownNodeType(name)) if name == "Teapot"));
}
