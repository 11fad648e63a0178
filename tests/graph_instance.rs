use std::path::Path;
use std::sync::Arc;

use glam::Vec3;
use matgraph::gpu::{KernelKind, SoftwareDevice};
use matgraph::nodes::image::{AoNode, OutputNode, UniformColorNode};
use matgraph::nodes::math::{BreakFloat3Node, ConstantNode, MakeFloat3Node};
use matgraph::nodes::InstanceState;
use matgraph::{EngineConfig, FunctionGraph, Graph, GraphInstanceNode, Node, Value};

/// Writes uniform color -> AO -> output with Rays promoted. Returns the AO id.
fn write_authored_graph(device: &SoftwareDevice, path: &Path, rays: i32) -> String {
    let mut graph = Graph::new("authored", Arc::new(device.clone()));
    let color = graph.add_node(Box::new(UniformColorNode::new(16, 16))).unwrap();
    let mut ao = AoNode::new(16, 16);
    ao.set_rays(rays);
    let ao = graph.add_node(Box::new(ao)).unwrap();
    let output = graph.add_node(Box::new(OutputNode::new(16, 16))).unwrap();
    graph.connect(&color, 0, &ao, 0).unwrap();
    graph.connect(&ao, 0, &output, 0).unwrap();
    graph.promote_parameter(&ao, "Rays").unwrap();
    graph.save_file(path).unwrap();
    ao
}

fn last_blur_intensity(device: &SoftwareDevice) -> Option<f32> {
    device
        .dispatches()
        .into_iter()
        .filter(|record| record.kind == KernelKind::Blur)
        .last()
        .map(|record| record.params().intensity)
}

fn instance_graph(device: &SoftwareDevice, path: &Path) -> (Graph, String) {
    let mut instance = GraphInstanceNode::new(16, 16, Arc::new(device.clone()), EngineConfig::default());
    assert!(instance.load(path).unwrap());
    let mut outer = Graph::new("outer", Arc::new(device.clone()));
    let id = outer.add_node(Box::new(instance)).unwrap();
    (outer, id)
}

#[test]
fn test_load_names_instance_after_file() {
    let dir = tempfile::tempdir().unwrap();
    let device = SoftwareDevice::new();
    let path = dir.path().join("occlusion.mgraph");
    write_authored_graph(&device, &path, 4);

    let (outer, id) = instance_graph(&device, &path);
    let instance = outer.node_as::<GraphInstanceNode>(&id).unwrap();
    assert_eq!(instance.base().name, "occlusion");
    assert_eq!(instance.state(), InstanceState::Ready);
    assert_eq!(instance.path(), Some(path.as_path()));
    assert_eq!(instance.base().outputs.len(), 1);
}

#[test]
fn test_missing_or_foreign_file_does_not_load() {
    let dir = tempfile::tempdir().unwrap();
    let device = SoftwareDevice::new();
    let mut instance = GraphInstanceNode::new(16, 16, Arc::new(device.clone()), EngineConfig::default());

    assert!(!instance.load(dir.path().join("missing.mgraph")).unwrap());
    let foreign = dir.path().join("notes.txt");
    std::fs::write(&foreign, "{}").unwrap();
    assert!(!instance.load(&foreign).unwrap());
    assert_eq!(instance.state(), InstanceState::Unloaded);
}

#[test]
fn test_zero_rays_override_clamps_to_one() {
    let dir = tempfile::tempdir().unwrap();
    let device = SoftwareDevice::new();
    let path = dir.path().join("occlusion.mgraph");
    let inner_ao = write_authored_graph(&device, &path, 4);
    let (mut outer, id) = instance_graph(&device, &path);
    let key = format!("{}.Rays", inner_ao);

    outer.set_parameter_value(&id, &key, Value::Int(0)).unwrap();
    assert_eq!(last_blur_intensity(&device), Some(1.0));

    assert!(outer.remove_parameter_value(&id, &key));
    assert_eq!(last_blur_intensity(&device), Some(4.0));
}

#[test]
fn test_saved_instance_prefers_live_file() {
    let dir = tempfile::tempdir().unwrap();
    let device = SoftwareDevice::new();
    let path = dir.path().join("occlusion.mgraph");
    write_authored_graph(&device, &path, 4);
    let (outer, _) = instance_graph(&device, &path);
    let saved = outer.to_json().unwrap();

    // the authored file changes after the outer graph was saved
    write_authored_graph(&device, &path, 6);
    let mut reloaded = Graph::from_json(&saved, Arc::new(device.clone())).unwrap();
    reloaded.try_and_process();
    assert_eq!(last_blur_intensity(&device), Some(6.0));
}

#[test]
fn test_saved_instance_falls_back_to_embedded_copy() {
    let dir = tempfile::tempdir().unwrap();
    let device = SoftwareDevice::new();
    let path = dir.path().join("occlusion.mgraph");
    let inner_ao = write_authored_graph(&device, &path, 5);
    let (mut outer, id) = instance_graph(&device, &path);
    outer
        .set_parameter_value(&id, &format!("{}.Rays", inner_ao), Value::Int(3))
        .unwrap();
    let saved = outer.to_json().unwrap();
    drop(outer);

    std::fs::remove_file(&path).unwrap();
    let mut reloaded = Graph::from_json(&saved, Arc::new(device.clone())).unwrap();
    let instance = reloaded.node_as::<GraphInstanceNode>(&id).unwrap();
    assert_eq!(instance.state(), InstanceState::Ready);
    assert_eq!(instance.path(), Some(path.as_path()));
    assert!(instance.inner().unwrap().is_read_only());

    reloaded.try_and_process();
    assert_eq!(last_blur_intensity(&device), Some(3.0));
    assert!(reloaded.output_data(&id, 0).is_some());
}

#[test]
fn test_shader_statements_follow_dependencies() {
    let mut function = FunctionGraph::new("chain");
    let a = function
        .add_node(Box::new(ConstantNode::new(Value::Float3(Vec3::new(1.0, 2.0, 3.0)), 1, 1)))
        .unwrap();
    let b = function.add_node(Box::new(BreakFloat3Node::new(1, 1))).unwrap();
    let c = function.add_node(Box::new(MakeFloat3Node::new(1, 1))).unwrap();
    function.graph_mut().connect(&a, 0, &b, 0).unwrap();
    for axis in 0..3 {
        function.graph_mut().connect(&b, 2 - axis, &c, axis).unwrap();
    }
    assert!(function.set_output_node(&c));

    let source = function.compile_shader();
    let graph = function.graph();
    let position = |id: &str| {
        let sid = graph.node(id).unwrap().shader_id().unwrap().to_string();
        source.find(&format!("{}0 =", sid)).unwrap()
    };
    assert!(position(&a) < position(&b));
    assert!(position(&b) < position(&c));
    assert_eq!(source.lines().count(), 5);

    assert_eq!(function.evaluate(), Some(Value::Float3(Vec3::new(3.0, 2.0, 1.0))));
}

#[test]
fn test_scheduled_instance_waits_for_embedded_graph() {
    let dir = tempfile::tempdir().unwrap();
    let device = SoftwareDevice::new();
    let path = dir.path().join("occlusion.mgraph");
    let inner_ao = write_authored_graph(&device, &path, 4);
    let (mut outer, id) = instance_graph(&device, &path);
    let sink = outer.add_node(Box::new(OutputNode::new(16, 16))).unwrap();
    assert!(outer.connect(&id, 0, &sink, 0).unwrap());

    outer.set_synchronized(false);
    outer
        .set_parameter_value(&id, &format!("{}.Rays", inner_ao), Value::Int(9))
        .unwrap();
    outer.try_and_process();
    outer.run_until_idle();

    assert!(!outer.status().is_processing());
    let instance = outer.node_as::<GraphInstanceNode>(&id).unwrap();
    assert!(!instance.inner().unwrap().is_synchronized());
    assert!(!instance.inner().unwrap().status().is_processing());
    assert_eq!(last_blur_intensity(&device), Some(9.0));
    assert!(matches!(outer.output_data(&sink, 0), Some(Value::Buffer(_))));
}

#[test]
fn test_failed_reload_withdraws_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let device = SoftwareDevice::new();
    let path = dir.path().join("occlusion.mgraph");
    write_authored_graph(&device, &path, 4);
    let (mut outer, id) = instance_graph(&device, &path);
    let sink = outer.add_node(Box::new(OutputNode::new(16, 16))).unwrap();
    assert!(outer.connect(&id, 0, &sink, 0).unwrap());
    outer.try_and_process();
    let Some(Value::Buffer(result)) = outer.output_data(&id, 0) else {
        panic!("instance produced no output");
    };

    let missing = dir.path().join("missing.mgraph");
    let loaded = outer
        .edit_node::<GraphInstanceNode, _>(&id, |instance| instance.load(&missing))
        .unwrap()
        .unwrap();
    assert!(!loaded);

    let instance = outer.node_as::<GraphInstanceNode>(&id).unwrap();
    assert_eq!(instance.state(), InstanceState::Unloaded);
    assert!(!device.is_live(result));
    assert_eq!(outer.output_data(&id, 0), None);
    assert_eq!(outer.node(&sink).unwrap().base().inputs[0].data(), None);

    let other = outer.add_node(Box::new(OutputNode::new(16, 16))).unwrap();
    assert!(!outer.connect(&id, 0, &other, 0).unwrap());

    // a later successful load restores the existing link
    assert!(outer
        .edit_node::<GraphInstanceNode, _>(&id, |instance| instance.load(&path))
        .unwrap()
        .unwrap());
    outer.try_and_process();
    assert!(matches!(outer.node(&sink).unwrap().base().inputs[0].data(), Some(Value::Buffer(_))));
}
