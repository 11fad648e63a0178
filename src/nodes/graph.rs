//! Node graph data structures and operations
//!
//! A [`Graph`] owns its nodes and wiring. Port notifications are queued and
//! delivered by a single drain loop, so a node that writes its outputs while
//! another notification is being handled never re-enters delivery.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::node::{Boundary, Node, NodeId, NodeReaction, NodeRecord, PrepareContext, ProcessContext, ResultSlot};
use super::parameters::{
    parameter_key, split_parameter_key, GraphParameterValue, ParameterBinding, ParameterRecord, ParameterSnapshot,
    ParameterUpdate,
};
use super::port::{PortEvent, PortId, PortRef};
use super::registry;
use super::scheduler::{Affinity, ProcessingStatus, Scheduler, TaskStep};
use super::shader::ShaderBuilder;
use super::value::Value;
use crate::config::EngineConfig;
use crate::error::{GraphError, Result};
use crate::gpu::{BufferHandle, GpuDevice};

/// Represents a connection between two ports on different nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeId,
    pub from_port: PortId,
    pub to_node: NodeId,
    pub to_port: PortId,
}

impl Connection {
    /// Creates a new connection
    pub fn new(from_node: NodeId, from_port: PortId, to_node: NodeId, to_port: PortId) -> Self {
        Self {
            from_node,
            from_port,
            to_node,
            to_port,
        }
    }
}

/// Persisted form of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub input_nodes: Vec<NodeId>,
    #[serde(default)]
    pub output_nodes: Vec<NodeId>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterRecord>,
    #[serde(default)]
    pub custom_parameters: Vec<ParameterRecord>,
    pub random_seed: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub result_node: Option<NodeId>,
}

/// A queued notification for one input port
#[derive(Debug, Clone)]
struct PortNotification {
    source: PortRef,
    target: PortRef,
    event: PortEvent,
    data: Option<Value>,
}

/// A graph of wired nodes plus its parameter tables and scheduler
pub struct Graph {
    id: String,
    pub name: String,
    device: Arc<dyn GpuDevice>,
    config: EngineConfig,
    order: Vec<NodeId>,
    node_lookup: HashMap<NodeId, Box<dyn Node>>,
    input_nodes: Vec<NodeId>,
    output_nodes: Vec<NodeId>,
    parameters: BTreeMap<String, GraphParameterValue>,
    custom_parameters: Vec<GraphParameterValue>,
    random_seed: i32,
    width: u32,
    height: u32,
    synchronized: bool,
    read_only: bool,
    result_slot: Option<ResultSlot>,
    scheduler: Scheduler,
    events: VecDeque<PortNotification>,
    propagating: bool,
    status: ProcessingStatus,
    parameter_listeners: Vec<Sender<ParameterUpdate>>,
    completion_listeners: Vec<Sender<u64>>,
    round: u64,
    disposed: bool,
}

impl Graph {
    /// Creates an empty graph with the default configuration
    pub fn new(name: impl Into<String>, device: Arc<dyn GpuDevice>) -> Self {
        Self::with_config(name, device, EngineConfig::default())
    }

    pub fn with_config(name: impl Into<String>, device: Arc<dyn GpuDevice>, config: EngineConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            device,
            width: config.default_width,
            height: config.default_height,
            synchronized: config.synchronized,
            config,
            order: Vec::new(),
            node_lookup: HashMap::new(),
            input_nodes: Vec::new(),
            output_nodes: Vec::new(),
            parameters: BTreeMap::new(),
            custom_parameters: Vec::new(),
            random_seed: rand::random::<i32>(),
            read_only: false,
            result_slot: None,
            scheduler: Scheduler::default(),
            events: VecDeque::new(),
            propagating: false,
            status: ProcessingStatus::default(),
            parameter_listeners: Vec::new(),
            completion_listeners: Vec::new(),
            round: 0,
            disposed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn random_seed(&self) -> i32 {
        self.random_seed
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Node ids in insertion order
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn input_nodes(&self) -> &[NodeId] {
        &self.input_nodes
    }

    pub fn output_nodes(&self) -> &[NodeId] {
        &self.output_nodes
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&dyn Node> {
        self.node_lookup.get(id).map(|node| node.as_ref())
    }

    /// Typed view of a node
    pub fn node_as<T: Any>(&self, id: &str) -> Option<&T> {
        self.node_lookup.get(id).and_then(|node| node.as_any().downcast_ref::<T>())
    }

    pub(crate) fn node_as_mut<T: Any>(&mut self, id: &str) -> Option<&mut T> {
        self.node_lookup
            .get_mut(id)
            .and_then(|node| node.as_any_mut().downcast_mut::<T>())
    }

    /// Current data on an output port
    pub fn output_data(&self, node: &str, port: PortId) -> Option<Value> {
        self.node(node)
            .and_then(|n| n.base().outputs.get(port))
            .and_then(|output| output.data().copied())
    }

    /// Shared `is_processing` flag
    pub fn status(&self) -> ProcessingStatus {
        self.status.clone()
    }

    /// Number of completed evaluation rounds
    pub fn rounds(&self) -> u64 {
        self.round
    }

    fn ensure_editable(&self) -> Result<()> {
        if self.read_only {
            return Err(GraphError::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    // ---- structure ----

    /// Adds a node and returns its id
    pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<NodeId> {
        self.ensure_editable()?;
        Ok(self.insert_node(node))
    }

    fn insert_node(&mut self, mut node: Box<dyn Node>) -> NodeId {
        let id = node.id().to_string();
        node.set_async(!self.synchronized);
        match node.boundary() {
            Some(Boundary::Input) => self.input_nodes.push(id.clone()),
            Some(Boundary::Output) => self.output_nodes.push(id.clone()),
            None => {}
        }
        debug!("Added node {} ({}) to graph {}", node.base().name, id, self.name);
        if self.node_lookup.insert(id.clone(), node).is_none() {
            self.order.push(id.clone());
        }
        id
    }

    /// Removes a node, tearing down its wiring and promoted parameters
    pub fn remove_node(&mut self, id: &str) -> Result<bool> {
        self.ensure_editable()?;
        let Some(mut node) = self.node_lookup.remove(id) else {
            return Ok(false);
        };

        for (index, input) in node.base_mut().inputs.iter_mut().enumerate() {
            if let Some(upstream) = input.detach() {
                self.unsubscribe(&upstream, &PortRef::new(id, index));
            }
        }
        for (index, output) in node.base().outputs.iter().enumerate() {
            for subscriber in output.subscribers() {
                if let Some(input) = self
                    .node_lookup
                    .get_mut(&subscriber.node)
                    .and_then(|n| n.base_mut().inputs.get_mut(subscriber.port))
                {
                    input.detach();
                }
                self.events.push_back(PortNotification {
                    source: PortRef::new(id, index),
                    target: subscriber.clone(),
                    event: PortEvent::Removed,
                    data: None,
                });
            }
        }

        node.dispose(self.device.as_ref());
        self.order.retain(|n| n != id);
        self.input_nodes.retain(|n| n != id);
        self.output_nodes.retain(|n| n != id);
        self.parameters
            .retain(|key, _| split_parameter_key(key).map(|(node, _)| node != id).unwrap_or(true));
        self.scheduler.cancel(id);
        if let Some(slot) = self.result_slot.as_mut() {
            if slot.node.as_deref() == Some(id) {
                slot.node = None;
                slot.value = None;
            }
        }
        info!("Removed node {} from graph {}", id, self.name);

        self.drain_events();
        Ok(true)
    }

    fn port_ref_checked(&self, node: &str, port: PortId, output: bool) -> Result<()> {
        let target = self
            .node_lookup
            .get(node)
            .ok_or_else(|| GraphError::NodeNotFound(node.to_string()))?;
        let count = if output {
            target.base().outputs.len()
        } else {
            target.base().inputs.len()
        };
        if port >= count {
            return Err(GraphError::PortOutOfRange {
                node: node.to_string(),
                index: port,
            });
        }
        Ok(())
    }

    /// Whether `target` is downstream of (or equal to) `from`
    pub fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.node_lookup.get(&id) {
                for output in &node.base().outputs {
                    stack.extend(output.subscribers().iter().map(|s| s.node.clone()));
                }
            }
        }
        false
    }

    /// Connects an output to an input, replacing the input's previous link.
    ///
    /// Returns `Ok(false)` when the link is rejected because the types do not
    /// intersect or it would close a cycle.
    pub fn connect(&mut self, from: &str, from_port: PortId, to: &str, to_port: PortId) -> Result<bool> {
        self.ensure_editable()?;
        if !self.link(from, from_port, to, to_port)? {
            return Ok(false);
        }
        self.events.push_back(PortNotification {
            source: PortRef::new(from, from_port),
            target: PortRef::new(to, to_port),
            event: PortEvent::Added,
            data: None,
        });
        self.drain_events();
        Ok(true)
    }

    /// Forms a link without notifying the input's node
    fn link(&mut self, from: &str, from_port: PortId, to: &str, to_port: PortId) -> Result<bool> {
        self.port_ref_checked(from, from_port, true)?;
        self.port_ref_checked(to, to_port, false)?;

        if !self.node_lookup[from].exposes_ports() || !self.node_lookup[to].exposes_ports() {
            debug!("Rejected connection {}:{} -> {}:{}, ports are suspended", from, from_port, to, to_port);
            return Ok(false);
        }

        if self.reaches(to, from) {
            debug!("Rejected connection {}:{} -> {}:{}, it would form a cycle", from, from_port, to, to_port);
            return Ok(false);
        }

        let (produced, data) = {
            let output = &self.node_lookup[from].base().outputs[from_port];
            (output.port_type(), output.data().copied())
        };
        let accepts = self.node_lookup[to].base().inputs[to_port].accepts();
        if !produced.intersects(accepts) {
            debug!(
                "Rejected connection {}:{} -> {}:{}, {:?} does not match {:?}",
                from, from_port, to, to_port, produced, accepts
            );
            return Ok(false);
        }

        let source = PortRef::new(from, from_port);
        let target = PortRef::new(to, to_port);
        let previous = self
            .node_lookup
            .get_mut(to)
            .and_then(|node| node.base_mut().inputs[to_port].attach(source.clone(), data));
        if let Some(previous) = previous {
            if previous != source {
                self.unsubscribe(&previous, &target);
            }
        }
        if let Some(node) = self.node_lookup.get_mut(from) {
            node.base_mut().outputs[from_port].subscribe(target);
        }
        Ok(true)
    }

    /// Disconnects an input. Returns false when it was not connected.
    pub fn disconnect(&mut self, to: &str, to_port: PortId) -> Result<bool> {
        self.ensure_editable()?;
        self.port_ref_checked(to, to_port, false)?;
        let target = PortRef::new(to, to_port);
        let previous = self
            .node_lookup
            .get_mut(to)
            .and_then(|node| node.base_mut().inputs[to_port].detach());
        let Some(previous) = previous else {
            return Ok(false);
        };
        self.unsubscribe(&previous, &target);
        self.events.push_back(PortNotification {
            source: previous,
            target,
            event: PortEvent::Removed,
            data: None,
        });
        self.drain_events();
        Ok(true)
    }

    fn unsubscribe(&mut self, upstream: &PortRef, input: &PortRef) {
        if let Some(output) = self
            .node_lookup
            .get_mut(&upstream.node)
            .and_then(|node| node.base_mut().outputs.get_mut(upstream.port))
        {
            output.unsubscribe(input);
        }
    }

    /// Every persisted connection, derived from input ports
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections = Vec::new();
        for id in &self.order {
            let Some(node) = self.node_lookup.get(id) else { continue };
            for (index, input) in node.base().inputs.iter().enumerate() {
                if let Some(upstream) = input.connection() {
                    connections.push(Connection::new(upstream.node.clone(), upstream.port, id.clone(), index));
                }
            }
        }
        connections
    }

    // ---- events ----

    fn collect_output_changes(&mut self, id: &str) {
        let Some(node) = self.node_lookup.get_mut(id) else {
            return;
        };
        for (index, output) in node.base_mut().outputs.iter_mut().enumerate() {
            if !output.take_changed() {
                continue;
            }
            let data = output.data().copied();
            for subscriber in output.subscribers() {
                self.events.push_back(PortNotification {
                    source: PortRef::new(id, index),
                    target: subscriber.clone(),
                    event: PortEvent::Changed,
                    data,
                });
            }
        }
    }

    /// Deliver queued notifications until the graph settles
    fn drain_events(&mut self) {
        if self.propagating {
            return;
        }
        self.propagating = true;
        while let Some(notification) = self.events.pop_front() {
            self.deliver(notification);
        }
        self.propagating = false;
    }

    fn deliver(&mut self, notification: PortNotification) {
        let PortNotification {
            source,
            target,
            event,
            data,
        } = notification;
        let reaction = {
            let Some(node) = self.node_lookup.get_mut(&target.node) else {
                return;
            };
            let Some(input) = node.base_mut().inputs.get_mut(target.port) else {
                return;
            };
            if event == PortEvent::Changed {
                // stale notification from a link that has since been replaced
                if input.connection() != Some(&source) {
                    return;
                }
                input.set_data(data);
            }
            node.on_input_event(target.port, event)
        };

        match reaction {
            NodeReaction::Process => self.try_and_process_node(&target.node),
            NodeReaction::ClearOutputs => {
                if let Some(node) = self.node_lookup.get_mut(&target.node) {
                    for output in node.base_mut().outputs.iter_mut() {
                        if output.data().is_some() {
                            output.clear_data();
                        }
                    }
                }
                self.collect_output_changes(&target.node);
            }
            NodeReaction::Updated => {
                if let Some(node) = self.node_lookup.get_mut(&target.node) {
                    node.base_mut().mark_updated();
                }
            }
            NodeReaction::Ignore => {}
        }
    }

    // ---- processing ----

    /// Re-evaluates the whole graph from its source nodes.
    ///
    /// Synchronized graphs settle before returning. Otherwise the sources are
    /// scheduled and [`Graph::run_pending`] performs the work.
    pub fn try_and_process(&mut self) {
        self.poll_updates();
        self.status.set(true);
        let roots: Vec<NodeId> = self
            .order
            .iter()
            .filter(|id| {
                self.node_lookup
                    .get(*id)
                    .map(|node| node.base().inputs.iter().all(|input| !input.has_input()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for id in roots {
            self.try_and_process_node(&id);
        }
        if self.synchronized || self.scheduler.is_empty() {
            self.drain_events();
            self.finish_round();
        }
    }

    /// Re-evaluates one node, inline or through the scheduler
    pub fn try_and_process_node(&mut self, id: &str) {
        let Some(node) = self.node_lookup.get(id) else {
            return;
        };
        if self.synchronized || !node.is_schedulable() {
            self.process_node_now(id);
            self.drain_events();
        } else {
            self.schedule(id);
        }
    }

    /// Registers a node for asynchronous evaluation. False when already pending.
    pub fn schedule(&mut self, id: &str) -> bool {
        if !self.node_lookup.contains_key(id) {
            return false;
        }
        let scheduled = self.scheduler.schedule(id);
        if scheduled {
            self.status.set(true);
        }
        scheduled
    }

    fn process_node_now(&mut self, id: &str) {
        let Some(mut node) = self.node_lookup.remove(id) else {
            return;
        };
        let snapshot = self.parameter_snapshot();
        let seed = self.random_seed;
        let device = Arc::clone(&self.device);
        {
            let prepare = PrepareContext {
                parameters: &snapshot,
                random_seed: seed,
            };
            let mut ctx = ProcessContext {
                device: device.as_ref(),
                parameters: &snapshot,
                random_seed: seed,
                result: self.result_slot.as_mut(),
            };
            for step in node.task() {
                match step {
                    TaskStep::ResolveParameters => node.prepare(&prepare),
                    _ => node.run_pipeline_step(step, &mut ctx),
                }
            }
        }
        self.node_lookup.insert(id.to_string(), node);
        self.collect_output_changes(id);
    }

    /// Runs one round of scheduled tasks. Returns the number of tasks run.
    ///
    /// Leading parameter-resolution steps of every task run on the worker
    /// pool; the remaining steps run here, one node at a time.
    pub fn run_pending(&mut self) -> usize {
        self.poll_updates();
        let round = self.scheduler.take_round();
        if round.is_empty() {
            return 0;
        }
        self.status.set(true);

        let snapshot = self.parameter_snapshot();
        let seed = self.random_seed;
        let mut tasks: Vec<(NodeId, Box<dyn Node>, Vec<TaskStep>)> = round
            .iter()
            .filter_map(|id| {
                self.node_lookup.remove(id).map(|node| {
                    let steps = node.task();
                    (id.clone(), node, steps)
                })
            })
            .collect();

        {
            let prepare = PrepareContext {
                parameters: &snapshot,
                random_seed: seed,
            };
            tasks.par_iter_mut().for_each(|(_, node, steps)| {
                for step in steps.iter().take_while(|step| step.affinity() == Affinity::Any) {
                    if *step == TaskStep::ResolveParameters {
                        node.prepare(&prepare);
                    }
                }
            });
        }

        let mut remaining = Vec::with_capacity(tasks.len());
        for (id, node, steps) in tasks {
            let rest: Vec<TaskStep> = steps
                .into_iter()
                .skip_while(|step| step.affinity() == Affinity::Any)
                .collect();
            self.node_lookup.insert(id.clone(), node);
            remaining.push((id, rest));
        }

        let count = remaining.len();
        let device = Arc::clone(&self.device);
        for (id, steps) in remaining {
            let Some(mut node) = self.node_lookup.remove(&id) else {
                continue;
            };
            {
                let prepare = PrepareContext {
                    parameters: &snapshot,
                    random_seed: seed,
                };
                let mut ctx = ProcessContext {
                    device: device.as_ref(),
                    parameters: &snapshot,
                    random_seed: seed,
                    result: self.result_slot.as_mut(),
                };
                for step in steps {
                    match step {
                        TaskStep::ResolveParameters => node.prepare(&prepare),
                        _ => node.run_pipeline_step(step, &mut ctx),
                    }
                }
            }
            self.node_lookup.insert(id.clone(), node);
            self.collect_output_changes(&id);
            self.drain_events();
        }
        debug!("Graph {} ran {} scheduled tasks", self.name, count);

        if self.scheduler.is_empty() {
            self.finish_round();
        }
        count
    }

    /// Runs scheduled rounds until nothing is pending
    pub fn run_until_idle(&mut self) -> usize {
        let mut total = 0;
        loop {
            let count = self.run_pending();
            if count == 0 {
                break;
            }
            total += count;
        }
        total
    }

    fn finish_round(&mut self) {
        self.status.set(false);
        self.round += 1;
        let round = self.round;
        self.completion_listeners.retain(|listener| listener.send(round).is_ok());
    }

    /// Lets nodes react to notifications raised outside the graph
    pub fn poll_updates(&mut self) {
        let mut ready = Vec::new();
        for id in &self.order {
            if let Some(node) = self.node_lookup.get_mut(id) {
                if node.poll_updates() {
                    ready.push(id.clone());
                }
            }
        }
        for id in ready {
            self.try_and_process_node(&id);
        }
    }

    /// Switches between inline and scheduled processing
    pub fn set_synchronized(&mut self, synchronized: bool) {
        self.synchronized = synchronized;
        for node in self.node_lookup.values_mut() {
            node.set_async(!synchronized);
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn assign_seed(&mut self, seed: i32) {
        self.random_seed = seed;
    }

    /// Mutates a node through its concrete type and re-evaluates it
    pub fn edit_node<T: Any, R>(&mut self, id: &str, edit: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.ensure_editable()?;
        let node = self
            .node_as_mut::<T>(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        let result = edit(node);
        self.try_and_process_node(id);
        Ok(result)
    }

    /// Feeds an input node and re-evaluates from it
    pub fn set_input_value(&mut self, id: &str, value: Option<Value>) -> Result<()> {
        self.assign_input_value(id, value)?;
        self.try_and_process_node(id);
        Ok(())
    }

    pub(crate) fn assign_input_value(&mut self, id: &str, value: Option<Value>) -> Result<()> {
        let node = self
            .node_as_mut::<super::image::InputNode>(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        node.set_external(value);
        Ok(())
    }

    /// Resizes one node; its buffer is reallocated on the next evaluation
    pub fn resize_node(&mut self, id: &str, width: u32, height: u32) -> Result<()> {
        let node = self
            .node_lookup
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        node.set_size(width, height);
        self.try_and_process_node(id);
        Ok(())
    }

    /// Resizes every boundary and buffer-backed node, then re-evaluates
    pub fn resize_with(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        for node in self.node_lookup.values_mut() {
            if node.boundary().is_some() || node.is_buffer_backed() {
                node.set_size(width, height);
            }
        }
        self.try_and_process();
    }

    /// Releases buffers of interior nodes, keeping the boundary results
    pub fn release_intermediate_buffers(&mut self) {
        let device = Arc::clone(&self.device);
        let interior: Vec<NodeId> = self
            .order
            .iter()
            .filter(|id| !self.input_nodes.contains(id) && !self.output_nodes.contains(id))
            .cloned()
            .collect();

        let mut stale: Vec<PortRef> = Vec::new();
        for id in &interior {
            let Some(node) = self.node_lookup.get_mut(id) else { continue };
            let Some(released) = node.release_buffer(device.as_ref()) else {
                continue;
            };
            for output in node.base_mut().outputs.iter_mut() {
                if matches!(output.data(), Some(Value::Buffer(b)) if b.id == released.id) {
                    output.forget_data();
                    stale.extend(output.subscribers().iter().cloned());
                }
            }
        }
        for subscriber in stale {
            if let Some(input) = self
                .node_lookup
                .get_mut(&subscriber.node)
                .and_then(|node| node.base_mut().inputs.get_mut(subscriber.port))
            {
                input.set_data(None);
            }
        }
        debug!("Released intermediate buffers of graph {}", self.name);
    }

    /// Buffer of the first output node
    pub fn active_buffer(&self) -> Option<BufferHandle> {
        self.output_nodes
            .first()
            .and_then(|id| self.node_lookup.get(id))
            .and_then(|node| node.active_buffer())
    }

    pub fn preview(&self) -> Option<Vec<u8>> {
        self.output_nodes
            .first()
            .and_then(|id| self.node_lookup.get(id))
            .and_then(|node| node.preview(self.device.as_ref()))
    }

    /// Shader source computing `node` and everything upstream of it
    pub fn compile_shader(&self, node: &str) -> String {
        let mut builder = ShaderBuilder::new();
        builder.emit(self, node);
        builder.finish()
    }

    // ---- parameters ----

    fn check_promotable(&self, node: &str, name: &str) -> Result<()> {
        let target = self
            .node_lookup
            .get(node)
            .ok_or_else(|| GraphError::NodeNotFound(node.to_string()))?;
        if !target.promoted_parameters().iter().any(|p| p == name) {
            return Err(GraphError::UnknownParameter {
                node: node.to_string(),
                parameter: name.to_string(),
            });
        }
        Ok(())
    }

    fn notify_parameter(&mut self, name: &str) {
        let update = ParameterUpdate {
            graph: self.id.clone(),
            name: name.to_string(),
        };
        self.parameter_listeners
            .retain(|listener| listener.send(update.clone()).is_ok());
    }

    /// Exposes a node property in the parameter table with its current value.
    /// Returns false when it is already promoted.
    pub fn promote_parameter(&mut self, node: &str, name: &str) -> Result<bool> {
        self.check_promotable(node, name)?;
        let key = parameter_key(node, name);
        if self.parameters.contains_key(&key) {
            return Ok(false);
        }
        let value = self
            .node_lookup
            .get(node)
            .and_then(|n| n.parameter_value(name))
            .ok_or_else(|| GraphError::UnknownParameter {
                node: node.to_string(),
                parameter: name.to_string(),
            })?;
        let mut parameter = GraphParameterValue::constant(name, value);
        parameter.set_owner(&self.id);
        self.parameters.insert(key, parameter);
        Ok(true)
    }

    /// Sets a graph-level value for a node property and re-evaluates the node
    pub fn set_parameter_value(&mut self, node: &str, name: &str, value: Value) -> Result<()> {
        self.check_promotable(node, name)?;
        let key = parameter_key(node, name);
        match self.parameters.get_mut(&key) {
            Some(parameter) => parameter.set_value(value),
            None => {
                let mut parameter = GraphParameterValue::constant(name, value);
                parameter.set_owner(&self.id);
                self.parameters.insert(key.clone(), parameter);
            }
        }
        self.notify_parameter(&key);
        self.try_and_process_node(node);
        Ok(())
    }

    /// Binds a node property to a reference or function parameter
    pub fn set_parameter_binding(&mut self, node: &str, name: &str, mut parameter: GraphParameterValue) -> Result<()> {
        self.check_promotable(node, name)?;
        let key = parameter_key(node, name);
        parameter.set_owner(&self.id);
        self.parameters.insert(key.clone(), parameter);
        self.notify_parameter(&key);
        self.try_and_process_node(node);
        Ok(())
    }

    /// Drops a graph-level value; the node falls back to its own field
    pub fn remove_parameter_value(&mut self, node: &str, name: &str) -> bool {
        let key = parameter_key(node, name);
        if self.parameters.remove(&key).is_none() {
            return false;
        }
        self.notify_parameter(&key);
        self.try_and_process_node(node);
        true
    }

    pub fn has_parameter_value(&self, node: &str, name: &str) -> bool {
        self.parameters.contains_key(&parameter_key(node, name))
    }

    /// Resolved graph-level value, evaluating function bindings
    pub fn get_parameter_value(&mut self, node: &str, name: &str) -> Option<Value> {
        let key = parameter_key(node, name);
        let parameter = self.parameters.get_mut(&key)?;
        let target = match parameter.binding() {
            ParameterBinding::Reference(target) => Some(target.clone()),
            _ => None,
        };
        parameter
            .resolve()
            .or_else(|| target.and_then(|t| self.custom_parameter(&t)))
    }

    pub fn parameter(&self, node: &str, name: &str) -> Option<&GraphParameterValue> {
        self.parameters.get(&parameter_key(node, name))
    }

    /// Table keys of every promoted parameter
    pub fn parameter_keys(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    /// Adds a parameter owned by the graph. False when the name is taken.
    pub fn add_custom_parameter(&mut self, mut parameter: GraphParameterValue) -> bool {
        if self.custom_parameters.iter().any(|p| p.name == parameter.name) {
            return false;
        }
        parameter.set_owner(&self.id);
        self.custom_parameters.push(parameter);
        true
    }

    /// Sets a custom parameter and re-evaluates the graph
    pub fn set_custom_parameter(&mut self, name: &str, value: Value) -> bool {
        let Some(parameter) = self.custom_parameters.iter_mut().find(|p| p.name == name) else {
            return false;
        };
        parameter.set_value(value);
        self.notify_parameter(name);
        self.try_and_process();
        true
    }

    pub fn remove_custom_parameter(&mut self, name: &str) -> bool {
        let before = self.custom_parameters.len();
        self.custom_parameters.retain(|p| p.name != name);
        before != self.custom_parameters.len()
    }

    pub fn custom_parameter(&mut self, name: &str) -> Option<Value> {
        self.custom_parameters
            .iter_mut()
            .find(|p| p.name == name)
            .and_then(|p| p.resolve())
    }

    pub fn custom_parameters(&self) -> &[GraphParameterValue] {
        &self.custom_parameters
    }

    /// Names an enclosing graph may override: promoted keys and custom names,
    /// excluding function bindings
    pub fn overridable_parameters(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|(_, p)| !p.is_function())
            .map(|(key, _)| key.clone())
            .chain(
                self.custom_parameters
                    .iter()
                    .filter(|p| !p.is_function())
                    .map(|p| p.name.clone()),
            )
            .collect()
    }

    /// Effective value of a promoted key or custom name, without evaluating functions
    pub fn parameter_value_by_name(&self, name: &str) -> Option<Value> {
        self.parameters
            .get(name)
            .and_then(|p| p.value())
            .or_else(|| self.custom_parameters.iter().find(|p| p.name == name).and_then(|p| p.value()))
    }

    /// Overwrites constant promoted values from a saved snapshot. Unknown keys are skipped.
    pub fn assign_parameters(&mut self, values: &BTreeMap<String, Value>) {
        for (key, value) in values {
            match self.parameters.get_mut(key) {
                Some(parameter) if !parameter.is_function() => parameter.set_value(*value),
                Some(_) => {}
                None => debug!("Skipping unknown parameter {} for graph {}", key, self.name),
            }
        }
    }

    pub fn assign_custom_parameters(&mut self, values: &BTreeMap<String, Value>) {
        for (name, value) in values {
            if let Some(parameter) = self
                .custom_parameters
                .iter_mut()
                .find(|p| &p.name == name && !p.is_function())
            {
                parameter.set_value(*value);
            }
        }
    }

    /// Constant promoted values, keyed by table key
    pub fn constant_parameters(&self) -> BTreeMap<String, Value> {
        self.parameters
            .iter()
            .filter_map(|(key, p)| match p.binding() {
                ParameterBinding::Constant(value) => Some((key.clone(), *value)),
                _ => None,
            })
            .collect()
    }

    pub fn custom_parameter_values(&self) -> BTreeMap<String, Value> {
        self.custom_parameters
            .iter()
            .filter_map(|p| match p.binding() {
                ParameterBinding::Constant(value) => Some((p.name.clone(), *value)),
                _ => None,
            })
            .collect()
    }

    /// Applies the enclosing graph's values for `instance` to every
    /// non-function parameter, clearing overrides the outer graph no longer
    /// provides. Returns true if any effective value changed.
    pub fn apply_outer_parameters(&mut self, instance: &str, outer: &ParameterSnapshot) -> bool {
        let mut changed = Vec::new();
        for (key, parameter) in self.parameters.iter_mut() {
            if parameter.is_function() {
                continue;
            }
            if parameter.assign_override(outer.get(instance, key)) {
                changed.push(key.clone());
            }
        }
        for parameter in self.custom_parameters.iter_mut() {
            if parameter.is_function() {
                continue;
            }
            if parameter.assign_override(outer.get(instance, &parameter.name)) {
                changed.push(parameter.name.clone());
            }
        }
        for name in &changed {
            self.notify_parameter(name);
        }
        !changed.is_empty()
    }

    /// Resolves every parameter for one evaluation cycle
    pub fn parameter_snapshot(&mut self) -> ParameterSnapshot {
        let mut snapshot = ParameterSnapshot::default();
        for parameter in self.custom_parameters.iter_mut() {
            if let Some(value) = parameter.resolve() {
                snapshot.insert_custom(parameter.name.clone(), value);
            }
        }
        for (key, parameter) in self.parameters.iter_mut() {
            let value = parameter.resolve().or_else(|| match parameter.binding() {
                ParameterBinding::Reference(target) => snapshot.custom(target),
                _ => None,
            });
            if let Some(value) = value {
                snapshot.insert(key.clone(), value);
            }
        }
        snapshot
    }

    pub fn subscribe_parameter_updates(&mut self) -> Receiver<ParameterUpdate> {
        let (sender, receiver) = unbounded();
        self.parameter_listeners.push(sender);
        receiver
    }

    /// Receives the round number each time an evaluation round finishes
    pub fn subscribe_completion(&mut self) -> Receiver<u64> {
        let (sender, receiver) = unbounded();
        self.completion_listeners.push(sender);
        receiver
    }

    // ---- function graph support ----

    pub(crate) fn enable_result_slot(&mut self) {
        if self.result_slot.is_none() {
            self.result_slot = Some(ResultSlot::default());
        }
    }

    pub(crate) fn result_slot(&self) -> Option<&ResultSlot> {
        self.result_slot.as_ref()
    }

    pub(crate) fn result_slot_mut(&mut self) -> Option<&mut ResultSlot> {
        self.result_slot.as_mut()
    }

    // ---- persistence ----

    pub fn to_data(&self) -> GraphData {
        GraphData {
            id: self.id.clone(),
            name: self.name.clone(),
            nodes: self
                .order
                .iter()
                .filter_map(|id| self.node_lookup.get(id))
                .map(|node| node.to_record())
                .collect(),
            connections: self.connections(),
            input_nodes: self.input_nodes.clone(),
            output_nodes: self.output_nodes.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|(key, p)| (key.clone(), p.to_record()))
                .collect(),
            custom_parameters: self.custom_parameters.iter().map(|p| p.to_record()).collect(),
            random_seed: self.random_seed,
            width: self.width,
            height: self.height,
            result_node: self.result_slot.as_ref().and_then(|slot| slot.node.clone()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_data())?)
    }

    /// Rebuilds a graph, reproducing node ids, wiring and parameter bindings
    pub fn from_data(data: &GraphData, device: Arc<dyn GpuDevice>, config: EngineConfig) -> Result<Self> {
        let mut graph = Graph::with_config(data.name.clone(), Arc::clone(&device), config.clone());
        graph.id = data.id.clone();
        graph.random_seed = data.random_seed;
        graph.width = data.width;
        graph.height = data.height;

        for record in &data.nodes {
            let mut node = registry::create_node(&record.type_name, record.width, record.height, &device, &config)
                .ok_or_else(|| GraphError::UnknownNodeType(record.type_name.clone()))?;
            node.base_mut().apply_record(record);
            node.load_fields(&record.fields)?;
            graph.insert_node(node);
        }

        for connection in &data.connections {
            if !graph.link(
                &connection.from_node,
                connection.from_port,
                &connection.to_node,
                connection.to_port,
            )? {
                warn!(
                    "Dropped saved connection {}:{} -> {}:{}",
                    connection.from_node, connection.from_port, connection.to_node, connection.to_port
                );
            }
        }

        graph.input_nodes = reconcile(&data.input_nodes, &graph.input_nodes);
        graph.output_nodes = reconcile(&data.output_nodes, &graph.output_nodes);

        for (key, record) in &data.parameters {
            let known = split_parameter_key(key)
                .map(|(node, _)| graph.node_lookup.contains_key(node))
                .unwrap_or(false);
            if !known {
                warn!("Dropped parameter {} of graph {}, its node does not exist", key, graph.name);
                continue;
            }
            let mut parameter = GraphParameterValue::from_record(record)?;
            parameter.set_owner(&graph.id);
            graph.parameters.insert(key.clone(), parameter);
        }
        for record in &data.custom_parameters {
            let parameter = GraphParameterValue::from_record(record)?;
            graph.add_custom_parameter(parameter);
        }

        if let Some(node) = &data.result_node {
            graph.result_slot = Some(ResultSlot {
                node: Some(node.clone()),
                value: None,
            });
        }
        info!("Loaded graph {} with {} nodes", graph.name, graph.len());
        Ok(graph)
    }

    pub fn from_json(json: &str, device: Arc<dyn GpuDevice>) -> Result<Self> {
        Self::from_json_with_config(json, device, EngineConfig::default())
    }

    pub fn from_json_with_config(json: &str, device: Arc<dyn GpuDevice>, config: EngineConfig) -> Result<Self> {
        let data: GraphData = serde_json::from_str(json)?;
        Self::from_data(&data, device, config)
    }

    /// Loads an authored graph file. The path must carry the configured extension.
    pub fn load_file(path: impl AsRef<Path>, device: Arc<dyn GpuDevice>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        if !config.is_graph_file(path) {
            return Err(GraphError::InvalidGraphFile(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json_with_config(&text, device, config)
    }

    /// Writes the graph as JSON to a file with the configured extension
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !self.config.is_graph_file(path) {
            return Err(GraphError::InvalidGraphFile(path.to_path_buf()));
        }
        std::fs::write(path, self.to_json()?)?;
        info!("Saved graph {} to {}", self.name, path.display());
        Ok(())
    }

    /// Releases every node's device resources. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let device = Arc::clone(&self.device);
        for id in &self.order {
            if let Some(node) = self.node_lookup.get_mut(id) {
                node.dispose(device.as_ref());
            }
        }
        self.parameter_listeners.clear();
        self.completion_listeners.clear();
        debug!("Disposed graph {}", self.name);
    }
}

/// Saved boundary order, restricted to ids that exist, then any newly registered ids
fn reconcile(saved: &[NodeId], registered: &[NodeId]) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = saved.iter().filter(|id| registered.contains(id)).cloned().collect();
    for id in registered {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.order)
            .field("synchronized", &self.synchronized)
            .field("read_only", &self.read_only)
            .finish()
    }
}
