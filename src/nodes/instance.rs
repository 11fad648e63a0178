//! Graph instances
//!
//! A [`GraphInstanceNode`] embeds a complete authored graph as one node. The
//! embedded graph's input nodes become the instance's inputs and its output
//! nodes become the instance's outputs. Before every evaluation the enclosing
//! graph's values for this instance are pushed into the embedded graph's
//! parameters; they are never written back.
//!
//! The embedded graph is read-only and exclusively owned by the instance.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam::channel::Receiver;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::gpu::{BufferHandle, GpuDevice};
use crate::nodes::graph::Graph;
use crate::nodes::image::{InputNode, OutputNode};
use crate::nodes::node::{Node, NodeBase, PrepareContext, ProcessContext};
use crate::nodes::parameters::{GraphParameterValue, ParameterUpdate};
use crate::nodes::port::{NodeInput, NodeOutput, PortType};
use crate::nodes::scheduler::TaskStep;
use crate::nodes::value::Value;

/// Loading state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Unloaded,
    /// Ports are not exposed until the embedded graph is complete
    Loading,
    Ready,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstanceFields {
    #[serde(default)]
    raw_data: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    #[serde(default)]
    custom_parameters: BTreeMap<String, Value>,
    #[serde(default)]
    random_seed: Option<i32>,
}

pub struct GraphInstanceNode {
    base: NodeBase,
    device: Arc<dyn GpuDevice>,
    config: EngineConfig,
    inner: Option<Graph>,
    state: InstanceState,
    path: Option<PathBuf>,
    graph_data: Option<String>,
    pending_parameters: BTreeMap<String, Value>,
    pending_custom_parameters: BTreeMap<String, Value>,
    random_seed: Option<i32>,
    name_map: HashMap<String, usize>,
    updates: Option<Receiver<ParameterUpdate>>,
    completion: Option<Receiver<u64>>,
    output_revisions: Vec<u64>,
}

impl GraphInstanceNode {
    pub fn new(width: u32, height: u32, device: Arc<dyn GpuDevice>, config: EngineConfig) -> Self {
        let mut base = NodeBase::new("Graph Instance", width, height);
        base.pixel_format = config.pixel_format;
        Self {
            base,
            device,
            config,
            inner: None,
            state: InstanceState::Unloaded,
            path: None,
            graph_data: None,
            pending_parameters: BTreeMap::new(),
            pending_custom_parameters: BTreeMap::new(),
            random_seed: None,
            name_map: HashMap::new(),
            updates: None,
            completion: None,
            output_revisions: Vec::new(),
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Authored graph file this instance was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn inner(&self) -> Option<&Graph> {
        self.inner.as_ref()
    }

    /// The embedded graph. Structural edits fail, parameter values may change.
    pub fn inner_mut(&mut self) -> Option<&mut Graph> {
        self.inner.as_mut()
    }

    /// Custom parameter of the embedded graph by name
    pub fn custom_parameter(&self, name: &str) -> Option<&GraphParameterValue> {
        let index = *self.name_map.get(name)?;
        self.inner.as_ref()?.custom_parameters().get(index)
    }

    /// Loads an authored graph file, replacing any embedded graph.
    ///
    /// Returns `Ok(false)` when the path does not name an existing graph file.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        self.unload();

        if !path.is_file() || !self.config.is_graph_file(path) {
            debug!("No graph file at {}", path.display());
            self.path = None;
            return Ok(false);
        }

        let text = std::fs::read_to_string(path)?;
        self.path = Some(path.to_path_buf());
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            self.base.name = stem.to_string();
        }
        self.build_inner(text)?;
        info!("Loaded graph instance {} from {}", self.base.name, path.display());
        Ok(true)
    }

    /// Drops the embedded graph. Port definitions stay so existing links
    /// survive a reload, but their data is withdrawn.
    fn unload(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.dispose();
        }
        for output in self.base.outputs.iter_mut() {
            if output.data().is_some() {
                output.clear_data();
            }
        }
        self.graph_data = None;
        self.updates = None;
        self.completion = None;
        self.name_map.clear();
        self.state = InstanceState::Unloaded;
    }

    fn build_inner(&mut self, text: String) -> Result<()> {
        self.state = InstanceState::Loading;
        let mut graph = match Graph::from_json_with_config(&text, Arc::clone(&self.device), self.config.clone()) {
            Ok(graph) => graph,
            Err(err) => {
                self.state = InstanceState::Unloaded;
                return Err(err);
            }
        };

        graph.set_synchronized(!self.base.is_async);
        graph.assign_parameters(&self.pending_parameters);
        graph.assign_custom_parameters(&self.pending_custom_parameters);
        if let Some(seed) = self.random_seed {
            graph.assign_seed(seed);
        }
        graph.resize_with(self.base.width, self.base.height);
        graph.set_read_only(true);

        self.updates = Some(graph.subscribe_parameter_updates());
        self.completion = Some(graph.subscribe_completion());
        self.random_seed = Some(graph.random_seed());
        self.graph_data = Some(text);

        self.setup_ports(&graph);
        self.inner = Some(graph);
        self.state = InstanceState::Ready;
        Ok(())
    }

    /// Rebuilds the port lists from the embedded graph's boundary nodes,
    /// keeping links on ports whose index survives
    fn setup_ports(&mut self, graph: &Graph) {
        let mut inputs = Vec::new();
        for id in graph.input_nodes() {
            let Some(node) = graph.node_as::<InputNode>(id) else { continue };
            inputs.push(NodeInput::new(node.port_type(), node.base().name.clone()));
        }
        let mut outputs = Vec::new();
        for id in graph.output_nodes() {
            let Some(node) = graph.node_as::<OutputNode>(id) else { continue };
            let port_type = node
                .base()
                .outputs
                .first()
                .map(|output| output.port_type())
                .unwrap_or(PortType::IMAGE);
            outputs.push(NodeOutput::new(port_type, node.base().name.clone()));
        }

        for (old, new) in self.base.inputs.iter().zip(inputs.iter_mut()) {
            if let Some(upstream) = old.connection() {
                new.attach(upstream.clone(), old.data().copied());
            }
        }
        for (old, new) in self.base.outputs.iter().zip(outputs.iter_mut()) {
            for subscriber in old.subscribers() {
                new.subscribe(subscriber.clone());
            }
        }
        self.base.inputs = inputs;
        self.base.outputs = outputs;

        self.output_revisions = vec![0; self.base.outputs.len()];
        self.name_map = graph
            .custom_parameters()
            .iter()
            .enumerate()
            .map(|(index, parameter)| (parameter.name.clone(), index))
            .collect();
    }

    /// Pushes the instance's input data into the embedded graph and starts it
    fn start_inner(&mut self) {
        let Some(inner) = self.inner.as_mut() else {
            return;
        };
        let input_nodes = inner.input_nodes().to_vec();
        for (index, id) in input_nodes.iter().enumerate() {
            let value = self.base.input_data(index).copied();
            if let Err(err) = inner.assign_input_value(id, value) {
                warn!("Instance {} could not feed input {}: {}", self.base.name, id, err);
            }
        }
        inner.try_and_process();
    }

    /// Drives the embedded graph until its round completes, then copies its results
    fn await_inner(&mut self) {
        let Some(inner) = self.inner.as_mut() else {
            return;
        };
        if !inner.is_synchronized() {
            inner.run_until_idle();
        }
        if let Some(completion) = &self.completion {
            if inner.status().is_processing() && completion.recv_timeout(self.config.inner_wait()).is_err() {
                warn!("Graph instance {} timed out waiting for its embedded graph", self.base.name);
            }
            while completion.try_recv().is_ok() {}
        }

        let mut updated = false;
        for (index, id) in inner.output_nodes().iter().enumerate() {
            let Some(output) = self.base.outputs.get_mut(index) else { break };
            match inner.output_data(id, 0) {
                Some(value) => output.set_data(value),
                None if output.data().is_some() => output.clear_data(),
                None => {}
            }
            let revision = inner.node(id).map(|node| node.base().revision()).unwrap_or(0);
            if self.output_revisions.get(index) != Some(&revision) {
                if let Some(slot) = self.output_revisions.get_mut(index) {
                    *slot = revision;
                }
                updated = true;
            }
        }
        if updated {
            self.base.mark_updated();
        }
    }

    fn release_inner_buffers(&mut self) {
        if !self.config.release_intermediate_buffers {
            return;
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.release_intermediate_buffers();
        }
    }

    fn first_output_node(&self) -> Option<&dyn Node> {
        let inner = self.inner.as_ref()?;
        inner.output_nodes().first().and_then(|id| inner.node(id))
    }
}

impl Node for GraphInstanceNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "GraphInstance"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_buffer_backed(&self) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        self.state == InstanceState::Ready
    }

    fn exposes_ports(&self) -> bool {
        self.state == InstanceState::Ready
    }

    fn promoted_parameters(&self) -> Vec<String> {
        self.inner
            .as_ref()
            .map(|inner| inner.overridable_parameters())
            .unwrap_or_default()
    }

    fn parameter_value(&self, name: &str) -> Option<Value> {
        self.inner.as_ref().and_then(|inner| inner.parameter_value_by_name(name))
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) {
        let Some(inner) = self.inner.as_mut() else {
            return;
        };
        inner.apply_outer_parameters(&self.base.id, ctx.parameters);
        if let Some(updates) = &self.updates {
            // raised by the overwrite above, not by an edit
            while updates.try_recv().is_ok() {}
        }
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) {
        self.start_inner();
        self.await_inner();
    }

    fn task(&self) -> Vec<TaskStep> {
        vec![
            TaskStep::ResolveParameters,
            TaskStep::Process,
            TaskStep::AwaitInner,
            TaskStep::ReleaseBuffers,
        ]
    }

    fn run_pipeline_step(&mut self, step: TaskStep, _ctx: &mut ProcessContext<'_>) {
        if !self.is_ready() {
            return;
        }
        match step {
            TaskStep::Process => self.start_inner(),
            TaskStep::AwaitInner => self.await_inner(),
            TaskStep::ReleaseBuffers => self.release_inner_buffers(),
            TaskStep::ResolveParameters => {}
        }
    }

    fn active_buffer(&self) -> Option<BufferHandle> {
        self.first_output_node().and_then(|node| node.active_buffer())
    }

    fn preview(&self, device: &dyn GpuDevice) -> Option<Vec<u8>> {
        self.first_output_node().and_then(|node| node.preview(device))
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.base.width = width;
        self.base.height = height;
        if let Some(inner) = self.inner.as_mut() {
            inner.resize_with(width, height);
        }
    }

    fn set_async(&mut self, is_async: bool) {
        self.base.is_async = is_async;
        if let Some(inner) = self.inner.as_mut() {
            inner.set_synchronized(!is_async);
        }
    }

    fn poll_updates(&mut self) -> bool {
        let Some(updates) = &self.updates else {
            return false;
        };
        updates.try_iter().count() > 0
    }

    fn release_buffer(&mut self, _device: &dyn GpuDevice) -> Option<BufferHandle> {
        if let Some(inner) = self.inner.as_mut() {
            inner.release_intermediate_buffers();
        }
        None
    }

    fn dispose(&mut self, _device: &dyn GpuDevice) {
        self.unload();
    }

    fn save_fields(&self) -> serde_json::Value {
        let (parameters, custom_parameters) = match &self.inner {
            Some(inner) => (inner.constant_parameters(), inner.custom_parameter_values()),
            None => (
                self.pending_parameters.clone(),
                self.pending_custom_parameters.clone(),
            ),
        };
        let fields = InstanceFields {
            raw_data: self.graph_data.clone(),
            path: self.path.as_ref().map(|path| path.to_string_lossy().into_owned()),
            parameters,
            custom_parameters,
            random_seed: self.inner.as_ref().map(|inner| inner.random_seed()).or(self.random_seed),
        };
        serde_json::to_value(fields).unwrap_or_default()
    }

    /// Prefers the authored file when it still exists, otherwise rebuilds from
    /// the embedded copy. A corrupt embedded copy is an error.
    fn load_fields(&mut self, fields: &serde_json::Value) -> Result<()> {
        if fields.is_null() {
            return Ok(());
        }
        let fields: InstanceFields = serde_json::from_value(fields.clone())?;
        self.pending_parameters = fields.parameters;
        self.pending_custom_parameters = fields.custom_parameters;
        self.random_seed = fields.random_seed;

        let path = fields.path.map(PathBuf::from);
        let mut loaded = false;
        if let Some(path) = path.as_ref().filter(|path| path.exists()) {
            match self.load(path) {
                Ok(didload) => loaded = didload,
                Err(err) => warn!("Could not reload {}: {}", path.display(), err),
            }
        }

        if !loaded {
            self.unload();
            self.path = path;
            match fields.raw_data {
                Some(text) => {
                    warn!("Graph instance {} falling back to its embedded graph", self.base.name);
                    self.build_inner(text)?;
                }
                None => debug!("Graph instance {} has nothing to load", self.base.name),
            }
        }
        Ok(())
    }
}
