//! Compiled, executable form of a workflow.
//!
//! A [`CompiledProgram`] is derived on demand from a validated graph and never
//! persisted. Nodes are linearised stage by stage, declaration order within
//! a stage, so the same graph always compiles to the same program.

use std::collections::{BTreeMap, HashMap};

use nodes::{StepInput, StepRegistry};
use serde_json::Value;

use crate::{
    binding::Binding,
    error::GraphValidationError,
    models::WorkflowGraph,
    validate::{validate, ValidGraph},
};

/// One node, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledNode {
    pub id: String,
    /// Reference name (display name, or ID when unnamed).
    pub name: String,
    pub step_type: String,
    /// Index of the stage this node runs in.
    pub stage: usize,
    /// IDs of direct dependencies.
    pub dependencies: Vec<String>,
    pub inputs: BTreeMap<String, Binding>,
    pub integration_id: Option<String>,
}

impl CompiledNode {
    /// Bind this node's inputs against the outputs produced so far.
    pub fn resolve_input(&self, outputs: &HashMap<String, Value>) -> StepInput {
        self.inputs
            .iter()
            .map(|(key, binding)| (key.clone(), binding.resolve(outputs)))
            .collect()
    }
}

/// Node IDs dispatched together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub index: usize,
    pub node_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    nodes: Vec<CompiledNode>,
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
}

impl CompiledProgram {
    /// Every node in execution order.
    pub fn linearized(&self) -> &[CompiledNode] {
        &self.nodes
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes of `stage`, in order.
    pub fn stage_nodes<'p>(&'p self, stage: &'p Stage) -> impl Iterator<Item = &'p CompiledNode> {
        stage.node_ids.iter().filter_map(|id| self.node(id))
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Arrange a validated graph into stages. Cannot fail.
pub fn compile(valid: ValidGraph) -> CompiledProgram {
    let ValidGraph { nodes, stages: order } = valid;
    let mut slots: Vec<Option<_>> = nodes.into_iter().map(Some).collect();

    let mut linear = Vec::with_capacity(slots.len());
    let mut stages = Vec::with_capacity(order.len());
    for (stage_index, members) in order.into_iter().enumerate() {
        let mut node_ids = Vec::with_capacity(members.len());
        for member in members {
            let Some(node) = slots.get_mut(member).and_then(Option::take) else {
                continue;
            };
            node_ids.push(node.id.clone());
            linear.push(CompiledNode {
                id: node.id,
                name: node.name,
                step_type: node.step_type,
                stage: stage_index,
                dependencies: node.dependencies,
                inputs: node.inputs,
                integration_id: node.integration_id,
            });
        }
        stages.push(Stage { index: stage_index, node_ids });
    }

    let index = linear
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();

    CompiledProgram { nodes: linear, stages, index }
}

/// [`validate`] then [`compile`].
///
/// # Errors
/// Every violation found in `graph`.
pub fn compile_graph(
    graph: &WorkflowGraph,
    registry: &StepRegistry,
) -> Result<CompiledProgram, GraphValidationError> {
    validate(graph, registry).map(compile)
}
