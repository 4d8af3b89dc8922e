//! Graph validation.
//!
//! [`validate`] checks a workflow graph against the step registry and, when
//! nothing is wrong, hands back a [`ValidGraph`]: stage order computed and
//! every configuration value already rewritten into a [`Binding`]. All
//! violations are collected before returning, so an editor can show every
//! problem at once.

use std::collections::{BTreeMap, HashMap, HashSet};

use nodes::StepRegistry;
use serde_json::{Map, Value};

use crate::{
    binding::{Binding, OutputRef, Part},
    dag::DependencyGraph,
    error::{GraphValidationError, Violation},
    models::{Node, WorkflowGraph},
    template::{self, Segment, TemplateRef},
};

/// Config key whose literal value selects the integration for a step.
pub const INTEGRATION_ID_KEY: &str = "integrationId";

/// A node that passed validation, inputs compiled.
#[derive(Debug, Clone)]
pub(crate) struct ValidNode {
    pub id: String,
    pub name: String,
    pub step_type: String,
    pub dependencies: Vec<String>,
    pub inputs: BTreeMap<String, Binding>,
    pub integration_id: Option<String>,
}

/// Proof that a graph passed [`validate`]. Only [`crate::compiler::compile`]
/// consumes it.
#[derive(Debug, Clone)]
pub struct ValidGraph {
    pub(crate) nodes: Vec<ValidNode>,
    pub(crate) stages: Vec<Vec<usize>>,
}

impl ValidGraph {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Validate `graph` against `registry`.
///
/// # Errors
/// [`GraphValidationError`] carrying every violation found.
pub fn validate(
    graph: &WorkflowGraph,
    registry: &StepRegistry,
) -> Result<ValidGraph, GraphValidationError> {
    let mut violations = Vec::new();

    // ------------------------------------------------------------------
    // Structure: unique IDs, edge endpoints, acyclicity
    // ------------------------------------------------------------------
    let dag = DependencyGraph::build(graph, &mut violations);
    let order = dag.stages();

    if !order.unresolved.is_empty() {
        // Nodes merely downstream of a cycle are unresolved too; name only
        // the ones that reach themselves.
        let mut members: Vec<String> = order
            .unresolved
            .iter()
            .filter(|&&i| dag.ancestors(i).contains(&i))
            .map(|&i| dag.id(i).to_owned())
            .collect();
        if members.is_empty() {
            members = order.unresolved.iter().map(|&i| dag.id(i).to_owned()).collect();
        }
        violations.push(Violation::CycleDetected { nodes: members });
    }

    // ------------------------------------------------------------------
    // Per node: step type, required inputs, template references
    // ------------------------------------------------------------------
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        by_name.entry(node.reference_name()).or_default().push(i);
    }

    let mut valid_nodes = Vec::with_capacity(graph.nodes.len());
    for (i, node) in graph.nodes.iter().enumerate() {
        match registry.resolve(&node.node_type) {
            Ok(descriptor) => {
                for field in descriptor.required_inputs() {
                    if node.config.get(&field.name).map_or(true, Value::is_null) {
                        violations.push(Violation::MissingInput {
                            node_id: node.id.clone(),
                            field: field.name.clone(),
                        });
                    }
                }
            }
            Err(_) => violations.push(Violation::UnknownStepType {
                node_id: node.id.clone(),
                step_type: node.node_type.clone(),
            }),
        }

        // Edges attach to the first node carrying an ID.
        let slot = dag.index_of(&node.id).unwrap_or(i);
        let mut resolver = ReferenceResolver {
            graph,
            node,
            by_name: &by_name,
            ancestors: dag.ancestors(slot),
            violations: &mut violations,
        };
        let (inputs, integration_id) = resolver.compile_config(&node.config);

        valid_nodes.push(ValidNode {
            id: node.id.clone(),
            name: node.reference_name().to_owned(),
            step_type: node.node_type.clone(),
            dependencies: dag
                .dependencies(slot)
                .iter()
                .map(|&d| dag.id(d).to_owned())
                .collect(),
            inputs,
            integration_id,
        });
    }

    if !violations.is_empty() {
        return Err(GraphValidationError { violations });
    }

    Ok(ValidGraph {
        nodes: valid_nodes,
        stages: order.stages,
    })
}

/// Rewrites one node's configuration into bindings.
struct ReferenceResolver<'a> {
    graph: &'a WorkflowGraph,
    node: &'a Node,
    by_name: &'a HashMap<&'a str, Vec<usize>>,
    ancestors: HashSet<usize>,
    violations: &'a mut Vec<Violation>,
}

impl ReferenceResolver<'_> {
    fn compile_config(
        &mut self,
        config: &Map<String, Value>,
    ) -> (BTreeMap<String, Binding>, Option<String>) {
        let mut inputs = BTreeMap::new();
        let mut integration_id = None;

        for (key, value) in config {
            if key == INTEGRATION_ID_KEY {
                if let Value::String(id) = value {
                    if !template::has_placeholders(id) {
                        integration_id = Some(id.clone());
                        continue;
                    }
                }
            }
            inputs.insert(key.clone(), self.compile_value(value));
        }

        (inputs, integration_id)
    }

    fn compile_value(&mut self, value: &Value) -> Binding {
        match value {
            Value::String(s) => self.compile_string(s),
            Value::Object(map) => {
                let fields: BTreeMap<String, Binding> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.compile_value(v)))
                    .collect();
                if fields.values().all(Binding::is_literal) {
                    Binding::Literal(value.clone())
                } else {
                    Binding::Object(fields)
                }
            }
            Value::Array(items) => {
                let items: Vec<Binding> = items.iter().map(|v| self.compile_value(v)).collect();
                if items.iter().all(Binding::is_literal) {
                    Binding::Literal(value.clone())
                } else {
                    Binding::Array(items)
                }
            }
            other => Binding::Literal(other.clone()),
        }
    }

    fn compile_string(&mut self, text: &str) -> Binding {
        let segments = match template::parse(text) {
            Ok(segments) => segments,
            Err(malformed) => {
                for reference in malformed {
                    self.violations.push(Violation::MalformedReference {
                        node_id: self.node.id.clone(),
                        reference,
                    });
                }
                return Binding::Literal(Value::String(text.to_owned()));
            }
        };

        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                Segment::Text(t) => parts.push(Part::Text(t)),
                Segment::Reference(r) => match self.resolve(&r) {
                    Some(output) => parts.push(Part::Output(output)),
                    // Already reported; keep the raw text so compilation of
                    // the rest of the value can continue.
                    None => parts.push(Part::Text(r.raw)),
                },
            }
        }

        match parts.as_slice() {
            [Part::Output(output)] => Binding::Output(output.clone()),
            _ if parts.iter().all(|p| matches!(p, Part::Text(_))) => {
                Binding::Literal(Value::String(text.to_owned()))
            }
            _ => Binding::Interpolate(parts),
        }
    }

    fn resolve(&mut self, reference: &TemplateRef) -> Option<OutputRef> {
        let node_id = &self.node.id;
        let target = match self.by_name.get(reference.node.as_str()).map(Vec::as_slice) {
            None | Some([]) => {
                self.violations.push(Violation::UnknownTemplateNode {
                    node_id: node_id.clone(),
                    reference: reference.raw.clone(),
                    name: reference.node.clone(),
                });
                return None;
            }
            Some([only]) => *only,
            Some(_) => {
                self.violations.push(Violation::AmbiguousTemplateNode {
                    node_id: node_id.clone(),
                    reference: reference.raw.clone(),
                    name: reference.node.clone(),
                });
                return None;
            }
        };

        let source = &self.graph.nodes[target];
        if !self.ancestors.contains(&target) {
            self.violations.push(Violation::NotADependency {
                node_id: node_id.clone(),
                reference: reference.raw.clone(),
                source_node: source.id.clone(),
            });
            return None;
        }

        Some(OutputRef {
            node_id: source.id.clone(),
            path: reference.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Edge;
    use nodes::{mock::MockStep, InputField, StepDescriptor};
    use serde_json::json;

    fn registry() -> StepRegistry {
        let mut builder = StepRegistry::builder();
        builder
            .register(StepDescriptor::new("draft", MockStep::returning(json!({ "text": "hello" }))))
            .unwrap()
            .register(
                StepDescriptor::new("email", MockStep::returning(json!({ "sent": true })))
                    .with_input(InputField::required("body"))
                    .with_input(InputField::optional("subject")),
            )
            .unwrap()
            .register(StepDescriptor::new("mock", MockStep::returning(json!({}))))
            .unwrap();
        builder.build()
    }

    fn fetch_send(body: Value) -> WorkflowGraph {
        WorkflowGraph::new(
            vec![
                Node::new("fetch", "draft").with_name("Fetch"),
                Node::new("send", "email").with_name("Send").with_config("body", body),
            ],
            vec![Edge::new("fetch", "send")],
        )
    }

    fn violations(graph: &WorkflowGraph) -> Vec<Violation> {
        validate(graph, &registry()).unwrap_err().violations
    }

    #[test]
    fn valid_graph_compiles_bindings() {
        let valid = validate(&fetch_send(json!("{{Fetch.text}}")), &registry()).unwrap();
        assert_eq!(valid.stage_count(), 2);
        let send = &valid.nodes[1];
        assert_eq!(send.dependencies, vec!["fetch"]);
        assert_eq!(
            send.inputs["body"],
            Binding::Output(OutputRef {
                node_id: "fetch".into(),
                path: template::FieldPath::parse("text").unwrap(),
            })
        );
    }

    #[test]
    fn two_node_cycle_is_named() {
        let graph = WorkflowGraph::new(
            vec![Node::new("a", "mock"), Node::new("b", "mock")],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        );
        assert_eq!(
            violations(&graph),
            vec![Violation::CycleDetected { nodes: vec!["a".into(), "b".into()] }]
        );
    }

    #[test]
    fn nodes_downstream_of_a_cycle_are_not_named() {
        let graph = WorkflowGraph::new(
            vec![Node::new("a", "mock"), Node::new("b", "mock"), Node::new("tail", "mock")],
            vec![Edge::new("a", "b"), Edge::new("b", "a"), Edge::new("b", "tail")],
        );
        assert_eq!(
            violations(&graph),
            vec![Violation::CycleDetected { nodes: vec!["a".into(), "b".into()] }]
        );
    }

    #[test]
    fn renamed_source_breaks_the_reference() {
        let mut graph = fetch_send(json!("{{Fetch.text}}"));
        graph.nodes[0].name = Some("Draft".into());
        assert_eq!(
            violations(&graph),
            vec![Violation::UnknownTemplateNode {
                node_id: "send".into(),
                reference: "{{Fetch.text}}".into(),
                name: "Fetch".into(),
            }]
        );
    }

    #[test]
    fn reference_to_a_non_ancestor_is_rejected() {
        let mut graph = fetch_send(json!("{{Fetch.text}}"));
        graph.edges.clear();
        assert!(matches!(
            violations(&graph).as_slice(),
            [Violation::NotADependency { source_node, .. }] if source_node == "fetch"
        ));
    }

    #[test]
    fn self_reference_is_rejected() {
        let graph = WorkflowGraph::new(
            vec![Node::new("n", "mock").with_config("x", json!("{{n.out}}"))],
            vec![],
        );
        assert!(matches!(violations(&graph).as_slice(), [Violation::NotADependency { .. }]));
    }

    #[test]
    fn transitive_ancestor_is_accepted() {
        let graph = WorkflowGraph::new(
            vec![
                Node::new("a", "draft"),
                Node::new("b", "mock"),
                Node::new("c", "mock").with_config("x", json!("{{a.text}}")),
            ],
            vec![Edge::new("a", "b"), Edge::new("b", "c")],
        );
        assert!(validate(&graph, &registry()).is_ok());
    }

    #[test]
    fn ambiguous_reference_name_is_rejected() {
        let graph = WorkflowGraph::new(
            vec![
                Node::new("a", "draft").with_name("Same"),
                Node::new("b", "draft").with_name("Same"),
                Node::new("c", "mock").with_config("x", json!("{{Same.text}}")),
            ],
            vec![Edge::new("a", "c"), Edge::new("b", "c")],
        );
        assert!(matches!(
            violations(&graph).as_slice(),
            [Violation::AmbiguousTemplateNode { name, .. }] if name == "Same"
        ));
    }

    #[test]
    fn every_violation_is_collected() {
        let graph = WorkflowGraph::new(
            vec![
                Node::new("a", "mock"),
                Node::new("a", "mock"),
                Node::new("b", "teleport"),
                Node::new("c", "email").with_config("subject", json!("{{Nope.x}} {{broken}}")),
            ],
            vec![Edge::new("a", "ghost")],
        );
        let found = violations(&graph);
        assert!(found.contains(&Violation::DuplicateNodeId("a".into())));
        assert!(found.contains(&Violation::UnknownNodeReference {
            node_id: "ghost".into(),
            side: "target"
        }));
        assert!(found.contains(&Violation::UnknownStepType {
            node_id: "b".into(),
            step_type: "teleport".into()
        }));
        assert!(found.contains(&Violation::MissingInput { node_id: "c".into(), field: "body".into() }));
        assert!(found.contains(&Violation::MalformedReference {
            node_id: "c".into(),
            reference: "{{broken}}".into()
        }));
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn null_required_input_counts_as_missing() {
        assert!(matches!(
            violations(&fetch_send(Value::Null)).as_slice(),
            [Violation::MissingInput { field, .. }] if field == "body"
        ));
    }

    #[test]
    fn nested_references_are_compiled() {
        let graph = fetch_send(json!({
            "parts": ["Re: {{Fetch.text}}", "static"],
            "meta": { "fixed": 1 }
        }));
        let valid = validate(&graph, &registry()).unwrap();
        let Binding::Object(fields) = &valid.nodes[1].inputs["body"] else {
            panic!("expected an object binding");
        };
        assert!(fields["meta"].is_literal());
        let Binding::Array(items) = &fields["parts"] else {
            panic!("expected an array binding");
        };
        assert!(matches!(items[0], Binding::Interpolate(_)));
        assert_eq!(items[1], Binding::Literal(json!("static")));
    }

    #[test]
    fn literal_integration_id_is_lifted_out_of_inputs() {
        let mut graph = fetch_send(json!("hi"));
        graph.nodes[1]
            .config
            .insert(INTEGRATION_ID_KEY.into(), json!("int-42"));
        let valid = validate(&graph, &registry()).unwrap();
        let send = &valid.nodes[1];
        assert_eq!(send.integration_id.as_deref(), Some("int-42"));
        assert!(!send.inputs.contains_key(INTEGRATION_ID_KEY));
        assert_eq!(send.inputs["body"], Binding::Literal(json!("hi")));
    }
}
