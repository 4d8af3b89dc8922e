//! Rust source generation for compiled workflows.
//!
//! The output is a standalone module: one `async fn` per node taking the
//! outputs it references as `&Value` parameters (so each step can be called
//! in isolation), plus `run_workflow`, which calls them stage by stage and
//! threads outputs through local variables. Generation is a pure function of
//! the [`CompiledProgram`]; the same program always yields the same text.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;

use crate::{
    binding::{Binding, OutputRef, Part},
    compiler::{CompiledNode, CompiledProgram},
};

const PRELUDE: &str = r#"#![allow(unused_imports, unused_variables, unused_mut, dead_code, clippy::all)]

use nodes::{RuntimeContext, StepRegistry, StepResult};
use serde_json::{json, Map, Value};

/// Field of an upstream output; `null` when the path finds nothing.
fn pick(value: &Value, path: &[&str]) -> Value {
    path.iter()
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(*segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// How a value reads when spliced into text.
fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lit(json_text: &str) -> Value {
    serde_json::from_str(json_text).unwrap_or(Value::Null)
}

async fn invoke(
    registry: &StepRegistry,
    ctx: &RuntimeContext,
    step_type: &str,
    input: Map<String, Value>,
) -> Result<Value, String> {
    let step = registry.resolve(step_type).map_err(|e| e.to_string())?;
    match step.invoke(input, ctx).await {
        StepResult::Success { data } => Ok(data),
        StepResult::Failure { error } => Err(error),
    }
}
"#;

/// Names the generated code uses for its own bindings.
const RESERVED: &[&str] = &[
    "registry", "ctx", "input", "outputs", "pick", "text", "lit", "invoke", "json", "m",
];

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut",
    "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true", "try", "type",
    "unsafe", "use", "where", "while", "abstract", "become", "box", "do", "final", "macro",
    "override", "priv", "typeof", "unsized", "virtual", "yield", "union",
];

/// Render `program` as Rust source. `title` only appears in the header.
pub fn generate(program: &CompiledProgram, title: &str) -> String {
    let idents = assign_idents(program);
    let mut out = Emitter::default();

    out.line(0, &format!("// Workflow: {}", title.replace(['\r', '\n'], " ")));
    out.line(
        0,
        &format!(
            "// Generated by rusty-automation-tool: {} stage(s), {} node(s). Do not edit.",
            program.stages().len(),
            program.len()
        ),
    );
    out.blank();
    out.raw(PRELUDE);

    for node in program.linearized() {
        out.blank();
        emit_step_fn(&mut out, program, node, &idents);
    }

    out.blank();
    emit_run_workflow(&mut out, program, &idents);
    out.finish()
}

fn emit_step_fn(
    out: &mut Emitter,
    program: &CompiledProgram,
    node: &CompiledNode,
    idents: &HashMap<String, String>,
) {
    let ident = &idents[&node.id];
    let params = referenced_nodes(program, node);

    out.line(
        0,
        &format!(
            "/// Node {:?} ({}), stage {}.",
            node.id, node.step_type, node.stage
        ),
    );
    let mut signature = format!("pub async fn step_{ident}(registry: &StepRegistry, ctx: &RuntimeContext");
    for dep in &params {
        signature.push_str(&format!(", {}: &Value", idents[dep]));
    }
    signature.push_str(") -> Result<Value, String> {");
    out.line(0, &signature);

    out.line(1, "let mut ctx = ctx.clone();");
    out.line(1, &format!("ctx.node_id = String::from({:?});", node.id));
    match &node.integration_id {
        Some(id) => out.line(1, &format!("ctx.integration_id = Some(String::from({id:?}));")),
        None => out.line(1, "ctx.integration_id = None;"),
    }
    out.line(1, "let mut input = Map::new();");
    for (key, binding) in &node.inputs {
        out.line(
            1,
            &format!(
                "input.insert(String::from({key:?}), {});",
                binding_expr(binding, idents)
            ),
        );
    }
    out.line(1, &format!("invoke(registry, &ctx, {:?}, input).await", node.step_type));
    out.line(0, "}");
}

fn emit_run_workflow(out: &mut Emitter, program: &CompiledProgram, idents: &HashMap<String, String>) {
    out.line(0, "/// Run every node in stage order; stops at the first failing node.");
    out.line(
        0,
        "pub async fn run_workflow(registry: &StepRegistry, ctx: &RuntimeContext) -> Result<Map<String, Value>, String> {",
    );
    out.line(1, "let mut outputs = Map::new();");
    for stage in program.stages() {
        out.line(1, &format!("// Stage {}", stage.index));
        for node in program.stage_nodes(stage) {
            let ident = &idents[&node.id];
            let mut call = format!("let {ident} = step_{ident}(registry, ctx");
            for dep in referenced_nodes(program, node) {
                call.push_str(&format!(", &{}", idents[&dep]));
            }
            call.push_str(").await?;");
            out.line(1, &call);
            out.line(
                1,
                &format!("outputs.insert(String::from({:?}), {ident}.clone());", node.id),
            );
        }
    }
    out.line(1, "Ok(outputs)");
    out.line(0, "}");
}

/// Producer IDs referenced by `node`'s bindings, in program order.
fn referenced_nodes(program: &CompiledProgram, node: &CompiledNode) -> Vec<String> {
    let referenced: HashSet<&str> = node
        .inputs
        .values()
        .flat_map(Binding::references)
        .map(|r| r.node_id.as_str())
        .collect();
    program
        .linearized()
        .iter()
        .filter(|n| referenced.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

fn binding_expr(binding: &Binding, idents: &HashMap<String, String>) -> String {
    match binding {
        Binding::Literal(value) => literal_expr(value),
        Binding::Output(r) => pick_expr(r, idents),
        Binding::Interpolate(parts) => {
            let pieces: Vec<String> = parts
                .iter()
                .map(|part| match part {
                    Part::Text(t) => format!("String::from({t:?})"),
                    Part::Output(r) => format!("text(&{})", pick_expr(r, idents)),
                })
                .collect();
            format!("Value::String([{}].concat())", pieces.join(", "))
        }
        Binding::Object(fields) => {
            let mut expr = String::from("{ let mut m = Map::new(); ");
            for (key, value) in fields {
                expr.push_str(&format!(
                    "m.insert(String::from({key:?}), {}); ",
                    binding_expr(value, idents)
                ));
            }
            expr.push_str("Value::Object(m) }");
            expr
        }
        Binding::Array(items) => {
            let items: Vec<String> = items.iter().map(|b| binding_expr(b, idents)).collect();
            format!("Value::Array(vec![{}])", items.join(", "))
        }
    }
}

fn literal_expr(value: &Value) -> String {
    match value {
        Value::String(s) => format!("Value::from({s:?})"),
        Value::Null | Value::Bool(_) | Value::Number(_) => format!("json!({value})"),
        Value::Array(_) | Value::Object(_) => format!("lit({:?})", value.to_string()),
    }
}

fn pick_expr(reference: &OutputRef, idents: &HashMap<String, String>) -> String {
    let ident = idents
        .get(&reference.node_id)
        .map(String::as_str)
        .unwrap_or("&Value::Null");
    let path: Vec<String> = reference
        .path
        .segments()
        .iter()
        .map(|s| format!("{s:?}"))
        .collect();
    format!("pick({ident}, &[{}])", path.join(", "))
}

/// Unique Rust identifiers per node ID.
fn assign_idents(program: &CompiledProgram) -> HashMap<String, String> {
    let mut taken: BTreeSet<String> = RESERVED.iter().map(|s| (*s).to_owned()).collect();
    let mut idents = HashMap::with_capacity(program.len());

    for node in program.linearized() {
        let base = sanitize(&node.id);
        let mut candidate = base.clone();
        let mut n = 2;
        while taken.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        taken.insert(candidate.clone());
        idents.insert(node.id.clone(), candidate);
    }
    idents
}

fn sanitize(id: &str) -> String {
    let mut ident: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let trimmed = ident.trim_matches('_');
    ident = if trimmed.is_empty() { "node".to_owned() } else { trimmed.to_owned() };
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "n_");
    }
    if KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

#[derive(Default)]
struct Emitter {
    buf: String,
}

impl Emitter {
    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    fn blank(&mut self) {
        self.buf.push('\n');
    }

    fn raw(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    fn finish(self) -> String {
        self.buf
    }
}
