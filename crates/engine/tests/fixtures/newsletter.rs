// Workflow: newsletter
// Generated by rusty-automation-tool: 2 stage(s), 2 node(s). Do not edit.

#![allow(unused_imports, unused_variables, unused_mut, dead_code, clippy::all)]

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

/// Node "fetch" (draft), stage 0.
pub async fn step_fetch(registry: &StepRegistry, ctx: &RuntimeContext) -> Result<Value, String> {
    let mut ctx = ctx.clone();
    ctx.node_id = String::from("fetch");
    ctx.integration_id = None;
    let mut input = Map::new();
    input.insert(String::from("count"), json!(2));
    input.insert(String::from("text"), Value::from("hello"));
    invoke(registry, &ctx, "draft", input).await
}

/// Node "send" (email), stage 1.
pub async fn step_send(registry: &StepRegistry, ctx: &RuntimeContext, fetch: &Value) -> Result<Value, String> {
    let mut ctx = ctx.clone();
    ctx.node_id = String::from("send");
    ctx.integration_id = None;
    let mut input = Map::new();
    input.insert(String::from("body"), Value::String([String::from("Hi "), text(&pick(fetch, &["text"])), String::from("!")].concat()));
    input.insert(String::from("meta"), { let mut m = Map::new(); m.insert(String::from("count"), pick(fetch, &["count"])); m.insert(String::from("tags"), Value::Array(vec![Value::from("x"), pick(fetch, &["text"])])); Value::Object(m) });
    input.insert(String::from("subject"), Value::from("Weekly"));
    invoke(registry, &ctx, "email", input).await
}

/// Run every node in stage order; stops at the first failing node.
pub async fn run_workflow(registry: &StepRegistry, ctx: &RuntimeContext) -> Result<Map<String, Value>, String> {
    let mut outputs = Map::new();
    // Stage 0
    let fetch = step_fetch(registry, ctx).await?;
    outputs.insert(String::from("fetch"), fetch.clone());
    // Stage 1
    let send = step_send(registry, ctx, &fetch).await?;
    outputs.insert(String::from("send"), send.clone());
    Ok(outputs)
}
