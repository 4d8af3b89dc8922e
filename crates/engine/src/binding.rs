//! Compiled node inputs.
//!
//! The validator rewrites every configuration value into a [`Binding`]: a
//! literal, a direct reference to an upstream node's output field, or a
//! string interpolation mixing both. The executor resolves bindings against
//! the outputs collected so far; the code generator turns them into variable
//! references. Neither looks at template strings again.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::template::FieldPath;

/// A field of an upstream node's output `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    /// ID (not reference name) of the producing node.
    pub node_id: String,
    pub path: FieldPath,
}

impl OutputRef {
    /// Value at this reference, `None` if the node has no output or the path
    /// does not exist.
    pub fn resolve<'v>(&self, outputs: &'v HashMap<String, Value>) -> Option<&'v Value> {
        outputs.get(&self.node_id).and_then(|data| self.path.lookup(data))
    }
}

/// Piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Output(OutputRef),
}

/// A compiled configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// No references inside.
    Literal(Value),
    /// The whole string was exactly one reference; keeps the value's JSON type.
    Output(OutputRef),
    /// Text with embedded references; always renders to a string.
    Interpolate(Vec<Part>),
    Object(BTreeMap<String, Binding>),
    Array(Vec<Binding>),
}

impl Binding {
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Produce the concrete value given upstream outputs.
    ///
    /// A missing upstream field binds `null` (empty text inside an
    /// interpolation).
    pub fn resolve(&self, outputs: &HashMap<String, Value>) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Output(r) => r.resolve(outputs).cloned().unwrap_or(Value::Null),
            Self::Interpolate(parts) => {
                let mut rendered = String::new();
                for part in parts {
                    match part {
                        Part::Text(t) => rendered.push_str(t),
                        Part::Output(r) => {
                            if let Some(v) = r.resolve(outputs) {
                                rendered.push_str(&render_text(v));
                            }
                        }
                    }
                }
                Value::String(rendered)
            }
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, b)| (k.clone(), b.resolve(outputs)))
                    .collect::<Map<String, Value>>(),
            ),
            Self::Array(items) => Value::Array(items.iter().map(|b| b.resolve(outputs)).collect()),
        }
    }

    /// Every upstream reference inside this binding, depth first.
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Output(r) => out.push(r),
            Self::Interpolate(parts) => out.extend(parts.iter().filter_map(|p| match p {
                Part::Output(r) => Some(r),
                Part::Text(_) => None,
            })),
            Self::Object(fields) => fields.values().for_each(|b| b.collect_references(out)),
            Self::Array(items) => items.iter().for_each(|b| b.collect_references(out)),
        }
    }
}

/// How a value is spliced into surrounding text.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
