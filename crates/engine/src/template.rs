//! Template references embedded in node configuration.
//!
//! A reference has the form `{{NodeName.fieldPath}}`: a case-sensitive node
//! reference name, a dot, and a dot-separated path into that node's output
//! `data`. Whitespace just inside the braces is ignored. Numeric path
//! segments index arrays.
//!
//! Only the validator parses templates; everything downstream works on
//! compiled [`crate::binding::Binding`]s.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// `{{...}}` with no nested braces; group 1 is the inside.
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([^{}]*)\}\}").expect("PLACEHOLDER_REGEX must compile")
});

fn placeholder_regex() -> &'static Regex {
    &PLACEHOLDER_REGEX
}

/// Dot-separated path into a node's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse `a.b.0.c`. Empty segments make the path invalid.
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<String> = path.split('.').map(|s| s.trim().to_owned()).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Walk `value` along the path.
    pub fn lookup<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.0.iter().try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A parsed `{{Name.path}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    /// Reference name of the producing node.
    pub node: String,
    pub path: FieldPath,
    /// Original text, braces included, for error messages.
    pub raw: String,
}

/// Piece of a configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Reference(TemplateRef),
}

/// Split a configuration string into literal text and references.
///
/// # Errors
/// Every `{{...}}` that is not a well-formed `{{Name.field}}`, as raw text.
pub fn parse(input: &str) -> Result<Vec<Segment>, Vec<String>> {
    let mut segments = Vec::new();
    let mut malformed = Vec::new();
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            segments.push(Segment::Text(input[last..whole.start()].to_owned()));
        }
        last = whole.end();

        match parse_reference(&caps[1]) {
            Some((node, path)) => segments.push(Segment::Reference(TemplateRef {
                node,
                path,
                raw: whole.as_str().to_owned(),
            })),
            None => malformed.push(whole.as_str().to_owned()),
        }
    }

    if last < input.len() {
        segments.push(Segment::Text(input[last..].to_owned()));
    }

    if malformed.is_empty() {
        Ok(segments)
    } else {
        Err(malformed)
    }
}

fn parse_reference(inner: &str) -> Option<(String, FieldPath)> {
    let (node, path) = inner.trim().split_once('.')?;
    let node = node.trim();
    if node.is_empty() {
        return None;
    }
    Some((node.to_owned(), FieldPath::parse(path)?))
}

/// Whether `input` contains anything that looks like a placeholder.
pub fn has_placeholders(input: &str) -> bool {
    placeholder_regex().is_match(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(node: &str, path: &str) -> Segment {
        Segment::Reference(TemplateRef {
            node: node.into(),
            path: FieldPath::parse(path).unwrap(),
            raw: format!("{{{{{node}.{path}}}}}"),
        })
    }

    #[test]
    fn whole_string_reference() {
        assert_eq!(parse("{{Fetch.text}}").unwrap(), vec![reference("Fetch", "text")]);
    }

    #[test]
    fn mixed_text_and_references() {
        let segments = parse("Hi {{User.name}}, see {{Doc.links.0}}!").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("Hi ".into()),
                reference("User", "name"),
                Segment::Text(", see ".into()),
                reference("Doc", "links.0"),
                Segment::Text("!".into()),
            ]
        );
    }

    #[test]
    fn node_names_may_contain_spaces() {
        let segments = parse("{{ Fetch Draft.body }}").unwrap();
        match &segments[0] {
            Segment::Reference(r) => {
                assert_eq!(r.node, "Fetch Draft");
                assert_eq!(r.path.to_string(), "body");
            }
            other => panic!("unexpected segment {other:?}"),
        }
    }

    #[test]
    fn malformed_placeholders_are_all_reported() {
        let err = parse("{{Fetch}} and {{.text}} and {{A..b}}").unwrap_err();
        assert_eq!(err, vec!["{{Fetch}}", "{{.text}}", "{{A..b}}"]);
    }

    #[test]
    fn plain_text_has_no_references() {
        assert_eq!(parse("hello").unwrap(), vec![Segment::Text("hello".into())]);
        assert!(!has_placeholders("hello { world }"));
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let data = json!({ "items": [ { "title": "first" } ], "n": 3 });
        let path = FieldPath::parse("items.0.title").unwrap();
        assert_eq!(path.lookup(&data), Some(&json!("first")));
        assert_eq!(FieldPath::parse("n.x").unwrap().lookup(&data), None);
        assert_eq!(FieldPath::parse("items.9").unwrap().lookup(&data), None);
    }
}
