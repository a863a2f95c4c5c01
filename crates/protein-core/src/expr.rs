//! The expression evaluator shim (§4.3): wraps the template engine,
//! handles the `#!literal ` sentinel, and recovers composite values from
//! rendered strings via a literal-parse pass.
//!
//! Grounded in `other_examples/…pondpilot-flowscope…templater-jinja.rs`,
//! the closest retrieved file to "a Jinja-style evaluator with custom
//! filters and variables": a fresh `minijinja::Environment` per render
//! call, variables supplied as `minijinja::Value::from_serialize`, custom
//! functions/filters registered via `add_function`/`add_filter`.

use minijinja::Environment;

use crate::error::{ErrorTag, ProteinError, Span};
use crate::node::{HostCallable, HostFilter, Node, Value};

/// The sentinel that marks a literal (non-templated) string (§3, §4.3).
pub const LITERAL_SENTINEL: &str = "#!literal ";

/// Strips the `#!literal ` prefix if present, returning `(text,
/// literal_flag)` the way `Node::String` stores it.
pub fn split_literal_sentinel(raw: &str) -> (String, bool) {
    raw.strip_prefix(LITERAL_SENTINEL)
        .map_or_else(|| (raw.to_owned(), false), |rest| (rest.to_owned(), true))
}

/// Evaluates a string leaf (§4.3):
/// 1. `literal_flag` set -> return the text unevaluated as a plain string.
/// 2. Otherwise, render it as a template against `snapshot`, then attempt
///    to literal-parse the rendered text into a composite `Node`.
pub fn evaluate_string(
    text: &str,
    literal_flag: bool,
    snapshot: &[(String, Value)],
    callables: &[HostCallable],
    filters: &[HostFilter],
    span: &Span,
) -> Result<Node, ProteinError> {
    if literal_flag {
        return Ok(Node::string(text));
    }
    let rendered = render_template(text, snapshot, callables, filters, span)?;
    Ok(literal_parse(&rendered))
}

/// Runs `template` through minijinja with `snapshot` as the variable
/// environment and `callables`/`filters` registered as functions/filters.
pub fn render_template(
    template: &str,
    snapshot: &[(String, Value)],
    callables: &[HostCallable],
    filters: &[HostFilter],
    span: &Span,
) -> Result<String, ProteinError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

    for callable in callables {
        let func = callable.func.clone();
        let name = callable.name.clone();
        let call_span = span.clone();
        env.add_function(
            callable.name.clone(),
            move |args: minijinja::value::Rest<minijinja::Value>| -> Result<minijinja::Value, minijinja::Error> {
                let nodes = minijinja_values_to_nodes(&args, &name, &call_span)?;
                let result = (func)(&nodes, &call_span).map_err(protein_error_to_minijinja)?;
                Ok(node_to_minijinja_value(&result))
            },
        );
    }
    for filter in filters {
        let func = filter.func.clone();
        let name = filter.name.clone();
        let filter_span = span.clone();
        env.add_filter(
            filter.name.clone(),
            move |value: minijinja::Value, args: minijinja::value::Rest<minijinja::Value>| -> Result<minijinja::Value, minijinja::Error> {
                let mut all = vec![value];
                all.extend(args.0);
                let nodes = minijinja_values_to_nodes(&all, &name, &filter_span)?;
                let result = (func)(&nodes, &filter_span).map_err(protein_error_to_minijinja)?;
                Ok(node_to_minijinja_value(&result))
            },
        );
    }

    let ctx = snapshot_to_minijinja_value(snapshot);
    env.add_template("expr", template)
        .map_err(|e| ProteinError::expr(e.to_string(), span.clone()))?;
    let tmpl = env
        .get_template("expr")
        .map_err(|e| ProteinError::expr(e.to_string(), span.clone()))?;
    tmpl.render(ctx).map_err(|e| {
        if e.kind() == minijinja::ErrorKind::UndefinedError {
            ProteinError::undefined(&e.to_string(), span.clone())
        } else {
            ProteinError::expr(e.to_string(), span.clone())
        }
    })
}

fn protein_error_to_minijinja(err: ProteinError) -> minijinja::Error {
    minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, err.to_string())
}

fn minijinja_values_to_nodes(
    values: &[minijinja::Value],
    name: &str,
    span: &Span,
) -> Result<Vec<Node>, minijinja::Error> {
    values
        .iter()
        .map(|v| {
            let json = serde_json::to_string(v).map_err(|e| {
                minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, format!("{name}: {e}"))
            })?;
            json_to_node(&json).map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.message))
                .map_err(|e| {
                    let _ = span;
                    e
                })
        })
        .collect()
}

fn json_to_node(json: &str) -> Result<Node, ProteinError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ProteinError::type_error(e.to_string(), Span::unknown()))?;
    Ok(crate::emit::json::from_json_value(value))
}

fn snapshot_to_minijinja_value(snapshot: &[(String, Value)]) -> minijinja::Value {
    let mut map = std::collections::BTreeMap::new();
    for (k, v) in snapshot {
        if let Some(node) = v.as_node() {
            map.insert(k.clone(), node_to_minijinja_value(node));
        }
    }
    minijinja::Value::from_serialize(&map)
}

fn node_to_minijinja_value(node: &Node) -> minijinja::Value {
    match node {
        Node::Null => minijinja::Value::from(()),
        Node::Bool(b) => minijinja::Value::from(*b),
        Node::Int(n) => minijinja::Value::from(*n),
        Node::Float(f) => minijinja::Value::from(*f),
        Node::Timestamp(s) | Node::String(s, _) => minijinja::Value::from(s.as_str()),
        Node::Sequence(items) => {
            minijinja::Value::from(items.iter().map(node_to_minijinja_value).collect::<Vec<_>>())
        }
        Node::Mapping(m) => {
            let map: std::collections::BTreeMap<String, minijinja::Value> =
                m.iter().map(|(k, v)| (k.clone(), node_to_minijinja_value(v))).collect();
            minijinja::Value::from_serialize(&map)
        }
    }
}

/// Recovers a composite value from a rendered string (§4.3 step 3).
///
/// Implemented by parsing the text as a standalone YAML document via
/// `serde_yaml` rather than a hand-rolled grammar (see SPEC_FULL.md's
/// "literal-parser grounding" supplement): on success, a non-string
/// scalar/sequence/mapping becomes the corresponding `Node`; a plain
/// scalar string, or any parse failure, keeps the text as a `Node::String`.
pub fn literal_parse(text: &str) -> Node {
    match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(serde_yaml::Value::String(_)) | Err(_) => Node::string(text),
        Ok(value) => yaml_value_to_node(&value).unwrap_or_else(|| Node::string(text)),
    }
}

fn yaml_value_to_node(value: &serde_yaml::Value) -> Option<Node> {
    Some(match value {
        serde_yaml::Value::Null => Node::Null,
        serde_yaml::Value::Bool(b) => Node::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Node::Int(i)
            } else {
                Node::Float(n.as_f64()?)
            }
        }
        serde_yaml::Value::String(s) => Node::string(s.clone()),
        serde_yaml::Value::Sequence(items) => {
            Node::Sequence(items.iter().map(yaml_value_to_node).collect::<Option<Vec<_>>>()?)
        }
        serde_yaml::Value::Mapping(map) => {
            let mut m = crate::node::Mapping::new();
            for (k, v) in map {
                let key = k.as_str()?.to_owned();
                let val = yaml_value_to_node(v)?;
                m.push(key, val, &Span::unknown()).ok()?;
            }
            Node::Mapping(m)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_value_to_node(&tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sentinel_strips_prefix() {
        let (text, flag) = split_literal_sentinel("#!literal hello {{ x }}");
        assert_eq!(text, "hello {{ x }}");
        assert!(flag);
    }

    #[test]
    fn split_sentinel_absent() {
        let (text, flag) = split_literal_sentinel("hello");
        assert_eq!(text, "hello");
        assert!(!flag);
    }

    #[test]
    fn literal_parse_recovers_sequence() {
        let node = literal_parse("[1, 2, 3]");
        assert_eq!(node, Node::Sequence(vec![Node::Int(1), Node::Int(2), Node::Int(3)]));
    }

    #[test]
    fn literal_parse_recovers_mapping() {
        let node = literal_parse("{a: 1, b: 2}");
        let m = node.as_mapping().unwrap();
        assert_eq!(m.get("a"), Some(&Node::Int(1)));
    }

    #[test]
    fn literal_parse_keeps_plain_strings() {
        let node = literal_parse("Hello, Alice!");
        assert_eq!(node, Node::string("Hello, Alice!"));
    }

    #[test]
    fn literal_parse_recovers_bool_and_null() {
        assert_eq!(literal_parse("true"), Node::Bool(true));
        assert_eq!(literal_parse("null"), Node::Null);
    }

    #[test]
    fn render_template_interpolates_variables() {
        let snapshot = vec![("name".to_owned(), Value::Node(Node::string("Alice")))];
        let rendered = render_template("Hello, {{ name }}!", &snapshot, &[], &[], &Span::unknown()).unwrap();
        assert_eq!(rendered, "Hello, Alice!");
    }

    #[test]
    fn render_template_errors_on_undefined() {
        let err = render_template("{{ nope }}", &[], &[], &[], &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::Undefined);
    }
}
