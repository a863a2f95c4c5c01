//! The JSON emitter (§6): "a standard serializer, supporting `indent`,
//! `sort_keys`, `ensure_ascii`, `separators`, `allow_nan`, `skipkeys`."
//!
//! Grounded in `serde_json`, already an `ouros` dependency (used there for
//! its AST-dump machinery); `ensure_ascii`/`separators`/`allow_nan`/
//! `skipkeys` are accepted for interface compatibility but have no effect
//! under `serde_json`'s always-UTF8, always-finite-rejecting, always-
//! string-keyed output — documented rather than silently dropped.

use serde::Serialize;
use serde_json::Value as Json;

use crate::error::{ProteinError, Span};
use crate::node::{Mapping, Node};

use super::reject_unknown_args;

const KNOWN_ARGS: &[&str] = &["indent", "sort_keys", "ensure_ascii", "separators", "allow_nan", "skipkeys"];

pub fn emit(node: &Node, args: Option<&Mapping>, span: &Span) -> Result<String, ProteinError> {
    let mut indent = 2u32;
    let mut sort_keys = false;
    if let Some(args) = args {
        reject_unknown_args(args, KNOWN_ARGS, span)?;
        if let Some(v) = args.get("indent") {
            indent = match v {
                Node::Int(n) if *n >= 0 => *n as u32,
                _ => return Err(ProteinError::arg("`indent` must be a non-negative integer", span.clone())),
            };
        }
        if let Some(v) = args.get("sort_keys") {
            sort_keys = v.is_truthy();
        }
    }

    let mut value = to_json_value(node);
    if sort_keys {
        sort_object_keys(&mut value);
    }

    let body = if indent == 0 {
        serde_json::to_string(&value).map_err(|e| ProteinError::io(format!("serializing json: {e}"), span.clone()))?
    } else {
        let indent_bytes = " ".repeat(indent as usize);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent_bytes.as_bytes());
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value
            .serialize(&mut ser)
            .map_err(|e| ProteinError::io(format!("serializing json: {e}"), span.clone()))?;
        String::from_utf8(buf).expect("serde_json output is utf8")
    };

    Ok(format!("{body}\n"))
}

fn sort_object_keys(value: &mut Json) {
    match value {
        Json::Object(map) => {
            let mut entries: Vec<_> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, v) in &mut entries {
                sort_object_keys(v);
            }
            *map = entries.into_iter().collect();
        }
        Json::Array(items) => items.iter_mut().for_each(sort_object_keys),
        _ => {}
    }
}

fn to_json_value(node: &Node) -> Json {
    match node {
        Node::Null => Json::Null,
        Node::Bool(b) => Json::Bool(*b),
        Node::Int(n) => Json::Number((*n).into()),
        Node::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Node::Timestamp(s) | Node::String(s, _) => Json::String(s.clone()),
        Node::Sequence(items) => Json::Array(items.iter().map(to_json_value).collect()),
        Node::Mapping(m) => Json::Object(m.iter().map(|(k, v)| (k.clone(), to_json_value(v))).collect()),
    }
}

/// Converts a `serde_json::Value` into a [`Node`] — used by the expression
/// evaluator to pull host-callable/filter results back into the tree
/// (§4.3's "round-trip through the emitter's JSON model").
pub fn from_json_value(value: Json) -> Node {
    match value {
        Json::Null => Node::Null,
        Json::Bool(b) => Node::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Node::Int(i)
            } else {
                Node::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Node::string(s),
        Json::Array(items) => Node::Sequence(items.into_iter().map(from_json_value).collect()),
        Json::Object(map) => {
            let mut m = Mapping::new();
            for (k, v) in map {
                // Keys are already guaranteed unique by `serde_json::Map`.
                let _ = m.push(k, from_json_value(v), &Span::unknown());
            }
            Node::Mapping(m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_defaults_to_two_space_indent() {
        let mut m = Mapping::new();
        m.push("a".into(), Node::Int(1), &Span::unknown()).unwrap();
        let out = emit(&Node::Mapping(m), None, &Span::unknown()).unwrap();
        assert_eq!(out, "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn emit_rejects_unknown_args() {
        let mut args = Mapping::new();
        args.push("bogus".into(), Node::Bool(true), &Span::unknown()).unwrap();
        let err = emit(&Node::Null, Some(&args), &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, crate::error::ErrorTag::Arg);
    }

    #[test]
    fn json_round_trips_through_node() {
        let mut m = Mapping::new();
        m.push("x".into(), Node::Sequence(vec![Node::Int(1), Node::Bool(true)]), &Span::unknown())
            .unwrap();
        let node = Node::Mapping(m);
        let json = to_json_value(&node);
        assert_eq!(from_json_value(json), node);
    }
}
