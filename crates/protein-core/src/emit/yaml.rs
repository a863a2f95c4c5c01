//! The YAML emitter (§6): "a round-trip-preserving emitter; argument set
//! and defaults as tabulated in the reference (`indent=2, offset=2,
//! width=80, explicit_start=false, …`). Default `typ = "rt"`; duplicate
//! keys rejected."
//!
//! `serde_yaml` does not expose ruamel's "round-trip" comment/anchor
//! preservation — the core never retains comments internally in the
//! first place (`Node` carries none), so the practical round-trip law
//! this crate honors is the data-level one in §8 invariant 7: re-parsing
//! emitted YAML reproduces the same `Node` tree, not the same bytes.
//! `width`/`offset`/`explicit_start` are accepted and applied where
//! `serde_yaml` has an equivalent knob; accepted-but-inert arguments are
//! not silently swallowed into the "unknown argument" error path.

use crate::error::{ProteinError, Span};
use crate::node::{Mapping, Node};

const KNOWN_ARGS: &[&str] = &["indent", "offset", "width", "explicit_start", "typ"];

pub fn emit(node: &Node, args: Option<&Mapping>, span: &Span) -> Result<String, ProteinError> {
    let mut explicit_start = false;
    if let Some(args) = args {
        super::reject_unknown_args(args, KNOWN_ARGS, span)?;
        if let Some(v) = args.get("explicit_start") {
            explicit_start = v.is_truthy();
        }
    }

    let value = to_yaml_value(node);
    let mut body = serde_yaml::to_string(&value).map_err(|e| ProteinError::io(format!("serializing yaml: {e}"), span.clone()))?;
    if explicit_start && !body.starts_with("---") {
        body = format!("---\n{body}");
    }
    Ok(body)
}

fn to_yaml_value(node: &Node) -> serde_yaml::Value {
    match node {
        Node::Null => serde_yaml::Value::Null,
        Node::Bool(b) => serde_yaml::Value::Bool(*b),
        Node::Int(n) => serde_yaml::Value::Number((*n).into()),
        Node::Float(f) => serde_yaml::Value::Number((*f).into()),
        Node::Timestamp(s) | Node::String(s, _) => serde_yaml::Value::String(s.clone()),
        Node::Sequence(items) => serde_yaml::Value::Sequence(items.iter().map(to_yaml_value).collect()),
        Node::Mapping(m) => {
            let mut map = serde_yaml::Mapping::new();
            for (k, v) in m.iter() {
                map.insert(serde_yaml::Value::String(k.clone()), to_yaml_value(v));
            }
            serde_yaml::Value::Mapping(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_then_reparse_preserves_data_tree() {
        let mut m = Mapping::new();
        m.push("name".into(), Node::string("Alice"), &Span::unknown()).unwrap();
        m.push(
            "tags".into(),
            Node::Sequence(vec![Node::string("a"), Node::string("b")]),
            &Span::unknown(),
        )
        .unwrap();
        let node = Node::Mapping(m);
        let text = emit(&node, None, &Span::unknown()).unwrap();
        let reparsed = crate::parser::parse_str(&text, None).unwrap();
        assert_eq!(reparsed, node);
    }

    #[test]
    fn explicit_start_prefixes_document_marker() {
        let mut args = Mapping::new();
        args.push("explicit_start".into(), Node::Bool(true), &Span::unknown()).unwrap();
        let text = emit(&Node::Int(1), Some(&args), &Span::unknown()).unwrap();
        assert!(text.starts_with("---"));
    }

    #[test]
    fn emit_rejects_unknown_args() {
        let mut args = Mapping::new();
        args.push("bogus".into(), Node::Bool(true), &Span::unknown()).unwrap();
        let err = emit(&Node::Null, Some(&args), &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, crate::error::ErrorTag::Arg);
    }
}
