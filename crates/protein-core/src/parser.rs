//! Parses raw YAML text into the [`Node`] tree the walker operates on.
//!
//! `spec.md` treats the YAML parser as an external collaborator whose
//! interface is only enumerated (§1). `serde_yaml` is the concrete choice
//! (already reached for by the literal-parser in [`crate::expr`]); this
//! module is the thin layer translating its `serde_yaml::Value` model
//! into ours, enforcing the duplicate-key and `#!literal` rules `Node`
//! itself does not know how to apply during deserialization.

use crate::error::{ErrorTag, ProteinError, Span};
use crate::expr::split_literal_sentinel;
use crate::node::{Mapping, Node};

/// Parses a complete YAML document. `file` names the source for span
/// reporting; `None` for input with no associated path (e.g. `--set`
/// override values).
pub fn parse_str(text: &str, file: Option<&str>) -> Result<Node, ProteinError> {
    let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| {
        ProteinError::parse(e.to_string(), file.map_or_else(Span::unknown, |f| Span::new(f, 0)))
    })?;
    to_node(&value, file)
}

fn to_node(value: &serde_yaml::Value, file: Option<&str>) -> Result<Node, ProteinError> {
    Ok(match value {
        serde_yaml::Value::Null => Node::Null,
        serde_yaml::Value::Bool(b) => Node::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Node::Int(i)
            } else if let Some(f) = n.as_f64() {
                Node::Float(f)
            } else {
                return Err(ProteinError::parse("number out of range", span_for(file)));
            }
        }
        serde_yaml::Value::String(s) => {
            if is_timestamp(s) {
                Node::Timestamp(s.clone())
            } else {
                let (text, literal_flag) = split_literal_sentinel(s);
                Node::String(text, literal_flag)
            }
        }
        serde_yaml::Value::Sequence(items) => {
            Node::Sequence(items.iter().map(|v| to_node(v, file)).collect::<Result<_, _>>()?)
        }
        serde_yaml::Value::Mapping(map) => {
            let span = span_for(file);
            let mut out = Mapping::new();
            for (k, v) in map {
                let key = k
                    .as_str()
                    .ok_or_else(|| ProteinError::new(ErrorTag::Parse, "mapping keys must be strings", span.clone()))?
                    .to_owned();
                out.push(key, to_node(v, file)?, &span)?;
            }
            Node::Mapping(out)
        }
        serde_yaml::Value::Tagged(tagged) => to_node(&tagged.value, file)?,
    })
}

fn span_for(file: Option<&str>) -> Span {
    file.map_or_else(Span::unknown, |f| Span::new(f, 0))
}

/// A conservative RFC 3339 / YAML 1.1 timestamp sniff: `serde_yaml`
/// already folds unquoted timestamp-looking scalars into plain strings,
/// so this recognizes the common `YYYY-MM-DD[ T]HH:MM:SS` shapes rather
/// than delegating to a date-parsing crate the core has no other use for.
fn is_timestamp(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[0..4].iter().all(u8::is_ascii_digit)
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_and_collections() {
        let node = parse_str("a: 1\nb: [1, 2]\n", None).unwrap();
        let m = node.as_mapping().unwrap();
        assert_eq!(m.get("a"), Some(&Node::Int(1)));
        assert_eq!(m.get("b"), Some(&Node::Sequence(vec![Node::Int(1), Node::Int(2)])));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = parse_str("a: 1\na: 2\n", None).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DupKey);
    }

    #[test]
    fn strips_and_flags_literal_sentinel() {
        let node = parse_str("x: '#!literal {{ not a template }}'\n", None).unwrap();
        let m = node.as_mapping().unwrap();
        match m.get("x").unwrap() {
            Node::String(text, literal_flag) => {
                assert_eq!(text, "{{ not a template }}");
                assert!(literal_flag);
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn recognizes_date_shaped_scalars_as_timestamps() {
        let node = parse_str("d: 2024-01-15\n", None).unwrap();
        let m = node.as_mapping().unwrap();
        assert!(matches!(m.get("d"), Some(Node::Timestamp(_))));
    }
}
