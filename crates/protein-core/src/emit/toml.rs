//! The TOML emitter (§6): "a style-preserving serializer, no optional
//! arguments."
//!
//! Grounded in `toml_edit`, already an `ouros` dependency there for
//! config-file round-tripping; used here purely as a generator (building
//! a fresh `DocumentMut` from the `Node` tree) since the core holds no
//! original TOML formatting to preserve.

use toml_edit::{Array, ArrayOfTables, DocumentMut, Item, Table, Value as TomlValue};

use crate::error::{ProteinError, Span};
use crate::node::{Mapping, Node};

pub fn emit(node: &Node, args: Option<&Mapping>, span: &Span) -> Result<String, ProteinError> {
    if let Some(args) = args {
        super::reject_unknown_args(args, &[], span)?;
    }
    let Node::Mapping(top) = node else {
        return Err(ProteinError::type_error(
            "toml output must be a mapping at the top level",
            span.clone(),
        ));
    };
    let mut doc = DocumentMut::new();
    for (k, v) in top.iter() {
        doc.insert(k, node_to_item(v, span)?);
    }
    Ok(doc.to_string())
}

fn node_to_item(node: &Node, span: &Span) -> Result<Item, ProteinError> {
    Ok(match node {
        Node::Mapping(m) => Item::Table(mapping_to_table(m, span)?),
        Node::Sequence(items) if items.iter().all(|n| matches!(n, Node::Mapping(_))) && !items.is_empty() => {
            let mut tables = ArrayOfTables::new();
            for item in items {
                let Node::Mapping(m) = item else { unreachable!("checked above") };
                tables.push(mapping_to_table(m, span)?);
            }
            Item::ArrayOfTables(tables)
        }
        other => Item::Value(node_to_value(other, span)?),
    })
}

fn mapping_to_table(m: &Mapping, span: &Span) -> Result<Table, ProteinError> {
    let mut table = Table::new();
    for (k, v) in m.iter() {
        table.insert(k, node_to_item(v, span)?);
    }
    Ok(table)
}

fn node_to_value(node: &Node, span: &Span) -> Result<TomlValue, ProteinError> {
    Ok(match node {
        Node::Null => {
            return Err(ProteinError::type_error("toml has no null type", span.clone()));
        }
        Node::Bool(b) => TomlValue::from(*b),
        Node::Int(n) => TomlValue::from(*n),
        Node::Float(f) => TomlValue::from(*f),
        Node::Timestamp(s) | Node::String(s, _) => TomlValue::from(s.as_str()),
        Node::Sequence(items) => {
            let mut array = Array::new();
            for item in items {
                array.push(node_to_value(item, span)?);
            }
            TomlValue::Array(array)
        }
        Node::Mapping(m) => {
            let mut inline = toml_edit::InlineTable::new();
            for (k, v) in m.iter() {
                inline.insert(k, node_to_value(v, span)?);
            }
            TomlValue::InlineTable(inline)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_nested_tables() {
        let mut inner = Mapping::new();
        inner.push("port".into(), Node::Int(8080), &Span::unknown()).unwrap();
        let mut top = Mapping::new();
        top.push("server".into(), Node::Mapping(inner), &Span::unknown()).unwrap();
        let text = emit(&Node::Mapping(top), None, &Span::unknown()).unwrap();
        assert!(text.contains("[server]"));
        assert!(text.contains("port = 8080"));
    }

    #[test]
    fn rejects_non_mapping_root() {
        let err = emit(&Node::Int(1), None, &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, crate::error::ErrorTag::Type);
    }
}
