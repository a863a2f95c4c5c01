//! The Python emitter (§6): "a `repr`-style serializer." No optional
//! arguments — §6 lists none, unlike `yaml`/`json`.

use crate::node::Node;

pub fn emit(node: &Node) -> String {
    let mut out = String::new();
    write_repr(node, &mut out);
    out.push('\n');
    out
}

fn write_repr(node: &Node, out: &mut String) {
    match node {
        Node::Null => out.push_str("None"),
        Node::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
        Node::Int(n) => out.push_str(&n.to_string()),
        Node::Float(f) => out.push_str(&f.to_string()),
        Node::Timestamp(s) | Node::String(s, _) => write_str_repr(s, out),
        Node::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(item, out);
            }
            out.push(']');
        }
        Node::Mapping(m) => {
            out.push('{');
            for (i, (k, v)) in m.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_str_repr(k, out);
                out.push_str(": ");
                write_repr(v, out);
            }
            out.push('}');
        }
    }
}

fn write_str_repr(s: &str, out: &mut String) {
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Span;
    use crate::node::Mapping;

    #[test]
    fn emits_python_literals() {
        let mut m = Mapping::new();
        m.push("a".into(), Node::Bool(true), &Span::unknown()).unwrap();
        m.push("b".into(), Node::Null, &Span::unknown()).unwrap();
        let text = emit(&Node::Mapping(m));
        assert_eq!(text, "{'a': True, 'b': None}\n");
    }

    #[test]
    fn escapes_quotes_in_strings() {
        let text = emit(&Node::string("it's here"));
        assert_eq!(text, "'it\\'s here'\n");
    }
}
