//! The Collapse Rule (§4.1) and the `.foreach`-specific variant.

use crate::error::{ProteinError, Span};
use crate::node::{Mapping, Node};

/// The general Collapse Rule, applied after `.do`/`.local`/`.if` walk a
/// sequence of results:
///
/// - `[]` -> `Null`
/// - `[x]` -> `x`
/// - `[{k1: v1}, {k2: v2}, ...]`, all single-key mappings with distinct
///   keys -> merged into one mapping, in order
/// - anything else -> unchanged
pub fn collapse(items: Vec<Node>, span: &Span) -> Result<Node, ProteinError> {
    match items.len() {
        0 => Ok(Node::Null),
        1 => Ok(items.into_iter().next().expect("len == 1")),
        _ => {
            if let Some(merged) = try_merge_single_key_mappings(&items, span)? {
                Ok(Node::Mapping(merged))
            } else {
                Ok(Node::Sequence(items))
            }
        }
    }
}

/// `.foreach`'s collapse (§4.1): never reduces below a sequence. When
/// `collect_mappings` is enabled (the default) and every element is a
/// single-key mapping with a key distinct from its siblings, merge into
/// one mapping; otherwise return the sequence as-is, even if empty or a
/// singleton.
pub fn foreach_collapse(items: Vec<Node>, collect_mappings: bool, span: &Span) -> Result<Node, ProteinError> {
    if collect_mappings {
        if let Some(merged) = try_merge_single_key_mappings(&items, span)? {
            return Ok(Node::Mapping(merged));
        }
    }
    Ok(Node::Sequence(items))
}

/// Returns `Some(merged)` if every element of `items` is a mapping with
/// exactly one key, all keys pairwise distinct; `None` if the shape
/// doesn't qualify (so the caller falls back to returning the raw
/// sequence/element). An empty `items` does not qualify — the empty-
/// sequence and singleton cases are handled by the caller before this is
/// reached in `collapse`, and `.foreach` never wants `[]` merged into
/// `Node::Mapping(Mapping::new())` since that would lose the "still a
/// sequence" guarantee.
fn try_merge_single_key_mappings(items: &[Node], span: &Span) -> Result<Option<Mapping>, ProteinError> {
    if items.is_empty() {
        return Ok(None);
    }
    let all_single_key_mappings = items
        .iter()
        .all(|n| matches!(n, Node::Mapping(m) if m.len() == 1));
    if !all_single_key_mappings {
        return Ok(None);
    }
    let mut merged = Mapping::new();
    for item in items {
        let Node::Mapping(m) = item else {
            unreachable!("checked above")
        };
        let (k, v) = m.iter().next().expect("checked len == 1 above");
        merged.push(k.clone(), v.clone(), span)?;
    }
    Ok(Some(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorTag;

    fn single(key: &str, value: i64) -> Node {
        let mut m = Mapping::new();
        m.push(key.into(), Node::Int(value), &Span::unknown()).unwrap();
        Node::Mapping(m)
    }

    #[test]
    fn empty_collapses_to_null() {
        assert_eq!(collapse(vec![], &Span::unknown()).unwrap(), Node::Null);
    }

    #[test]
    fn singleton_collapses_to_element() {
        assert_eq!(collapse(vec![Node::Int(5)], &Span::unknown()).unwrap(), Node::Int(5));
    }

    #[test]
    fn single_key_mappings_merge() {
        let result = collapse(vec![single("a", 1), single("b", 2)], &Span::unknown()).unwrap();
        let m = result.as_mapping().unwrap();
        assert_eq!(m.get("a"), Some(&Node::Int(1)));
        assert_eq!(m.get("b"), Some(&Node::Int(2)));
    }

    #[test]
    fn duplicate_keys_across_elements_error() {
        let err = collapse(vec![single("a", 1), single("a", 2)], &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DupKey);
    }

    #[test]
    fn mixed_shapes_stay_a_sequence() {
        let result = collapse(vec![Node::Int(1), single("a", 2)], &Span::unknown()).unwrap();
        assert!(matches!(result, Node::Sequence(_)));
    }

    #[test]
    fn foreach_never_collapses_below_sequence() {
        let result = foreach_collapse(vec![], true, &Span::unknown()).unwrap();
        assert_eq!(result, Node::Sequence(vec![]));

        let result = foreach_collapse(vec![Node::Int(1)], true, &Span::unknown()).unwrap();
        assert_eq!(result, Node::Sequence(vec![Node::Int(1)]));
    }

    #[test]
    fn foreach_merges_when_collect_mappings_enabled() {
        let result = foreach_collapse(vec![single("joe", 1), single("jill", 2)], true, &Span::unknown()).unwrap();
        assert!(matches!(result, Node::Mapping(_)));
    }

    #[test]
    fn foreach_keeps_sequence_when_collect_mappings_disabled() {
        let result = foreach_collapse(vec![single("joe", 1), single("jill", 2)], false, &Span::unknown()).unwrap();
        assert!(matches!(result, Node::Sequence(_)));
    }
}
