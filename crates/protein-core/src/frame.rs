//! The frame stack (§4.2): an ordered stack of name -> [`Value`] mappings
//! with dynamic, re-walked-on-every-lookup name resolution.
//!
//! `ouros::namespace::Namespaces` owns an analogous "central storage, index
//! by id" design, but resolves variable slots at compile time against a
//! fixed namespace layout. Protein's spec mandates the opposite: "each
//! lookup re-walks the live stack" (§4.2) — so frames here are plain
//! `Vec<HashMap<String, Value>>`, not slot-addressed. The stack-discipline
//! idea (push paired with pop, height invariant checked at the end of a
//! run) carries over directly.

use std::collections::HashMap;

use crate::error::{ErrorTag, ProteinError, Span};
use crate::node::Value;

/// One level of the scope stack (§3 Frame, §4.2).
#[derive(Debug, Default, Clone)]
pub struct Frame {
    bindings: HashMap<String, Value>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }
}

/// A non-empty stack of [`Frame`]s (§3). The bottom frame is the builtins
/// frame; the next is the initial (module-level) frame; further frames
/// come and go with scoped constructs (`.local`, `.foreach`, `.call`).
#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    /// Creates a stack with just the builtins frame.
    pub fn new(builtins: Frame) -> Self {
        Self { frames: vec![builtins] }
    }

    /// Pushes a new, empty frame (a scope boundary opens).
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Pops the top frame.
    ///
    /// # Panics
    /// Panics when called with only the builtins frame left — every
    /// `push` in the walker is paired with a `pop` by construction
    /// (§3 invariant 3 / §8 invariant 3), so an imbalance here is a bug
    /// in the walker, not a reportable user error.
    pub fn pop(&mut self) -> Frame {
        assert!(self.frames.len() > 1, "cannot pop the builtins frame");
        self.frames.pop().expect("checked non-empty above")
    }

    pub fn height(&self) -> usize {
        self.frames.len()
    }

    pub fn current(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    /// `resolve` (§4.2): search top-down, dynamically, for `name`.
    pub fn resolve(&self, name: &str, span: &Span) -> Result<&Value, ProteinError> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .ok_or_else(|| ProteinError::undefined(name, span.clone()))
    }

    pub fn try_resolve(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// `set_top` (§4.2): idempotent overwrite in the top frame, used by
    /// `.define` and argument binding.
    pub fn set_top(&mut self, name: impl Into<String>, value: Value) {
        self.current_mut().set(name, value);
    }

    /// `merged_snapshot` (§4.2): a flat, bottom-to-top overlay of every
    /// frame, used at closure-capture time and for the expression engine's
    /// variable environment.
    pub fn merged_snapshot(&self) -> Vec<(String, Value)> {
        let mut merged: HashMap<String, Value> = HashMap::new();
        for frame in &self.frames {
            for (k, v) in frame.iter() {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged.into_iter().collect()
    }
}

/// Builds a [`Frame`] populated with a closure's captured environment,
/// used when `.call` pushes a fresh frame (§4.4).
pub fn frame_from_captured(captured: &[(String, Value)]) -> Frame {
    let mut frame = Frame::new();
    for (k, v) in captured {
        frame.set(k.clone(), v.clone());
    }
    frame
}

/// Binds closure parameters positionally or by name, enforcing the
/// argument-binding rule (§4.4): no mixing, every parameter must be
/// supplied exactly once.
pub fn bind_params(
    params: &[String],
    positional: Option<&[crate::node::Node]>,
    named: Option<&crate::node::Mapping>,
    span: &Span,
) -> Result<Vec<(String, Value)>, ProteinError> {
    match (positional, named) {
        (Some(_), Some(_)) => Err(ProteinError::arg(
            "cannot mix positional and named arguments",
            span.clone(),
        )),
        (Some(values), None) => {
            if values.len() != params.len() {
                return Err(ProteinError::arg(
                    format!(
                        "expected {} positional argument(s), got {}",
                        params.len(),
                        values.len()
                    ),
                    span.clone(),
                ));
            }
            Ok(params
                .iter()
                .cloned()
                .zip(values.iter().cloned().map(Value::Node))
                .collect())
        }
        (None, Some(map)) => {
            let mut bindings = Vec::with_capacity(params.len());
            for param in params {
                let value = map
                    .get(param)
                    .ok_or_else(|| ProteinError::arg(format!("missing argument `{param}`"), span.clone()))?;
                bindings.push((param.clone(), Value::Node(value.clone())));
            }
            if map.len() != params.len() {
                let extra = map
                    .iter()
                    .find(|(k, _)| !params.contains(k))
                    .map(|(k, _)| k.clone())
                    .unwrap_or_default();
                return Err(ProteinError::new(
                    ErrorTag::Arg,
                    format!("undeclared argument `{extra}`"),
                    span.clone(),
                ));
            }
            Ok(bindings)
        }
        (None, None) => {
            if params.is_empty() {
                Ok(Vec::new())
            } else {
                Err(ProteinError::arg("missing arguments", span.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn resolve_walks_top_down() {
        let mut stack = FrameStack::new(Frame::new());
        stack.set_top("x", Value::Node(Node::Int(1)));
        stack.push(Frame::new());
        stack.set_top("x", Value::Node(Node::Int(2)));
        let resolved = stack.resolve("x", &Span::unknown()).unwrap();
        assert!(matches!(resolved, Value::Node(Node::Int(2))));
        stack.pop();
        let resolved = stack.resolve("x", &Span::unknown()).unwrap();
        assert!(matches!(resolved, Value::Node(Node::Int(1))));
    }

    #[test]
    fn undefined_name_errors() {
        let stack = FrameStack::new(Frame::new());
        let err = stack.resolve("nope", &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::Undefined);
    }

    #[test]
    fn bind_params_rejects_mixed_args() {
        let err = bind_params(
            &["a".into()],
            Some(&[Node::Int(1)]),
            Some(&crate::node::Mapping::new()),
            &Span::unknown(),
        )
        .unwrap_err();
        assert_eq!(err.tag, ErrorTag::Arg);
    }

    #[test]
    #[should_panic(expected = "cannot pop the builtins frame")]
    fn pop_panics_on_imbalance() {
        let mut stack = FrameStack::new(Frame::new());
        stack.pop();
    }
}
