//! The opaque SQL engine surface (§4.4, §6): `.def_sql` registers a named
//! engine handle, `.exec_sql`/`.load_sql` dispatch statements to it. The
//! core ships no SQL driver of its own — a host application plugs one in
//! by implementing [`SqlEngine`].
//!
//! Grounded in `ouros::modules`'s "closed registry of named, host-provided
//! implementations" shape, generalized the same way [`crate::modules`] is.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ProteinError, Span};
use crate::node::{Node, SqlEngineHandle};

/// A host-provided SQL driver.
pub trait SqlEngine {
    /// Runs `statement` with bound `params`, returning rows as a sequence
    /// of mappings (`.exec_sql`/`.load_sql`, §6).
    fn execute(&self, statement: &str, params: &[Node], span: &Span) -> Result<Node, ProteinError>;
}

/// The per-interpreter registry of named engines opened by `.def_sql`.
#[derive(Default)]
pub struct SqlEngineRegistry {
    engines: HashMap<String, Rc<dyn SqlEngine>>,
}

impl SqlEngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `.def_sql`: registers `engine` under `name`, returning the handle
    /// stored in the frame.
    pub fn define(&mut self, name: &str, engine: Rc<dyn SqlEngine>) -> SqlEngineHandle {
        self.engines.insert(name.to_owned(), engine);
        SqlEngineHandle { name: name.to_owned() }
    }

    /// `.exec_sql`/`.load_sql`: looks up `handle.name` and runs `statement`.
    pub fn execute(
        &self,
        handle: &SqlEngineHandle,
        statement: &str,
        params: &[Node],
        span: &Span,
    ) -> Result<Node, ProteinError> {
        let engine = self
            .engines
            .get(&handle.name)
            .ok_or_else(|| ProteinError::sql(format!("no such sql engine `{}`", handle.name), span.clone()))?;
        engine.execute(statement, params, span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoEngine;

    impl SqlEngine for EchoEngine {
        fn execute(&self, statement: &str, _params: &[Node], _span: &Span) -> Result<Node, ProteinError> {
            Ok(Node::Sequence(vec![Node::string(statement)]))
        }
    }

    #[test]
    fn define_then_execute_round_trips() {
        let mut registry = SqlEngineRegistry::new();
        let handle = registry.define("main", Rc::new(EchoEngine));
        let result = registry
            .execute(&handle, "select 1", &[], &Span::unknown())
            .unwrap();
        assert_eq!(result, Node::Sequence(vec![Node::string("select 1")]));
    }

    #[test]
    fn unregistered_engine_errors() {
        let registry = SqlEngineRegistry::new();
        let handle = SqlEngineHandle { name: "ghost".into() };
        let err = registry
            .execute(&handle, "select 1", &[], &Span::unknown())
            .unwrap_err();
        assert_eq!(err.tag, crate::error::ErrorTag::Sql);
    }
}
