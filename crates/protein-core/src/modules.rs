//! Module protocol (§6): `.import_module`/`.module` load a named
//! environment of variables, callables and filters into a fresh frame.
//!
//! Grounded in `ouros::modules::BuiltinModule`: a closed enum dispatching
//! into per-module constructor functions, generalized here behind a
//! [`ModuleLoader`] trait so host applications can register their own
//! modules alongside the built-ins (§6 "Module protocol is open to host
//! extension").

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ProteinError, Span};
use crate::node::{HostCallable, HostFilter, Node, Value};

/// The bindings a module contributes once loaded: plain variables, host
/// callables usable from `.call`/template expressions, and template
/// filters.
#[derive(Debug, Default, Clone)]
pub struct ModuleEnvironment {
    pub variables: Vec<(String, Node)>,
    pub callables: Vec<HostCallable>,
    pub filters: Vec<HostFilter>,
}

impl ModuleEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Node) -> Self {
        self.variables.push((name.into(), value));
        self
    }

    pub fn with_callable(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&[Node], &Span) -> Result<Node, ProteinError> + 'static,
    ) -> Self {
        let name = name.into();
        self.callables.push(HostCallable {
            name: name.clone(),
            func: Rc::new(func),
        });
        self
    }

    pub fn with_filter(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&[Node], &Span) -> Result<Node, ProteinError> + 'static,
    ) -> Self {
        let name = name.into();
        self.filters.push(HostFilter {
            name: name.clone(),
            func: Rc::new(func),
        });
        self
    }

    /// Flattens this environment into `(name, Value)` bindings for a
    /// freshly pushed frame (§6: "a loaded module's bindings appear in the
    /// importing scope's frame").
    pub fn into_bindings(self) -> Vec<(String, Value)> {
        let mut bindings = Vec::with_capacity(self.variables.len() + self.callables.len() + self.filters.len());
        for (name, node) in self.variables {
            bindings.push((name, Value::Node(node)));
        }
        for callable in self.callables {
            bindings.push((callable.name.clone(), Value::HostCallable(callable)));
        }
        for filter in self.filters {
            bindings.push((filter.name.clone(), Value::HostFilter(filter)));
        }
        bindings
    }
}

/// A source of loadable modules.
pub trait ModuleLoader {
    fn load(&self, name: &str, span: &Span) -> Result<ModuleEnvironment, ProteinError>;
}

/// The registry of built-in modules, keyed by name (§6). Host applications
/// compose additional [`ModuleLoader`]s alongside this one rather than
/// subclassing it.
#[derive(Default)]
pub struct BuiltinModules {
    modules: HashMap<String, Rc<dyn Fn() -> ModuleEnvironment>>,
}

impl BuiltinModules {
    /// The standard library: currently just `core`, exposing `get_env`
    /// (§6's canonical example of a module-provided callable).
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register("core", core_module);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: impl Fn() -> ModuleEnvironment + 'static) {
        self.modules.insert(name.into(), Rc::new(factory));
    }
}

impl ModuleLoader for BuiltinModules {
    fn load(&self, name: &str, span: &Span) -> Result<ModuleEnvironment, ProteinError> {
        self.modules
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ProteinError::undefined(&format!("module `{name}`"), span.clone()))
    }
}

fn core_module() -> ModuleEnvironment {
    ModuleEnvironment::new().with_callable("get_env", |args, span| {
        let name = args
            .first()
            .and_then(Node::as_str)
            .ok_or_else(|| ProteinError::arg("get_env expects one string argument", span.clone()))?;
        match std::env::var(name) {
            Ok(value) => Ok(Node::string(value)),
            Err(_) => Ok(args.get(1).cloned().unwrap_or(Node::Null)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_module_exposes_get_env() {
        std::env::set_var("PROTEIN_TEST_VAR", "hello");
        let registry = BuiltinModules::standard();
        let env = registry.load("core", &Span::unknown()).unwrap();
        let get_env = env.callables.iter().find(|c| c.name == "get_env").unwrap();
        let result = (get_env.func)(&[Node::string("PROTEIN_TEST_VAR")], &Span::unknown()).unwrap();
        assert_eq!(result, Node::string("hello"));
    }

    #[test]
    fn unknown_module_errors() {
        let registry = BuiltinModules::standard();
        let err = registry.load("nope", &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, crate::error::ErrorTag::Undefined);
    }
}
