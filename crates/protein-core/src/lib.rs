#![doc = include_str!("../../../README.md")]

pub mod buffer;
pub mod collapse;
pub mod emit;
pub mod error;
pub mod expr;
pub mod frame;
pub mod modules;
pub mod node;
pub mod parser;
pub mod sql;
pub mod walker;

use std::path::{Path, PathBuf};
use std::rc::Rc;

pub use error::{ErrorTag, ProteinError, ProteinResult, Span};
pub use frame::{Frame, FrameStack};
pub use modules::{BuiltinModules, ModuleEnvironment, ModuleLoader};
pub use node::{Closure, HostCallable, HostFilter, Mapping, Node, Value};
pub use sql::{SqlEngine, SqlEngineRegistry};
pub use walker::{Signal, WalkResult, Walker};

/// The outcome of a completed render: either the final tree, or the code
/// and message an `.exit` construct terminated with (§4.4, §7) — distinct
/// from [`ProteinError`], which is returned as `Err` for every other kind
/// of failure.
#[derive(Debug)]
pub enum Outcome {
    Done(Node),
    Exited(i32, String),
}

/// The embedding entry point: configure builtins, modules and SQL drivers,
/// then render one or more source trees against that fixed environment.
///
/// Grounded in `ouros::run::Runner`'s "construct once, run many times"
/// shape, generalized from "one compiled program" to "one interpreter
/// configuration, many source files" since Protein has no separate
/// compile step.
pub struct Interpreter {
    builtins: Frame,
    module_loaders: Vec<Rc<dyn ModuleLoader>>,
    sql_drivers: Vec<(String, Rc<dyn SqlEngine>)>,
    source_dir: PathBuf,
}

impl Interpreter {
    /// Starts from an empty builtins frame and the standard module library
    /// (currently just `core`, exposing `get_env`, §6).
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            builtins: Frame::new(),
            module_loaders: vec![Rc::new(BuiltinModules::standard())],
            sql_drivers: Vec::new(),
            source_dir: source_dir.into(),
        }
    }

    /// Binds a name directly in the builtins frame, visible to every
    /// render — the mechanism a CLI's `--set k=v` overrides use (§6).
    pub fn define(&mut self, name: impl Into<String>, value: Node) -> &mut Self {
        self.builtins.set(name, Value::Node(value));
        self
    }

    pub fn register_module_loader(&mut self, loader: impl ModuleLoader + 'static) -> &mut Self {
        self.module_loaders.push(Rc::new(loader));
        self
    }

    /// Pre-registers a concrete SQL driver under `name` so `.def_sql` can
    /// activate it (§6: the SQL protocol is opaque to the core — a host
    /// supplies the actual engine).
    pub fn register_sql_driver(&mut self, name: impl Into<String>, engine: Rc<dyn SqlEngine>) -> &mut Self {
        self.sql_drivers.push((name.into(), engine));
        self
    }

    fn build_walker(&self) -> Walker {
        let mut walker = Walker::new(self.builtins.clone(), self.source_dir.clone());
        for loader in &self.module_loaders {
            walker.register_module_loader(loader.clone());
        }
        for (name, engine) in &self.sql_drivers {
            walker.register_sql_driver(name.clone(), engine.clone());
        }
        walker
    }

    /// Parses and renders `text` (§2 PARSE -> WALK -> EMIT pipeline,
    /// minus the final format-specific emit step — callers that want YAML,
    /// JSON, TOML or Python text call [`emit::emit`] on the result, or let
    /// `.export` constructs inside the tree write files directly).
    pub fn render_str(&self, text: &str, file: Option<&str>) -> Result<Outcome, ProteinError> {
        let root = parser::parse_str(text, file)?;
        self.render_node(root)
    }

    pub fn render_file(&self, path: &Path) -> Result<Outcome, ProteinError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProteinError::io(format!("reading {}: {e}", path.display()), Span::unknown()))?;
        self.render_str(&text, Some(&path.to_string_lossy()))
    }

    pub fn render_node(&self, root: Node) -> Result<Outcome, ProteinError> {
        let mut walker = self.build_walker();
        match walker.render(root) {
            Ok(node) => Ok(Outcome::Done(node.strip_literal_flags())),
            Err(Signal::Exit(code, message)) => Ok(Outcome::Exited(code, message)),
            Err(Signal::Error(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_yaml_unchanged() {
        let interp = Interpreter::new(".");
        let outcome = interp.render_str("a: 1\nb: two\n", None).unwrap();
        match outcome {
            Outcome::Done(node) => {
                let m = node.as_mapping().unwrap();
                assert_eq!(m.get("a"), Some(&Node::Int(1)));
                assert_eq!(m.get("b"), Some(&Node::string("two")));
            }
            Outcome::Exited(..) => panic!("expected Done"),
        }
    }

    #[test]
    fn define_binds_into_builtins_frame() {
        let mut interp = Interpreter::new(".");
        interp.define("name", Node::string("Alice"));
        let outcome = interp.render_str("greeting: \"Hello, {{ name }}!\"\n", None).unwrap();
        match outcome {
            Outcome::Done(node) => {
                let m = node.as_mapping().unwrap();
                assert_eq!(m.get("greeting"), Some(&Node::string("Hello, Alice!")));
            }
            Outcome::Exited(..) => panic!("expected Done"),
        }
    }

    #[test]
    fn exit_construct_short_circuits_the_render() {
        let interp = Interpreter::new(".");
        let outcome = interp
            .render_str(".do:\n  - .exit: {.code: 3, .message: \"stop\"}\n", None)
            .unwrap();
        match outcome {
            Outcome::Exited(code, message) => {
                assert_eq!(code, 3);
                assert_eq!(message, "stop");
            }
            Outcome::Done(_) => panic!("expected Exited"),
        }
    }
}
