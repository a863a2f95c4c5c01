//! The construct dispatcher and tree walker (§4.4): the largest component
//! of the core, recognizing dotted keys, routing them to handlers,
//! applying the Collapse Rule, and managing frame lifetime around scoped
//! constructs.
//!
//! `ConstructKind` is grounded in `ouros::modules::BuiltinModule`: a
//! closed enum of names dispatched through a lookup table, generalized
//! here from "Python module name" to "dotted construct name" (§4.4
//! SUPPLEMENT). Each handler is `fn(&mut Walker, Node, &Span) ->
//! WalkResult<Node>`, the handler-function-pointer shape named in §9.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

use strum::EnumString;

use crate::buffer::BufferRegistry;
use crate::collapse;
use crate::emit::{self, Format};
use crate::error::{ErrorTag, ProteinError, Span};
use crate::expr;
use crate::frame::{bind_params, frame_from_captured, Frame, FrameStack};
use crate::modules::ModuleLoader;
use crate::node::{Closure, HostCallable, HostFilter, Mapping, Node, Value};
use crate::parser;
use crate::sql::{SqlEngine, SqlEngineRegistry};

/// What a construct evaluation can produce besides a `Node`: orderly
/// termination via `.exit` (§4.4, §7), distinct from a failure so the
/// top-level entry point doesn't have to string-match an error message.
#[derive(Debug)]
pub enum Signal {
    Error(ProteinError),
    Exit(i32, String),
}

impl From<ProteinError> for Signal {
    fn from(err: ProteinError) -> Self {
        Self::Error(err)
    }
}

pub type WalkResult<T> = Result<T, Signal>;

/// The closed set of recognized dotted construct names (§4.4 SUPPLEMENT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
enum ConstructKind {
    #[strum(serialize = ".define")]
    Define,
    #[strum(serialize = ".local")]
    Local,
    #[strum(serialize = ".do")]
    Do,
    #[strum(serialize = ".if")]
    If,
    #[strum(serialize = ".switch")]
    Switch,
    #[strum(serialize = ".foreach")]
    Foreach,
    #[strum(serialize = ".function")]
    Function,
    #[strum(serialize = ".call")]
    Call,
    #[strum(serialize = ".import_module")]
    ImportModule,
    #[strum(serialize = ".module")]
    Module,
    #[strum(serialize = ".load")]
    Load,
    #[strum(serialize = ".export")]
    Export,
    #[strum(serialize = ".print")]
    Print,
    #[strum(serialize = ".exit")]
    Exit,
    #[strum(serialize = ".def_sql")]
    DefSql,
    #[strum(serialize = ".exec_sql")]
    ExecSql,
    #[strum(serialize = ".load_sql")]
    LoadSql,
    #[strum(serialize = ".open_buffer")]
    OpenBuffer,
    #[strum(serialize = ".write_buffer")]
    WriteBuffer,
    #[strum(serialize = ".save_buffer")]
    SaveBuffer,
    #[strum(serialize = ".write")]
    Write,
}

/// The tree walker. Owns every piece of mutable interpreter state the
/// constructs touch: the frame stack, the buffer registry, the SQL engine
/// registry (plus any driver instances a host pre-registered), and the
/// module loaders consulted by `.import_module`/`.module`.
pub struct Walker {
    frames: FrameStack,
    buffers: BufferRegistry,
    sql: SqlEngineRegistry,
    pending_sql_drivers: std::collections::HashMap<String, Rc<dyn SqlEngine>>,
    module_loaders: Vec<Rc<dyn ModuleLoader>>,
    source_dir: PathBuf,
}

impl Walker {
    pub fn new(builtins: Frame, source_dir: PathBuf) -> Self {
        Self {
            frames: FrameStack::new(builtins),
            buffers: BufferRegistry::new(),
            sql: SqlEngineRegistry::new(),
            pending_sql_drivers: std::collections::HashMap::new(),
            module_loaders: Vec::new(),
            source_dir,
        }
    }

    pub fn register_module_loader(&mut self, loader: Rc<dyn ModuleLoader>) {
        self.module_loaders.push(loader);
    }

    pub fn register_sql_driver(&mut self, name: impl Into<String>, engine: Rc<dyn SqlEngine>) {
        self.pending_sql_drivers.insert(name.into(), engine);
    }

    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    pub fn buffers(&self) -> &BufferRegistry {
        &self.buffers
    }

    /// Renders a parsed tree to completion, checking the frame-stack
    /// height invariant (§3, §8 invariant 3) before returning.
    pub fn render(&mut self, root: Node) -> WalkResult<Node> {
        let height_before = self.frames.height();
        let result = self.walk_node(root, &Span::unknown());
        debug_assert_eq!(self.frames.height(), height_before, "frame stack leaked a scope");
        result
    }

    /// Walks any node: mappings dispatch constructs, sequences walk each
    /// element without collapsing (collapse only applies to the explicit
    /// "block of actions" shapes named in §4.1), string leaves go through
    /// the expression evaluator, everything else passes through unchanged.
    pub fn walk_node(&mut self, node: Node, span: &Span) -> WalkResult<Node> {
        match node {
            Node::Mapping(m) => self.handle_mapping(m, span),
            Node::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.walk_node(item, span)?);
                }
                Ok(Node::Sequence(out))
            }
            Node::String(text, literal_flag) => self.evaluate_string_leaf(&text, literal_flag, span),
            other => Ok(other),
        }
    }

    fn evaluate_string_leaf(&mut self, text: &str, literal_flag: bool, span: &Span) -> WalkResult<Node> {
        let snapshot = self.frames.merged_snapshot();
        let (callables, filters) = self.expr_surfaces();
        expr::evaluate_string(text, literal_flag, &snapshot, &callables, &filters, span).map_err(Signal::from)
    }

    fn expr_surfaces(&self) -> (Vec<HostCallable>, Vec<HostFilter>) {
        let mut callables = Vec::new();
        let mut filters = Vec::new();
        for (_, v) in self.frames.merged_snapshot() {
            match v {
                Value::HostCallable(c) => callables.push(c),
                Value::HostFilter(f) => filters.push(f),
                _ => {}
            }
        }
        (callables, filters)
    }

    /// Renders a mapping key that contains a template expression (e.g. a
    /// `.do`-mapping-form key like `"{{ u.name }}"`, §8 scenario S3).
    /// Dotted construct keys never go through this — they are matched
    /// against [`ConstructKind`] verbatim.
    fn resolve_key(&mut self, key: &str, span: &Span) -> WalkResult<String> {
        if key.contains("{{") {
            let snapshot = self.frames.merged_snapshot();
            let (callables, filters) = self.expr_surfaces();
            expr::render_template(key, &snapshot, &callables, &filters, span).map_err(Signal::from)
        } else {
            Ok(key.to_owned())
        }
    }

    /// Evaluates `node` as a `.values` iterable-expression element: a bare
    /// identifier with no `{{ }}` resolves directly against the frame
    /// stack rather than being templated (Open Question decision, §9
    /// SUPPLEMENT — equivalent to, but simpler than, desugaring to
    /// `"{{ <identifier> }}"` and re-templating it).
    fn resolve_or_evaluate(&mut self, node: Node, span: &Span) -> WalkResult<Node> {
        if let Node::String(text, false) = &node {
            if !text.contains("{{") {
                let value = self.frames.resolve(text, span).map_err(Signal::from)?.clone();
                return value.into_node(span).map_err(Signal::from);
            }
        }
        self.walk_node(node, span)
    }

    fn handle_mapping(&mut self, m: Mapping, span: &Span) -> WalkResult<Node> {
        let entries: Vec<(String, Node)> = m.into_iter().collect();

        if entries.len() == 1 && entries[0].0.starts_with('.') {
            let (key, value) = entries.into_iter().next().expect("len == 1");
            return self.dispatch(&key, value, span);
        }

        let mut out = Mapping::new();
        for (key, value) in entries {
            if key.starts_with('.') {
                let result = self.dispatch(&key, value, span)?;
                match result {
                    Node::Null => {}
                    Node::Mapping(rm) => {
                        for (k, v) in rm.into_iter() {
                            out.push(k, v, span).map_err(Signal::from)?;
                        }
                    }
                    other => {
                        return Err(Signal::from(ProteinError::type_error(
                            format!(
                                "construct `{key}` must yield null or a mapping when combined with other keys, got {}",
                                other.type_name()
                            ),
                            span.clone(),
                        )));
                    }
                }
            } else {
                let resolved_key = self.resolve_key(&key, span)?;
                let walked = self.walk_node(value, span)?;
                out.push(resolved_key, walked, span).map_err(Signal::from)?;
            }
        }
        Ok(Node::Mapping(out))
    }

    fn dispatch(&mut self, key: &str, value: Node, span: &Span) -> WalkResult<Node> {
        match ConstructKind::from_str(key) {
            Ok(kind) => self.dispatch_known(kind, value, span),
            Err(_) => self.dispatch_host_callable(key, value, span),
        }
    }

    fn dispatch_known(&mut self, kind: ConstructKind, value: Node, span: &Span) -> WalkResult<Node> {
        log::debug!("dispatching {kind:?}");
        match kind {
            ConstructKind::Define => self.define_handler(value, span),
            ConstructKind::Local => self.local_handler(value, span),
            ConstructKind::Do => self.do_handler(value, span),
            ConstructKind::If => self.if_handler(value, span),
            ConstructKind::Switch => self.switch_handler(value, span),
            ConstructKind::Foreach => self.foreach_handler(value, span),
            ConstructKind::Function => self.function_handler(value, span),
            ConstructKind::Call => self.call_handler(value, span),
            ConstructKind::ImportModule | ConstructKind::Module => self.module_handler(value, span),
            ConstructKind::Load => self.load_handler(value, span),
            ConstructKind::Export => self.export_handler(value, span),
            ConstructKind::Print => self.print_handler(value, span),
            ConstructKind::Exit => self.exit_handler(value, span),
            ConstructKind::DefSql => self.def_sql_handler(value, span),
            ConstructKind::ExecSql => self.exec_sql_handler(value, span),
            ConstructKind::LoadSql => self.load_sql_handler(value, span),
            ConstructKind::OpenBuffer => self.open_buffer_handler(value, span),
            ConstructKind::WriteBuffer => self.write_buffer_handler(value, span),
            ConstructKind::SaveBuffer => self.save_buffer_handler(value, span),
            ConstructKind::Write => self.write_handler(value, span),
        }
    }

    /// A `HostCallable` used as a construct (§4.4, §9): arguments are
    /// computed by the same rule as `.call`, except the callable has no
    /// declared parameter names, so a sequence value is passed through
    /// positionally and a mapping value is passed as a single argument —
    /// recorded as a simplification in the grounding ledger.
    fn dispatch_host_callable(&mut self, key: &str, value: Node, span: &Span) -> WalkResult<Node> {
        let name = key.trim_start_matches('.');
        let Some(Value::HostCallable(callable)) = self.frames.try_resolve(name).cloned() else {
            return Err(Signal::from(ProteinError::unknown_construct(key, span.clone())));
        };
        let walked = self.walk_node(value, span)?;
        let args: Vec<Node> = match walked {
            Node::Sequence(items) => items,
            Node::Null => Vec::new(),
            other => vec![other],
        };
        let result = (callable.func)(&args, span).map_err(Signal::from)?;
        Ok(result)
    }

    // --- `.define` / `.local` -------------------------------------------------

    fn define_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let Node::Mapping(m) = value else {
            return Err(Signal::from(ProteinError::type_error(
                "`.define` requires a mapping",
                span.clone(),
            )));
        };
        for (k, v) in m.into_iter() {
            let walked = self.walk_node(v, span)?;
            self.frames.set_top(k, Value::Node(walked));
        }
        Ok(Node::Null)
    }

    /// `.local`: declared (plain) entries are bound into a fresh frame;
    /// any dotted children are dispatched and their results collapsed —
    /// mirroring how `.do`'s sequence form collapses a block of actions.
    fn local_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let Node::Mapping(m) = value else {
            return Err(Signal::from(ProteinError::type_error(
                "`.local` requires a mapping",
                span.clone(),
            )));
        };
        self.frames.push(Frame::new());
        let result = (|| {
            let mut results = Vec::new();
            for (k, v) in m.into_iter() {
                if k.starts_with('.') {
                    let r = self.dispatch(&k, v, span)?;
                    if !r.is_null() {
                        results.push(r);
                    }
                } else {
                    let walked = self.walk_node(v, span)?;
                    self.frames.set_top(k, Value::Node(walked));
                }
            }
            collapse::collapse(results, span).map_err(Signal::from)
        })();
        self.frames.pop();
        result
    }

    // --- `.do` -----------------------------------------------------------------

    /// `.do`'s literal sequence/mapping form (§4.4) is the canonical shape
    /// for a block of actions; a `.function`/`.call`/`.foreach` body may
    /// also be any other node (e.g. a single templated string, S5) when the
    /// body is "evaluate this expression", so anything that isn't a
    /// sequence or mapping just walks through normally rather than
    /// rejecting — there is nothing to apply the Collapse Rule to.
    fn do_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        match value {
            Node::Sequence(items) => {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    results.push(self.walk_node(item, span)?);
                }
                collapse::collapse(results, span).map_err(Signal::from)
            }
            Node::Mapping(m) => self.handle_mapping(m, span),
            other => self.walk_node(other, span),
        }
    }

    // --- `.if` / `.switch` -------------------------------------------------------

    fn if_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".if", span)?;
        let cond = get_field(m, ".cond", span)?.clone();
        let cond_result = self.walk_node(cond, span)?;
        if cond_result.is_truthy() {
            let then_node = get_field(m, ".then", span)?.clone();
            self.walk_node(then_node, span)
        } else if let Some(else_node) = m.get(".else").cloned() {
            self.walk_node(else_node, span)
        } else {
            Ok(Node::Null)
        }
    }

    fn switch_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".switch", span)?;
        let expr_node = get_field(m, ".expr", span)?.clone();
        let evaluated = self.walk_node(expr_node, span)?;
        let key = evaluated.as_str().map(str::to_owned).unwrap_or_else(|| evaluated.coerce_to_string());

        let cases_node = get_field(m, ".cases", span)?;
        let Node::Mapping(cases_map) = cases_node else {
            return Err(Signal::from(ProteinError::type_error(
                "`.switch`'s `.cases` must be a mapping",
                span.clone(),
            )));
        };
        let cases: indexmap::IndexMap<&str, &Node> = cases_map.iter().map(|(k, v)| (k.as_str(), v)).collect();

        let chosen = cases.get(key.as_str()).copied().cloned().or_else(|| m.get(".default").cloned());
        match chosen {
            Some(node) => self.walk_node(node, span),
            None => Ok(Node::Null),
        }
    }

    // --- `.foreach` --------------------------------------------------------------

    fn foreach_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".foreach", span)?;
        let values_node = get_field(m, ".values", span)?;
        let Node::Sequence(values_items) = values_node else {
            return Err(Signal::from(ProteinError::type_error(
                "`.foreach`'s `.values` must be `[name, iterable]`",
                span.clone(),
            )));
        };
        if values_items.len() != 2 {
            return Err(Signal::from(ProteinError::arg(
                "`.foreach`'s `.values` must have exactly two elements",
                span.clone(),
            )));
        }
        let name = values_items[0]
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.foreach`'s loop variable name must be a string", span.clone()))?
            .to_owned();
        let iterable = self.resolve_or_evaluate(values_items[1].clone(), span)?;

        let elements: Vec<Node> = match iterable {
            Node::Sequence(items) => items,
            Node::Mapping(map) => map
                .into_iter()
                .map(|(k, v)| Node::Sequence(vec![Node::string(k), v]))
                .collect(),
            other => {
                return Err(Signal::from(ProteinError::type_error(
                    format!("`.foreach` iterable must be a sequence or mapping, got {}", other.type_name()),
                    span.clone(),
                )));
            }
        };

        let do_node = get_field(m, ".do", span)?.clone();
        let collect_mappings = m.get(".collect_mappings").map(Node::is_truthy).unwrap_or(true);

        let mut results = Vec::with_capacity(elements.len());
        for element in elements {
            self.frames.push(Frame::new());
            self.frames.set_top(name.clone(), Value::Node(element));
            let result = self.do_handler(do_node.clone(), span);
            self.frames.pop();
            results.push(result?);
        }
        collapse::foreach_collapse(results, collect_mappings, span).map_err(Signal::from)
    }

    // --- `.function` / `.call` --------------------------------------------------

    fn function_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".function", span)?;
        let name_node = get_field(m, ".name", span)?.clone();
        let name = self
            .walk_node(name_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.function`'s `.name` must be a string", span.clone()))?
            .to_owned();
        let args_node = get_field(m, ".args", span)?;
        let Node::Sequence(args_items) = args_node else {
            return Err(Signal::from(ProteinError::type_error(
                "`.function`'s `.args` must be a sequence of parameter names",
                span.clone(),
            )));
        };
        let params = args_items
            .iter()
            .map(|n| {
                n.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| ProteinError::type_error("parameter names must be strings", span.clone()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(Signal::from)?;
        let body = get_field(m, ".do", span)?.clone();
        let captured_env = self.frames.merged_snapshot();
        let closure = Closure { name: name.clone(), params, body, captured_env };
        self.frames.set_top(name, Value::Closure(Rc::new(closure)));
        Ok(Node::Null)
    }

    fn call_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".call", span)?;
        let name_node = get_field(m, ".name", span)?.clone();
        let fn_name = self
            .walk_node(name_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.call`'s `.name` must be a string", span.clone()))?
            .to_owned();
        let resolved = self.frames.resolve(&fn_name, span).map_err(Signal::from)?.clone();
        let Value::Closure(closure) = resolved else {
            return Err(Signal::from(ProteinError::type_error(
                format!("`{fn_name}` is not a function"),
                span.clone(),
            )));
        };

        let (positional, named) = match m.get(".args") {
            None => (None, None),
            Some(Node::Sequence(items)) => {
                let mut walked = Vec::with_capacity(items.len());
                for item in items.clone() {
                    walked.push(self.walk_node(item, span)?);
                }
                (Some(walked), None)
            }
            Some(Node::Mapping(map)) => {
                let mut walked = Mapping::new();
                for (k, v) in map.iter() {
                    let value = self.walk_node(v.clone(), span)?;
                    walked.push(k.clone(), value, span).map_err(Signal::from)?;
                }
                (None, Some(walked))
            }
            Some(other) => {
                return Err(Signal::from(ProteinError::type_error(
                    format!("`.call`'s `.args` must be a sequence or mapping, got {}", other.type_name()),
                    span.clone(),
                )));
            }
        };

        let bindings = bind_params(&closure.params, positional.as_deref(), named.as_ref(), span).map_err(Signal::from)?;
        // The body runs against the captured snapshot alone, not the caller's
        // live stack (§4.4: "stack state at call time is not visible") — swap
        // in an isolated stack for the duration of the call rather than
        // pushing onto `self.frames`, which would leave caller frames
        // reachable underneath.
        let mut call_frames = FrameStack::new(frame_from_captured(&closure.captured_env));
        for (k, v) in bindings {
            call_frames.set_top(k, v);
        }
        let caller_frames = std::mem::replace(&mut self.frames, call_frames);
        let result = self.do_handler(closure.body.clone(), span);
        self.frames = caller_frames;
        result
    }

    // --- `.import_module` / `.module` -------------------------------------------

    fn module_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let walked = self.walk_node(value, span)?;
        let name = walked
            .as_str()
            .ok_or_else(|| ProteinError::type_error("module name must be a string", span.clone()))?;
        let mut last_err = None;
        for loader in &self.module_loaders {
            match loader.load(name, span) {
                Ok(env) => {
                    for (k, v) in env.into_bindings() {
                        self.frames.set_top(k, v);
                    }
                    return Ok(Node::Null);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Signal::from(last_err.unwrap_or_else(|| ProteinError::undefined(&format!("module `{name}`"), span.clone()))))
    }

    // --- `.load` / `.export` -----------------------------------------------------

    fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_dir.join(path)
        }
    }

    fn load_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let (filename_node, format_field) = match &value {
            Node::Mapping(m) => (get_field(m, ".filename", span)?.clone(), m.get(".format").cloned()),
            Node::String(..) => (value.clone(), None),
            other => {
                return Err(Signal::from(ProteinError::type_error(
                    format!("`.load` must be a string or mapping, got {}", other.type_name()),
                    span.clone(),
                )));
            }
        };
        let filename = self.walk_node(filename_node, span)?;
        let path_str = filename
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.load`'s `.filename` must be a string", span.clone()))?
            .to_owned();
        let path = self.resolve_path(&path_str);

        let format = match format_field {
            Some(f) => {
                let walked = self.walk_node(f, span)?;
                let name = walked
                    .as_str()
                    .ok_or_else(|| ProteinError::type_error("`.format` must be a string", span.clone()))?;
                Some(Format::parse_name(name).ok_or_else(|| ProteinError::type_error(format!("unknown format `{name}`"), span.clone()))?)
            }
            None => Format::infer(&path),
        };

        let text = std::fs::read_to_string(&path)
            .map_err(|e| ProteinError::io(format!("reading {}: {e}", path.display()), span.clone()))?;
        log::info!("loaded {}", path.display());

        let file_label = path.to_string_lossy().into_owned();
        match format {
            Some(Format::Json) => {
                let value: serde_json::Value =
                    serde_json::from_str(&text).map_err(|e| ProteinError::parse(e.to_string(), span.clone()))?;
                Ok(emit::json::from_json_value(value))
            }
            Some(Format::Toml) => {
                let doc: toml_edit::DocumentMut =
                    text.parse().map_err(|e| ProteinError::parse(format!("{e}"), span.clone()))?;
                Ok(toml_document_to_node(&doc))
            }
            Some(Format::Python) => Err(ProteinError::type_error("`.load` cannot read `python` output", span.clone())),
            Some(Format::Yaml) | None => {
                let parsed = parser::parse_str(&text, Some(&file_label))?;
                self.walk_node(parsed, span)
            }
        }
        .map_err(Signal::from)
    }

    fn export_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".export", span)?;
        let filename_node = get_field(m, ".filename", span)?.clone();
        let filename = self.walk_node(filename_node, span)?;
        let path_str = filename
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.export`'s `.filename` must be a string", span.clone()))?
            .to_owned();
        let path = self.resolve_path(&path_str);

        let format = match m.get(".format").cloned() {
            Some(f) => {
                let walked = self.walk_node(f, span)?;
                let name = walked
                    .as_str()
                    .ok_or_else(|| ProteinError::type_error("`.format` must be a string", span.clone()))?;
                Format::parse_name(name).ok_or_else(|| ProteinError::type_error(format!("unknown format `{name}`"), span.clone()))
            }
            None => Format::infer(&path).ok_or_else(|| {
                ProteinError::type_error("cannot infer export format from filename; supply `.format`", span.clone())
            }),
        }
        .map_err(Signal::from)?;

        let args = match m.get(".args") {
            Some(Node::Mapping(a)) => Some(a.clone()),
            Some(other) => {
                return Err(Signal::from(ProteinError::type_error(
                    format!("`.export`'s `.args` must be a mapping, got {}", other.type_name()),
                    span.clone(),
                )));
            }
            None => None,
        };

        let do_node = get_field(m, ".do", span)?.clone();
        let rendered = self.do_handler(do_node, span)?;
        let normalized = rendered.strip_literal_flags();
        let mut text = emit::emit(&normalized, format, args.as_ref(), span).map_err(Signal::from)?;

        if let Some(comment_node) = m.get(".comment").cloned() {
            if format == Format::Json {
                return Err(Signal::from(ProteinError::arg(
                    "`.comment` is not supported for `json` output, which has no comment syntax",
                    span.clone(),
                )));
            }
            let comment = self.walk_node(comment_node, span)?;
            if let Some(c) = comment.as_str() {
                text = format!("# {c}\n{text}");
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProteinError::io(format!("creating {}: {e}", parent.display()), span.clone()))
                .map_err(Signal::from)?;
        }
        std::fs::write(&path, text)
            .map_err(|e| ProteinError::io(format!("writing {}: {e}", path.display()), span.clone()))
            .map_err(Signal::from)?;
        log::info!("exported {}", path.display());
        Ok(Node::Null)
    }

    // --- `.print` / `.exit` ------------------------------------------------------

    fn print_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let evaluated = self.walk_node(value, span)?;
        eprintln!("{}", evaluated.coerce_to_string());
        Ok(Node::Null)
    }

    fn exit_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".exit", span)?;
        let code = match m.get(".code").cloned() {
            Some(node) => match self.walk_node(node, span)? {
                Node::Int(i) => i as i32,
                other => {
                    return Err(Signal::from(ProteinError::type_error(
                        format!("`.exit`'s `.code` must be an integer, got {}", other.type_name()),
                        span.clone(),
                    )));
                }
            },
            None => 0,
        };
        let message_node = get_field(m, ".message", span)?.clone();
        let message = self.walk_node(message_node, span)?;
        Err(Signal::Exit(code, message.coerce_to_string()))
    }

    // --- SQL -----------------------------------------------------------------------

    fn def_sql_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".def_sql", span)?;
        let name_node = get_field(m, ".name", span)?.clone();
        let name = self
            .walk_node(name_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.def_sql`'s `.name` must be a string", span.clone()))?
            .to_owned();
        let engine = self
            .pending_sql_drivers
            .get(&name)
            .cloned()
            .ok_or_else(|| ProteinError::sql(format!("no sql driver registered for `{name}`"), span.clone()))
            .map_err(Signal::from)?;
        let handle = self.sql.define(&name, engine);
        self.frames.set_top(name, Value::SqlEngine(handle));
        Ok(Node::Null)
    }

    fn run_sql(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".exec_sql/.load_sql", span)?;
        let name_node = get_field(m, ".name", span)?.clone();
        let name = self
            .walk_node(name_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("sql engine name must be a string", span.clone()))?
            .to_owned();
        let resolved = self.frames.resolve(&name, span).map_err(Signal::from)?.clone();
        let Value::SqlEngine(handle) = resolved else {
            return Err(Signal::from(ProteinError::type_error(
                format!("`{name}` is not a sql engine"),
                span.clone(),
            )));
        };
        let statement_node = get_field(m, ".statement", span)?.clone();
        let statement = self
            .walk_node(statement_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.statement` must be a string", span.clone()))?
            .to_owned();
        let params: Vec<Node> = match m.get(".params").cloned() {
            Some(Node::Sequence(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.walk_node(item, span)?);
                }
                out
            }
            Some(other) => {
                return Err(Signal::from(ProteinError::type_error(
                    format!("`.params` must be a sequence, got {}", other.type_name()),
                    span.clone(),
                )));
            }
            None => Vec::new(),
        };
        self.sql.execute(&handle, &statement, &params, span).map_err(Signal::from)
    }

    fn exec_sql_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        self.run_sql(value, span)?;
        Ok(Node::Null)
    }

    fn load_sql_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        self.run_sql(value, span)
    }

    // --- buffers --------------------------------------------------------------

    fn open_buffer_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".open_buffer", span)?;
        let name_node = get_field(m, ".name", span)?.clone();
        let name = self
            .walk_node(name_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.open_buffer`'s `.name` must be a string", span.clone()))?
            .to_owned();
        let language = match m.get(".language").cloned() {
            Some(node) => Some(
                self.walk_node(node, span)?
                    .as_str()
                    .ok_or_else(|| ProteinError::type_error("`.language` must be a string", span.clone()))?
                    .to_owned(),
            ),
            None => None,
        };
        let indent_width = match m.get(".indent").cloned() {
            Some(node) => match self.walk_node(node, span)? {
                Node::Int(i) if i >= 0 => i as u32,
                other => {
                    return Err(Signal::from(ProteinError::type_error(
                        format!("`.indent` must be a non-negative integer, got {}", other.type_name()),
                        span.clone(),
                    )));
                }
            },
            None => 4,
        };
        let created = self.buffers.open(&name, language, indent_width);
        if created {
            if let Some(init_node) = m.get(".init").cloned() {
                let init = self.walk_node(init_node, span)?;
                let text = init.coerce_to_string();
                self.buffers.write(&name, &text, 0, span).map_err(Signal::from)?;
            }
        }
        Ok(Node::Null)
    }

    fn write_buffer_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".write_buffer", span)?;
        let name_node = get_field(m, ".name", span)?.clone();
        let name = self
            .walk_node(name_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.write_buffer`'s `.name` must be a string", span.clone()))?
            .to_owned();
        let text = match m.get(".text").cloned() {
            Some(node) => self.walk_node(node, span)?.coerce_to_string(),
            None => String::new(),
        };
        let indent = match m.get(".indent").cloned() {
            Some(node) => match self.walk_node(node, span)? {
                Node::Int(i) => i as i32,
                other => {
                    return Err(Signal::from(ProteinError::type_error(
                        format!("`.indent` must be an integer, got {}", other.type_name()),
                        span.clone(),
                    )));
                }
            },
            None => 0,
        };
        self.buffers.write(&name, &text, indent, span).map_err(Signal::from)?;
        Ok(Node::Null)
    }

    fn save_buffer_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".save_buffer", span)?;
        let name_node = get_field(m, ".name", span)?.clone();
        let name = self
            .walk_node(name_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.save_buffer`'s `.name` must be a string", span.clone()))?
            .to_owned();
        let filename_node = get_field(m, ".filename", span)?.clone();
        let filename = self
            .walk_node(filename_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.save_buffer`'s `.filename` must be a string", span.clone()))?
            .to_owned();
        let path = self.resolve_path(&filename);
        self.buffers.save(&name, &path, span).map_err(Signal::from)?;
        log::info!("saved buffer `{name}` to {}", path.display());
        Ok(Node::Null)
    }

    fn write_handler(&mut self, value: Node, span: &Span) -> WalkResult<Node> {
        let m = require_mapping(&value, ".write", span)?;
        let filename_node = get_field(m, ".filename", span)?.clone();
        let filename = self
            .walk_node(filename_node, span)?
            .as_str()
            .ok_or_else(|| ProteinError::type_error("`.write`'s `.filename` must be a string", span.clone()))?
            .to_owned();
        let text_node = get_field(m, ".text", span)?.clone();
        let text = self.walk_node(text_node, span)?.coerce_to_string();
        let path = self.resolve_path(&filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProteinError::io(format!("creating {}: {e}", parent.display()), span.clone()))
                .map_err(Signal::from)?;
        }
        std::fs::write(&path, format!("{text}\n"))
            .map_err(|e| ProteinError::io(format!("writing {}: {e}", path.display()), span.clone()))
            .map_err(Signal::from)?;
        log::info!("wrote {}", path.display());
        Ok(Node::Null)
    }
}

fn require_mapping<'a>(value: &'a Node, construct: &str, span: &Span) -> WalkResult<&'a Mapping> {
    value
        .as_mapping()
        .ok_or_else(|| Signal::from(ProteinError::type_error(format!("`{construct}` requires a mapping"), span.clone())))
}

fn get_field<'a>(m: &'a Mapping, field: &str, span: &Span) -> WalkResult<&'a Node> {
    m.get(field)
        .ok_or_else(|| Signal::from(ProteinError::new(ErrorTag::Arg, format!("missing required field `{field}`"), span.clone())))
}

fn toml_document_to_node(doc: &toml_edit::DocumentMut) -> Node {
    let mut m = Mapping::new();
    for (k, v) in doc.iter() {
        let _ = m.push(k.to_owned(), toml_item_to_node(v), &Span::unknown());
    }
    Node::Mapping(m)
}

fn toml_item_to_node(item: &toml_edit::Item) -> Node {
    match item {
        toml_edit::Item::None => Node::Null,
        toml_edit::Item::Value(v) => toml_value_to_node(v),
        toml_edit::Item::Table(t) => {
            let mut m = Mapping::new();
            for (k, v) in t.iter() {
                let _ = m.push(k.to_owned(), toml_item_to_node(v), &Span::unknown());
            }
            Node::Mapping(m)
        }
        toml_edit::Item::ArrayOfTables(tables) => {
            Node::Sequence(tables.iter().map(|t| toml_item_to_node(&toml_edit::Item::Table(t.clone()))).collect())
        }
    }
}

fn toml_value_to_node(value: &toml_edit::Value) -> Node {
    match value {
        toml_edit::Value::String(s) => Node::string(s.value().clone()),
        toml_edit::Value::Integer(i) => Node::Int(*i.value()),
        toml_edit::Value::Float(f) => Node::Float(*f.value()),
        toml_edit::Value::Boolean(b) => Node::Bool(*b.value()),
        toml_edit::Value::Datetime(d) => Node::Timestamp(d.value().to_string()),
        toml_edit::Value::Array(items) => Node::Sequence(items.iter().map(toml_value_to_node).collect()),
        toml_edit::Value::InlineTable(t) => {
            let mut m = Mapping::new();
            for (k, v) in t.iter() {
                let _ = m.push(k.to_owned(), toml_value_to_node(v), &Span::unknown());
            }
            Node::Mapping(m)
        }
    }
}
