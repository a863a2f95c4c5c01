//! The §8 concrete scenarios, each exercised end-to-end through
//! [`protein_core::Interpreter`] rather than unit-testing individual
//! walker methods.

use protein_core::{HostCallable, Interpreter, Node, Outcome};

fn render(source: &str) -> Node {
    let interpreter = Interpreter::new(".");
    match interpreter.render_str(source, None).expect("render should succeed") {
        Outcome::Done(node) => node,
        Outcome::Exited(code, message) => panic!("unexpected exit({code}): {message}"),
    }
}

#[test]
fn s1_basic_interpolation() {
    let node = render(
        r#"
.define:
  name: Alice
message: "Hello, {{ name }}!"
"#,
    );
    let m = node.as_mapping().unwrap();
    assert_eq!(m.get("message"), Some(&Node::string("Hello, Alice!")));
}

#[test]
fn s2_collapse_of_empty_foreach() {
    let node = render(
        r#"
.define:
  xs: []
items:
  .foreach:
    .values: [x, "{{ xs }}"]
    .do:
      - "{{ x }}"
"#,
    );
    let m = node.as_mapping().unwrap();
    assert_eq!(m.get("items"), Some(&Node::Sequence(vec![])));
}

#[test]
fn s3_mapping_merge_via_foreach() {
    let node = render(
        r#"
.define:
  users:
    - id: 1
      name: joe
    - id: 2
      name: jill
result:
  .foreach:
    .values: [u, "{{ users }}"]
    .do:
      "{{ u.name }}":
        id: "{{ u.id }}"
"#,
    );
    let m = node.as_mapping().unwrap();
    let result = m.get("result").unwrap().as_mapping().unwrap();
    let joe = result.get("joe").unwrap().as_mapping().unwrap();
    assert_eq!(joe.get("id"), Some(&Node::Int(1)));
    let jill = result.get("jill").unwrap().as_mapping().unwrap();
    assert_eq!(jill.get("id"), Some(&Node::Int(2)));
}

#[test]
fn s4_collect_mappings_disabled_keeps_a_sequence() {
    let node = render(
        r#"
.define:
  users:
    - id: 1
      name: joe
    - id: 2
      name: jill
result:
  .foreach:
    .values: [u, "{{ users }}"]
    .collect_mappings: false
    .do:
      "{{ u.name }}":
        id: "{{ u.id }}"
"#,
    );
    let m = node.as_mapping().unwrap();
    let result = m.get("result").unwrap().as_sequence().unwrap();
    assert_eq!(result.len(), 2);
    for item in result {
        assert!(item.as_mapping().is_some());
    }
}

#[test]
fn s5_dynamic_closure_capture() {
    let node = render(
        r#"
.define:
  x: 1
.function:
  .name: f
  .args: []
  .do: "{{ x }}"
.define:
  x: 2
result:
  .call:
    .name: f
    .args: []
"#,
    );
    let m = node.as_mapping().unwrap();
    assert_eq!(m.get("result"), Some(&Node::Int(1)));
}

#[test]
fn s6_expression_returning_a_list_from_a_host_callable() {
    let callable = HostCallable {
        name: "servers".into(),
        func: std::rc::Rc::new(|args, span| {
            let tier = args
                .first()
                .and_then(Node::as_str)
                .ok_or_else(|| protein_core::ProteinError::arg("servers expects one argument", span.clone()))?;
            if tier != "live" {
                return Ok(Node::Sequence(vec![]));
            }
            Ok(Node::Sequence(vec![
                Node::Sequence(vec![Node::string("apollo"), Node::string("192.168.1.10")]),
                Node::Sequence(vec![Node::string("athena"), Node::string("192.168.1.40")]),
            ]))
        }),
    };
    // A module is the channel a host callable enters the frame stack
    // through (`ModuleEnvironment::into_bindings`) — `Interpreter::define`
    // only carries plain `Node` values.
    let mut interpreter = Interpreter::new(".");
    interpreter.register_module_loader(SingleCallableModule(callable));

    let node = match interpreter
        .render_str(".import_module: servers_module\nlive: \"{{ servers('live') }}\"\n", None)
        .unwrap()
    {
        Outcome::Done(node) => node,
        Outcome::Exited(code, message) => panic!("unexpected exit({code}): {message}"),
    };
    let m = node.as_mapping().unwrap();
    let live = m.get("live").unwrap().as_sequence().unwrap();
    assert_eq!(live.len(), 2);
    assert_eq!(
        live[0],
        Node::Sequence(vec![Node::string("apollo"), Node::string("192.168.1.10")])
    );
}

struct SingleCallableModule(HostCallable);

impl protein_core::ModuleLoader for SingleCallableModule {
    fn load(&self, name: &str, span: &protein_core::Span) -> Result<protein_core::ModuleEnvironment, protein_core::ProteinError> {
        if name != "servers_module" {
            return Err(protein_core::ProteinError::undefined(&format!("module `{name}`"), span.clone()));
        }
        Ok(protein_core::ModuleEnvironment::new().with_callable(self.0.name.clone(), {
            let func = self.0.func.clone();
            move |args, span| (func)(args, span)
        }))
    }
}

#[test]
fn literal_law_passes_braces_through_unchanged() {
    let node = render("msg: \"#!literal {{ not a template }}\"\n");
    let m = node.as_mapping().unwrap();
    assert_eq!(m.get("msg"), Some(&Node::string("{{ not a template }}")));
}

#[test]
fn no_dotted_keys_survive_into_the_rendered_tree() {
    let node = render(".define:\n  x: 1\ny: \"{{ x }}\"\n");
    let m = node.as_mapping().unwrap();
    assert!(!m.iter().any(|(k, _)| k.starts_with('.')));
    assert_eq!(m.get("y"), Some(&Node::Int(1)));
}
