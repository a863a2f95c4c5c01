//! The `protein` command-line surface (§6): `protein <input> [-o <output>]
//! [--set k=v ...]`.
//!
//! Grounded in `icecream17-metamath-knife`'s `clap`-derive CLI, adapted
//! from its many flag-heavy verification options down to Protein's small,
//! fixed surface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use protein_core::{Interpreter, Node, Outcome};

/// A YAML-tree macro preprocessor.
#[derive(Parser, Debug)]
#[command(name = "protein", version, about)]
struct Cli {
    /// Source file to render.
    input: PathBuf,

    /// Where to write the rendered tree. Format is inferred from the
    /// extension (`.yaml`/`.yml`, `.json`, `.toml`); defaults to YAML on
    /// stdout when omitted.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Overrides a top-level `.define` binding, e.g. `--set env=prod`. May
    /// be repeated.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut overrides = Vec::with_capacity(cli.set.len());
    for raw in &cli.set {
        match parse_set_override(raw) {
            Ok(pair) => overrides.push(pair),
            Err(message) => {
                eprintln!("error: {message}");
                return ExitCode::from(1);
            }
        }
    }

    let source_dir = cli.input.parent().map(PathBuf::from).unwrap_or_default();
    let mut interpreter = Interpreter::new(source_dir);
    for (key, value) in overrides {
        interpreter.define(key, value);
    }

    let outcome = match interpreter.render_file(&cli.input) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };

    match outcome {
        Outcome::Done(node) => match write_output(&node, cli.output.as_deref()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::from(1)
            }
        },
        Outcome::Exited(code, message) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            ExitCode::from(code.rem_euclid(256) as u8)
        }
    }
}

/// Parses a `--set key=value` flag. The value is interpreted as a YAML
/// scalar (so `--set count=3` binds an integer, not the string `"3"`),
/// falling back to a plain string for anything that doesn't parse.
fn parse_set_override(raw: &str) -> Result<(String, Node), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("`--set {raw}` is missing `=`; expected `key=value`"))?;
    if key.is_empty() {
        return Err(format!("`--set {raw}` has an empty key"));
    }
    let node = protein_core::parser::parse_str(value, None).unwrap_or_else(|_| Node::string(value));
    Ok((key.to_owned(), node))
}

fn write_output(node: &Node, output: Option<&std::path::Path>) -> Result<(), String> {
    let format = output
        .and_then(protein_core::emit::Format::infer)
        .unwrap_or(protein_core::emit::Format::Yaml);
    let text = protein_core::emit::emit(node, format, None, &protein_core::Span::unknown())
        .map_err(|e| e.to_string())?;
    match output {
        Some(path) => std::fs::write(path, text).map_err(|e| format!("writing {}: {e}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}
