//! Format-specific serializers for `.export` (§6 "File formats (emit)").
//!
//! Each submodule owns one emitter; `emit` dispatches on an explicit
//! [`Format`] or infers one from the output path's extension.

pub mod json;
pub mod python;
pub mod toml;
pub mod yaml;

use std::path::Path;

use crate::error::{ProteinError, Span};
use crate::node::{Mapping, Node};

/// The serialization target for `.export` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Toml,
    Python,
}

impl Format {
    /// Infers a format from a file extension (§6: ".yaml|.yml -> yaml,
    /// .json -> json, .toml -> toml"; `python` has no inferred extension,
    /// it is only reachable via an explicit `.format`).
    pub fn infer(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "yaml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            "python" => Some(Self::Python),
            _ => None,
        }
    }
}

/// Per-format emit arguments, each defaulted the way §6's reference table
/// specifies. `args` holds whatever `.args` mapping a `.export` construct
/// supplied; unknown keys are rejected with `ERR_ARG`.
pub fn emit(node: &Node, format: Format, args: Option<&Mapping>, span: &Span) -> Result<String, ProteinError> {
    match format {
        Format::Yaml => yaml::emit(node, args, span),
        Format::Json => json::emit(node, args, span),
        Format::Toml => toml::emit(node, args, span),
        Format::Python => Ok(python::emit(node)),
    }
}

fn arg_error(key: &str, span: &Span) -> ProteinError {
    ProteinError::arg(format!("unknown emit argument `{key}`"), span.clone())
}

fn reject_unknown_args(args: &Mapping, known: &[&str], span: &Span) -> Result<(), ProteinError> {
    for (key, _) in args.iter() {
        if !known.contains(&key.as_str()) {
            return Err(arg_error(key, span));
        }
    }
    Ok(())
}
