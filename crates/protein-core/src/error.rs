//! The error taxonomy for the Protein interpreter (§7 of the spec).
//!
//! Modeled on `ouros::exception_private`: a closed tag enum derived with
//! `strum` for `Display`, paired with a span and a human message rather
//! than one variant per failure site.

use std::fmt;

use strum::{Display, EnumString};

/// A 1-based source location, when one is known.
///
/// `.load`-spliced trees and programmatically constructed nodes (e.g. the
/// result of a `.call`) may have no span; `file`/`line` are then `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Span {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}"),
            (Some(file), None) => write!(f, "{file}"),
            (None, Some(line)) => write!(f, "<input>:{line}"),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

/// The tag half of a `ProteinError` — matches the `ERR_*` names in §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ErrorTag {
    #[strum(serialize = "ERR_PARSE")]
    Parse,
    #[strum(serialize = "ERR_DUP_KEY")]
    DupKey,
    #[strum(serialize = "ERR_UNKNOWN_CONSTRUCT")]
    UnknownConstruct,
    #[strum(serialize = "ERR_UNDEFINED")]
    Undefined,
    #[strum(serialize = "ERR_EXPR")]
    Expr,
    #[strum(serialize = "ERR_TYPE")]
    Type,
    #[strum(serialize = "ERR_ARG")]
    Arg,
    #[strum(serialize = "ERR_IO")]
    Io,
    #[strum(serialize = "ERR_SQL")]
    Sql,
}

/// Runtime error produced anywhere in the core.
///
/// `ProteinExit` is kept as a separate variant of the top-level
/// [`Signal`](crate::walker::Signal) rather than folded in here: it is an
/// orderly termination, not a failure, and the top-level entry point must
/// tell the two apart without string-matching a message.
#[derive(Debug, Clone)]
pub struct ProteinError {
    pub tag: ErrorTag,
    pub message: String,
    pub span: Span,
}

impl ProteinError {
    pub fn new(tag: ErrorTag, message: impl Into<String>, span: Span) -> Self {
        Self {
            tag,
            message: message.into(),
            span,
        }
    }

    pub fn dup_key(key: &str, span: Span) -> Self {
        Self::new(ErrorTag::DupKey, format!("duplicate key `{key}`"), span)
    }

    pub fn unknown_construct(key: &str, span: Span) -> Self {
        Self::new(
            ErrorTag::UnknownConstruct,
            format!("unknown construct `{key}`"),
            span,
        )
    }

    pub fn undefined(name: &str, span: Span) -> Self {
        Self::new(ErrorTag::Undefined, format!("undefined name `{name}`"), span)
    }

    pub fn expr(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorTag::Expr, message, span)
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorTag::Type, message, span)
    }

    pub fn arg(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorTag::Arg, message, span)
    }

    pub fn io(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorTag::Io, message, span)
    }

    pub fn sql(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorTag::Sql, message, span)
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorTag::Parse, message, span)
    }
}

impl fmt::Display for ProteinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.tag, self.span, self.message)
    }
}

impl std::error::Error for ProteinError {}

pub type ProteinResult<T> = Result<T, ProteinError>;
