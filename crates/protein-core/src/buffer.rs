//! The buffer subsystem (§4.5): named accumulation targets written to by
//! `.write_buffer`/`.write` and flushed to the filesystem by `.save_buffer`.
//!
//! Ownership is per-[`crate::Interpreter`] instance, not a process-global
//! registry — mirrors `ouros`'s namespace-per-`Runner` discipline (no
//! aliased mutable state shared between independent runs in the same
//! process).

use std::collections::HashMap;
use std::path::Path;

use crate::error::{ProteinError, Span};

const DEFAULT_INDENT_WIDTH: u32 = 4;

/// One named buffer (§3 Buffer): `language_tag`/`indent_width` are fixed
/// at `.open_buffer` time; `base_indent` is always `0` — the spec names
/// no construct that adjusts a buffer's own base alignment after opening.
#[derive(Debug, Clone)]
pub struct Buffer {
    language: Option<String>,
    indent_width: u32,
    base_indent: i32,
    lines: Vec<String>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self {
            language: None,
            indent_width: DEFAULT_INDENT_WIDTH,
            base_indent: 0,
            lines: Vec::new(),
        }
    }
}

impl Buffer {
    fn push_text(&mut self, text: &str, indent: i32) {
        let total = (self.base_indent + indent).max(0) as u32 * self.indent_width;
        let prefix = " ".repeat(total as usize);
        for line in dedent(text) {
            if line.is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{prefix}{line}"));
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Strips the common leading whitespace shared by every non-blank line of
/// `text` (the indentation contract of §4.5), returning the individual
/// lines with that prefix removed.
fn dedent(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let common = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .into_iter()
        .map(|l| l.get(common.min(l.len())..).unwrap_or("").to_owned())
        .collect()
}

/// The per-interpreter registry of named buffers (§4.5).
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: HashMap<String, Buffer>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `.open_buffer`: creates the named buffer if absent, leaving an
    /// existing one (and its `.init` text) untouched on re-open. Returns
    /// whether the buffer was newly created, so the caller knows whether
    /// to apply `.init`.
    pub fn open(&mut self, name: &str, language: Option<String>, indent_width: u32) -> bool {
        use std::collections::hash_map::Entry;
        match self.buffers.entry(name.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Buffer {
                    language,
                    indent_width,
                    ..Buffer::default()
                });
                true
            }
        }
    }

    /// `.write_buffer`/`.write`: appends `text`, indented by
    /// `(base_indent + indent) * indent_width` spaces (§4.5), to the named
    /// buffer. Fails with `ERR_UNDEFINED` if the buffer was never opened.
    pub fn write(&mut self, name: &str, text: &str, indent: i32, span: &Span) -> Result<(), ProteinError> {
        let buffer = self
            .buffers
            .get_mut(name)
            .ok_or_else(|| ProteinError::undefined(&format!("buffer `{name}`"), span.clone()))?;
        buffer.push_text(text, indent);
        Ok(())
    }

    /// `.save_buffer`: writes the buffer's accumulated text to `path`.
    pub fn save(&self, name: &str, path: &Path, span: &Span) -> Result<(), ProteinError> {
        let buffer = self
            .buffers
            .get(name)
            .ok_or_else(|| ProteinError::undefined(&format!("buffer `{name}`"), span.clone()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProteinError::io(format!("creating {}: {e}", parent.display()), span.clone()))?;
        }
        std::fs::write(path, buffer.render())
            .map_err(|e| ProteinError::io(format!("writing buffer `{name}` to {}: {e}", path.display()), span.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    pub fn language_of(&self, name: &str) -> Option<&str> {
        self.buffers.get(name).and_then(|b| b.language.as_deref())
    }

    #[cfg(test)]
    pub fn contents(&self, name: &str) -> Option<String> {
        self.buffers.get(name).map(Buffer::render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_open_buffer() {
        let mut registry = BufferRegistry::new();
        let err = registry.write("out", "hello", 0, &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, crate::error::ErrorTag::Undefined);
    }

    #[test]
    fn write_indents_by_local_indent_and_width() {
        let mut registry = BufferRegistry::new();
        registry.open("out", None, 2);
        registry.write("out", "line one", 1, &Span::unknown()).unwrap();
        assert_eq!(registry.contents("out").unwrap(), "  line one\n");
    }

    #[test]
    fn write_dedents_shared_prefix_before_reindenting() {
        let mut registry = BufferRegistry::new();
        registry.open("out", None, 2);
        registry.write("out", "  foo\n  bar\n", 0, &Span::unknown()).unwrap();
        assert_eq!(registry.contents("out").unwrap(), "foo\nbar\n");
    }

    #[test]
    fn reopening_does_not_clear_or_reconfigure() {
        let mut registry = BufferRegistry::new();
        registry.open("out", None, 2);
        registry.write("out", "x", 0, &Span::unknown()).unwrap();
        let created_again = registry.open("out", None, 8);
        assert!(!created_again);
        registry.write("out", "y", 1, &Span::unknown()).unwrap();
        assert_eq!(registry.contents("out").unwrap(), "x\n  y\n");
    }

    #[test]
    fn negative_indent_never_goes_below_zero_columns() {
        let mut registry = BufferRegistry::new();
        registry.open("out", None, 4);
        registry.write("out", "x", -5, &Span::unknown()).unwrap();
        assert_eq!(registry.contents("out").unwrap(), "x\n");
    }
}
