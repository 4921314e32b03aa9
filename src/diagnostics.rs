//! Source buffer & diagnostics
//!
//! Holds the translation unit's text, maps byte offsets to line numbers,
//! and accumulates diagnostics keyed by source coordinate. Diagnostics
//! never stop analysis; only the presence of at least one error suppresses
//! code generation for the whole translation unit.

use std::fmt;
use std::path::{Path, PathBuf};

/// A 1-indexed line number. Columns are not currently surfaced in the
/// pinned diagnostic format (`<line>: <kind>: <message>`), so only the
/// line is tracked on `Diagnostic`; `SourceBuffer` can still resolve a
/// byte offset to a (line, column) pair for internal use.
pub type Line = usize;

/// The input text together with enough bookkeeping to turn a byte offset
/// into a line number.
pub struct SourceBuffer {
    file: PathBuf,
    text: String,
    /// Byte offset of the start of each line (line 0 starts at offset 0).
    line_starts: Vec<usize>,
}

impl SourceBuffer {
    pub fn new(file: impl Into<PathBuf>, text: String) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        SourceBuffer {
            file: file.into(),
            text,
            line_starts,
        }
    }

    pub fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(path.to_path_buf(), text))
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 1-indexed line containing `offset`.
    pub fn line_at(&self, offset: usize) -> Line {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx, // idx-1 is the containing line (0-indexed), +1 for display
        }
    }

    /// 1-indexed column (in bytes) of `offset` within its line.
    pub fn column_at(&self, offset: usize) -> usize {
        let line0 = self.line_at(offset) - 1;
        offset - self.line_starts[line0] + 1
    }
}

/// Severity of a diagnostic. Only `Error` suppresses code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single diagnostic, always attributable to a source line.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: Line,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.line, self.severity, self.message)
    }
}

/// Accumulates diagnostics for one translation unit.
///
/// Emission order within the bag does not need to match source order
/// (analysis visits declarations top-down but expressions can emit notes
/// out of line); `sorted()` is what the driver calls to satisfy spec's
/// "ordering of emitted diagnostics is by source coordinate".
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        DiagnosticBag::default()
    }

    pub fn error(&mut self, line: Line, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            line,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, line: Line, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            line,
            message: message.into(),
        });
    }

    pub fn note(&mut self, line: Line, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Note,
            line,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Diagnostics in source-coordinate order; a stable sort preserves
    /// relative emission order for diagnostics on the same line.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut v: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        v.sort_by_key(|d| d.line);
        v
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_at_finds_containing_line() {
        let buf = SourceBuffer::new("t.c", "int a;\nint b;\nint c;\n".to_string());
        assert_eq!(buf.line_at(0), 1);
        assert_eq!(buf.line_at(7), 2);
        assert_eq!(buf.line_at(14), 3);
    }

    #[test]
    fn diagnostics_sort_by_line_stable_on_ties() {
        let mut bag = DiagnosticBag::new();
        bag.error(5, "first");
        bag.error(2, "second");
        bag.warning(2, "third");
        let sorted = bag.sorted();
        assert_eq!(sorted[0].line, 2);
        assert_eq!(sorted[0].message, "second");
        assert_eq!(sorted[1].line, 2);
        assert_eq!(sorted[1].message, "third");
        assert_eq!(sorted[2].line, 5);
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let mut bag = DiagnosticBag::new();
        bag.warning(1, "just a warning");
        assert!(!bag.has_errors());
        bag.error(1, "now an error");
        assert!(bag.has_errors());
    }
}
