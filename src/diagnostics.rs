//! Source spans and diagnostics
//!
//! Every AST node and catalog entity carries a [`Span`] pointing back at the
//! bytes it was parsed from. Diagnostics are collected append-only per run
//! and rendered as `path:line:col: message [severity]`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// A half-open region of a source file. Lines and columns are 1-based;
/// offsets are byte offsets from the start of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub file: Arc<str>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Span {
    /// A span covering a single point, for synthetic or file-level diagnostics.
    pub fn point(file: impl Into<Arc<str>>, line: u32, col: u32, offset: usize) -> Self {
        Self {
            file: file.into(),
            start_line: line,
            start_col: col,
            end_line: line,
            end_col: col,
            start_offset: offset,
            end_offset: offset,
        }
    }

    /// Merge two spans from the same file into one covering both.
    pub fn to(&self, other: &Span) -> Span {
        Span {
            file: self.file.clone(),
            start_line: self.start_line,
            start_col: self.start_col,
            end_line: other.end_line,
            end_col: other.end_col,
            start_offset: self.start_offset,
            end_offset: other.end_offset,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.start_line, self.start_col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A positioned message produced by any stage of the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Diagnostic {
    pub fn error(span: &Span, message: impl Into<String>) -> Self {
        Self::at(span, Severity::Error, message)
    }

    pub fn warning(span: &Span, message: impl Into<String>) -> Self {
        Self::at(span, Severity::Warning, message)
    }

    pub fn at(span: &Span, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            path: span.file.to_string(),
            line: span.start_line,
            column: span.start_col,
            severity,
            message: message.into(),
            code: None,
        }
    }

    /// File-level diagnostic with no precise position (line 1, column 1).
    pub fn file_level(path: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: 1,
            column: 1,
            severity,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {} [{}]",
            self.path, self.line, self.column, self.message, self.severity
        )
    }
}

/// Append-only diagnostic collector for one task or stage.
///
/// Parallel stages each own a sink; the pipeline merges sinks in input order
/// behind the join barrier, so the final sequence is deterministic.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, span: &Span, message: impl Into<String>) {
        self.push(Diagnostic::error(span, message));
    }

    pub fn warning(&mut self, span: &Span, message: impl Into<String>) {
        self.push(Diagnostic::warning(span, message));
    }

    /// Merge another sink's diagnostics, preserving their order.
    pub fn absorb(&mut self, other: DiagnosticSink) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.is_error())
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// Render diagnostics one per line, in collection order.
pub fn render_all(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    for d in diagnostics {
        out.push_str(&d.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::point("db/schema.sql", 3, 7, 42)
    }

    #[test]
    fn test_render_format() {
        let d = Diagnostic::error(&span(), "unknown table 'userz'");
        assert_eq!(
            d.to_string(),
            "db/schema.sql:3:7: unknown table 'userz' [error]"
        );
    }

    #[test]
    fn test_warning_render() {
        let d = Diagnostic::warning(&span(), "unknown command tag ':unknown'");
        assert!(d.to_string().ends_with("[warning]"));
    }

    #[test]
    fn test_sink_first_error_skips_warnings() {
        let mut sink = DiagnosticSink::new();
        sink.warning(&span(), "w1");
        sink.error(&span(), "e1");
        sink.error(&span(), "e2");
        assert!(sink.has_errors());
        assert_eq!(sink.first_error().unwrap().message, "e1");
    }

    #[test]
    fn test_absorb_preserves_order() {
        let mut a = DiagnosticSink::new();
        a.warning(&span(), "first");
        let mut b = DiagnosticSink::new();
        b.warning(&span(), "second");
        a.absorb(b);
        let messages: Vec<_> = a.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_span_merge() {
        let start = Span::point("q.sql", 1, 1, 0);
        let end = Span::point("q.sql", 2, 10, 30);
        let merged = start.to(&end);
        assert_eq!(merged.start_line, 1);
        assert_eq!(merged.end_line, 2);
        assert_eq!(merged.end_offset, 30);
    }

    #[test]
    fn test_render_all_one_per_line() {
        let ds = vec![
            Diagnostic::error(&span(), "a"),
            Diagnostic::warning(&span(), "b"),
        ];
        let rendered = render_all(&ds);
        assert_eq!(rendered.lines().count(), 2);
    }
}
