//! Query file block slicer
//!
//! Cuts a `.sql` query file into named blocks delimited by
//! `-- name: <Ident> :<command>` marker lines. SQL before the first marker
//! is rejected; comments and whitespace are fine and attach to the block
//! that follows them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::diagnostics::{DiagnosticSink, Span};

/// How a query's result is consumed, from the `:tag` after the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    One,
    Many,
    Exec,
    ExecResult,
    /// Unrecognised tag; sliced with a warning and skipped by generators.
    Unknown,
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "one" => Ok(Command::One),
            "many" => Ok(Command::Many),
            "exec" => Ok(Command::Exec),
            "execresult" => Ok(Command::ExecResult),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::One => "one",
            Command::Many => "many",
            Command::Exec => "exec",
            Command::ExecResult => "execresult",
            Command::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// One named block of a query file.
#[derive(Debug, Clone)]
pub struct QueryBlock {
    pub name: String,
    pub command: Command,
    /// The SQL between this marker and the next (or EOF).
    pub body_text: String,
    /// Span of the whole block, marker line included.
    pub span: Span,
    /// Line comments directly above the marker, marker prefix stripped.
    pub leading_comments: Vec<String>,
    /// 1-based line where the body starts, for span rebasing.
    pub body_line: u32,
    /// Byte offset where the body starts.
    pub body_offset: usize,
}

/// Slice a query file into blocks. Diagnostics cover SQL before the first
/// marker, malformed markers, unknown command tags, and duplicate names.
pub fn slice_blocks(file: &str, src: &str, sink: &mut DiagnosticSink) -> Vec<QueryBlock> {
    let file: Arc<str> = Arc::from(file);
    let mut blocks: Vec<QueryBlock> = Vec::new();
    let mut pending_comments: Vec<String> = Vec::new();
    let mut in_block_comment = false;
    let mut preamble_error_emitted = false;

    // Current open block: (name, command, marker span, leading comments,
    // body start line, body start offset).
    let mut open: Option<(String, Command, Span, Vec<String>, u32, usize)> = None;

    let mut offset = 0usize;
    for (idx, line) in src.split_inclusive('\n').enumerate() {
        let line_no = (idx + 1) as u32;
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim();

        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }

        if let Some(marker) = parse_marker(trimmed) {
            let marker_span = Span {
                file: file.clone(),
                start_line: line_no,
                start_col: 1,
                end_line: line_no,
                end_col: line.trim_end().len() as u32 + 1,
                start_offset: line_start,
                end_offset: line_start + line.trim_end().len(),
            };
            // Close the previous block at this marker.
            if let Some((name, command, span, comments, body_line, body_offset)) = open.take() {
                blocks.push(finish_block(
                    name, command, span, comments, body_line, body_offset, line_start, src,
                ));
            }
            match marker {
                Marker::Valid { name, command_tag } => {
                    let command = match Command::from_str(&command_tag) {
                        Ok(c) => c,
                        Err(()) => {
                            sink.warning(
                                &marker_span,
                                format!("unknown command tag ':{command_tag}'"),
                            );
                            Command::Unknown
                        }
                    };
                    if blocks.iter().any(|b| b.name == name)
                        || open.as_ref().is_some_and(|(n, ..)| *n == name)
                    {
                        sink.error(
                            &marker_span,
                            format!("duplicate query name '{name}' in this file"),
                        );
                    }
                    open = Some((
                        name,
                        command,
                        marker_span,
                        std::mem::take(&mut pending_comments),
                        line_no + 1,
                        offset,
                    ));
                }
                Marker::Malformed(message) => {
                    sink.error(&marker_span, message);
                    pending_comments.clear();
                }
            }
            continue;
        }

        if open.is_none() {
            // Before the first marker only whitespace and comments are legal.
            if trimmed.is_empty() {
                pending_comments.clear();
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix("--") {
                pending_comments.push(comment.trim().to_string());
                continue;
            }
            if trimmed.starts_with("/*") {
                if !trimmed.contains("*/") {
                    in_block_comment = true;
                }
                pending_comments.clear();
                continue;
            }
            if !preamble_error_emitted {
                preamble_error_emitted = true;
                sink.error(
                    &Span {
                        file: file.clone(),
                        start_line: line_no,
                        start_col: 1,
                        end_line: line_no,
                        end_col: line.trim_end().len() as u32 + 1,
                        start_offset: line_start,
                        end_offset: line_start + line.trim_end().len(),
                    },
                    "SQL before the first '-- name:' marker",
                );
            }
        } else if let Some(comment) = trimmed.strip_prefix("--") {
            // Comments inside a body also feed the NEXT block's leading
            // comments when they directly precede its marker; a non-comment
            // line resets that run.
            pending_comments.push(comment.trim().to_string());
        } else if !trimmed.is_empty() {
            pending_comments.clear();
        }
    }

    if let Some((name, command, span, comments, body_line, body_offset)) = open.take() {
        blocks.push(finish_block(
            name,
            command,
            span,
            comments,
            body_line,
            body_offset,
            src.len(),
            src,
        ));
    }
    blocks
}

#[allow(clippy::too_many_arguments)]
fn finish_block(
    name: String,
    command: Command,
    marker_span: Span,
    leading_comments: Vec<String>,
    body_line: u32,
    body_offset: usize,
    body_end: usize,
    src: &str,
) -> QueryBlock {
    let body_text = src[body_offset..body_end].to_string();
    let end_line = body_line + body_text.matches('\n').count() as u32;
    let span = Span {
        file: marker_span.file.clone(),
        start_line: marker_span.start_line,
        start_col: 1,
        end_line,
        end_col: 1,
        start_offset: marker_span.start_offset,
        end_offset: body_end,
    };
    QueryBlock {
        name,
        command,
        body_text,
        span,
        leading_comments,
        body_line,
        body_offset,
    }
}

enum Marker {
    Valid { name: String, command_tag: String },
    Malformed(String),
}

/// Recognise `-- name: <Ident> :<tag>`. Returns `None` for lines that are
/// not marker-shaped at all.
fn parse_marker(trimmed: &str) -> Option<Marker> {
    let rest = trimmed.strip_prefix("--")?.trim_start();
    let rest = rest.strip_prefix("name:")?.trim_start();

    let mut ident_len = 0usize;
    for (i, c) in rest.char_indices() {
        let ok = if i == 0 {
            c.is_alphabetic() || c == '_'
        } else {
            c.is_alphanumeric() || c == '_'
        };
        if !ok {
            break;
        }
        ident_len = i + c.len_utf8();
    }
    if ident_len == 0 {
        return Some(Marker::Malformed(
            "expected a query name after '-- name:'".to_string(),
        ));
    }
    let name = rest[..ident_len].to_string();
    let rest = rest[ident_len..].trim_start();
    let Some(tag) = rest.strip_prefix(':') else {
        return Some(Marker::Malformed(format!(
            "expected ':command' after query name '{name}'"
        )));
    };
    let tag = tag.trim();
    if tag.is_empty() || tag.contains(char::is_whitespace) {
        return Some(Marker::Malformed(format!(
            "expected a single command tag after '{name}:'"
        )));
    }
    Some(Marker::Valid {
        name,
        command_tag: tag.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_ok(src: &str) -> Vec<QueryBlock> {
        let mut sink = DiagnosticSink::new();
        let blocks = slice_blocks("queries.sql", src, &mut sink);
        assert!(!sink.has_errors(), "unexpected: {:?}", sink.as_slice());
        blocks
    }

    #[test]
    fn test_single_block() {
        let blocks = slice_ok("-- name: GetUser :one\nSELECT * FROM users WHERE id = ?1;\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "GetUser");
        assert_eq!(blocks[0].command, Command::One);
        assert!(blocks[0].body_text.contains("SELECT"));
        assert_eq!(blocks[0].body_line, 2);
    }

    #[test]
    fn test_multiple_blocks_ordered() {
        let blocks = slice_ok(
            "-- name: A :one\nSELECT 1;\n-- name: B :many\nSELECT 2;\n-- name: C :exec\nDELETE FROM t;\n",
        );
        let names: Vec<_> = blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(!blocks[0].body_text.contains("SELECT 2"));
    }

    #[test]
    fn test_sql_before_first_marker_is_error() {
        let mut sink = DiagnosticSink::new();
        slice_blocks(
            "queries.sql",
            "SELECT 1;\n-- name: A :one\nSELECT 2;\n",
            &mut sink,
        );
        assert!(sink.has_errors());
        let err = sink.first_error().unwrap();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("before the first"));
    }

    #[test]
    fn test_comments_before_first_marker_allowed() {
        let blocks = slice_ok(
            "-- project queries\n/* header */\n\n-- name: A :one\nSELECT 1;\n",
        );
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_leading_comments_attached() {
        let blocks = slice_ok(
            "-- name: A :one\nSELECT 1;\n\n-- fetches by id\n-- includes email\n-- name: B :one\nSELECT 2;\n",
        );
        assert_eq!(
            blocks[1].leading_comments,
            vec!["fetches by id", "includes email"]
        );
    }

    #[test]
    fn test_unknown_command_tag_warns() {
        let mut sink = DiagnosticSink::new();
        let blocks = slice_blocks("q.sql", "-- name: A :unknown\nSELECT 1;\n", &mut sink);
        assert_eq!(blocks[0].command, Command::Unknown);
        assert!(!sink.has_errors());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_duplicate_names_error() {
        let mut sink = DiagnosticSink::new();
        slice_blocks(
            "q.sql",
            "-- name: A :one\nSELECT 1;\n-- name: A :many\nSELECT 2;\n",
            &mut sink,
        );
        assert!(sink.has_errors());
        assert!(sink.first_error().unwrap().message.contains("duplicate"));
    }

    #[test]
    fn test_malformed_marker_error() {
        let mut sink = DiagnosticSink::new();
        slice_blocks("q.sql", "-- name: :one\nSELECT 1;\n", &mut sink);
        assert!(sink.has_errors());
    }

    #[test]
    fn test_execresult_tag() {
        let blocks = slice_ok("-- name: Bump :execresult\nUPDATE t SET n = n + 1;\n");
        assert_eq!(blocks[0].command, Command::ExecResult);
    }

    #[test]
    fn test_block_span_covers_marker_and_body() {
        let blocks = slice_ok("-- name: A :one\nSELECT 1\nFROM t;\n");
        assert_eq!(blocks[0].span.start_line, 1);
        assert!(blocks[0].span.end_line >= 3);
    }

    #[test]
    fn test_case_preserved_on_name() {
        let blocks = slice_ok("-- name: getUserByID :one\nSELECT 1;\n");
        assert_eq!(blocks[0].name, "getUserByID");
    }

    #[test]
    fn test_body_offset_points_at_body() {
        let src = "-- name: A :one\nSELECT 1;\n";
        let blocks = slice_ok(src);
        assert_eq!(&src[blocks[0].body_offset..], "SELECT 1;\n");
    }
}
