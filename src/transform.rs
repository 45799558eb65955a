//! Pre-catalog schema text rewriting
//!
//! Substitutes user-declared custom type tokens with their underlying SQL
//! type before the schema parser runs. Substitution is token-aware: only the
//! token in type position is replaced, never the same identifier used as a
//! column name. Every non-standard token in type position must be either a
//! standard SQL type or a declared custom type; anything else is an error at
//! that position.

use std::collections::HashMap;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::parser::lexer::{self, Token, TokenKind};

/// One user-declared substitution, `custom` (case-insensitive) to the
/// underlying SQL type token.
#[derive(Debug, Clone)]
pub struct TypeSubstitution {
    pub custom: String,
    pub sql_type: String,
}

/// Standard type tokens accepted in type position without a declaration.
/// Multi-word types contribute each word.
const STANDARD_TYPE_WORDS: &[&str] = &[
    "int", "integer", "tinyint", "smallint", "mediumint", "bigint", "int2", "int8", "unsigned",
    "big", "character", "char", "varchar", "nchar", "nvarchar", "varying", "native", "text",
    "clob", "blob", "real", "double", "precision", "float", "numeric", "decimal", "boolean",
    "bool", "date", "datetime", "time", "timestamp", "timestamptz", "uuid", "json", "jsonb",
    "serial", "bigserial", "binary", "varbinary", "enum", "tinytext", "mediumtext", "longtext",
    "tinyblob", "mediumblob", "longblob",
];

/// Words that end a column's type token sequence.
const CONSTRAINT_WORDS: &[&str] = &[
    "primary", "not", "null", "unique", "default", "references", "check", "collate",
    "constraint", "generated", "as", "autoincrement",
];

/// Rewrite custom type tokens in schema text and validate type positions.
///
/// Returns the rewritten text; diagnostics cover unknown type tokens. When
/// no substitutions are declared the text passes through unchanged apart
/// from validation.
pub fn apply_custom_types(
    file: &str,
    src: &str,
    substitutions: &[TypeSubstitution],
    sink: &mut DiagnosticSink,
) -> String {
    let by_name: HashMap<String, &TypeSubstitution> = substitutions
        .iter()
        .map(|s| (s.custom.to_lowercase(), s))
        .collect();

    let (tokens, _) = lexer::tokenize(file, src);
    let mut edits: Vec<(usize, usize, String)> = Vec::new();

    let mut i = 0;
    while i + 1 < tokens.len() {
        // Find `CREATE TABLE [IF NOT EXISTS] name (`.
        if !tokens[i].is_kw("create") || !tokens[i + 1].is_kw("table") {
            i += 1;
            continue;
        }
        i += 2;
        if i < tokens.len() && tokens[i].is_kw("if") {
            i += 3; // IF NOT EXISTS
        }
        i += 1; // table name
        if i >= tokens.len() || tokens[i].kind != TokenKind::LParen {
            continue;
        }
        i += 1;
        i = scan_column_list(&tokens, i, &by_name, &mut edits, sink);
    }

    apply_edits(src, edits)
}

/// Walk one column list at paren depth 1, validating and rewriting each
/// column's type tokens. Returns the index just past the closing paren.
fn scan_column_list(
    tokens: &[Token],
    mut i: usize,
    by_name: &HashMap<String, &TypeSubstitution>,
    edits: &mut Vec<(usize, usize, String)>,
    sink: &mut DiagnosticSink,
) -> usize {
    let mut expecting_column = true;
    let mut depth = 0usize;
    while i < tokens.len() {
        let tok = &tokens[i];
        match &tok.kind {
            TokenKind::Eof => return i,
            TokenKind::LParen => {
                depth += 1;
                i += 1;
            }
            TokenKind::RParen if depth == 0 => return i + 1,
            TokenKind::RParen => {
                depth -= 1;
                i += 1;
            }
            TokenKind::Comma if depth == 0 => {
                expecting_column = true;
                i += 1;
            }
            TokenKind::Ident { .. } if expecting_column && depth == 0 => {
                if is_constraint_start(tok) {
                    // Table-level constraint; nothing to rewrite here.
                    expecting_column = false;
                    i += 1;
                    continue;
                }
                expecting_column = false;
                // This token is the column name; what follows is the type.
                i = scan_type_tokens(tokens, i + 1, by_name, edits, sink);
            }
            _ => {
                i += 1;
            }
        }
    }
    i
}

/// Validate and rewrite the type tokens of one column. Returns the index of
/// the first non-type token.
fn scan_type_tokens(
    tokens: &[Token],
    mut i: usize,
    by_name: &HashMap<String, &TypeSubstitution>,
    edits: &mut Vec<(usize, usize, String)>,
    sink: &mut DiagnosticSink,
) -> usize {
    let mut first = true;
    while i < tokens.len() {
        let tok = &tokens[i];
        let quoted = match tok.kind {
            TokenKind::Ident { quoted } => quoted,
            _ => break,
        };
        if !quoted && is_constraint_word(tok) {
            break;
        }
        let lower = tok.value.to_lowercase();
        if let Some(sub) = by_name.get(&lower) {
            edits.push((
                tok.span.start_offset,
                tok.span.end_offset,
                sub.sql_type.clone(),
            ));
        } else if !STANDARD_TYPE_WORDS.contains(&lower.as_str()) {
            sink.push(Diagnostic::error(
                &tok.span,
                format!(
                    "unknown type '{}'; declare it under custom_types.mapping or use a standard SQL type",
                    tok.value
                ),
            ));
        }
        first = false;
        i += 1;
    }
    // Skip `(N[,M])` modifiers.
    if !first && i < tokens.len() && tokens[i].kind == TokenKind::LParen {
        let mut depth = 1usize;
        i += 1;
        while i < tokens.len() && depth > 0 {
            match tokens[i].kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                TokenKind::Eof => break,
                _ => {}
            }
            i += 1;
        }
    }
    i
}

fn is_constraint_start(tok: &Token) -> bool {
    ["primary", "unique", "foreign", "check", "constraint"]
        .iter()
        .any(|kw| tok.is_kw(kw))
}

fn is_constraint_word(tok: &Token) -> bool {
    CONSTRAINT_WORDS.iter().any(|kw| tok.is_kw(kw))
}

/// Splice edits into the source. Edits are non-overlapping and ordered by
/// their position in the token stream.
fn apply_edits(src: &str, edits: Vec<(usize, usize, String)>) -> String {
    if edits.is_empty() {
        return src.to_string();
    }
    let mut out = String::with_capacity(src.len());
    let mut cursor = 0usize;
    for (start, end, replacement) in edits {
        out.push_str(&src[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&src[cursor..]);
    out
}
