//! SQL tokenizer shared by the schema and query parsers
//!
//! Hand-rolled character scanner producing spanned tokens. Comments are
//! skipped except for `/*SLICE:name*/` markers, which surface as tokens so
//! the query parser can see variadic placeholders. Quoting (`"x"`, `` `x` ``,
//! `[x]`) is resolved here: the token carries both the raw text and the
//! unquoted value.

use std::sync::Arc;

use crate::diagnostics::{Diagnostic, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword. Keywords are matched case-insensitively by the
    /// parsers via [`Token::is_kw`]; quoted identifiers never match keywords.
    Ident { quoted: bool },
    Number,
    StringLit,
    /// `x'ABCD'` hex blob literal.
    BlobLit,
    /// Anonymous positional placeholder `?`.
    Question,
    /// Explicit positional placeholder `?N`.
    QuestionNumber(u32),
    /// Named placeholder `:name`, `@name`, or `$name`; `value` holds the name.
    NamedPlaceholder,
    /// `/*SLICE:name*/` variadic marker; `value` holds the name.
    SliceMarker,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Star,
    Plus,
    Minus,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Concat,
    BitOr,
    BitAnd,
    ShiftLeft,
    ShiftRight,
    Tilde,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text.
    pub text: String,
    /// Unquoted identifier, string literal contents, or placeholder name.
    pub value: String,
    pub span: Span,
}

impl Token {
    /// Case-insensitive keyword test. Quoted identifiers are never keywords.
    pub fn is_kw(&self, kw: &str) -> bool {
        matches!(self.kind, TokenKind::Ident { quoted: false })
            && self.value.eq_ignore_ascii_case(kw)
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident { .. })
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

/// Tokenize a whole file. Lexical errors (unterminated strings or comments,
/// stray characters) become diagnostics; scanning continues past them.
pub fn tokenize(file: &str, src: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Scanner::new(file, src).run()
}

struct Scanner<'a> {
    file: Arc<str>,
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Scanner<'a> {
    fn new(file: &str, src: &'a str) -> Self {
        Self {
            file: Arc::from(file),
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|&(o, _)| o)
            .unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
        let &(_, c) = self.chars.get(self.pos)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn mark(&self) -> (u32, u32, usize) {
        (self.line, self.col, self.offset())
    }

    fn span_from(&self, mark: (u32, u32, usize)) -> Span {
        Span {
            file: self.file.clone(),
            start_line: mark.0,
            start_col: mark.1,
            end_line: self.line,
            end_col: self.col,
            start_offset: mark.2,
            end_offset: self.offset(),
        }
    }

    fn push(&mut self, kind: TokenKind, mark: (u32, u32, usize), value: String) {
        let span = self.span_from(mark);
        let text = self.src[span.start_offset..span.end_offset].to_string();
        self.tokens.push(Token {
            kind,
            text,
            value,
            span,
        });
    }

    fn push_symbol(&mut self, kind: TokenKind, mark: (u32, u32, usize)) {
        self.push(kind, mark, String::new());
    }

    fn run(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        while let Some(c) = self.peek() {
            let mark = self.mark();
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '-' if self.peek_at(1) == Some('-') => self.line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.block_comment(mark),
                '\'' => self.string_literal(mark),
                '"' => self.quoted_ident(mark, '"'),
                '`' => self.quoted_ident(mark, '`'),
                '[' => self.quoted_ident(mark, ']'),
                '?' => self.question(mark),
                ':' | '@' | '$' => self.named_placeholder(mark),
                c if c.is_ascii_digit() => self.number(mark),
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number(mark),
                c if c.is_alphabetic() || c == '_' => self.ident_or_blob(mark),
                _ => self.symbol(mark),
            }
        }
        let mark = self.mark();
        self.push_symbol(TokenKind::Eof, mark);
        (self.tokens, self.diagnostics)
    }

    fn line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn block_comment(&mut self, mark: (u32, u32, usize)) {
        self.bump(); // /
        self.bump(); // *
        let body_start = self.offset();
        let mut terminated = false;
        while let Some(c) = self.peek() {
            if c == '*' && self.peek_at(1) == Some('/') {
                let body_end = self.offset();
                self.bump();
                self.bump();
                terminated = true;
                let body = &self.src[body_start..body_end];
                if let Some(name) = body.strip_prefix("SLICE:") {
                    let name = name.trim().to_string();
                    if name.is_empty() {
                        self.diagnostics
                            .push(Diagnostic::error(&self.span_from(mark), "slice marker is missing a name"));
                    } else {
                        self.push(TokenKind::SliceMarker, mark, name);
                    }
                }
                break;
            }
            self.bump();
        }
        if !terminated {
            self.diagnostics
                .push(Diagnostic::error(&self.span_from(mark), "unterminated block comment"));
        }
    }

    fn string_literal(&mut self, mark: (u32, u32, usize)) {
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                Some('\'') => {
                    // '' is an escaped quote
                    if self.peek_at(1) == Some('\'') {
                        self.bump();
                        self.bump();
                        value.push('\'');
                    } else {
                        self.bump();
                        self.push(TokenKind::StringLit, mark, value);
                        return;
                    }
                }
                Some(c) => {
                    self.bump();
                    value.push(c);
                }
                None => {
                    self.diagnostics
                        .push(Diagnostic::error(&self.span_from(mark), "unterminated string literal"));
                    self.push(TokenKind::StringLit, mark, value);
                    return;
                }
            }
        }
    }

    fn quoted_ident(&mut self, mark: (u32, u32, usize), close: char) {
        self.bump(); // opening quote or bracket
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(c) if c == close => {
                    // Doubled closer is an escape for " and `
                    if close != ']' && self.peek_at(1) == Some(close) {
                        self.bump();
                        self.bump();
                        value.push(close);
                    } else {
                        self.bump();
                        self.push(TokenKind::Ident { quoted: true }, mark, value);
                        return;
                    }
                }
                Some(c) => {
                    self.bump();
                    value.push(c);
                }
                None => {
                    self.diagnostics
                        .push(Diagnostic::error(&self.span_from(mark), "unterminated quoted identifier"));
                    self.push(TokenKind::Ident { quoted: true }, mark, value);
                    return;
                }
            }
        }
    }

    fn question(&mut self, mark: (u32, u32, usize)) {
        self.bump(); // ?
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            self.push(TokenKind::Question, mark, String::new());
        } else {
            match digits.parse::<u32>() {
                Ok(n) if n >= 1 => self.push(TokenKind::QuestionNumber(n), mark, digits),
                _ => {
                    self.diagnostics.push(Diagnostic::error(
                        &self.span_from(mark),
                        format!("invalid placeholder index '?{digits}'"),
                    ));
                    self.push(TokenKind::Question, mark, String::new());
                }
            }
        }
    }

    fn named_placeholder(&mut self, mark: (u32, u32, usize)) {
        let sigil = self.bump().unwrap_or(':');
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            self.diagnostics.push(Diagnostic::error(
                &self.span_from(mark),
                format!("expected a name after '{sigil}'"),
            ));
        } else {
            self.push(TokenKind::NamedPlaceholder, mark, name);
        }
    }

    fn number(&mut self, mark: (u32, u32, usize)) {
        // Hex literal
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let span = self.span_from(mark);
            let text = self.src[span.start_offset..span.end_offset].to_string();
            self.push(TokenKind::Number, mark, text);
            return;
        }
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(c) = self.peek() {
            match c {
                c if c.is_ascii_digit() => {
                    self.bump();
                }
                '.' if !seen_dot && !seen_exp => {
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' if !seen_exp => {
                    seen_exp = true;
                    self.bump();
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let span = self.span_from(mark);
        let text = self.src[span.start_offset..span.end_offset].to_string();
        self.push(TokenKind::Number, mark, text);
    }

    fn ident_or_blob(&mut self, mark: (u32, u32, usize)) {
        // x'..' / X'..' blob literal
        if matches!(self.peek(), Some('x') | Some('X')) && self.peek_at(1) == Some('\'') {
            self.bump();
            self.bump();
            let mut value = String::new();
            loop {
                match self.peek() {
                    Some('\'') => {
                        self.bump();
                        break;
                    }
                    Some(c) => {
                        self.bump();
                        value.push(c);
                    }
                    None => {
                        self.diagnostics
                            .push(Diagnostic::error(&self.span_from(mark), "unterminated blob literal"));
                        break;
                    }
                }
            }
            self.push(TokenKind::BlobLit, mark, value);
            return;
        }
        let mut value = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                value.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(TokenKind::Ident { quoted: false }, mark, value);
    }

    fn symbol(&mut self, mark: (u32, u32, usize)) {
        let c = self.bump().unwrap_or('\0');
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semicolon,
            '*' => TokenKind::Star,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '~' => TokenKind::Tilde,
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                }
                TokenKind::Eq
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::NotEq
                } else {
                    self.diagnostics
                        .push(Diagnostic::error(&self.span_from(mark), "unexpected character '!'"));
                    return;
                }
            }
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    TokenKind::LtEq
                }
                Some('>') => {
                    self.bump();
                    TokenKind::NotEq
                }
                Some('<') => {
                    self.bump();
                    TokenKind::ShiftLeft
                }
                _ => TokenKind::Lt,
            },
            '>' => match self.peek() {
                Some('=') => {
                    self.bump();
                    TokenKind::GtEq
                }
                Some('>') => {
                    self.bump();
                    TokenKind::ShiftRight
                }
                _ => TokenKind::Gt,
            },
            '|' => {
                if self.peek() == Some('|') {
                    self.bump();
                    TokenKind::Concat
                } else {
                    TokenKind::BitOr
                }
            }
            '&' => TokenKind::BitAnd,
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    &self.span_from(mark),
                    format!("unexpected character '{c}'"),
                ));
                return;
            }
        };
        self.push_symbol(kind, mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, diagnostics) = tokenize("test.sql", src);
        assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_and_symbols() {
        let (tokens, _) = tokenize("t.sql", "SELECT id FROM users;");
        assert!(tokens[0].is_kw("select"));
        assert!(tokens[1].is_ident());
        assert!(tokens[2].is_kw("FROM"));
        assert_eq!(tokens[4].kind, TokenKind::Semicolon);
        assert_eq!(tokens[5].kind, TokenKind::Eof);
    }

    #[test]
    fn test_quoted_identifiers_unquoted() {
        let (tokens, _) = tokenize("t.sql", r#""users" `posts` [orders]"#);
        for (tok, expected) in tokens.iter().zip(["users", "posts", "orders"]) {
            assert_eq!(tok.kind, TokenKind::Ident { quoted: true });
            assert_eq!(tok.value, expected);
        }
    }

    #[test]
    fn test_quoted_ident_is_not_keyword() {
        let (tokens, _) = tokenize("t.sql", r#""select""#);
        assert!(!tokens[0].is_kw("select"));
    }

    #[test]
    fn test_string_literal_escape() {
        let (tokens, _) = tokenize("t.sql", "'it''s'");
        assert_eq!(tokens[0].kind, TokenKind::StringLit);
        assert_eq!(tokens[0].value, "it's");
    }

    #[test]
    fn test_placeholders() {
        let (tokens, _) = tokenize("t.sql", "? ?3 :name @arg $x");
        assert_eq!(tokens[0].kind, TokenKind::Question);
        assert_eq!(tokens[1].kind, TokenKind::QuestionNumber(3));
        assert_eq!(tokens[2].kind, TokenKind::NamedPlaceholder);
        assert_eq!(tokens[2].value, "name");
        assert_eq!(tokens[3].value, "arg");
        assert_eq!(tokens[4].value, "x");
    }

    #[test]
    fn test_slice_marker_survives_comments() {
        let (tokens, _) = tokenize("t.sql", "IN (/*SLICE:ids*/) /* plain */ -- line");
        let slice: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::SliceMarker)
            .collect();
        assert_eq!(slice.len(), 1);
        assert_eq!(slice[0].value, "ids");
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("-- a comment\n1 /* block */ 2"),
            vec![TokenKind::Number, TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a <> b != c == d || e <= f >= g"),
            vec![
                TokenKind::Ident { quoted: false },
                TokenKind::NotEq,
                TokenKind::Ident { quoted: false },
                TokenKind::NotEq,
                TokenKind::Ident { quoted: false },
                TokenKind::Eq,
                TokenKind::Ident { quoted: false },
                TokenKind::Concat,
                TokenKind::Ident { quoted: false },
                TokenKind::LtEq,
                TokenKind::Ident { quoted: false },
                TokenKind::GtEq,
                TokenKind::Ident { quoted: false },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blob_literal() {
        let (tokens, _) = tokenize("t.sql", "x'DEADBEEF'");
        assert_eq!(tokens[0].kind, TokenKind::BlobLit);
        assert_eq!(tokens[0].value, "DEADBEEF");
    }

    #[test]
    fn test_numbers() {
        let (tokens, _) = tokenize("t.sql", "42 3.14 1e10 0xFF .5");
        assert!(tokens[..5].iter().all(|t| t.kind == TokenKind::Number));
    }

    #[test]
    fn test_spans_track_lines() {
        let (tokens, _) = tokenize("t.sql", "SELECT\n  id");
        assert_eq!(tokens[0].span.start_line, 1);
        assert_eq!(tokens[1].span.start_line, 2);
        assert_eq!(tokens[1].span.start_col, 3);
    }

    #[test]
    fn test_unterminated_string_diagnostic() {
        let (_, diagnostics) = tokenize("t.sql", "'oops");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("unterminated"));
    }

    #[test]
    fn test_offsets_are_byte_offsets() {
        let src = "a 'é' b";
        let (tokens, _) = tokenize("t.sql", src);
        let b = tokens.iter().find(|t| t.value == "b").unwrap();
        assert_eq!(&src[b.span.start_offset..b.span.end_offset], "b");
    }
}
