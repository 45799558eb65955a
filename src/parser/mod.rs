//! SQL parsing: tokenizer, AST, and the schema/query recursive-descent parsers

pub mod ast;
pub mod lexer;
pub mod query;
pub mod schema;

use crate::diagnostics::{Diagnostic, Span};
use lexer::{Token, TokenKind};

/// Result of a single parse production. On error the caller records the
/// diagnostic and recovers at the next statement boundary.
pub(crate) type ParseResult<T> = Result<T, Diagnostic>;

/// Shared token cursor for the schema and query parsers.
pub(crate) struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(matches!(
            tokens.last().map(|t| &t.kind),
            Some(TokenKind::Eof)
        ));
        Self { tokens, pos: 0 }
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_at(&self, ahead: usize) -> &Token {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.peek().is_eof()
    }

    pub(crate) fn span(&self) -> Span {
        self.peek().span.clone()
    }

    pub(crate) fn at_kw(&self, kw: &str) -> bool {
        self.peek().is_kw(kw)
    }

    pub(crate) fn at_kind(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    pub(crate) fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_kind(&mut self, kind: &TokenKind) -> bool {
        if self.at_kind(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_kw(&mut self, kw: &str) -> ParseResult<Token> {
        if self.at_kw(kw) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected '{}'", kw.to_ascii_uppercase())))
        }
    }

    pub(crate) fn expect_kind(&mut self, kind: &TokenKind, what: &str) -> ParseResult<Token> {
        if self.at_kind(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected {what}")))
        }
    }

    /// Consume an identifier (quoted or bare). Bare identifiers that are
    /// reserved in context are the caller's concern.
    pub(crate) fn expect_ident(&mut self, what: &str) -> ParseResult<Token> {
        if self.peek().is_ident() {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected {what}")))
        }
    }

    pub(crate) fn unexpected(&self, expected: &str) -> Diagnostic {
        let tok = self.peek();
        let found = if tok.is_eof() {
            "end of input".to_string()
        } else {
            format!("'{}'", tok.text)
        };
        Diagnostic::error(&tok.span, format!("{expected}, found {found}"))
    }

    /// Error recovery: skip to just past the next semicolon, or to EOF.
    pub(crate) fn skip_past_semicolon(&mut self) {
        while !self.is_eof() {
            let tok = self.advance();
            if tok.kind == TokenKind::Semicolon {
                break;
            }
        }
    }
}
