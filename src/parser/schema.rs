//! Recursive-descent parser for schema DDL
//!
//! Turns one schema file into a [`SchemaFragment`] of tables, views, and
//! standalone indexes. A parse error is recorded and recovery resumes at the
//! next top-level statement boundary, so one bad statement does not hide the
//! rest of the file.

use indexmap::IndexMap;
use log::debug;

use crate::catalog::{Column, ForeignKey, Index, SchemaFragment, Table, View, normalize_name};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::parser::lexer::{self, Token, TokenKind};
use crate::parser::query::QueryParser;
use crate::parser::{Cursor, ParseResult};
use crate::types::{SemanticType, SqlDialect};

/// Parse one schema file into a fragment plus diagnostics.
pub fn parse_schema(file: &str, src: &str, dialect: SqlDialect) -> (SchemaFragment, Vec<Diagnostic>) {
    let (tokens, lex_diagnostics) = lexer::tokenize(file, src);
    let mut sink = DiagnosticSink::new();
    sink.extend(lex_diagnostics);

    let mut parser = SchemaParser {
        cur: Cursor::new(tokens),
        src,
        dialect,
        fragment: SchemaFragment::default(),
    };
    parser.run(&mut sink);
    debug!(
        "parsed schema {file}: {} tables, {} views, {} indexes",
        parser.fragment.tables.len(),
        parser.fragment.views.len(),
        parser.fragment.indexes.len()
    );
    (parser.fragment, sink.into_vec())
}

/// Column-constraint keywords that terminate a multi-word type token.
const TYPE_STOP_WORDS: &[&str] = &[
    "primary", "not", "null", "unique", "default", "references", "check", "collate",
    "constraint", "generated", "as", "autoincrement",
];

struct SchemaParser<'a> {
    cur: Cursor,
    src: &'a str,
    dialect: SqlDialect,
    fragment: SchemaFragment,
}

impl SchemaParser<'_> {
    fn run(&mut self, sink: &mut DiagnosticSink) {
        while !self.cur.is_eof() {
            if self.cur.eat_kind(&TokenKind::Semicolon) {
                continue;
            }
            if let Err(diag) = self.parse_statement(sink) {
                sink.push(diag);
                self.cur.skip_past_semicolon();
            }
        }
    }

    fn parse_statement(&mut self, sink: &mut DiagnosticSink) -> ParseResult<()> {
        self.cur.expect_kw("create")?;
        if self.cur.at_kw("table") {
            self.parse_create_table(sink)
        } else if self.cur.at_kw("view") {
            self.parse_create_view()
        } else if self.cur.at_kw("index") || self.cur.at_kw("unique") {
            self.parse_create_index()
        } else {
            Err(self.cur.unexpected("expected TABLE, VIEW, or INDEX"))
        }
    }

    // --- CREATE TABLE ---

    fn parse_create_table(&mut self, sink: &mut DiagnosticSink) -> ParseResult<()> {
        let start = self.cur.span();
        self.cur.expect_kw("table")?;
        self.eat_if_not_exists();
        let name_tok = self.cur.expect_ident("table name")?;

        let mut table = Table {
            name: name_tok.value.clone(),
            columns: IndexMap::new(),
            primary_key: vec![],
            uniques: vec![],
            foreign_keys: vec![],
            indexes: vec![],
            without_rowid: false,
            span: start.to(&name_tok.span),
        };

        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        loop {
            if self.at_table_constraint() {
                self.parse_table_constraint(&mut table)?;
            } else if let Err(diag) = self.parse_column_def(&mut table) {
                // Record and resync at the next comma so sibling columns
                // still land in the catalog.
                sink.push(diag);
                self.skip_to_column_boundary();
            }
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.cur.expect_kind(&TokenKind::RParen, "')'")?;
        if self.cur.eat_kw("without") {
            self.cur.expect_kw("rowid")?;
            table.without_rowid = true;
        }

        // Table-level PK forces its integer columns non-nullable.
        for pk_col in table.primary_key.clone() {
            if let Some(col) = table.columns.get_mut(&normalize_name(&pk_col)) {
                if col.semantic_type.family() == crate::types::TypeFamily::Integer {
                    col.nullable = false;
                }
            }
        }

        self.fragment.tables.push(table);
        Ok(())
    }

    fn at_table_constraint(&self) -> bool {
        self.cur.at_kw("primary")
            || self.cur.at_kw("unique")
            || self.cur.at_kw("foreign")
            || self.cur.at_kw("check")
            || self.cur.at_kw("constraint")
    }

    fn parse_table_constraint(&mut self, table: &mut Table) -> ParseResult<()> {
        if self.cur.eat_kw("constraint") {
            self.cur.expect_ident("constraint name")?;
        }
        if self.cur.eat_kw("primary") {
            self.cur.expect_kw("key")?;
            table.primary_key = self.parse_paren_name_list()?;
        } else if self.cur.eat_kw("unique") {
            let columns = self.parse_paren_name_list()?;
            table.uniques.push(columns);
        } else if self.cur.eat_kw("foreign") {
            self.cur.expect_kw("key")?;
            let fk_start = self.cur.span();
            let columns = self.parse_paren_name_list()?;
            let (ref_table, ref_columns) = self.parse_references()?;
            table.foreign_keys.push(ForeignKey {
                columns,
                ref_table,
                ref_columns,
                span: fk_start.to(&self.cur.span()),
            });
        } else if self.cur.eat_kw("check") {
            self.skip_balanced_parens()?;
        } else {
            return Err(self.cur.unexpected("expected a table constraint"));
        }
        Ok(())
    }

    fn parse_column_def(&mut self, table: &mut Table) -> ParseResult<()> {
        let name_tok = self.cur.expect_ident("column name")?;
        let col_span = name_tok.span.clone();
        let name = name_tok.value;

        let declared_type = self.parse_type_token();
        let semantic_type = SemanticType::from_sql_token(&declared_type, self.dialect);

        let mut nullable = true;
        let mut default = None;
        let mut inline_pk = false;

        loop {
            if self.cur.eat_kw("primary") {
                self.cur.expect_kw("key")?;
                self.cur.eat_kw("asc");
                self.cur.eat_kw("desc");
                self.cur.eat_kw("autoincrement");
                inline_pk = true;
            } else if self.cur.at_kw("not") && self.cur.peek_at(1).is_kw("null") {
                self.cur.advance();
                self.cur.advance();
                nullable = false;
            } else if self.cur.eat_kw("null") {
                nullable = true;
            } else if self.cur.eat_kw("unique") {
                table.uniques.push(vec![name.clone()]);
            } else if self.cur.eat_kw("default") {
                default = Some(self.parse_default_text()?);
            } else if self.cur.at_kw("references") {
                let fk_start = self.cur.span();
                let (ref_table, ref_columns) = self.parse_references()?;
                table.foreign_keys.push(ForeignKey {
                    columns: vec![name.clone()],
                    ref_table,
                    ref_columns,
                    span: fk_start.to(&self.cur.span()),
                });
            } else if self.cur.eat_kw("check") {
                self.skip_balanced_parens()?;
            } else if self.cur.eat_kw("collate") {
                self.cur.expect_ident("collation name")?;
            } else if self.cur.eat_kw("constraint") {
                self.cur.expect_ident("constraint name")?;
            } else {
                break;
            }
        }

        if inline_pk {
            table.primary_key = vec![name.clone()];
            // Integer primary keys are implicitly NOT NULL.
            if semantic_type.family() == crate::types::TypeFamily::Integer {
                nullable = false;
            }
        }

        let key = normalize_name(&name);
        if table.columns.contains_key(&key) {
            return Err(Diagnostic::error(
                &col_span,
                format!("duplicate column '{}' in table '{}'", name, table.name),
            ));
        }
        table.columns.insert(
            key,
            Column {
                name,
                declared_type,
                semantic_type,
                nullable,
                default,
                span: col_span,
            },
        );
        Ok(())
    }

    /// Consume a possibly multi-word type token with optional `(N[,M])`
    /// modifiers, returning it as written. A bare column with no type is
    /// legal in SQLite; the empty string maps to blob affinity.
    fn parse_type_token(&mut self) -> String {
        let mut parts: Vec<String> = Vec::new();
        while self.cur.peek().is_ident() {
            let tok = self.cur.peek();
            if matches!(tok.kind, TokenKind::Ident { quoted: false })
                && TYPE_STOP_WORDS
                    .iter()
                    .any(|kw| tok.value.eq_ignore_ascii_case(kw))
            {
                break;
            }
            parts.push(self.cur.advance().value);
        }
        let mut raw = parts.join(" ");
        if !raw.is_empty() && self.cur.at_kind(&TokenKind::LParen) {
            self.cur.advance();
            raw.push('(');
            let mut first = true;
            while !self.cur.at_kind(&TokenKind::RParen) && !self.cur.is_eof() {
                let tok = self.cur.advance();
                if tok.kind == TokenKind::Comma {
                    raw.push(',');
                    first = true;
                    continue;
                }
                if !first {
                    raw.push(' ');
                }
                first = false;
                raw.push_str(tok.text.trim());
            }
            self.cur.eat_kind(&TokenKind::RParen);
            raw.push(')');
        }
        raw
    }

    /// `DEFAULT` value: a literal, signed number, identifier, or a
    /// parenthesized expression captured as source text.
    fn parse_default_text(&mut self) -> ParseResult<String> {
        if self.cur.at_kind(&TokenKind::LParen) {
            let start = self.cur.span().start_offset;
            self.skip_balanced_parens()?;
            return Ok(self.source_since(start));
        }
        let mut text = String::new();
        if self.cur.eat_kind(&TokenKind::Minus) {
            text.push('-');
        } else if self.cur.eat_kind(&TokenKind::Plus) {
            text.push('+');
        }
        let tok = self.cur.advance();
        match tok.kind {
            TokenKind::Number | TokenKind::StringLit | TokenKind::BlobLit => {
                text.push_str(tok.text.trim());
            }
            TokenKind::Ident { .. } => {
                let start = tok.span.start_offset;
                // Function-call defaults like `strftime('%s','now')`.
                if self.cur.at_kind(&TokenKind::LParen) {
                    self.skip_balanced_parens()?;
                    text.push_str(&self.source_since(start));
                } else {
                    text.push_str(&tok.text);
                }
            }
            _ => {
                return Err(Diagnostic::error(&tok.span, "expected a default value"));
            }
        }
        Ok(text)
    }

    /// Source text from `start` up to the current token, trimmed. Used to
    /// capture default expressions verbatim.
    fn source_since(&self, start: usize) -> String {
        let end = self.cur.span().start_offset;
        self.src[start..end.max(start)].trim_end().to_string()
    }

    fn parse_references(&mut self) -> ParseResult<(String, Vec<String>)> {
        self.cur.expect_kw("references")?;
        let table_tok = self.cur.expect_ident("referenced table")?;
        let ref_columns = if self.cur.at_kind(&TokenKind::LParen) {
            self.parse_paren_name_list()?
        } else {
            Vec::new()
        };
        // ON DELETE/UPDATE actions, MATCH, and deferrability are consumed
        // without being modeled.
        loop {
            if self.cur.eat_kw("on") {
                self.cur.advance(); // DELETE or UPDATE
                if self.cur.eat_kw("set") {
                    self.cur.advance(); // NULL or DEFAULT
                } else if self.cur.eat_kw("no") {
                    self.cur.expect_kw("action")?;
                } else {
                    self.cur.advance(); // CASCADE or RESTRICT
                }
            } else if self.cur.eat_kw("match") {
                self.cur.expect_ident("match type")?;
            } else if self.cur.at_kw("deferrable")
                || (self.cur.at_kw("not") && self.cur.peek_at(1).is_kw("deferrable"))
            {
                self.cur.eat_kw("not");
                self.cur.advance(); // DEFERRABLE
                if self.cur.eat_kw("initially") {
                    self.cur.advance(); // DEFERRED or IMMEDIATE
                }
            } else {
                break;
            }
        }
        Ok((table_tok.value, ref_columns))
    }

    fn parse_paren_name_list(&mut self) -> ParseResult<Vec<String>> {
        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        let mut names = Vec::new();
        loop {
            let tok = self.cur.expect_ident("column name")?;
            names.push(tok.value);
            // Per-column ASC/DESC in key definitions.
            self.cur.eat_kw("asc");
            self.cur.eat_kw("desc");
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.cur.expect_kind(&TokenKind::RParen, "')'")?;
        Ok(names)
    }

    fn skip_balanced_parens(&mut self) -> ParseResult<()> {
        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.cur.is_eof() {
                return Err(self.cur.unexpected("expected ')'"));
            }
            match self.cur.advance().kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// After a bad column definition, resync to the comma or closing paren
    /// of the column list.
    fn skip_to_column_boundary(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.cur.peek().kind {
                TokenKind::Eof => return,
                TokenKind::Comma if depth == 0 => return,
                TokenKind::RParen if depth == 0 => return,
                TokenKind::LParen => {
                    depth += 1;
                    self.cur.advance();
                }
                TokenKind::RParen => {
                    depth -= 1;
                    self.cur.advance();
                }
                TokenKind::Semicolon => return,
                _ => {
                    self.cur.advance();
                }
            }
        }
    }

    // --- CREATE VIEW ---

    fn parse_create_view(&mut self) -> ParseResult<()> {
        let start = self.cur.span();
        self.cur.expect_kw("view")?;
        self.eat_if_not_exists();
        let name_tok = self.cur.expect_ident("view name")?;
        if self.cur.at_kind(&TokenKind::LParen) {
            // Optional explicit column list; the projection is resolved from
            // the defining query, so names here are accepted and dropped.
            self.parse_paren_name_list()?;
        }
        self.cur.expect_kw("as")?;

        // Hand the rest of the statement to the query parser.
        let mut body_tokens: Vec<Token> = Vec::new();
        while !self.cur.is_eof() && !self.cur.at_kind(&TokenKind::Semicolon) {
            body_tokens.push(self.cur.advance());
        }
        let eof_span = self.cur.span();
        body_tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            value: String::new(),
            span: eof_span,
        });

        let mut sub = QueryParser::from_tokens(body_tokens);
        let query = sub.parse_select_statement()?;

        self.fragment.views.push(View {
            name: name_tok.value,
            projection: Vec::new(),
            query,
            span: start.to(&self.cur.span()),
        });
        Ok(())
    }

    // --- CREATE INDEX ---

    fn parse_create_index(&mut self) -> ParseResult<()> {
        let start = self.cur.span();
        let unique = self.cur.eat_kw("unique");
        self.cur.expect_kw("index")?;
        self.eat_if_not_exists();
        let name_tok = self.cur.expect_ident("index name")?;
        self.cur.expect_kw("on")?;
        let table_tok = self.cur.expect_ident("table name")?;

        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        let mut columns = Vec::new();
        loop {
            // Plain column or an expression entry; expressions are captured
            // as their source text.
            if self.cur.peek().is_ident()
                && matches!(
                    self.cur.peek_at(1).kind,
                    TokenKind::Comma | TokenKind::RParen
                )
            {
                columns.push(self.cur.advance().value);
            } else if self.cur.peek().is_ident()
                && (self.cur.peek_at(1).is_kw("asc")
                    || self.cur.peek_at(1).is_kw("desc")
                    || self.cur.peek_at(1).is_kw("collate"))
            {
                columns.push(self.cur.advance().value);
                if self.cur.eat_kw("collate") {
                    self.cur.expect_ident("collation name")?;
                }
                self.cur.eat_kw("asc");
                self.cur.eat_kw("desc");
            } else {
                columns.push(self.capture_index_expression()?);
            }
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.cur.expect_kind(&TokenKind::RParen, "')'")?;

        let where_clause = if self.cur.eat_kw("where") {
            let mut text = String::new();
            while !self.cur.is_eof() && !self.cur.at_kind(&TokenKind::Semicolon) {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(self.cur.advance().text.trim());
            }
            Some(text)
        } else {
            None
        };

        self.fragment.indexes.push((
            table_tok.value,
            Index {
                name: name_tok.value,
                columns,
                unique,
                where_clause,
                span: start.to(&self.cur.span()),
            },
        ));
        Ok(())
    }

    /// Capture one index expression entry as text, stopping at a top-level
    /// comma or the closing paren.
    fn capture_index_expression(&mut self) -> ParseResult<String> {
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            match self.cur.peek().kind {
                TokenKind::Eof => return Err(self.cur.unexpected("expected ')'")),
                TokenKind::Comma if depth == 0 => return Ok(text),
                TokenKind::RParen if depth == 0 => return Ok(text),
                TokenKind::LParen => {
                    depth += 1;
                    text.push('(');
                    self.cur.advance();
                }
                TokenKind::RParen => {
                    depth -= 1;
                    text.push(')');
                    self.cur.advance();
                }
                _ => {
                    if !text.is_empty() && !text.ends_with('(') {
                        text.push(' ');
                    }
                    text.push_str(self.cur.advance().text.trim());
                }
            }
        }
    }

    fn eat_if_not_exists(&mut self) {
        if self.cur.at_kw("if") && self.cur.peek_at(1).is_kw("not") {
            self.cur.advance();
            self.cur.advance();
            self.cur.eat_kw("exists");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> SchemaFragment {
        let (fragment, diagnostics) = parse_schema("schema.sql", src, SqlDialect::Sqlite);
        assert!(
            !diagnostics.iter().any(|d| d.is_error()),
            "unexpected errors: {diagnostics:?}"
        );
        fragment
    }

    #[test]
    fn test_create_table_basic() {
        let fragment = parse_ok(
            "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);",
        );
        assert_eq!(fragment.tables.len(), 1);
        let table = &fragment.tables[0];
        assert_eq!(table.name, "users");
        let cols: Vec<_> = table.columns().collect();
        assert_eq!(cols.len(), 3);
        assert!(!cols[0].nullable, "integer pk is implicitly not null");
        assert!(!cols[1].nullable);
        assert!(cols[2].nullable);
        assert_eq!(table.primary_key, vec!["id"]);
        assert_eq!(cols[0].semantic_type, SemanticType::Integer);
        assert_eq!(cols[1].semantic_type, SemanticType::Text);
    }

    #[test]
    fn test_if_not_exists_and_without_rowid() {
        let fragment = parse_ok(
            "CREATE TABLE IF NOT EXISTS kv(k TEXT PRIMARY KEY, v BLOB) WITHOUT ROWID;",
        );
        assert!(fragment.tables[0].without_rowid);
        // Text PK is not implicitly NOT NULL.
        assert!(fragment.tables[0].get_column("k").unwrap().nullable);
    }

    #[test]
    fn test_table_level_constraints() {
        let fragment = parse_ok(
            "CREATE TABLE memberships(
                user_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                role TEXT DEFAULT 'member',
                PRIMARY KEY (user_id, group_id),
                UNIQUE (user_id, role),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );",
        );
        let table = &fragment.tables[0];
        assert_eq!(table.primary_key, vec!["user_id", "group_id"]);
        assert_eq!(table.uniques.len(), 1);
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].ref_table, "users");
        assert_eq!(
            table.get_column("role").unwrap().default.as_deref(),
            Some("'member'")
        );
    }

    #[test]
    fn test_inline_references() {
        let fragment = parse_ok(
            "CREATE TABLE posts(id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));",
        );
        let fks = &fragment.tables[0].foreign_keys;
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].columns, vec!["user_id"]);
        assert_eq!(fks[0].ref_columns, vec!["id"]);
    }

    #[test]
    fn test_duplicate_column_is_error() {
        let (fragment, diagnostics) = parse_schema(
            "schema.sql",
            "CREATE TABLE t(a INTEGER, a TEXT, b TEXT);",
            SqlDialect::Sqlite,
        );
        assert!(diagnostics.iter().any(|d| d.is_error()));
        // The table still lands, with the duplicate dropped and 'b' kept.
        assert_eq!(fragment.tables.len(), 1);
        assert!(fragment.tables[0].get_column("b").is_some());
    }

    #[test]
    fn test_create_view() {
        let fragment = parse_ok(
            "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE VIEW user_names AS SELECT id, name FROM users;",
        );
        assert_eq!(fragment.views.len(), 1);
        assert_eq!(fragment.views[0].name, "user_names");
        assert!(fragment.views[0].projection.is_empty());
    }

    #[test]
    fn test_create_index_variants() {
        let fragment = parse_ok(
            "CREATE TABLE users(id INTEGER PRIMARY KEY, email TEXT);
             CREATE UNIQUE INDEX idx_email ON users(email);
             CREATE INDEX idx_partial ON users(email) WHERE email IS NOT NULL;",
        );
        assert_eq!(fragment.indexes.len(), 2);
        assert!(fragment.indexes[0].1.unique);
        assert!(fragment.indexes[1].1.where_clause.is_some());
    }

    #[test]
    fn test_error_recovery_at_statement_boundary() {
        let (fragment, diagnostics) = parse_schema(
            "schema.sql",
            "CREATE GARBAGE nonsense;
             CREATE TABLE ok(id INTEGER PRIMARY KEY);",
            SqlDialect::Sqlite,
        );
        assert!(diagnostics.iter().any(|d| d.is_error()));
        assert_eq!(fragment.tables.len(), 1);
        assert_eq!(fragment.tables[0].name, "ok");
    }

    #[test]
    fn test_quoted_identifiers() {
        let fragment = parse_ok(r#"CREATE TABLE "Order Items"(`id` INTEGER, [qty] INT);"#);
        let table = &fragment.tables[0];
        assert_eq!(table.name, "Order Items");
        assert!(table.get_column("qty").is_some());
    }

    #[test]
    fn test_multiword_type() {
        let fragment = parse_ok("CREATE TABLE t(n UNSIGNED BIG INT, d DOUBLE PRECISION);");
        let table = &fragment.tables[0];
        assert_eq!(table.get_column("n").unwrap().declared_type, "UNSIGNED BIG INT");
        assert_eq!(
            table.get_column("n").unwrap().semantic_type,
            SemanticType::Integer
        );
    }

    #[test]
    fn test_varchar_modifiers_preserved() {
        let fragment = parse_ok("CREATE TABLE t(s VARCHAR(100) NOT NULL);");
        let col = fragment.tables[0].get_column("s").unwrap();
        assert_eq!(col.declared_type, "VARCHAR(100)");
        assert_eq!(col.semantic_type, SemanticType::Varchar { n: Some(100) });
    }

    #[test]
    fn test_autoincrement() {
        let fragment =
            parse_ok("CREATE TABLE seq(id INTEGER PRIMARY KEY AUTOINCREMENT, v TEXT);");
        assert_eq!(fragment.tables[0].primary_key, vec!["id"]);
    }
}
