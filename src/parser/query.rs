//! Recursive-descent parser for the DML subset
//!
//! Consumes one query block's SQL and produces a [`Statement`] plus the
//! placeholder inventory in textual order. An unexpected token yields a
//! single diagnostic and recovery skips to the next statement terminator;
//! placeholders already seen are never dropped.

use crate::diagnostics::{Diagnostic, Span};
use crate::parser::ast::*;
use crate::parser::lexer::{self, Token, TokenKind};
use crate::parser::{Cursor, ParseResult};

/// A successfully parsed query with its placeholder inventory. Inventory
/// order is first-textual-occurrence order, the authoritative order for
/// parameter signatures.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub statement: Statement,
    pub placeholders: Vec<Placeholder>,
}

/// Parse one statement from a standalone string (spans relative to `file`).
pub fn parse_query(file: &str, sql: &str) -> (Option<ParsedQuery>, Vec<Diagnostic>) {
    parse_query_at(file, sql, 1, 0)
}

/// Parse one statement whose text begins at `line_base`/`offset_base` within
/// `file`, as handed out by the block slicer. Spans are reported in
/// whole-file coordinates.
pub fn parse_query_at(
    file: &str,
    sql: &str,
    line_base: u32,
    offset_base: usize,
) -> (Option<ParsedQuery>, Vec<Diagnostic>) {
    let (mut tokens, mut diagnostics) = lexer::tokenize(file, sql);
    for tok in &mut tokens {
        rebase_span(&mut tok.span, line_base, offset_base);
    }
    for diag in &mut diagnostics {
        diag.line += line_base - 1;
    }
    let lex_failed = diagnostics.iter().any(Diagnostic::is_error);

    let mut parser = QueryParser {
        cur: Cursor::new(tokens),
        placeholders: Vec::new(),
    };
    match parser.parse_statement() {
        Ok(statement) => {
            if lex_failed {
                (None, diagnostics)
            } else {
                (
                    Some(ParsedQuery {
                        statement,
                        placeholders: parser.placeholders,
                    }),
                    diagnostics,
                )
            }
        }
        Err(diag) => {
            diagnostics.push(diag);
            (None, diagnostics)
        }
    }
}

fn rebase_span(span: &mut Span, line_base: u32, offset_base: usize) {
    span.start_line += line_base - 1;
    span.end_line += line_base - 1;
    span.start_offset += offset_base;
    span.end_offset += offset_base;
}

/// Keywords that terminate a table alias position.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "group", "having", "order", "limit", "offset", "on", "join", "inner", "left",
    "right", "full", "cross", "natural", "union", "intersect", "except", "set", "returning",
    "values", "using", "when", "then", "else", "end", "and", "or", "not", "as", "from",
];

/// Reserved words that may not start an expression as a bare column name.
const EXPR_RESERVED: &[&str] = &[
    "select", "from", "where", "group", "having", "order", "limit", "offset", "on", "join",
    "and", "or", "when", "then", "else", "end", "set", "returning", "union", "intersect",
    "except", "by", "as", "values", "into", "in", "between", "is", "insert", "update", "delete",
];

pub(crate) struct QueryParser {
    cur: Cursor,
    placeholders: Vec<Placeholder>,
}

impl QueryParser {
    pub(crate) fn from_tokens(tokens: Vec<Token>) -> Self {
        Self {
            cur: Cursor::new(tokens),
            placeholders: Vec::new(),
        }
    }

    pub(crate) fn parse_statement(&mut self) -> ParseResult<Statement> {
        let stmt = if self.cur.at_kw("with") || self.cur.at_kw("select") {
            Statement::Select(self.parse_select_statement()?)
        } else if self.cur.at_kw("insert") {
            Statement::Insert(self.parse_insert()?)
        } else if self.cur.at_kw("update") {
            Statement::Update(self.parse_update()?)
        } else if self.cur.at_kw("delete") {
            Statement::Delete(self.parse_delete()?)
        } else {
            return Err(self.cur.unexpected("expected SELECT, INSERT, UPDATE, or DELETE"));
        };
        self.cur.eat_kind(&TokenKind::Semicolon);
        if !self.cur.is_eof() {
            return Err(self.cur.unexpected("expected end of query"));
        }
        Ok(stmt)
    }

    // --- SELECT ---

    pub(crate) fn parse_select_statement(&mut self) -> ParseResult<SelectStatement> {
        let start = self.cur.span();
        let with = if self.cur.at_kw("with") {
            Some(self.parse_with_clause()?)
        } else {
            None
        };
        let body = self.parse_select_body()?;

        let mut order_by = Vec::new();
        if self.cur.eat_kw("order") {
            self.cur.expect_kw("by")?;
            loop {
                order_by.push(self.parse_ordering_term()?);
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let mut limit = None;
        let mut offset = None;
        if self.cur.eat_kw("limit") {
            let first = self.parse_expr()?;
            if self.cur.eat_kw("offset") {
                limit = Some(first);
                offset = Some(self.parse_expr()?);
            } else if self.cur.eat_kind(&TokenKind::Comma) {
                // `LIMIT offset, count`
                offset = Some(first);
                limit = Some(self.parse_expr()?);
            } else {
                limit = Some(first);
            }
        }

        let span = start.to(&self.cur.span());
        Ok(SelectStatement {
            with,
            body,
            order_by,
            limit,
            offset,
            span,
        })
    }

    fn parse_with_clause(&mut self) -> ParseResult<WithClause> {
        self.cur.expect_kw("with")?;
        let recursive = self.cur.eat_kw("recursive");
        let mut ctes = Vec::new();
        loop {
            let start = self.cur.span();
            let name = self.parse_ident("CTE name")?;
            let mut columns = Vec::new();
            if self.cur.eat_kind(&TokenKind::LParen) {
                loop {
                    columns.push(self.parse_ident("column name")?);
                    if !self.cur.eat_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.cur.expect_kind(&TokenKind::RParen, "')'")?;
            }
            self.cur.expect_kw("as")?;
            self.cur.expect_kind(&TokenKind::LParen, "'('")?;
            let query = self.parse_select_statement()?;
            self.cur.expect_kind(&TokenKind::RParen, "')'")?;
            let span = start.to(&self.cur.span());
            ctes.push(Cte {
                name,
                columns,
                query,
                span,
            });
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        Ok(WithClause { recursive, ctes })
    }

    fn parse_select_body(&mut self) -> ParseResult<SelectBody> {
        let mut body = SelectBody::Core(self.parse_select_core()?);
        loop {
            let op = if self.cur.at_kw("union") {
                self.cur.advance();
                if self.cur.eat_kw("all") {
                    SetOperator::UnionAll
                } else {
                    SetOperator::Union
                }
            } else if self.cur.at_kw("intersect") {
                self.cur.advance();
                SetOperator::Intersect
            } else if self.cur.at_kw("except") {
                self.cur.advance();
                SetOperator::Except
            } else {
                break;
            };
            let right = SelectBody::Core(self.parse_select_core()?);
            let span = body.span().to(&self.cur.span());
            body = SelectBody::SetOp {
                op,
                left: Box::new(body),
                right: Box::new(right),
                span,
            };
        }
        Ok(body)
    }

    fn parse_select_core(&mut self) -> ParseResult<SelectCore> {
        let start = self.cur.span();
        self.cur.expect_kw("select")?;
        let distinct = if self.cur.eat_kw("distinct") {
            true
        } else {
            self.cur.eat_kw("all");
            false
        };

        let mut projection = Vec::new();
        loop {
            projection.push(self.parse_select_item()?);
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }

        let from = if self.cur.eat_kw("from") {
            Some(self.parse_from_clause()?)
        } else {
            None
        };
        let where_clause = if self.cur.eat_kw("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let mut group_by = Vec::new();
        if self.cur.eat_kw("group") {
            self.cur.expect_kw("by")?;
            loop {
                group_by.push(self.parse_expr()?);
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let having = if self.cur.eat_kw("having") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let span = start.to(&self.cur.span());
        Ok(SelectCore {
            distinct,
            projection,
            from,
            where_clause,
            group_by,
            having,
            span,
        })
    }

    fn parse_select_item(&mut self) -> ParseResult<SelectItem> {
        if self.cur.at_kind(&TokenKind::Star) {
            let tok = self.cur.advance();
            return Ok(SelectItem::Wildcard { span: tok.span });
        }
        // `t.*`
        if self.cur.peek().is_ident()
            && self.cur.peek_at(1).kind == TokenKind::Dot
            && self.cur.peek_at(2).kind == TokenKind::Star
        {
            let table_tok = self.cur.advance();
            self.cur.advance(); // .
            let star = self.cur.advance();
            let span = table_tok.span.to(&star.span);
            return Ok(SelectItem::QualifiedWildcard {
                table: ident_from(table_tok),
                span,
            });
        }
        let expr = self.parse_expr()?;
        let alias = self.parse_alias()?;
        Ok(SelectItem::Expr { expr, alias })
    }

    /// `AS ident`, or a bare identifier that is not a clause keyword.
    fn parse_alias(&mut self) -> ParseResult<Option<Ident>> {
        if self.cur.eat_kw("as") {
            let tok = self.cur.expect_ident("alias")?;
            return Ok(Some(ident_from(tok)));
        }
        let tok = self.cur.peek();
        if tok.is_ident() {
            let bare_keyword = matches!(tok.kind, TokenKind::Ident { quoted: false })
                && CLAUSE_KEYWORDS
                    .iter()
                    .any(|kw| tok.value.eq_ignore_ascii_case(kw));
            if !bare_keyword {
                let tok = self.cur.advance();
                return Ok(Some(ident_from(tok)));
            }
        }
        Ok(None)
    }

    fn parse_from_clause(&mut self) -> ParseResult<FromClause> {
        let first = self.parse_table_source()?;
        let mut joins = Vec::new();
        loop {
            if self.cur.eat_kind(&TokenKind::Comma) {
                // Comma join is a cross join.
                let source = self.parse_table_source()?;
                joins.push(Join {
                    kind: JoinKind::Cross,
                    source,
                    predicate: None,
                });
                continue;
            }
            let kind = if self.cur.at_kw("join") || self.cur.at_kw("inner") {
                self.cur.eat_kw("inner");
                self.cur.expect_kw("join")?;
                JoinKind::Inner
            } else if self.cur.at_kw("left") {
                self.cur.advance();
                self.cur.eat_kw("outer");
                self.cur.expect_kw("join")?;
                JoinKind::Left
            } else if self.cur.at_kw("right") {
                self.cur.advance();
                self.cur.eat_kw("outer");
                self.cur.expect_kw("join")?;
                JoinKind::Right
            } else if self.cur.at_kw("full") {
                self.cur.advance();
                self.cur.eat_kw("outer");
                self.cur.expect_kw("join")?;
                JoinKind::Full
            } else if self.cur.at_kw("cross") {
                self.cur.advance();
                self.cur.expect_kw("join")?;
                JoinKind::Cross
            } else {
                break;
            };
            let source = self.parse_table_source()?;
            let predicate = if self.cur.eat_kw("on") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            joins.push(Join {
                kind,
                source,
                predicate,
            });
        }
        Ok(FromClause { first, joins })
    }

    fn parse_table_source(&mut self) -> ParseResult<TableSource> {
        if self.cur.at_kind(&TokenKind::LParen) {
            let start = self.cur.span();
            self.cur.advance();
            let query = self.parse_select_statement()?;
            self.cur.expect_kind(&TokenKind::RParen, "')'")?;
            let alias = self.parse_alias()?;
            let span = start.to(&self.cur.span());
            return Ok(TableSource::Subquery {
                query: Box::new(query),
                alias,
                span,
            });
        }
        let name_tok = self.cur.expect_ident("table name")?;
        let name = ident_from(name_tok);
        let alias = self.parse_alias()?;
        let span = match &alias {
            Some(a) => name.span.to(&a.span),
            None => name.span.clone(),
        };
        Ok(TableSource::Table(TableRef { name, alias, span }))
    }

    fn parse_ordering_term(&mut self) -> ParseResult<OrderingTerm> {
        let expr = self.parse_expr()?;
        let desc = if self.cur.eat_kw("desc") {
            true
        } else {
            self.cur.eat_kw("asc");
            false
        };
        let nulls_first = if self.cur.eat_kw("nulls") {
            if self.cur.eat_kw("first") {
                Some(true)
            } else {
                self.cur.expect_kw("last")?;
                Some(false)
            }
        } else {
            None
        };
        Ok(OrderingTerm {
            expr,
            desc,
            nulls_first,
        })
    }

    // --- INSERT / UPDATE / DELETE ---

    fn parse_insert(&mut self) -> ParseResult<InsertStatement> {
        let start = self.cur.span();
        self.cur.expect_kw("insert")?;
        // `INSERT OR REPLACE|IGNORE|ABORT|FAIL|ROLLBACK`
        if self.cur.eat_kw("or") {
            self.cur.expect_ident("conflict resolution")?;
        }
        self.cur.expect_kw("into")?;
        let table = self.parse_table_ref()?;

        let mut columns = Vec::new();
        if self.cur.at_kind(&TokenKind::LParen) {
            self.cur.advance();
            loop {
                let tok = self.cur.expect_ident("column name")?;
                columns.push(ident_from(tok));
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
            self.cur.expect_kind(&TokenKind::RParen, "')'")?;
        }

        let source = if self.cur.eat_kw("values") {
            let mut rows = Vec::new();
            loop {
                self.cur.expect_kind(&TokenKind::LParen, "'('")?;
                let mut row = Vec::new();
                loop {
                    row.push(self.parse_expr()?);
                    if !self.cur.eat_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.cur.expect_kind(&TokenKind::RParen, "')'")?;
                rows.push(row);
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if self.cur.at_kw("select") || self.cur.at_kw("with") {
            InsertSource::Select(Box::new(self.parse_select_statement()?))
        } else if self.cur.eat_kw("default") {
            self.cur.expect_kw("values")?;
            InsertSource::DefaultValues
        } else {
            return Err(self.cur.unexpected("expected VALUES, SELECT, or DEFAULT VALUES"));
        };

        let on_conflict = if self.cur.at_kw("on") {
            Some(self.parse_on_conflict()?)
        } else {
            None
        };
        let returning = self.parse_returning()?;
        let span = start.to(&self.cur.span());
        Ok(InsertStatement {
            table,
            columns,
            source,
            on_conflict,
            returning,
            span,
        })
    }

    fn parse_on_conflict(&mut self) -> ParseResult<OnConflict> {
        let start = self.cur.span();
        self.cur.expect_kw("on")?;
        self.cur.expect_kw("conflict")?;
        let mut target_columns = Vec::new();
        if self.cur.at_kind(&TokenKind::LParen) {
            self.cur.advance();
            loop {
                let tok = self.cur.expect_ident("column name")?;
                target_columns.push(ident_from(tok));
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
            self.cur.expect_kind(&TokenKind::RParen, "')'")?;
            // Conflict-target WHERE for partial indexes.
            if self.cur.eat_kw("where") {
                self.parse_expr()?;
            }
        }
        self.cur.expect_kw("do")?;
        let action = if self.cur.eat_kw("nothing") {
            ConflictAction::DoNothing
        } else {
            self.cur.expect_kw("update")?;
            self.cur.expect_kw("set")?;
            let assignments = self.parse_assignments()?;
            let where_clause = if self.cur.eat_kw("where") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            ConflictAction::DoUpdate {
                assignments,
                where_clause,
            }
        };
        let span = start.to(&self.cur.span());
        Ok(OnConflict {
            target_columns,
            action,
            span,
        })
    }

    fn parse_update(&mut self) -> ParseResult<UpdateStatement> {
        let start = self.cur.span();
        self.cur.expect_kw("update")?;
        let table = self.parse_table_ref()?;
        self.cur.expect_kw("set")?;
        let assignments = self.parse_assignments()?;
        let where_clause = if self.cur.eat_kw("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let returning = self.parse_returning()?;
        let span = start.to(&self.cur.span());
        Ok(UpdateStatement {
            table,
            assignments,
            where_clause,
            returning,
            span,
        })
    }

    fn parse_delete(&mut self) -> ParseResult<DeleteStatement> {
        let start = self.cur.span();
        self.cur.expect_kw("delete")?;
        self.cur.expect_kw("from")?;
        let table = self.parse_table_ref()?;
        let where_clause = if self.cur.eat_kw("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let returning = self.parse_returning()?;
        let span = start.to(&self.cur.span());
        Ok(DeleteStatement {
            table,
            where_clause,
            returning,
            span,
        })
    }

    fn parse_table_ref(&mut self) -> ParseResult<TableRef> {
        let name_tok = self.cur.expect_ident("table name")?;
        let name = ident_from(name_tok);
        let alias = self.parse_alias()?;
        let span = match &alias {
            Some(a) => name.span.to(&a.span),
            None => name.span.clone(),
        };
        Ok(TableRef { name, alias, span })
    }

    fn parse_assignments(&mut self) -> ParseResult<Vec<Assignment>> {
        let mut assignments = Vec::new();
        loop {
            let col_tok = self.cur.expect_ident("column name")?;
            let column = ident_from(col_tok);
            self.cur.expect_kind(&TokenKind::Eq, "'='")?;
            let value = self.parse_expr()?;
            let span = column.span.to(value.span());
            assignments.push(Assignment {
                column,
                value,
                span,
            });
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        Ok(assignments)
    }

    fn parse_returning(&mut self) -> ParseResult<Option<Vec<SelectItem>>> {
        if !self.cur.eat_kw("returning") {
            return Ok(None);
        }
        let mut items = Vec::new();
        loop {
            items.push(self.parse_select_item()?);
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        Ok(Some(items))
    }

    // --- Expressions, precedence climbing ---

    pub(crate) fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.cur.at_kw("or") {
            self.cur.advance();
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        while self.cur.at_kw("and") {
            self.cur.advance();
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.cur.at_kw("not") && !self.cur.peek_at(1).is_kw("exists") {
            let start = self.cur.span();
            self.cur.advance();
            let operand = self.parse_not()?;
            let span = start.to(operand.span());
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            if self.cur.at_kind(&TokenKind::Eq) {
                self.cur.advance();
                let right = self.parse_relational()?;
                left = binary(BinaryOp::Eq, left, right);
            } else if self.cur.at_kind(&TokenKind::NotEq) {
                self.cur.advance();
                let right = self.parse_relational()?;
                left = binary(BinaryOp::NotEq, left, right);
            } else if self.cur.at_kw("is") {
                self.cur.advance();
                let negated = self.cur.eat_kw("not");
                if self.cur.at_kw("null") {
                    let null_tok = self.cur.advance();
                    let span = left.span().to(&null_tok.span);
                    left = Expr::IsNull {
                        operand: Box::new(left),
                        negated,
                        span,
                    };
                } else {
                    let right = self.parse_relational()?;
                    let op = if negated { BinaryOp::IsNot } else { BinaryOp::Is };
                    left = binary(op, left, right);
                }
            } else if self.cur.at_kw("between")
                || self.cur.at_kw("like")
                || self.cur.at_kw("glob")
                || self.cur.at_kw("in")
                || (self.cur.at_kw("not")
                    && (self.cur.peek_at(1).is_kw("between")
                        || self.cur.peek_at(1).is_kw("like")
                        || self.cur.peek_at(1).is_kw("glob")
                        || self.cur.peek_at(1).is_kw("in")))
            {
                let negated = self.cur.eat_kw("not");
                left = self.parse_postfix_predicate(left, negated)?;
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_postfix_predicate(&mut self, operand: Expr, negated: bool) -> ParseResult<Expr> {
        if self.cur.eat_kw("between") {
            let low = self.parse_relational()?;
            self.cur.expect_kw("and")?;
            let high = self.parse_relational()?;
            let span = operand.span().to(high.span());
            return Ok(Expr::Between {
                operand: Box::new(operand),
                low: Box::new(low),
                high: Box::new(high),
                negated,
                span,
            });
        }
        if self.cur.at_kw("like") || self.cur.at_kw("glob") {
            let op = if self.cur.eat_kw("like") {
                LikeOp::Like
            } else {
                self.cur.advance();
                LikeOp::Glob
            };
            let pattern = self.parse_relational()?;
            if self.cur.eat_kw("escape") {
                self.parse_relational()?;
            }
            let span = operand.span().to(&self.cur.span());
            return Ok(Expr::Like {
                operand: Box::new(operand),
                pattern: Box::new(pattern),
                op,
                negated,
                span,
            });
        }
        self.cur.expect_kw("in")?;
        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        if self.cur.at_kind(&TokenKind::SliceMarker) {
            let tok = self.cur.advance();
            let placeholder = self.record_placeholder(PlaceholderKind::Slice(tok.value), tok.span);
            let close = self.cur.expect_kind(&TokenKind::RParen, "')'")?;
            let span = operand.span().to(&close.span);
            return Ok(Expr::InSlice {
                operand: Box::new(operand),
                placeholder,
                negated,
                span,
            });
        }
        if self.cur.at_kw("select") || self.cur.at_kw("with") {
            let query = self.parse_select_statement()?;
            let close = self.cur.expect_kind(&TokenKind::RParen, "')'")?;
            let span = operand.span().to(&close.span);
            return Ok(Expr::InSubquery {
                operand: Box::new(operand),
                query: Box::new(query),
                negated,
                span,
            });
        }
        let mut items = Vec::new();
        if self.cur.at_kind(&TokenKind::RParen) {
            return Err(self.cur.unexpected("expected a value list, subquery, or slice marker"));
        }
        loop {
            items.push(self.parse_expr()?);
            if !self.cur.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        let close = self.cur.expect_kind(&TokenKind::RParen, "')'")?;
        let span = operand.span().to(&close.span);
        Ok(Expr::InList {
            operand: Box::new(operand),
            items,
            negated,
            span,
        })
    }

    fn parse_relational(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_bitwise()?;
        loop {
            let op = match self.cur.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.cur.advance();
            let right = self.parse_bitwise()?;
            left = binary(op, left, right);
        }
    }

    fn parse_bitwise(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.cur.peek().kind {
                TokenKind::BitAnd => BinaryOp::BitAnd,
                TokenKind::BitOr => BinaryOp::BitOr,
                TokenKind::ShiftLeft => BinaryOp::ShiftLeft,
                TokenKind::ShiftRight => BinaryOp::ShiftRight,
                _ => return Ok(left),
            };
            self.cur.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.cur.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.cur.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.cur.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.cur.advance();
            let right = self.parse_concat()?;
            left = binary(op, left, right);
        }
    }

    fn parse_concat(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        while self.cur.at_kind(&TokenKind::Concat) {
            self.cur.advance();
            let right = self.parse_unary()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.cur.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => None, // unary plus is a no-op; consume and continue
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => return self.parse_primary(),
        };
        let start = self.cur.span();
        self.cur.advance();
        let operand = self.parse_unary()?;
        match op {
            Some(op) => {
                let span = start.to(operand.span());
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                    span,
                })
            }
            None => Ok(operand),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let tok = self.cur.peek().clone();
        match &tok.kind {
            TokenKind::Number => {
                self.cur.advance();
                let literal = parse_number(&tok);
                Ok(Expr::Literal(literal, tok.span))
            }
            TokenKind::StringLit => {
                self.cur.advance();
                Ok(Expr::Literal(Literal::String(tok.value), tok.span))
            }
            TokenKind::BlobLit => {
                self.cur.advance();
                Ok(Expr::Literal(Literal::Blob(tok.value), tok.span))
            }
            TokenKind::Question => {
                self.cur.advance();
                Ok(Expr::Placeholder(
                    self.record_placeholder(PlaceholderKind::Anonymous, tok.span),
                ))
            }
            TokenKind::QuestionNumber(n) => {
                let n = *n;
                self.cur.advance();
                Ok(Expr::Placeholder(
                    self.record_placeholder(PlaceholderKind::Positional(n), tok.span),
                ))
            }
            TokenKind::NamedPlaceholder => {
                self.cur.advance();
                Ok(Expr::Placeholder(
                    self.record_placeholder(PlaceholderKind::Named(tok.value), tok.span),
                ))
            }
            TokenKind::SliceMarker => {
                Err(Diagnostic::error(
                    &tok.span,
                    "slice markers are only valid inside IN (...)",
                ))
            }
            TokenKind::LParen => {
                self.cur.advance();
                if self.cur.at_kw("select") || self.cur.at_kw("with") {
                    let query = self.parse_select_statement()?;
                    let close = self.cur.expect_kind(&TokenKind::RParen, "')'")?;
                    let span = tok.span.to(&close.span);
                    return Ok(Expr::Subquery {
                        query: Box::new(query),
                        span,
                    });
                }
                let inner = self.parse_expr()?;
                self.cur.expect_kind(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident { .. } => self.parse_ident_expr(),
            _ => Err(self.cur.unexpected("expected an expression")),
        }
    }

    fn parse_ident_expr(&mut self) -> ParseResult<Expr> {
        let tok = self.cur.peek().clone();

        if tok.is_kw("null") {
            self.cur.advance();
            return Ok(Expr::Literal(Literal::Null, tok.span));
        }
        if tok.is_kw("true") {
            self.cur.advance();
            return Ok(Expr::Literal(Literal::True, tok.span));
        }
        if tok.is_kw("false") {
            self.cur.advance();
            return Ok(Expr::Literal(Literal::False, tok.span));
        }
        if tok.is_kw("case") {
            return self.parse_case();
        }
        if tok.is_kw("cast") {
            return self.parse_cast();
        }
        if tok.is_kw("exists") {
            return self.parse_exists(false);
        }
        if tok.is_kw("not") && self.cur.peek_at(1).is_kw("exists") {
            self.cur.advance();
            return self.parse_exists(true);
        }

        // Function call
        if self.cur.peek_at(1).kind == TokenKind::LParen {
            return self.parse_function_call();
        }

        // Reserved words cannot begin a column reference.
        if matches!(tok.kind, TokenKind::Ident { quoted: false })
            && EXPR_RESERVED
                .iter()
                .any(|kw| tok.value.eq_ignore_ascii_case(kw))
        {
            return Err(self.cur.unexpected("expected an expression"));
        }

        // Column reference: `c` or `t.c`
        let first = self.cur.advance();
        if self.cur.at_kind(&TokenKind::Dot) {
            self.cur.advance();
            let col_tok = self.cur.expect_ident("column name")?;
            let span = first.span.to(&col_tok.span);
            return Ok(Expr::Column(ColumnRef {
                table: Some(ident_from(first)),
                column: ident_from(col_tok),
                span,
            }));
        }
        let span = first.span.clone();
        Ok(Expr::Column(ColumnRef {
            table: None,
            column: ident_from(first),
            span,
        }))
    }

    fn parse_case(&mut self) -> ParseResult<Expr> {
        let start = self.cur.span();
        self.cur.expect_kw("case")?;
        let operand = if !self.cur.at_kw("when") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        let mut branches = Vec::new();
        while self.cur.eat_kw("when") {
            let condition = self.parse_expr()?;
            self.cur.expect_kw("then")?;
            let result = self.parse_expr()?;
            branches.push((condition, result));
        }
        if branches.is_empty() {
            return Err(self.cur.unexpected("expected WHEN"));
        }
        let else_branch = if self.cur.eat_kw("else") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        let end = self.cur.expect_kw("end")?;
        let span = start.to(&end.span);
        Ok(Expr::Case {
            operand,
            branches,
            else_branch,
            span,
        })
    }

    fn parse_cast(&mut self) -> ParseResult<Expr> {
        let start = self.cur.span();
        self.cur.expect_kw("cast")?;
        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        let expr = self.parse_expr()?;
        self.cur.expect_kw("as")?;
        // Type tokens may span several words and carry modifiers.
        let mut type_token = String::new();
        while self.cur.peek().is_ident() {
            if !type_token.is_empty() {
                type_token.push(' ');
            }
            type_token.push_str(&self.cur.advance().value);
        }
        if type_token.is_empty() {
            return Err(self.cur.unexpected("expected a type name"));
        }
        if self.cur.at_kind(&TokenKind::LParen) {
            self.cur.advance();
            type_token.push('(');
            let mut first = true;
            while !self.cur.at_kind(&TokenKind::RParen) && !self.cur.is_eof() {
                if !first {
                    type_token.push(',');
                }
                first = false;
                let tok = self.cur.advance();
                type_token.push_str(tok.text.trim());
                self.cur.eat_kind(&TokenKind::Comma);
            }
            self.cur.expect_kind(&TokenKind::RParen, "')'")?;
            type_token.push(')');
        }
        let close = self.cur.expect_kind(&TokenKind::RParen, "')'")?;
        let span = start.to(&close.span);
        Ok(Expr::Cast {
            expr: Box::new(expr),
            type_token,
            span,
        })
    }

    fn parse_exists(&mut self, negated: bool) -> ParseResult<Expr> {
        let start = self.cur.span();
        self.cur.expect_kw("exists")?;
        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        let query = self.parse_select_statement()?;
        let close = self.cur.expect_kind(&TokenKind::RParen, "')'")?;
        let span = start.to(&close.span);
        Ok(Expr::Exists {
            query: Box::new(query),
            negated,
            span,
        })
    }

    fn parse_function_call(&mut self) -> ParseResult<Expr> {
        let name_tok = self.cur.advance();
        let name = ident_from(name_tok);
        let start = name.span.clone();
        self.cur.expect_kind(&TokenKind::LParen, "'('")?;

        let distinct = self.cur.eat_kw("distinct");
        let args = if self.cur.at_kind(&TokenKind::Star) {
            self.cur.advance();
            FunctionArgs::Star
        } else if self.cur.at_kind(&TokenKind::RParen) {
            FunctionArgs::List(Vec::new())
        } else {
            let mut list = Vec::new();
            loop {
                list.push(self.parse_expr()?);
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
            FunctionArgs::List(list)
        };
        self.cur.expect_kind(&TokenKind::RParen, "')'")?;

        let over = if self.cur.eat_kw("over") {
            Some(self.parse_window_spec()?)
        } else {
            None
        };
        let span = start.to(&self.cur.span());
        Ok(Expr::Function(FunctionCall {
            name,
            args,
            distinct,
            over,
            span,
        }))
    }

    fn parse_window_spec(&mut self) -> ParseResult<WindowSpec> {
        self.cur.expect_kind(&TokenKind::LParen, "'('")?;
        let mut partition_by = Vec::new();
        if self.cur.eat_kw("partition") {
            self.cur.expect_kw("by")?;
            loop {
                partition_by.push(self.parse_expr()?);
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let mut order_by = Vec::new();
        if self.cur.eat_kw("order") {
            self.cur.expect_kw("by")?;
            loop {
                order_by.push(self.parse_ordering_term()?);
                if !self.cur.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        // Frame specifications (ROWS/RANGE/GROUPS ...) are accepted and skipped.
        let mut depth = 0usize;
        while !self.cur.is_eof() {
            match self.cur.peek().kind {
                TokenKind::RParen if depth == 0 => break,
                TokenKind::RParen => {
                    depth -= 1;
                    self.cur.advance();
                }
                TokenKind::LParen => {
                    depth += 1;
                    self.cur.advance();
                }
                _ => {
                    self.cur.advance();
                }
            }
        }
        self.cur.expect_kind(&TokenKind::RParen, "')'")?;
        Ok(WindowSpec {
            partition_by,
            order_by,
        })
    }

    fn parse_ident(&mut self, what: &str) -> ParseResult<Ident> {
        let tok = self.cur.expect_ident(what)?;
        Ok(ident_from(tok))
    }

    fn record_placeholder(&mut self, kind: PlaceholderKind, span: Span) -> Placeholder {
        let placeholder = Placeholder { kind, span };
        self.placeholders.push(placeholder.clone());
        placeholder
    }
}

fn ident_from(tok: Token) -> Ident {
    Ident {
        name: tok.value,
        span: tok.span,
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span().to(right.span());
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span,
    }
}

fn parse_number(tok: &Token) -> Literal {
    let text = tok.text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if let Ok(n) = i64::from_str_radix(hex, 16) {
            return Literal::Integer(n);
        }
    }
    if let Ok(n) = text.parse::<i64>() {
        Literal::Integer(n)
    } else {
        Literal::Real(text.parse::<f64>().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(sql: &str) -> ParsedQuery {
        let (parsed, diagnostics) = parse_query("q.sql", sql);
        assert!(
            !diagnostics.iter().any(|d| d.is_error()),
            "unexpected errors for {sql:?}: {diagnostics:?}"
        );
        parsed.expect("statement")
    }

    fn parse_err(sql: &str) -> Vec<Diagnostic> {
        let (parsed, diagnostics) = parse_query("q.sql", sql);
        assert!(parsed.is_none(), "expected failure for {sql:?}");
        diagnostics
    }

    #[test]
    fn test_simple_select() {
        let parsed = parse_ok("SELECT id, name FROM users WHERE id = ?1;");
        let Statement::Select(select) = &parsed.statement else {
            panic!("expected select");
        };
        let core = select.body.leftmost_core();
        assert_eq!(core.projection.len(), 2);
        assert!(core.where_clause.is_some());
        assert_eq!(parsed.placeholders.len(), 1);
        assert_eq!(parsed.placeholders[0].kind, PlaceholderKind::Positional(1));
    }

    #[test]
    fn test_join_chain() {
        let parsed =
            parse_ok("SELECT p.title, u.name FROM posts p LEFT JOIN users u ON u.id = p.user_id");
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let core = select.body.leftmost_core();
        let from = core.from.as_ref().unwrap();
        assert_eq!(from.joins.len(), 1);
        assert_eq!(from.joins[0].kind, JoinKind::Left);
        assert!(from.joins[0].predicate.is_some());
    }

    #[test]
    fn test_comma_join_is_cross() {
        let parsed = parse_ok("SELECT * FROM a, b");
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let from = select.body.leftmost_core().from.as_ref().unwrap();
        assert_eq!(from.joins[0].kind, JoinKind::Cross);
    }

    #[test]
    fn test_cte_and_union() {
        let parsed = parse_ok(
            "WITH recent AS (SELECT id FROM posts) \
             SELECT id FROM recent UNION ALL SELECT id FROM users ORDER BY id LIMIT 10",
        );
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        assert!(select.with.is_some());
        assert!(matches!(
            select.body,
            SelectBody::SetOp {
                op: SetOperator::UnionAll,
                ..
            }
        ));
        assert_eq!(select.order_by.len(), 1);
        assert!(select.limit.is_some());
    }

    #[test]
    fn test_in_slice_marker() {
        let parsed = parse_ok("SELECT id FROM users WHERE id IN (/*SLICE:ids*/)");
        assert_eq!(parsed.placeholders.len(), 1);
        assert_eq!(
            parsed.placeholders[0].kind,
            PlaceholderKind::Slice("ids".to_string())
        );
    }

    #[test]
    fn test_insert_with_returning() {
        let parsed =
            parse_ok("INSERT INTO users (name, email) VALUES (?1, ?2) RETURNING id, name");
        let Statement::Insert(insert) = &parsed.statement else {
            panic!();
        };
        assert_eq!(insert.columns.len(), 2);
        assert!(insert.returning.is_some());
        assert_eq!(parsed.placeholders.len(), 2);
    }

    #[test]
    fn test_insert_on_conflict_do_update() {
        let parsed = parse_ok(
            "INSERT INTO counters (key, n) VALUES (:key, 1) \
             ON CONFLICT (key) DO UPDATE SET n = n + 1",
        );
        let Statement::Insert(insert) = &parsed.statement else {
            panic!();
        };
        let conflict = insert.on_conflict.as_ref().unwrap();
        assert!(matches!(conflict.action, ConflictAction::DoUpdate { .. }));
    }

    #[test]
    fn test_update_and_delete() {
        let parsed = parse_ok("UPDATE users SET name = :name WHERE id = :id");
        assert!(matches!(parsed.statement, Statement::Update(_)));
        // Named placeholders keep their identifiers, in textual order.
        assert_eq!(
            parsed
                .placeholders
                .iter()
                .map(|p| &p.kind)
                .collect::<Vec<_>>(),
            vec![
                &PlaceholderKind::Named("name".to_string()),
                &PlaceholderKind::Named("id".to_string()),
            ]
        );

        let parsed = parse_ok("DELETE FROM users WHERE id = ?");
        assert!(matches!(parsed.statement, Statement::Delete(_)));
        assert_eq!(parsed.placeholders[0].kind, PlaceholderKind::Anonymous);
    }

    #[test]
    fn test_case_cast_coalesce() {
        let parsed = parse_ok(
            "SELECT CASE WHEN n > 0 THEN 'pos' ELSE 'neg' END, \
             CAST(n AS TEXT), COALESCE(email, 'none') FROM users",
        );
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        assert_eq!(select.body.leftmost_core().projection.len(), 3);
    }

    #[test]
    fn test_window_function() {
        let parsed = parse_ok(
            "SELECT id, ROW_NUMBER() OVER (PARTITION BY user_id ORDER BY created_at DESC) FROM posts",
        );
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let core = select.body.leftmost_core();
        let SelectItem::Expr { expr, .. } = &core.projection[1] else {
            panic!();
        };
        let Expr::Function(f) = expr else { panic!() };
        assert!(f.over.is_some());
        assert_eq!(f.over.as_ref().unwrap().partition_by.len(), 1);
    }

    #[test]
    fn test_operator_precedence() {
        // a + b * c parses as a + (b * c)
        let parsed = parse_ok("SELECT a + b * c FROM t");
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let SelectItem::Expr { expr, .. } = &select.body.leftmost_core().projection[0] else {
            panic!();
        };
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary, got {expr:?}");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            **right,
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_not_exists() {
        let parsed =
            parse_ok("SELECT id FROM users u WHERE NOT EXISTS (SELECT 1 FROM posts WHERE user_id = u.id)");
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let where_clause = select.body.leftmost_core().where_clause.as_ref().unwrap();
        assert!(matches!(where_clause, Expr::Exists { negated: true, .. }));
    }

    #[test]
    fn test_unexpected_token_single_error() {
        let diagnostics = parse_err("SELECT FROM WHERE");
        assert_eq!(diagnostics.iter().filter(|d| d.is_error()).count(), 1);
    }

    #[test]
    fn test_error_position() {
        let diagnostics = parse_err("SELECT id FROM users WHERE id = = 1");
        let err = diagnostics.iter().find(|d| d.is_error()).unwrap();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 33);
    }

    #[test]
    fn test_span_rebase() {
        let (parsed, _) = parse_query_at("queries.sql", "SELECT id FROM users", 5, 120);
        let statement = parsed.unwrap().statement;
        assert_eq!(statement.span().start_line, 5);
        assert_eq!(statement.span().start_offset, 120);
    }

    #[test]
    fn test_select_star_and_qualified_star() {
        let parsed = parse_ok("SELECT *, u.* FROM users u");
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let core = select.body.leftmost_core();
        assert!(matches!(core.projection[0], SelectItem::Wildcard { .. }));
        assert!(matches!(
            core.projection[1],
            SelectItem::QualifiedWildcard { .. }
        ));
    }

    #[test]
    fn test_between_and_like() {
        let parsed = parse_ok(
            "SELECT id FROM users WHERE id BETWEEN ?1 AND ?2 AND name LIKE '%x%' AND tag GLOB 'a*'",
        );
        assert_eq!(parsed.placeholders.len(), 2);
    }

    #[test]
    fn test_group_by_having() {
        let parsed = parse_ok(
            "SELECT user_id, COUNT(*) FROM posts GROUP BY user_id HAVING COUNT(*) > 1",
        );
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let core = select.body.leftmost_core();
        assert_eq!(core.group_by.len(), 1);
        assert!(core.having.is_some());
    }

    #[test]
    fn test_quoted_table_and_column() {
        let parsed = parse_ok(r#"SELECT "id" FROM "users""#);
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let core = select.body.leftmost_core();
        let SelectItem::Expr { expr, .. } = &core.projection[0] else {
            panic!();
        };
        let Expr::Column(col) = expr else { panic!() };
        assert_eq!(col.column.name, "id");
    }

    #[test]
    fn test_subquery_in_from() {
        let parsed = parse_ok("SELECT n FROM (SELECT COUNT(*) AS n FROM users) sub");
        let Statement::Select(select) = &parsed.statement else {
            panic!();
        };
        let from = select.body.leftmost_core().from.as_ref().unwrap();
        assert!(matches!(from.first, TableSource::Subquery { .. }));
    }
}
