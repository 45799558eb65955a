//! Expression typing and placeholder unification
//!
//! Types are computed bottom-up. Placeholders are typed by use site: a
//! placeholder compared to, assigned from, or listed against a typed operand
//! takes that operand's type. A placeholder seen at multiple sites must
//! unify; a cross-family conflict is an error at the later site.

use std::collections::HashMap;

use crate::analyzer::Analyzer;
use crate::analyzer::scope::{Lookup, Scope};
use crate::diagnostics::{Diagnostic, Span};
use crate::parser::ast::*;
use crate::types::{SemanticType, TypeFamily};

/// Identity of a distinct parameter after index assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ParamKey {
    Positional(u32),
    Named(String),
    Slice(String),
}

#[derive(Debug)]
pub(crate) struct ParamSlot {
    pub key: ParamKey,
    pub name: String,
    pub ty: SemanticType,
    pub nullable: bool,
    pub is_variadic: bool,
    pub span: Span,
    /// True once some use site assigned a concrete type.
    pub typed: bool,
}

/// Distinct parameters in first-textual-occurrence order, plus a map from
/// each placeholder occurrence (by byte offset) to its slot.
#[derive(Debug, Default)]
pub(crate) struct ParamTable {
    pub slots: Vec<ParamSlot>,
    by_offset: HashMap<usize, usize>,
}

impl ParamTable {
    /// Assign indices and fold the occurrence inventory into distinct slots.
    /// Anonymous `?` takes one past the highest index seen so far, so mixing
    /// with explicit `?N` stays consistent; the same `?N` twice is one slot.
    pub fn from_inventory(placeholders: &[Placeholder]) -> Self {
        let mut table = ParamTable::default();
        let mut max_index = 0u32;
        for ph in placeholders {
            let key = match &ph.kind {
                PlaceholderKind::Anonymous => {
                    max_index += 1;
                    ParamKey::Positional(max_index)
                }
                PlaceholderKind::Positional(n) => {
                    max_index = max_index.max(*n);
                    ParamKey::Positional(*n)
                }
                PlaceholderKind::Named(name) => ParamKey::Named(name.clone()),
                PlaceholderKind::Slice(name) => ParamKey::Slice(name.clone()),
            };
            let slot_idx = match table.slots.iter().position(|s| s.key == key) {
                Some(idx) => idx,
                None => {
                    let name = match &key {
                        ParamKey::Positional(n) => format!("arg{n}"),
                        ParamKey::Named(name) | ParamKey::Slice(name) => name.clone(),
                    };
                    table.slots.push(ParamSlot {
                        is_variadic: matches!(key, ParamKey::Slice(_)),
                        key,
                        name,
                        ty: SemanticType::Unknown,
                        nullable: true,
                        span: ph.span.clone(),
                        typed: false,
                    });
                    table.slots.len() - 1
                }
            };
            table.by_offset.insert(ph.span.start_offset, slot_idx);
        }
        table
    }

    /// Unify one occurrence with a use-site type. The first concrete type
    /// wins the slot; later sites must stay in the same family (widening is
    /// fine) or the unification fails with an error.
    pub fn hint(
        &mut self,
        ph: &Placeholder,
        ty: &SemanticType,
        nullable: bool,
    ) -> Result<(), Diagnostic> {
        let Some(&idx) = self.by_offset.get(&ph.span.start_offset) else {
            return Ok(());
        };
        let slot = &mut self.slots[idx];
        if ty.is_unknown() {
            return Ok(());
        }
        if !slot.typed {
            slot.ty = ty.clone();
            slot.nullable = nullable;
            slot.typed = true;
            return Ok(());
        }
        let merged = slot.ty.lub(ty);
        if merged.is_unknown() {
            return Err(Diagnostic::error(
                &ph.span,
                format!(
                    "parameter '{}' is used as {} here but as {} elsewhere",
                    slot.name, ty, slot.ty
                ),
            ));
        }
        slot.ty = merged;
        // A site that rejects null narrows the parameter.
        slot.nullable = slot.nullable && nullable;
        Ok(())
    }

    /// Current slot type for an occurrence, for use after hinting.
    pub fn current(&self, ph: &Placeholder) -> (SemanticType, bool) {
        match self.by_offset.get(&ph.span.start_offset) {
            Some(&idx) => {
                let slot = &self.slots[idx];
                (slot.ty.clone(), slot.nullable)
            }
            None => (SemanticType::Unknown, true),
        }
    }
}

/// A computed (type, nullability) pair.
pub(crate) type Typed = (SemanticType, bool);

const AGGREGATES: &[&str] = &["count", "sum", "avg", "min", "max", "total", "group_concat"];

pub(crate) fn is_aggregate_call(f: &FunctionCall) -> bool {
    f.over.is_none()
        && AGGREGATES
            .iter()
            .any(|a| f.name.name.eq_ignore_ascii_case(a))
}

impl Analyzer<'_> {
    /// Type an expression bottom-up, recording diagnostics and hinting
    /// placeholders as use sites are discovered.
    pub(crate) fn type_expr(&mut self, expr: &Expr, scope: &Scope<'_>) -> Typed {
        match expr {
            Expr::Literal(lit, _) => type_literal(lit),
            Expr::Placeholder(ph) => self.params.current(ph),
            Expr::Column(col) => self.type_column_ref(col, scope),
            Expr::Unary { op, operand, .. } => {
                let (ty, nullable) = self.type_expr(operand, scope);
                match op {
                    UnaryOp::Neg => (ty, nullable),
                    UnaryOp::Not => (SemanticType::Boolean, nullable),
                    UnaryOp::BitNot => (SemanticType::Integer, nullable),
                }
            }
            Expr::Binary {
                op, left, right, ..
            } => self.type_binary(*op, left, right, scope),
            Expr::IsNull { operand, .. } => {
                self.type_expr(operand, scope);
                (SemanticType::Boolean, false)
            }
            Expr::Between {
                operand, low, high, ..
            } => {
                self.type_unifying_group(&[operand.as_ref(), low.as_ref(), high.as_ref()], scope);
                (SemanticType::Boolean, false)
            }
            Expr::Like {
                operand, pattern, ..
            } => {
                self.type_expr(operand, scope);
                self.hint_placeholder(pattern, &SemanticType::Text, false);
                self.type_expr(pattern, scope);
                (SemanticType::Boolean, false)
            }
            Expr::InList { operand, items, .. } => {
                let mut group: Vec<&Expr> = Vec::with_capacity(items.len() + 1);
                group.push(operand);
                group.extend(items.iter());
                self.type_unifying_group(&group, scope);
                (SemanticType::Boolean, false)
            }
            Expr::InSubquery { operand, query, .. } => {
                let columns = self.analyze_subquery(query, scope);
                let expected = if columns.len() == 1 {
                    (columns[0].semantic_type.clone(), columns[0].nullable)
                } else {
                    self.sink.error(
                        &query.span,
                        format!(
                            "IN subquery must project exactly one column, found {}",
                            columns.len()
                        ),
                    );
                    (SemanticType::Unknown, true)
                };
                self.hint_placeholder(operand, &expected.0, expected.1);
                self.type_expr(operand, scope);
                (SemanticType::Boolean, false)
            }
            Expr::InSlice {
                operand,
                placeholder,
                ..
            } => {
                let (ty, nullable) = self.type_expr(operand, scope);
                if let Err(diag) = self.params.hint(placeholder, &ty, nullable) {
                    self.sink.push(diag);
                }
                (SemanticType::Boolean, false)
            }
            Expr::Exists { query, .. } => {
                self.analyze_subquery(query, scope);
                (SemanticType::Boolean, false)
            }
            Expr::Case {
                operand,
                branches,
                else_branch,
                ..
            } => {
                if let Some(op) = operand {
                    self.type_expr(op, scope);
                }
                let mut result: Option<Typed> = None;
                for (condition, value) in branches {
                    self.type_expr(condition, scope);
                    let branch = self.type_expr(value, scope);
                    result = Some(merge_branch(result, branch));
                }
                let missing_else = else_branch.is_none();
                if let Some(else_expr) = else_branch {
                    let branch = self.type_expr(else_expr, scope);
                    result = Some(merge_branch(result, branch));
                }
                let (ty, nullable) = result.unwrap_or((SemanticType::Unknown, true));
                (ty, nullable || missing_else)
            }
            Expr::Cast {
                expr, type_token, ..
            } => {
                let (_, nullable) = self.type_expr(expr, scope);
                (
                    SemanticType::from_sql_token(type_token, self.dialect),
                    nullable,
                )
            }
            Expr::Function(f) => self.type_function(f, scope),
            Expr::Subquery { query, span } => {
                let columns = self.analyze_subquery(query, scope);
                match columns.len() {
                    1 => {
                        // A scalar subquery yields NULL when it matches no row.
                        (columns[0].semantic_type.clone(), true)
                    }
                    n => {
                        self.sink.error(
                            span,
                            format!("scalar subquery must project exactly one column, found {n}"),
                        );
                        (SemanticType::Unknown, true)
                    }
                }
            }
        }
    }

    fn type_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, scope: &Scope<'_>) -> Typed {
        // Cross-hint: a placeholder on one side takes the other side's type.
        let mut group = self.type_unifying_group(&[left, right], scope);
        let (rty, rnull) = group.pop().unwrap_or((SemanticType::Unknown, true));
        let (lty, lnull) = group.pop().unwrap_or((SemanticType::Unknown, true));

        if op.is_boolean() {
            let nullable = if matches!(op, BinaryOp::Is | BinaryOp::IsNot) {
                false
            } else {
                lnull || rnull
            };
            return (SemanticType::Boolean, nullable);
        }
        match op {
            BinaryOp::Concat => (SemanticType::Text, lnull || rnull),
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                (SemanticType::Integer, lnull || rnull)
            }
            _ => (lty.arithmetic_result(&rty), lnull || rnull),
        }
    }

    /// Type a group of sibling expressions that must unify (comparison
    /// operands, IN list members, BETWEEN bounds). Each expression is typed
    /// exactly once; untyped placeholders take the first concrete sibling's
    /// type and nullability.
    fn type_unifying_group(&mut self, exprs: &[&Expr], scope: &Scope<'_>) -> Vec<Typed> {
        let mut typed: Vec<Option<Typed>> = exprs
            .iter()
            .map(|e| {
                if matches!(e, Expr::Placeholder(_)) {
                    None
                } else {
                    Some(self.type_expr(e, scope))
                }
            })
            .collect();

        let anchor = typed
            .iter()
            .flatten()
            .find(|(ty, _)| !ty.is_unknown())
            .cloned();

        for (slot, expr) in typed.iter_mut().zip(exprs) {
            if slot.is_none() {
                if let Some((ty, nullable)) = &anchor {
                    self.hint_placeholder(expr, ty, *nullable);
                }
                // Reading a placeholder's current slot emits no diagnostics.
                *slot = Some(self.type_expr(expr, scope));
            }
        }
        typed.into_iter().flatten().collect()
    }

    pub(crate) fn hint_placeholder(&mut self, expr: &Expr, ty: &SemanticType, nullable: bool) {
        if let Expr::Placeholder(ph) = expr {
            if let Err(diag) = self.params.hint(ph, ty, nullable) {
                self.sink.push(diag);
            }
        }
    }

    fn type_column_ref(&mut self, col: &ColumnRef, scope: &Scope<'_>) -> Typed {
        match &col.table {
            Some(qualifier) => match scope.lookup_qualified(&qualifier.name, &col.column.name) {
                Lookup::Found(found) => (found.ty.clone(), found.nullable),
                _ => {
                    if scope.relation(&qualifier.name).is_none() {
                        self.sink.error(
                            &col.span,
                            format!("unknown table or alias '{}'", qualifier.name),
                        );
                    } else {
                        self.sink.error(
                            &col.span,
                            format!(
                                "unknown column '{}' in '{}'",
                                col.column.name, qualifier.name
                            ),
                        );
                    }
                    (SemanticType::Unknown, true)
                }
            },
            None => match scope.lookup_bare(&col.column.name) {
                Lookup::Found(found) => (found.ty.clone(), found.nullable),
                Lookup::Ambiguous(candidates) => {
                    self.sink.error(
                        &col.span,
                        format!(
                            "ambiguous column '{}': candidates in {}",
                            col.column.name,
                            candidates.join(", ")
                        ),
                    );
                    (SemanticType::Unknown, true)
                }
                Lookup::NotFound => {
                    self.sink.error(
                        &col.span,
                        format!("unknown column '{}'", col.column.name),
                    );
                    (SemanticType::Unknown, true)
                }
            },
        }
    }

    fn type_function(&mut self, f: &FunctionCall, scope: &Scope<'_>) -> Typed {
        let name = f.name.name.to_lowercase();

        // Argument types first; they drive most results.
        let arg_types: Vec<Typed> = match &f.args {
            FunctionArgs::Star => Vec::new(),
            FunctionArgs::List(args) => args.iter().map(|a| self.type_expr(a, scope)).collect(),
        };
        if let Some(window) = &f.over {
            for expr in &window.partition_by {
                self.type_expr(expr, scope);
            }
            for term in &window.order_by {
                self.type_expr(&term.expr, scope);
            }
        }
        let first = arg_types.first().cloned();

        match name.as_str() {
            "count" => (SemanticType::BigInteger, false),
            // Aggregates over a possibly-empty set are conservatively nullable.
            "sum" => {
                let ty = match first.as_ref().map(|(t, _)| t.family()) {
                    Some(TypeFamily::Integer) => SemanticType::BigInteger,
                    Some(TypeFamily::Float) => SemanticType::Double,
                    Some(TypeFamily::Decimal) => first.unwrap().0,
                    _ => SemanticType::Unknown,
                };
                (ty, true)
            }
            "avg" => (SemanticType::Double, true),
            "total" | "julianday" => (SemanticType::Double, name == "julianday"),
            "min" | "max" => (
                first.map(|(t, _)| t).unwrap_or(SemanticType::Unknown),
                true,
            ),
            "group_concat" | "string_agg" => (SemanticType::Text, true),
            "row_number" | "rank" | "dense_rank" | "ntile" => (SemanticType::BigInteger, false),
            "lead" | "lag" | "first_value" | "last_value" | "nth_value" => (
                first.map(|(t, _)| t).unwrap_or(SemanticType::Unknown),
                true,
            ),
            "coalesce" | "ifnull" => {
                let mut ty = SemanticType::Unknown;
                let mut all_nullable = true;
                for (i, (arg_ty, arg_null)) in arg_types.iter().enumerate() {
                    ty = if i == 0 { arg_ty.clone() } else { ty.lub(arg_ty) };
                    all_nullable = all_nullable && *arg_null;
                }
                (ty, all_nullable)
            }
            "nullif" => (
                first.map(|(t, _)| t).unwrap_or(SemanticType::Unknown),
                true,
            ),
            "iif" => {
                let then = arg_types.get(1).cloned().unwrap_or((SemanticType::Unknown, true));
                let other = arg_types.get(2).cloned().unwrap_or((SemanticType::Unknown, true));
                (then.0.lub(&other.0), then.1 || other.1)
            }
            "abs" => first.unwrap_or((SemanticType::Unknown, true)),
            "round" => (SemanticType::Double, first.map(|(_, n)| n).unwrap_or(true)),
            "length" | "instr" | "unicode" => {
                (SemanticType::Integer, first.map(|(_, n)| n).unwrap_or(true))
            }
            "upper" | "lower" | "trim" | "ltrim" | "rtrim" | "substr" | "substring"
            | "replace" | "hex" | "printf" | "format" | "quote" | "char" | "concat" => {
                let nullable = arg_types.iter().any(|(_, n)| *n);
                (SemanticType::Text, nullable)
            }
            "date" | "time" | "datetime" | "strftime" => {
                let nullable = arg_types.iter().any(|(_, n)| *n);
                (SemanticType::Text, nullable)
            }
            "unixepoch" | "last_insert_rowid" | "changes" | "total_changes" | "random" => {
                (SemanticType::BigInteger, false)
            }
            "typeof" => (SemanticType::Text, false),
            "likelihood" | "likely" | "unlikely" => {
                first.unwrap_or((SemanticType::Unknown, true))
            }
            _ => (SemanticType::Unknown, true),
        }
    }
}

fn type_literal(lit: &Literal) -> Typed {
    match lit {
        Literal::Integer(_) => (SemanticType::Integer, false),
        Literal::Real(_) => (SemanticType::Double, false),
        Literal::String(_) => (SemanticType::Text, false),
        Literal::Blob(_) => (SemanticType::Blob, false),
        Literal::Null => (SemanticType::Unknown, true),
        Literal::True | Literal::False => (SemanticType::Boolean, false),
    }
}

/// Fold one CASE branch into the accumulated result: LUB on types, nullable
/// if any branch is nullable.
fn merge_branch(acc: Option<Typed>, branch: Typed) -> Typed {
    match acc {
        None => branch,
        Some((ty, nullable)) => (ty.lub(&branch.0), nullable || branch.1),
    }
}
