//! Semantic analysis
//!
//! Resolves one parsed query against the frozen catalog: name resolution
//! through a scope stack, bottom-up expression typing, placeholder
//! unification, and derivation of the output column schema and ordered
//! parameter signature. All diagnostics for a query are collected; analysis
//! never stops at the first problem.

mod scope;
mod typing;

use serde::Serialize;

use crate::catalog::{Catalog, Table, View, ViewColumn, normalize_name};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Span};
use crate::input::slicer::{Command, QueryBlock};
use crate::parser::ast::*;
use crate::parser::query::ParsedQuery;
use crate::types::{SemanticType, SqlDialect};

use scope::{Relation, Scope, ScopeColumn};
use typing::{ParamTable, is_aggregate_call};

/// One parameter of a query, in first-textual-occurrence order.
#[derive(Debug, Clone, Serialize)]
pub struct ResultParam {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub is_variadic: bool,
    #[serde(skip)]
    pub span: Span,
}

/// Where an output column comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrigin {
    TableColumn { table: String, column: String },
    Expression,
    Aggregate,
    Subquery,
    Literal,
}

/// One output column of a query.
#[derive(Debug, Clone, Serialize)]
pub struct ResultColumn {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub origin: ColumnOrigin,
}

/// The analyzer's verdict on one query block.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub name: String,
    pub command: Command,
    /// The block's SQL, as the generator should embed it.
    pub sql: String,
    pub leading_comments: Vec<String>,
    pub params: Vec<ResultParam>,
    pub columns: Vec<ResultColumn>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip)]
    pub span: Span,
}

/// Analyze one parsed query block against the catalog.
pub fn analyze(
    catalog: &Catalog,
    dialect: SqlDialect,
    block: &QueryBlock,
    parsed: &ParsedQuery,
) -> AnalysisResult {
    let mut analyzer = Analyzer {
        catalog,
        dialect,
        sink: DiagnosticSink::new(),
        params: ParamTable::from_inventory(&parsed.placeholders),
        ctes: Vec::new(),
    };
    let columns = analyzer.analyze_statement(&parsed.statement);

    match block.command {
        Command::One | Command::Many if columns.is_empty() => {
            analyzer.sink.warning(
                &block.span,
                format!("query '{}' is declared ':{}' but returns no columns", block.name, block.command),
            );
        }
        Command::Exec | Command::ExecResult if !columns.is_empty() => {
            analyzer.sink.warning(
                &block.span,
                format!(
                    "query '{}' is declared ':{}' but returns columns; they will be discarded",
                    block.name, block.command
                ),
            );
        }
        _ => {}
    }

    let params = analyzer
        .params
        .slots
        .iter()
        .map(|slot| ResultParam {
            name: slot.name.clone(),
            semantic_type: slot.ty.clone(),
            nullable: slot.nullable,
            is_variadic: slot.is_variadic,
            span: slot.span.clone(),
        })
        .collect();

    AnalysisResult {
        name: block.name.clone(),
        command: block.command,
        sql: block.body_text.trim().to_string(),
        leading_comments: block.leading_comments.clone(),
        params,
        columns,
        diagnostics: analyzer.sink.into_vec(),
        span: block.span.clone(),
    }
}

/// Resolve a view's projection by analyzing its defining query against the
/// tables merged so far. Used once per view at catalog freeze time.
pub fn resolve_view_columns(
    catalog: &Catalog,
    view: &View,
    dialect: SqlDialect,
) -> (Vec<ViewColumn>, Vec<Diagnostic>) {
    let mut analyzer = Analyzer {
        catalog,
        dialect,
        sink: DiagnosticSink::new(),
        params: ParamTable::default(),
        ctes: Vec::new(),
    };
    let root = Scope::default();
    let columns = analyzer.analyze_select_inner(&view.query, &root);
    let projection = columns
        .into_iter()
        .map(|c| ViewColumn {
            name: c.name,
            semantic_type: c.semantic_type,
            nullable: c.nullable,
        })
        .collect();
    (projection, analyzer.sink.into_vec())
}

pub(crate) struct Analyzer<'a> {
    catalog: &'a Catalog,
    dialect: SqlDialect,
    sink: DiagnosticSink,
    params: ParamTable,
    /// CTE relations visible at the current analysis depth, innermost last.
    ctes: Vec<Relation>,
}

impl Analyzer<'_> {
    fn analyze_statement(&mut self, stmt: &Statement) -> Vec<ResultColumn> {
        let root = Scope::default();
        match stmt {
            Statement::Select(select) => self.analyze_select_inner(select, &root),
            Statement::Insert(insert) => self.analyze_insert(insert),
            Statement::Update(update) => self.analyze_update(update),
            Statement::Delete(delete) => self.analyze_delete(delete),
        }
    }

    // --- SELECT ---

    pub(crate) fn analyze_subquery(
        &mut self,
        query: &SelectStatement,
        parent: &Scope<'_>,
    ) -> Vec<ResultColumn> {
        self.analyze_select_inner(query, parent)
    }

    fn analyze_select_inner(
        &mut self,
        select: &SelectStatement,
        parent: &Scope<'_>,
    ) -> Vec<ResultColumn> {
        let cte_depth = self.ctes.len();
        if let Some(with) = &select.with {
            for cte in &with.ctes {
                let relation = self.analyze_cte(cte, with.recursive, parent);
                self.ctes.push(relation);
            }
        }

        let (columns, order_scope) = self.analyze_body(&select.body, parent);

        for term in &select.order_by {
            self.type_order_term(term, &order_scope, &columns);
        }
        if let Some(limit) = &select.limit {
            self.hint_placeholder(limit, &SemanticType::Integer, false);
            self.type_expr(limit, &order_scope);
        }
        if let Some(offset) = &select.offset {
            self.hint_placeholder(offset, &SemanticType::Integer, false);
            self.type_expr(offset, &order_scope);
        }

        self.ctes.truncate(cte_depth);
        columns
    }

    fn analyze_cte(&mut self, cte: &Cte, recursive: bool, parent: &Scope<'_>) -> Relation {
        let columns = if recursive {
            // Seed the self-reference from the anchor term, silently, then
            // analyze the full body for real diagnostics.
            let anchor = cte.query.body.leftmost_core();
            let scratch = std::mem::take(&mut self.sink);
            let (anchor_columns, _) = self.analyze_core(anchor, parent);
            self.sink = scratch;

            self.ctes.push(relation_from_columns(
                Some(cte.name.normalized()),
                cte.name.name.clone(),
                &anchor_columns,
                &cte.columns,
            ));
            let columns = self.analyze_select_inner(&cte.query, parent);
            self.ctes.pop();
            columns
        } else {
            self.analyze_select_inner(&cte.query, parent)
        };

        if !cte.columns.is_empty() && cte.columns.len() != columns.len() {
            self.sink.error(
                &cte.span,
                format!(
                    "CTE '{}' declares {} columns but its query produces {}",
                    cte.name.name,
                    cte.columns.len(),
                    columns.len()
                ),
            );
        }
        relation_from_columns(
            Some(cte.name.normalized()),
            cte.name.name.clone(),
            &columns,
            &cte.columns,
        )
    }

    fn analyze_body<'e>(
        &mut self,
        body: &SelectBody,
        parent: &'e Scope<'e>,
    ) -> (Vec<ResultColumn>, Scope<'e>) {
        match body {
            SelectBody::Core(core) => self.analyze_core(core, parent),
            SelectBody::SetOp {
                left, right, span, ..
            } => {
                let (lcols, lscope) = self.analyze_body(left, parent);
                let (rcols, _) = self.analyze_body(right, parent);
                if lcols.len() != rcols.len() {
                    self.sink.error(
                        span,
                        format!(
                            "set operation arms project {} and {} columns",
                            lcols.len(),
                            rcols.len()
                        ),
                    );
                    return (lcols, lscope);
                }
                let merged = lcols
                    .into_iter()
                    .zip(rcols)
                    .map(|(l, r)| ResultColumn {
                        name: l.name,
                        semantic_type: l.semantic_type.lub(&r.semantic_type),
                        nullable: l.nullable || r.nullable,
                        origin: l.origin,
                    })
                    .collect();
                (merged, lscope)
            }
        }
    }

    fn analyze_core<'e>(
        &mut self,
        core: &SelectCore,
        parent: &'e Scope<'e>,
    ) -> (Vec<ResultColumn>, Scope<'e>) {
        let mut scope = Scope::child_of(parent);
        if let Some(from) = &core.from {
            let first = self.resolve_source(&from.first, parent);
            scope.relations.push(first);
            for join in &from.joins {
                let mut relation = self.resolve_source(&join.source, parent);
                match join.kind {
                    JoinKind::Left => relation.nullify(),
                    JoinKind::Right => {
                        for existing in &mut scope.relations {
                            existing.nullify();
                        }
                    }
                    JoinKind::Full => {
                        relation.nullify();
                        for existing in &mut scope.relations {
                            existing.nullify();
                        }
                    }
                    JoinKind::Inner | JoinKind::Cross => {}
                }
                scope.relations.push(relation);
                if let Some(predicate) = &join.predicate {
                    self.type_expr(predicate, &scope);
                }
            }
        }

        if let Some(where_clause) = &core.where_clause {
            self.type_expr(where_clause, &scope);
        }
        for group in &core.group_by {
            self.type_expr(group, &scope);
        }
        if let Some(having) = &core.having {
            self.type_expr(having, &scope);
        }

        let columns = self.project(&core.projection, &scope);
        (columns, scope)
    }

    /// Resolve one FROM source into a scope relation: CTE, table, view, or
    /// subquery. Unknown names produce an error and an empty relation so the
    /// rest of the query still gets analyzed.
    fn resolve_source(&mut self, source: &TableSource, parent: &Scope<'_>) -> Relation {
        match source {
            TableSource::Table(table_ref) => {
                let label = table_ref
                    .alias
                    .as_ref()
                    .map(|a| a.normalized())
                    .unwrap_or_else(|| table_ref.name.normalized());
                let display = table_ref
                    .alias
                    .as_ref()
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| table_ref.name.name.clone());

                let key = table_ref.name.normalized();
                if let Some(cte) = self.ctes.iter().rev().find(|r| r.label.as_deref() == Some(key.as_str())) {
                    let mut relation = cte.clone();
                    relation.label = Some(normalize_name(&display));
                    relation.display = display;
                    return relation;
                }
                if let Some(table) = self.catalog.get_table(&table_ref.name.name) {
                    return relation_from_table(table, label, display);
                }
                if let Some(view) = self.catalog.get_view(&table_ref.name.name) {
                    return Relation {
                        label: Some(label),
                        display,
                        columns: view
                            .projection
                            .iter()
                            .map(|c| {
                                ScopeColumn::new(
                                    c.name.clone(),
                                    c.semantic_type.clone(),
                                    c.nullable,
                                    None,
                                )
                            })
                            .collect(),
                    };
                }
                self.sink.error(
                    &table_ref.name.span,
                    format!("unknown table '{}'", table_ref.name.name),
                );
                Relation {
                    label: Some(label),
                    display,
                    columns: Vec::new(),
                }
            }
            TableSource::Subquery { query, alias, .. } => {
                let columns = self.analyze_subquery(query, parent);
                let label = alias.as_ref().map(|a| a.normalized());
                let display = alias
                    .as_ref()
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| "(subquery)".to_string());
                relation_from_columns(label, display, &columns, &[])
            }
        }
    }

    /// Expand the projection into output columns, applying the naming rules
    /// and rejecting duplicate output names.
    fn project(&mut self, items: &[SelectItem], scope: &Scope<'_>) -> Vec<ResultColumn> {
        let mut out: Vec<(ResultColumn, Span)> = Vec::new();
        for item in items {
            match item {
                SelectItem::Wildcard { span } => {
                    if scope.relations.is_empty() {
                        self.sink.error(span, "'*' requires a FROM clause");
                        continue;
                    }
                    for col in scope.all_columns() {
                        out.push((result_column_from_scope(col), span.clone()));
                    }
                }
                SelectItem::QualifiedWildcard { table, span } => match scope.relation(&table.name) {
                    Some(relation) => {
                        for col in &relation.columns {
                            out.push((result_column_from_scope(col), span.clone()));
                        }
                    }
                    None => {
                        self.sink.error(
                            span,
                            format!("unknown table or alias '{}'", table.name),
                        );
                    }
                },
                SelectItem::Expr { expr, alias } => {
                    let (ty, nullable) = self.type_expr(expr, scope);
                    let name = match alias {
                        Some(alias) => alias.name.clone(),
                        None => derive_column_name(expr, out.len() + 1),
                    };
                    let origin = classify_origin(expr, scope);
                    out.push((
                        ResultColumn {
                            name,
                            semantic_type: ty,
                            nullable,
                            origin,
                        },
                        expr.span().clone(),
                    ));
                }
            }
        }

        // Duplicate output names within one result are errors.
        let mut seen: Vec<String> = Vec::new();
        for (col, span) in &out {
            let key = normalize_name(&col.name);
            if seen.contains(&key) {
                self.sink.error(
                    span,
                    format!("duplicate output column '{}'", col.name),
                );
            } else {
                seen.push(key);
            }
        }
        out.into_iter().map(|(col, _)| col).collect()
    }

    fn type_order_term(
        &mut self,
        term: &OrderingTerm,
        scope: &Scope<'_>,
        columns: &[ResultColumn],
    ) {
        // ORDER BY may name an output column alias; try the scope first and
        // fall back to the projection.
        if let Expr::Column(col) = &term.expr {
            if col.table.is_none() {
                let key = normalize_name(&col.column.name);
                let in_scope = !matches!(
                    scope.lookup_bare(&col.column.name),
                    scope::Lookup::NotFound
                );
                if !in_scope && columns.iter().any(|c| normalize_name(&c.name) == key) {
                    return;
                }
            }
        }
        // Ordinal positions (`ORDER BY 2`) are legal and need no resolution.
        if let Expr::Literal(Literal::Integer(_), _) = &term.expr {
            return;
        }
        self.type_expr(&term.expr, scope);
    }

    // --- INSERT / UPDATE / DELETE ---

    fn analyze_insert(&mut self, insert: &InsertStatement) -> Vec<ResultColumn> {
        let Some(table) = self.resolve_dml_table(&insert.table) else {
            return Vec::new();
        };
        let table = table.clone();
        let label = insert
            .table
            .alias
            .as_ref()
            .map(|a| a.normalized())
            .unwrap_or_else(|| insert.table.name.normalized());
        let display = insert
            .table
            .alias
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| insert.table.name.name.clone());
        let relation = relation_from_table(&table, label, display);
        let root = Scope::default();
        let mut scope = Scope::child_of(&root);
        scope.relations.push(relation.clone());

        // Target columns: the explicit list, or all columns in order.
        let targets: Vec<(String, SemanticType, bool)> = if insert.columns.is_empty() {
            table
                .columns()
                .map(|c| (c.name.clone(), c.semantic_type.clone(), c.nullable))
                .collect()
        } else {
            insert
                .columns
                .iter()
                .filter_map(|ident| match table.get_column(&ident.name) {
                    Some(col) => Some((col.name.clone(), col.semantic_type.clone(), col.nullable)),
                    None => {
                        self.sink.error(
                            &ident.span,
                            format!(
                                "unknown column '{}' in table '{}'",
                                ident.name, table.name
                            ),
                        );
                        None
                    }
                })
                .collect()
        };

        // Arity checks compare against the declared column list, not the
        // resolved one, so an unknown column name produces one error rather
        // than a cascade of arity mismatches.
        let declared_len = if insert.columns.is_empty() {
            targets.len()
        } else {
            insert.columns.len()
        };

        match &insert.source {
            InsertSource::Values(rows) => {
                for row in rows {
                    if row.len() != declared_len && declared_len > 0 {
                        let span = row
                            .first()
                            .map(|e| e.span().clone())
                            .unwrap_or_else(|| insert.span.clone());
                        self.sink.error(
                            &span,
                            format!(
                                "INSERT expects {} values, found {}",
                                declared_len,
                                row.len()
                            ),
                        );
                    }
                    for (expr, (_, ty, nullable)) in row.iter().zip(&targets) {
                        self.hint_placeholder(expr, ty, *nullable);
                        self.type_expr(expr, &scope);
                    }
                }
            }
            InsertSource::Select(select) => {
                let root = Scope::default();
                let columns = self.analyze_select_inner(select, &root);
                if columns.len() != declared_len && declared_len > 0 {
                    self.sink.error(
                        &select.span,
                        format!(
                            "INSERT expects {} columns, SELECT produces {}",
                            declared_len,
                            columns.len()
                        ),
                    );
                }
            }
            InsertSource::DefaultValues => {}
        }

        if let Some(conflict) = &insert.on_conflict {
            self.analyze_on_conflict(conflict, &table, &relation);
        }

        match &insert.returning {
            Some(items) => self.project(items, &scope),
            None => Vec::new(),
        }
    }

    fn analyze_on_conflict(&mut self, conflict: &OnConflict, table: &Table, relation: &Relation) {
        for ident in &conflict.target_columns {
            if table.get_column(&ident.name).is_none() {
                self.sink.error(
                    &ident.span,
                    format!("unknown column '{}' in table '{}'", ident.name, table.name),
                );
            }
        }
        if let ConflictAction::DoUpdate {
            assignments,
            where_clause,
        } = &conflict.action
        {
            // `excluded` exposes the proposed row inside DO UPDATE.
            let mut excluded = relation.clone();
            excluded.label = Some("excluded".to_string());
            excluded.display = "excluded".to_string();
            let root = Scope::default();
            let mut scope = Scope::child_of(&root);
            scope.relations.push(relation.clone());
            scope.relations.push(excluded);

            self.check_assignments(assignments, table, &scope);
            if let Some(where_clause) = where_clause {
                self.type_expr(where_clause, &scope);
            }
        }
    }

    fn analyze_update(&mut self, update: &UpdateStatement) -> Vec<ResultColumn> {
        let Some(table) = self.resolve_dml_table(&update.table) else {
            return Vec::new();
        };
        let table = table.clone();
        let label = update
            .table
            .alias
            .as_ref()
            .map(|a| a.normalized())
            .unwrap_or_else(|| update.table.name.normalized());
        let display = update
            .table
            .alias
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| update.table.name.name.clone());
        let root = Scope::default();
        let mut scope = Scope::child_of(&root);
        scope
            .relations
            .push(relation_from_table(&table, label, display));

        self.check_assignments(&update.assignments, &table, &scope);
        if let Some(where_clause) = &update.where_clause {
            self.type_expr(where_clause, &scope);
        }
        match &update.returning {
            Some(items) => self.project(items, &scope),
            None => Vec::new(),
        }
    }

    fn analyze_delete(&mut self, delete: &DeleteStatement) -> Vec<ResultColumn> {
        let Some(table) = self.resolve_dml_table(&delete.table) else {
            return Vec::new();
        };
        let table = table.clone();
        let label = delete
            .table
            .alias
            .as_ref()
            .map(|a| a.normalized())
            .unwrap_or_else(|| delete.table.name.normalized());
        let display = delete
            .table
            .alias
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| delete.table.name.name.clone());
        let root = Scope::default();
        let mut scope = Scope::child_of(&root);
        scope
            .relations
            .push(relation_from_table(&table, label, display));

        if let Some(where_clause) = &delete.where_clause {
            self.type_expr(where_clause, &scope);
        }
        match &delete.returning {
            Some(items) => self.project(items, &scope),
            None => Vec::new(),
        }
    }

    fn check_assignments(&mut self, assignments: &[Assignment], table: &Table, scope: &Scope<'_>) {
        for assignment in assignments {
            match table.get_column(&assignment.column.name) {
                Some(col) => {
                    let (ty, nullable) = (col.semantic_type.clone(), col.nullable);
                    self.hint_placeholder(&assignment.value, &ty, nullable);
                    self.type_expr(&assignment.value, scope);
                }
                None => {
                    self.sink.error(
                        &assignment.column.span,
                        format!(
                            "unknown column '{}' in table '{}'",
                            assignment.column.name, table.name
                        ),
                    );
                    self.type_expr(&assignment.value, scope);
                }
            }
        }
    }

    /// Look up the target table of a DML statement. Views are rejected.
    fn resolve_dml_table(&mut self, table_ref: &TableRef) -> Option<&Table> {
        if self.catalog.get_view(&table_ref.name.name).is_some() {
            self.sink.error(
                &table_ref.name.span,
                format!("'{}' is a view and cannot be modified", table_ref.name.name),
            );
            return None;
        }
        match self.catalog.get_table(&table_ref.name.name) {
            Some(table) => Some(table),
            None => {
                self.sink.error(
                    &table_ref.name.span,
                    format!("unknown table '{}'", table_ref.name.name),
                );
                None
            }
        }
    }
}

fn relation_from_table(table: &Table, label: String, display: String) -> Relation {
    Relation {
        label: Some(label),
        display,
        columns: table
            .columns()
            .map(|col| {
                ScopeColumn::new(
                    col.name.clone(),
                    col.semantic_type.clone(),
                    col.nullable,
                    Some((table.name.clone(), col.name.clone())),
                )
            })
            .collect(),
    }
}

/// Build a relation from analyzed output columns, optionally renamed by an
/// explicit column list (CTE `name (a, b)` form).
fn relation_from_columns(
    label: Option<String>,
    display: String,
    columns: &[ResultColumn],
    rename: &[Ident],
) -> Relation {
    Relation {
        label,
        display,
        columns: columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let name = rename
                    .get(i)
                    .map(|ident| ident.name.clone())
                    .unwrap_or_else(|| col.name.clone());
                let origin = match &col.origin {
                    ColumnOrigin::TableColumn { table, column } => {
                        Some((table.clone(), column.clone()))
                    }
                    _ => None,
                };
                ScopeColumn::new(name, col.semantic_type.clone(), col.nullable, origin)
            })
            .collect(),
    }
}

fn result_column_from_scope(col: &ScopeColumn) -> ResultColumn {
    ResultColumn {
        name: col.name.clone(),
        semantic_type: col.ty.clone(),
        nullable: col.nullable,
        origin: match &col.origin {
            Some((table, column)) => ColumnOrigin::TableColumn {
                table: table.clone(),
                column: column.clone(),
            },
            None => ColumnOrigin::Expression,
        },
    }
}

/// Column naming for unaliased projections: `t.c` yields `c`, a bare
/// function call yields the function name, anything else gets `columnN`.
fn derive_column_name(expr: &Expr, position: usize) -> String {
    match expr {
        Expr::Column(col) => col.column.name.clone(),
        Expr::Function(f) => f.name.name.clone(),
        _ => format!("column{position}"),
    }
}


fn classify_origin(expr: &Expr, scope: &Scope<'_>) -> ColumnOrigin {
    match expr {
        Expr::Column(col) => {
            let found = match &col.table {
                Some(qualifier) => scope.lookup_qualified(&qualifier.name, &col.column.name),
                None => scope.lookup_bare(&col.column.name),
            };
            match found {
                scope::Lookup::Found(sc) => match &sc.origin {
                    Some((table, column)) => ColumnOrigin::TableColumn {
                        table: table.clone(),
                        column: column.clone(),
                    },
                    None => ColumnOrigin::Expression,
                },
                _ => ColumnOrigin::Expression,
            }
        }
        Expr::Literal(..) => ColumnOrigin::Literal,
        Expr::Subquery { .. } => ColumnOrigin::Subquery,
        Expr::Function(f) if is_aggregate_call(f) => ColumnOrigin::Aggregate,
        _ => ColumnOrigin::Expression,
    }
}
