//! Catalog assembly
//!
//! Schema fragments parse in parallel; the merge into the catalog is a
//! sequential critical section that enforces duplicate detection. After all
//! fragments merge, foreign keys get a second resolution pass and view
//! projections are filled in, then [`CatalogBuilder::freeze`] publishes the
//! read-only [`Catalog`].
//!
//! The fluent `table(...)` API exists for tests:
//!
//! ```rust
//! use db_catalyst::catalog::Catalog;
//! use db_catalyst::diagnostics::DiagnosticSink;
//!
//! let mut sink = DiagnosticSink::new();
//! let catalog = Catalog::builder()
//!     .table("users", |t| {
//!         t.column("id", "INTEGER", false)
//!             .column("email", "TEXT", true)
//!             .pk(&["id"]);
//!     })
//!     .freeze(&mut sink);
//! assert!(catalog.get_table("users").is_some());
//! ```

use indexmap::IndexMap;

use crate::catalog::{
    Catalog, Column, ForeignKey, Index, SchemaFragment, Table, View, ViewColumn, normalize_name,
};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Span};
use crate::types::{SemanticType, SqlDialect};

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: Catalog,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. Duplicate tables and views are rejected with an
    /// error referencing the prior definition; indexes attach to their table
    /// or produce an error when the table is unknown.
    pub fn merge(&mut self, fragment: SchemaFragment, sink: &mut DiagnosticSink) {
        for table in fragment.tables {
            self.insert_table(table, sink);
        }
        for view in fragment.views {
            self.insert_view(view, sink);
        }
        for (table_name, index) in fragment.indexes {
            let key = normalize_name(&table_name);
            match self.catalog.tables.get_mut(&key) {
                Some(table) => table.indexes.push(index),
                None => sink.error(
                    &index.span,
                    format!("index '{}' targets unknown table '{}'", index.name, table_name),
                ),
            }
        }
    }

    fn insert_table(&mut self, table: Table, sink: &mut DiagnosticSink) {
        let key = normalize_name(&table.name);
        if let Some(prior) = self.prior_definition(&key) {
            sink.push(duplicate_diagnostic("table", &table.name, &table.span, prior));
            return;
        }
        self.catalog.tables.insert(key, table);
    }

    fn insert_view(&mut self, view: View, sink: &mut DiagnosticSink) {
        let key = normalize_name(&view.name);
        if let Some(prior) = self.prior_definition(&key) {
            sink.push(duplicate_diagnostic("view", &view.name, &view.span, prior));
            return;
        }
        self.catalog.views.insert(key, view);
    }

    /// Span of an existing table or view under the same normalized key.
    fn prior_definition(&self, key: &str) -> Option<&Span> {
        self.catalog
            .tables
            .get(key)
            .map(|t| &t.span)
            .or_else(|| self.catalog.views.get(key).map(|v| &v.span))
    }

    /// Second pass over foreign keys, run after every fragment has merged.
    /// A target still unknown here stays a warning, recorded once per key.
    pub fn resolve_foreign_keys(&self, sink: &mut DiagnosticSink) {
        for table in self.catalog.tables.values() {
            for fk in &table.foreign_keys {
                match self.catalog.tables.get(&normalize_name(&fk.ref_table)) {
                    Some(target) => {
                        for ref_col in &fk.ref_columns {
                            if target.get_column(ref_col).is_none() {
                                sink.error(
                                    &fk.span,
                                    format!(
                                        "foreign key references unknown column '{}.{}'",
                                        fk.ref_table, ref_col
                                    ),
                                );
                            }
                        }
                    }
                    None => sink.warning(
                        &fk.span,
                        format!("foreign key references unknown table '{}'", fk.ref_table),
                    ),
                }
            }
        }
    }

    /// Views pending projection resolution, in merge order. The pipeline runs
    /// each view's query through the analyzer and stores the result with
    /// [`CatalogBuilder::set_view_projection`].
    pub fn unresolved_views(&self) -> Vec<String> {
        self.catalog
            .views
            .values()
            .filter(|v| v.projection.is_empty())
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn set_view_projection(&mut self, name: &str, projection: Vec<ViewColumn>) {
        if let Some(view) = self.catalog.views.get_mut(&normalize_name(name)) {
            view.projection = projection;
        }
    }

    /// A read-only snapshot of the tables merged so far, used to analyze view
    /// bodies before the final freeze.
    pub fn snapshot(&self) -> Catalog {
        self.catalog.clone()
    }

    /// Publish the catalog. Runs the foreign-key second pass.
    pub fn freeze(self, sink: &mut DiagnosticSink) -> Catalog {
        self.resolve_foreign_keys(sink);
        self.catalog
    }

    // --- Fluent construction, primarily for tests ---

    /// Add a table through a [`TableBuilder`] closure.
    pub fn table(mut self, name: &str, f: impl FnOnce(&mut TableBuilder)) -> Self {
        let mut builder = TableBuilder::new(name);
        f(&mut builder);
        let mut sink = DiagnosticSink::new();
        self.insert_table(builder.build(), &mut sink);
        self
    }
}

fn duplicate_diagnostic(kind: &str, name: &str, span: &Span, prior: &Span) -> Diagnostic {
    Diagnostic::error(
        span,
        format!(
            "{kind} '{name}' is already defined at {}:{}:{}",
            prior.file, prior.start_line, prior.start_col
        ),
    )
}

/// Fluent table construction for tests.
pub struct TableBuilder {
    table: Table,
}

impl TableBuilder {
    fn new(name: &str) -> Self {
        Self {
            table: Table {
                name: name.to_string(),
                columns: IndexMap::new(),
                primary_key: vec![],
                uniques: vec![],
                foreign_keys: vec![],
                indexes: vec![],
                without_rowid: false,
                span: Span::point("<builder>", 1, 1, 0),
            },
        }
    }

    /// Add a column. `nullable` false means NOT NULL. The semantic type is
    /// classified from the raw token under the SQLite dialect.
    pub fn column(&mut self, name: &str, declared_type: &str, nullable: bool) -> &mut Self {
        self.table.columns.insert(
            normalize_name(name),
            Column {
                name: name.to_string(),
                declared_type: declared_type.to_string(),
                semantic_type: SemanticType::from_sql_token(declared_type, SqlDialect::Sqlite),
                nullable,
                default: None,
                span: Span::point("<builder>", 1, 1, 0),
            },
        );
        self
    }

    pub fn pk(&mut self, columns: &[&str]) -> &mut Self {
        self.table.primary_key = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.table
            .uniques
            .push(columns.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn fk(&mut self, columns: &[&str], ref_table: &str, ref_columns: &[&str]) -> &mut Self {
        self.table.foreign_keys.push(ForeignKey {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            ref_table: ref_table.to_string(),
            ref_columns: ref_columns.iter().map(|s| s.to_string()).collect(),
            span: Span::point("<builder>", 1, 1, 0),
        });
        self
    }

    pub fn index(&mut self, name: &str, columns: &[&str], unique: bool) -> &mut Self {
        self.table.indexes.push(Index {
            name: name.to_string(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            unique,
            where_clause: None,
            span: Span::point("<builder>", 1, 1, 0),
        });
        self
    }

    fn build(self) -> Table {
        self.table
    }
}
