//! The database catalog
//!
//! The catalog is the frozen collection of tables and views the analyzer
//! resolves names against. It is assembled from per-file schema fragments by
//! [`builder::CatalogBuilder`], which enforces duplicate detection, then
//! handed to later stages read-only.
//!
//! Name keys are case-insensitive; the display form is the first occurrence.

pub mod builder;

use indexmap::IndexMap;

use crate::diagnostics::Span;
use crate::parser::ast::SelectStatement;
use crate::types::SemanticType;

pub use builder::CatalogBuilder;

/// Canonical lookup key for identifiers: lower-cased unquoted form.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug, Clone)]
pub struct Column {
    /// Display name as first written.
    pub name: String,
    /// Raw SQL type token as written, e.g. `VARCHAR(100)`.
    pub declared_type: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    /// Raw default expression text, when declared.
    pub default: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Partial index predicate text, when present.
    pub where_clause: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Table {
    /// Display name as first written.
    pub name: String,
    /// Columns in declaration order, keyed by normalized name.
    pub columns: IndexMap<String, Column>,
    /// Primary key column names in key order.
    pub primary_key: Vec<String>,
    /// Table-level UNIQUE constraints, one column list each.
    pub uniques: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
    pub without_rowid: bool,
    pub span: Span,
}

impl Table {
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(&normalize_name(name))
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }
}

/// A view's projection, resolved by running its defining query through the
/// analyzer once the tables are merged.
#[derive(Debug, Clone)]
pub struct ViewColumn {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct View {
    pub name: String,
    /// Resolved output columns in projection order. Empty until the builder
    /// resolves the view; a view whose body failed analysis keeps an empty
    /// projection and resolves to `Unknown` columns downstream.
    pub projection: Vec<ViewColumn>,
    pub query: SelectStatement,
    pub span: Span,
}

/// The frozen catalog. Read-only after [`CatalogBuilder::freeze`].
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub(crate) tables: IndexMap<String, Table>,
    pub(crate) views: IndexMap<String, View>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&normalize_name(name))
    }

    pub fn get_view(&self, name: &str) -> Option<&View> {
        self.views.get(&normalize_name(name))
    }

    pub fn has_relation(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.tables.contains_key(&key) || self.views.contains_key(&key)
    }

    /// Tables in merge order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Views in merge order.
    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.views.is_empty()
    }
}

/// One schema file's parse output, merged into the catalog sequentially.
#[derive(Debug, Clone, Default)]
pub struct SchemaFragment {
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    /// `CREATE INDEX` statements, paired with their target table name.
    pub indexes: Vec<(String, Index)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSink;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut sink = DiagnosticSink::new();
        let catalog = Catalog::builder()
            .table("Users", |t| {
                t.column("id", "INTEGER", false);
            })
            .freeze(&mut sink);
        assert!(catalog.get_table("USERS").is_some());
        assert!(catalog.get_table("users").is_some());
        // Display form preserves the first occurrence.
        assert_eq!(catalog.get_table("users").unwrap().name, "Users");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_column_lookup_case_insensitive() {
        let mut sink = DiagnosticSink::new();
        let catalog = Catalog::builder()
            .table("users", |t| {
                t.column("Email", "TEXT", true);
            })
            .freeze(&mut sink);
        let table = catalog.get_table("users").unwrap();
        assert_eq!(table.get_column("EMAIL").unwrap().name, "Email");
    }
}
