//! Code generation interface
//!
//! The core hands each backend a read-only catalog and the per-file analyses
//! in deterministic order (files sorted by path, queries in declared order)
//! and collects generated files back. Backends are otherwise opaque; the
//! core never inspects what they emit.

pub mod golang;

use std::path::PathBuf;

use crate::analyzer::AnalysisResult;
use crate::catalog::Catalog;
use crate::diagnostics::Diagnostic;
use crate::types::SqlDialect;

/// The analyses of one query file, in declared order.
#[derive(Debug)]
pub struct FileAnalyses {
    /// Source path of the query file.
    pub path: PathBuf,
    pub queries: Vec<AnalysisResult>,
}

/// One artifact a backend wants written, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub name: String,
    pub contents: Vec<u8>,
}

/// Backend-facing generation options, assembled from the job plan.
#[derive(Debug, Clone)]
pub struct GenOptions {
    pub package: String,
    pub emit_json_tags: bool,
    pub emit_pointers_for_null: bool,
    /// Driver tag surfaced in generated import comments.
    pub sqlite_driver: String,
    pub dialect: SqlDialect,
    pub prepared_queries: bool,
    /// Return empty (non-nil) slices from :many queries.
    pub emit_empty_slices: bool,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            package: "db".to_string(),
            emit_json_tags: false,
            emit_pointers_for_null: false,
            sqlite_driver: "modernc".to_string(),
            dialect: SqlDialect::Sqlite,
            prepared_queries: false,
            emit_empty_slices: false,
        }
    }
}

/// A language backend. Implementations receive read-only references and must
/// produce the same bytes for the same input.
pub trait CodeGenerator {
    fn generate(
        &self,
        catalog: &Catalog,
        analyses: &[FileAnalyses],
    ) -> (Vec<GeneratedFile>, Vec<Diagnostic>);
}
