//! db-catalyst: compile SQL schemas and annotated queries into a typed
//! data-access layer
//!
//! The library parses DDL into a frozen catalog, slices query files into
//! named blocks, parses and analyzes each query against the catalog, and
//! hands the results to a code generation backend. The pipeline composes
//! these stages with caching, hooks, and atomic writes.

pub mod analyzer;
pub mod cache;
pub mod catalog;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod input;
pub mod parser;
pub mod pipeline;
pub mod transform;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use analyzer::{AnalysisResult, ResultColumn, ResultParam};
pub use catalog::Catalog;
pub use config::{Config, JobPlan};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity, Span};
pub use input::slicer::{Command, QueryBlock};
pub use pipeline::{Pipeline, PipelineCaches, PipelineError, RunOptions, Summary};
pub use types::{SemanticType, SqlDialect};
