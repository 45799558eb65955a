//! Pipeline orchestration
//!
//! Composes the stages deterministically: resolve globs → parse schemas
//! (merge catalog) → slice & parse queries → analyze → generate → plan
//! writes → write. Before/After hooks run around every stage; a hook error
//! aborts the run. Parsing and analysis fan out with rayon and their
//! diagnostics are flushed in input order behind the join, so identical
//! inputs give identical output regardless of parallelism.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::analyzer;
use crate::cache::{Cache, CacheKey};
use crate::catalog::{Catalog, SchemaFragment};
use crate::codegen::{CodeGenerator, FileAnalyses, GenOptions, GeneratedFile, golang::GoCodegen};
use crate::config::JobPlan;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::input::slicer::{QueryBlock, slice_blocks};
use crate::input::{FilesetError, resolve_globs};
use crate::parser::query::{ParsedQuery, parse_query_at};
use crate::parser::schema::parse_schema;
use crate::transform::{TypeSubstitution, apply_custom_types};
use crate::writer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveFiles,
    ParseSchemas,
    ParseQueries,
    Analyze,
    Generate,
    PlanWrites,
    Write,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::ResolveFiles => "resolve-files",
            Stage::ParseSchemas => "parse-schemas",
            Stage::ParseQueries => "parse-queries",
            Stage::Analyze => "analyze",
            Stage::Generate => "generate",
            Stage::PlanWrites => "plan-writes",
            Stage::Write => "write",
        }
    }
}

/// Cooperative cancellation. Stages check it at suspension points and
/// abandon as soon as practical; no partial files are left behind.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub type HookFn = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Optional Before/After hooks per stage. A hook error aborts the run with
/// a diagnostic.
#[derive(Default)]
pub struct Hooks {
    before: HashMap<Stage, Vec<HookFn>>,
    after: HashMap<Stage, Vec<HookFn>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(&mut self, stage: Stage, hook: HookFn) {
        self.before.entry(stage).or_default().push(hook);
    }

    pub fn after(&mut self, stage: Stage, hook: HookFn) {
        self.after.entry(stage).or_default().push(hook);
    }
}

/// What the writer intends for one output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    /// New or changed contents.
    Write,
    /// Existing bytes already match (or `--if-not-exists` preserves them).
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedFile {
    pub path: PathBuf,
    pub action: WriteAction,
    pub size: usize,
}

/// The run's outcome, populated as far as the pipeline got regardless of
/// the error.
#[derive(Debug, Default)]
pub struct Summary {
    pub diagnostics: Vec<Diagnostic>,
    pub analyses: Vec<FileAnalyses>,
    pub files: Vec<PlannedFile>,
    pub written: usize,
}

/// Terminal failure carriers. `Diagnostics` and `Write` are the two
/// user-visible failures; cancellation surfaces as-is, never wrapped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Diagnostics(Diagnostic),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run canceled")]
    Canceled,

    #[error("hook failed in stage {stage}: {message}")]
    Hook { stage: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Plan everything, write nothing.
    pub dry_run: bool,
    /// Stop after analysis and return the analyses.
    pub list_queries: bool,
    /// Never overwrite files that already exist.
    pub if_not_exists: bool,
}

/// Per-file parse results kept in the cache. Diagnostics ride along so a
/// cache hit replays them identically.
#[derive(Debug, Clone)]
pub struct ParsedSchemaFile {
    fragment: SchemaFragment,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ParsedQueryFile {
    blocks: Vec<(QueryBlock, Option<ParsedQuery>)>,
    diagnostics: Vec<Diagnostic>,
}

/// Optional caches, content-addressed; a `None` field behaves as a
/// permanent miss.
#[derive(Default)]
pub struct PipelineCaches {
    pub schemas: Option<Cache<ParsedSchemaFile>>,
    pub queries: Option<Cache<ParsedQueryFile>>,
    pub analyses: Option<Cache<Vec<analyzer::AnalysisResult>>>,
}

impl PipelineCaches {
    pub fn in_memory() -> Self {
        Self {
            schemas: Some(Cache::with_default_ttl()),
            queries: Some(Cache::with_default_ttl()),
            analyses: Some(Cache::with_default_ttl()),
        }
    }
}

pub struct Pipeline<'a> {
    plan: &'a JobPlan,
    options: RunOptions,
    hooks: Hooks,
    caches: &'a PipelineCaches,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(plan: &'a JobPlan, options: RunOptions, caches: &'a PipelineCaches) -> Self {
        Self {
            plan,
            options,
            hooks: Hooks::new(),
            caches,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the pipeline. The summary always carries every diagnostic
    /// produced, plus the analyses and file plan as far as the run got.
    pub fn run(self) -> (Summary, Option<PipelineError>) {
        let mut summary = Summary::default();
        let mut sink = DiagnosticSink::new();
        let error = self.run_stages(&mut summary, &mut sink);
        summary.diagnostics = sink.into_vec();
        (summary, error)
    }

    fn run_stages(
        &self,
        summary: &mut Summary,
        sink: &mut DiagnosticSink,
    ) -> Option<PipelineError> {
        // resolve-files
        if let Some(err) = self.begin_stage(Stage::ResolveFiles, sink) {
            return Some(err);
        }
        let resolved = self.resolve_files(sink);
        if let Some(err) = self.end_stage(Stage::ResolveFiles, sink) {
            return Some(err);
        }
        let (schema_paths, query_paths) = resolved.unwrap_or_default();

        // parse-schemas
        if let Some(err) = self.begin_stage(Stage::ParseSchemas, sink) {
            return Some(err);
        }
        let Some((catalog, schema_fingerprint)) = self.parse_schemas(&schema_paths, sink) else {
            return Some(PipelineError::Canceled);
        };
        if let Some(err) = self.end_stage(Stage::ParseSchemas, sink) {
            return Some(err);
        }

        // parse-queries
        if let Some(err) = self.begin_stage(Stage::ParseQueries, sink) {
            return Some(err);
        }
        let Some(parsed_files) = self.parse_queries(&query_paths, sink) else {
            return Some(PipelineError::Canceled);
        };
        if let Some(err) = self.end_stage(Stage::ParseQueries, sink) {
            return Some(err);
        }

        // analyze
        if let Some(err) = self.begin_stage(Stage::Analyze, sink) {
            return Some(err);
        }
        let Some(analyses) =
            self.analyze_all(&catalog, &parsed_files, schema_fingerprint, sink)
        else {
            return Some(PipelineError::Canceled);
        };
        summary.analyses = analyses;
        if let Some(err) = self.end_stage(Stage::Analyze, sink) {
            return Some(err);
        }

        if self.options.list_queries {
            info!("list-queries: stopping after analysis");
            return None;
        }

        // generate
        if let Some(err) = self.begin_stage(Stage::Generate, sink) {
            return Some(err);
        }
        let generator = GoCodegen::new(self.gen_options());
        let (generated, gen_diagnostics) = generator.generate(&catalog, &summary.analyses);
        sink.extend(gen_diagnostics);
        if let Some(err) = self.end_stage(Stage::Generate, sink) {
            return Some(err);
        }

        // plan-writes
        if let Some(err) = self.begin_stage(Stage::PlanWrites, sink) {
            return Some(err);
        }
        summary.files = self.plan_writes(&generated);
        if let Some(err) = self.end_stage(Stage::PlanWrites, sink) {
            return Some(err);
        }

        if self.options.dry_run {
            info!("dry-run: {} files planned, none written", summary.files.len());
            return None;
        }

        // write
        if let Some(err) = self.begin_stage(Stage::Write, sink) {
            return Some(err);
        }
        for (planned, file) in summary.files.iter().zip(&generated) {
            if planned.action == WriteAction::Skip {
                continue;
            }
            if self.cancel.is_canceled() {
                return Some(PipelineError::Canceled);
            }
            if let Err(failure) = writer::write_atomic(&planned.path, &file.contents) {
                return Some(PipelineError::Write {
                    path: failure.path,
                    source: failure.source,
                });
            }
            summary.written += 1;
        }
        if let Some(err) = self.end_stage(Stage::Write, sink) {
            return Some(err);
        }
        info!(
            "wrote {} of {} planned files",
            summary.written,
            summary.files.len()
        );
        None
    }

    /// Cancellation check plus Before hooks.
    fn begin_stage(&self, stage: Stage, sink: &mut DiagnosticSink) -> Option<PipelineError> {
        if self.cancel.is_canceled() {
            return Some(PipelineError::Canceled);
        }
        self.run_hooks(stage, &self.hooks.before, sink)
    }

    /// After hooks, then the error decision: a stage flushes all of its
    /// diagnostics before the pipeline decides to stop.
    fn end_stage(&self, stage: Stage, sink: &mut DiagnosticSink) -> Option<PipelineError> {
        if let Some(err) = self.run_hooks(stage, &self.hooks.after, sink) {
            return Some(err);
        }
        sink.first_error()
            .cloned()
            .map(PipelineError::Diagnostics)
    }

    fn run_hooks(
        &self,
        stage: Stage,
        hooks: &HashMap<Stage, Vec<HookFn>>,
        sink: &mut DiagnosticSink,
    ) -> Option<PipelineError> {
        for hook in hooks.get(&stage).into_iter().flatten() {
            if let Err(message) = hook() {
                sink.push(Diagnostic::file_level(
                    stage.name(),
                    Severity::Error,
                    format!("hook failed: {message}"),
                ));
                return Some(PipelineError::Hook {
                    stage: stage.name(),
                    message,
                });
            }
        }
        None
    }

    fn resolve_files(&self, sink: &mut DiagnosticSink) -> Option<(Vec<PathBuf>, Vec<PathBuf>)> {
        let schemas = self.resolve_set(&self.plan.schema_patterns, "schemas", sink);
        let queries = self.resolve_set(&self.plan.query_patterns, "queries", sink);
        Some((schemas?, queries?))
    }

    fn resolve_set(
        &self,
        patterns: &[String],
        what: &str,
        sink: &mut DiagnosticSink,
    ) -> Option<Vec<PathBuf>> {
        match resolve_globs(&self.plan.base_dir, patterns) {
            Ok(paths) => {
                debug!("{what}: {} files", paths.len());
                Some(paths)
            }
            Err(err) => {
                sink.push(Diagnostic::file_level(
                    self.plan.config_path_display(),
                    Severity::Error,
                    format!("{what}: {err}"),
                ));
                None
            }
        }
    }

    /// Parse schema files in parallel, merge sequentially, resolve views,
    /// freeze. Returns the catalog and a fingerprint of all schema bytes
    /// used to key the analysis cache. `None` means canceled.
    fn parse_schemas(
        &self,
        paths: &[PathBuf],
        sink: &mut DiagnosticSink,
    ) -> Option<(Catalog, u64)> {
        let substitutions: Vec<TypeSubstitution> = self
            .plan
            .custom_types
            .iter()
            .map(|m| TypeSubstitution {
                custom: m.custom_type.clone(),
                sql_type: m.sqlite_type.clone(),
            })
            .collect();

        let cancel = &self.cancel;
        let results: Vec<(ParsedSchemaFile, u64)> = paths
            .par_iter()
            .map(|path| {
                if cancel.is_canceled() {
                    return (
                        ParsedSchemaFile {
                            fragment: SchemaFragment::default(),
                            diagnostics: Vec::new(),
                        },
                        0,
                    );
                }
                self.parse_one_schema(path, &substitutions)
            })
            .collect();

        if self.cancel.is_canceled() {
            return None;
        }

        let mut fingerprint = 0u64;
        let mut builder = Catalog::builder();
        for (parsed, file_hash) in results {
            fingerprint ^= file_hash.rotate_left(17).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            sink.extend(parsed.diagnostics);
            builder.merge(parsed.fragment, sink);
        }

        // Resolve each view's projection against the tables merged so far.
        for view_name in builder.unresolved_views() {
            let snapshot = builder.snapshot();
            if let Some(view) = snapshot.get_view(&view_name) {
                let (projection, diagnostics) =
                    analyzer::resolve_view_columns(&snapshot, view, self.plan.dialect);
                sink.extend(diagnostics);
                builder.set_view_projection(&view_name, projection);
            }
        }

        let catalog = builder.freeze(sink);
        info!(
            "catalog: {} tables, {} views",
            catalog.tables().count(),
            catalog.views().count()
        );
        Some((catalog, fingerprint))
    }

    fn parse_one_schema(
        &self,
        path: &PathBuf,
        substitutions: &[TypeSubstitution],
    ) -> (ParsedSchemaFile, u64) {
        let display = path.to_string_lossy().into_owned();
        let src = match crate::input::read_file(path) {
            Ok(src) => src,
            Err(err) => {
                return (
                    ParsedSchemaFile {
                        fragment: SchemaFragment::default(),
                        diagnostics: vec![Diagnostic::file_level(
                            display,
                            Severity::Error,
                            err.to_string(),
                        )],
                    },
                    0,
                );
            }
        };
        let file_hash = xxhash_rust::xxh3::xxh3_64(src.as_bytes());
        let key = CacheKey::compute("schema", src.as_bytes());
        let parsed = Cache::get_or_insert_with(self.caches.schemas.as_ref(), key, || {
            let mut sink = DiagnosticSink::new();
            let rewritten = apply_custom_types(&display, &src, substitutions, &mut sink);
            let (fragment, diagnostics) = parse_schema(&display, &rewritten, self.plan.dialect);
            sink.extend(diagnostics);
            ParsedSchemaFile {
                fragment,
                diagnostics: sink.into_vec(),
            }
        });
        (parsed, file_hash)
    }

    /// Slice and parse query files in parallel; diagnostics flush in input
    /// order behind the join. `None` means canceled.
    fn parse_queries(
        &self,
        paths: &[PathBuf],
        sink: &mut DiagnosticSink,
    ) -> Option<Vec<(PathBuf, ParsedQueryFile, Vec<u8>)>> {
        let cancel = &self.cancel;
        let results: Vec<(PathBuf, ParsedQueryFile, Vec<u8>)> = paths
            .par_iter()
            .map(|path| {
                let display = path.to_string_lossy().into_owned();
                if cancel.is_canceled() {
                    return (
                        path.clone(),
                        ParsedQueryFile {
                            blocks: Vec::new(),
                            diagnostics: Vec::new(),
                        },
                        Vec::new(),
                    );
                }
                let src = match crate::input::read_file(path) {
                    Ok(src) => src,
                    Err(err) => {
                        return (
                            path.clone(),
                            ParsedQueryFile {
                                blocks: Vec::new(),
                                diagnostics: vec![Diagnostic::file_level(
                                    display,
                                    Severity::Error,
                                    err.to_string(),
                                )],
                            },
                            Vec::new(),
                        );
                    }
                };
                let key = CacheKey::compute("query", src.as_bytes());
                let parsed = Cache::get_or_insert_with(self.caches.queries.as_ref(), key, || {
                    let mut sink = DiagnosticSink::new();
                    let blocks = slice_blocks(&display, &src, &mut sink);
                    let blocks = blocks
                        .into_iter()
                        .map(|block| {
                            let (parsed, diagnostics) = parse_query_at(
                                &display,
                                &block.body_text,
                                block.body_line,
                                block.body_offset,
                            );
                            sink.extend(diagnostics);
                            (block, parsed)
                        })
                        .collect();
                    ParsedQueryFile {
                        blocks,
                        diagnostics: sink.into_vec(),
                    }
                });
                (path.clone(), parsed, src.into_bytes())
            })
            .collect();

        if self.cancel.is_canceled() {
            return None;
        }
        for (_, parsed, _) in &results {
            sink.extend(parsed.diagnostics.iter().cloned());
        }
        Some(results)
    }

    /// Analyze every query against the frozen catalog, in parallel per
    /// file. `None` means canceled.
    fn analyze_all(
        &self,
        catalog: &Catalog,
        parsed_files: &[(PathBuf, ParsedQueryFile, Vec<u8>)],
        schema_fingerprint: u64,
        sink: &mut DiagnosticSink,
    ) -> Option<Vec<FileAnalyses>> {
        let cancel = &self.cancel;
        let analyses: Vec<FileAnalyses> = parsed_files
            .par_iter()
            .map(|(path, parsed, src_bytes)| {
                if cancel.is_canceled() {
                    return FileAnalyses {
                        path: path.clone(),
                        queries: Vec::new(),
                    };
                }
                // Analysis depends on the schema too, so the cache key
                // mixes in the catalog fingerprint.
                let mut key_bytes = schema_fingerprint.to_le_bytes().to_vec();
                key_bytes.extend_from_slice(src_bytes);
                let key = CacheKey::compute("analyze", &key_bytes);
                let queries =
                    Cache::get_or_insert_with(self.caches.analyses.as_ref(), key, || {
                        parsed
                            .blocks
                            .iter()
                            .filter_map(|(block, parsed_query)| {
                                parsed_query.as_ref().map(|pq| {
                                    analyzer::analyze(catalog, self.plan.dialect, block, pq)
                                })
                            })
                            .collect()
                    });
                FileAnalyses {
                    path: path.clone(),
                    queries,
                }
            })
            .collect();

        if self.cancel.is_canceled() {
            return None;
        }
        for file in &analyses {
            for query in &file.queries {
                sink.extend(query.diagnostics.iter().cloned());
            }
        }
        info!(
            "analyzed {} queries in {} files",
            analyses.iter().map(|f| f.queries.len()).sum::<usize>(),
            analyses.len()
        );
        Some(analyses)
    }

    fn gen_options(&self) -> GenOptions {
        GenOptions {
            package: self.plan.package.clone(),
            emit_json_tags: self.plan.generation.emit_json_tags,
            emit_pointers_for_null: self.plan.generation.emit_pointers_for_null,
            sqlite_driver: self.plan.sqlite_driver.clone(),
            dialect: self.plan.dialect,
            prepared_queries: self.plan.prepared_queries.enabled,
            emit_empty_slices: self.plan.prepared_queries.emit_empty_slices,
        }
    }

    fn plan_writes(&self, generated: &[GeneratedFile]) -> Vec<PlannedFile> {
        generated
            .iter()
            .map(|file| {
                let path = self.plan.out_dir.join(&file.name);
                let action = if writer::file_matches(&path, &file.contents)
                    || (self.options.if_not_exists && path.exists())
                {
                    WriteAction::Skip
                } else {
                    WriteAction::Write
                };
                PlannedFile {
                    path,
                    action,
                    size: file.contents.len(),
                }
            })
            .collect()
    }
}
