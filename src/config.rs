//! Configuration file parsing
//!
//! Reads a `db-catalyst.toml` job description: where schemas and queries
//! live, where generated code goes, and backend options. Unknown top-level
//! keys warn by default and become errors under strict mode. The parsed
//! file resolves into a [`JobPlan`] with paths anchored at the config
//! file's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, Severity};
use crate::types::SqlDialect;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level keys the loader understands; anything else warns (or errors
/// under strict mode).
const KNOWN_KEYS: &[&str] = &[
    "package",
    "out",
    "sqlite_driver",
    "schemas",
    "queries",
    "custom_types",
    "generation",
    "prepared_queries",
];

const KNOWN_DRIVERS: &[&str] = &["modernc", "mattn"];

/// Raw configuration structure, straight from TOML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_package")]
    pub package: String,

    /// Output directory, relative to the config file.
    #[serde(default = "default_out")]
    pub out: PathBuf,

    #[serde(default = "default_driver")]
    pub sqlite_driver: String,

    #[serde(default = "default_schemas")]
    pub schemas: Vec<String>,

    #[serde(default = "default_queries")]
    pub queries: Vec<String>,

    #[serde(default)]
    pub custom_types: CustomTypesConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub prepared_queries: PreparedQueriesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package: default_package(),
            out: default_out(),
            sqlite_driver: default_driver(),
            schemas: default_schemas(),
            queries: default_queries(),
            custom_types: CustomTypesConfig::default(),
            generation: GenerationConfig::default(),
            prepared_queries: PreparedQueriesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CustomTypesConfig {
    #[serde(default)]
    pub mapping: Vec<CustomTypeMapping>,
}

/// One user-declared type: the schema token, the SQL type substituted for
/// it, and optional host-language overrides passed through to the backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomTypeMapping {
    pub custom_type: String,
    pub sqlite_type: String,
    pub go_type: Option<String>,
    pub go_import: Option<String>,
    pub go_package: Option<String>,
    #[serde(default)]
    pub pointer: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_true")]
    pub emit_json_tags: bool,

    #[serde(default)]
    pub emit_pointers_for_null: bool,

    /// Parser dialect override: "sqlite" or "mysql".
    #[serde(default)]
    pub sql_dialect: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            emit_json_tags: true,
            emit_pointers_for_null: false,
            sql_dialect: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PreparedQueriesConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub metrics: bool,

    #[serde(default = "default_true")]
    pub thread_safe: bool,

    #[serde(default)]
    pub emit_empty_slices: bool,
}

fn default_package() -> String {
    "db".to_string()
}

fn default_out() -> PathBuf {
    PathBuf::from("gen")
}

fn default_driver() -> String {
    "modernc".to_string()
}

fn default_schemas() -> Vec<String> {
    vec!["schema/*.sql".to_string()]
}

fn default_queries() -> Vec<String> {
    vec!["queries/*.sql".to_string()]
}

fn default_true() -> bool {
    true
}

/// The resolved job description the pipeline runs from.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub package: String,
    /// Absolute (or base-joined) output directory.
    pub out_dir: PathBuf,
    /// Directory the config file lives in; globs resolve against it.
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub schema_patterns: Vec<String>,
    pub query_patterns: Vec<String>,
    pub sqlite_driver: String,
    pub dialect: SqlDialect,
    pub custom_types: Vec<CustomTypeMapping>,
    pub generation: GenerationConfig,
    pub prepared_queries: PreparedQueriesConfig,
}

impl JobPlan {
    pub fn config_path_display(&self) -> String {
        self.config_path.to_string_lossy().into_owned()
    }
}

/// Load and validate a config file. Warnings (unknown keys) come back for
/// the caller to merge into the run's diagnostics; under strict mode they
/// are promoted to a validation error instead.
pub fn load(path: &Path, strict: bool) -> Result<(JobPlan, Vec<Diagnostic>), ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_str(path, &contents, strict)
}

/// Parse config text. Split from [`load`] for tests.
pub fn load_str(
    path: &Path,
    contents: &str,
    strict: bool,
) -> Result<(JobPlan, Vec<Diagnostic>), ConfigError> {
    let mut warnings = Vec::new();

    // First pass over the raw table catches unknown top-level keys, which
    // serde would silently drop.
    let raw: toml::Table = contents.parse()?;
    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            let message = format!("unknown configuration key '{key}'");
            if strict {
                return Err(ConfigError::Validation(message));
            }
            warnings.push(Diagnostic::file_level(
                path.to_string_lossy(),
                Severity::Warning,
                message,
            ));
        }
    }

    let config: Config = toml::from_str(contents)?;
    config.validate()?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let dialect = match &config.generation.sql_dialect {
        Some(name) => name
            .parse::<SqlDialect>()
            .map_err(|_| {
                ConfigError::Validation(format!(
                    "unknown sql_dialect '{name}'. Valid values: sqlite, mysql"
                ))
            })?,
        None => SqlDialect::Sqlite,
    };

    let plan = JobPlan {
        package: config.package,
        out_dir: base_dir.join(&config.out),
        base_dir,
        config_path: path.to_path_buf(),
        schema_patterns: config.schemas,
        query_patterns: config.queries,
        sqlite_driver: config.sqlite_driver,
        dialect,
        custom_types: config.custom_types.mapping,
        generation: config.generation,
        prepared_queries: config.prepared_queries,
    };
    Ok((plan, warnings))
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.out.is_absolute() {
            return Err(ConfigError::Validation(format!(
                "'out' must be relative to the config file, got absolute path {}",
                self.out.display()
            )));
        }
        if !is_valid_identifier(&self.package) {
            return Err(ConfigError::Validation(format!(
                "'package' must be a valid identifier, got '{}'",
                self.package
            )));
        }
        if !KNOWN_DRIVERS.contains(&self.sqlite_driver.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown sqlite_driver '{}'. Valid values: {}",
                self.sqlite_driver,
                KNOWN_DRIVERS.join(", ")
            )));
        }
        for mapping in &self.custom_types.mapping {
            if mapping.custom_type.is_empty() || mapping.sqlite_type.is_empty() {
                return Err(ConfigError::Validation(
                    "custom_types.mapping entries need both custom_type and sqlite_type"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
