//! Input file resolution and loading
//!
//! Resolves the configured glob patterns to a sorted, de-duplicated list of
//! absolute paths and reads file contents with path-contextual errors. The
//! ordering is deterministic so downstream stages see stable input.

pub mod slicer;

use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilesetError {
    #[error("no files matched patterns: {}", .0.join(", "))]
    NoMatch(Vec<String>),

    #[error("invalid glob pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve glob patterns relative to `base` into absolute paths, sorted and
/// de-duplicated. Every pattern must be valid; matching zero files across
/// all patterns is an error carrying the patterns for the message.
pub fn resolve_globs(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, FilesetError> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            base.join(pattern).to_string_lossy().into_owned()
        };
        let entries = glob::glob(&full).map_err(|e| FilesetError::Pattern {
            pattern: pattern.clone(),
            message: e.msg.to_string(),
        })?;
        for entry in entries {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        paths.push(path);
                    }
                }
                Err(e) => {
                    return Err(FilesetError::Io {
                        path: e.path().to_path_buf(),
                        source: e.into_error(),
                    });
                }
            }
        }
    }
    if paths.is_empty() {
        return Err(FilesetError::NoMatch(patterns.to_vec()));
    }
    paths.sort();
    paths.dedup();
    debug!("resolved {} files from {} patterns", paths.len(), patterns.len());
    Ok(paths)
}

/// Read a file to a string with a path-contextual error.
pub fn read_file(path: &Path) -> Result<String, FilesetError> {
    std::fs::read_to_string(path).map_err(|source| FilesetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_sorted_and_deduped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.sql"), "").unwrap();
        std::fs::write(tmp.path().join("a.sql"), "").unwrap();
        std::fs::write(tmp.path().join("c.txt"), "").unwrap();

        let paths = resolve_globs(
            tmp.path(),
            &["*.sql".to_string(), "a.sql".to_string()],
        )
        .unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.sql", "b.sql"]);
    }

    #[test]
    fn test_no_match_reports_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        let err = resolve_globs(tmp.path(), &["*.nope".to_string()]).unwrap_err();
        assert!(matches!(err, FilesetError::NoMatch(_)));
        assert!(err.to_string().contains("*.nope"));
    }

    #[test]
    fn test_invalid_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let err = resolve_globs(tmp.path(), &["[".to_string()]).unwrap_err();
        assert!(matches!(err, FilesetError::Pattern { .. }));
    }
}
