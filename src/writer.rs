//! Atomic file writer
//!
//! A changed or new file is written to a sibling temp file in the same
//! directory, fsynced, then renamed into place, so readers never observe a
//! partially written file. Parent directories are created with restrictive
//! permissions. Identical existing bytes are detected upstream and skipped.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to write {}: {source}", path.display())]
pub struct WriteFailure {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// True when the file already holds exactly these bytes.
pub fn file_matches(path: &Path, bytes: &[u8]) -> bool {
    match std::fs::read(path) {
        Ok(existing) => existing == bytes,
        Err(_) => false,
    }
}

/// Write `bytes` to `path` atomically, creating parent directories first.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WriteFailure> {
    let fail = |source: std::io::Error| WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    create_dirs_restricted(parent).map_err(fail)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let tmp_path = parent.join(format!(".{file_name}.tmp{}", std::process::id()));

    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(source) = result {
        // No partial files may remain.
        let _ = std::fs::remove_file(&tmp_path);
        return Err(fail(source));
    }
    debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(unix)]
fn create_dirs_restricted(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_dirs_restricted(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
}
