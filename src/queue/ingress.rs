//! Ingress checks for dropped paths.
//!
//! Runs on the caller's task so the scheduler never blocks on the
//! filesystem.

use std::path::{Path, PathBuf};

use dc_core::{Error, Result};

/// Resolve `path` to an absolute path of an existing, readable, non-empty
/// regular file.
pub async fn validate_source(path: &Path) -> Result<PathBuf> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::invalid_path(path, "file does not exist"));
        }
        Err(e) => return Err(Error::invalid_path(path, e.to_string())),
    };

    if metadata.is_dir() {
        return Err(Error::invalid_path(path, "is a directory"));
    }
    if !metadata.is_file() {
        return Err(Error::invalid_path(path, "not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(Error::invalid_path(path, "file is empty"));
    }

    if let Err(e) = tokio::fs::File::open(path).await {
        return Err(Error::invalid_path(path, format!("not readable: {e}")));
    }

    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| Error::invalid_path(path, e.to_string()))
}
