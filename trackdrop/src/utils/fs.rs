//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors and centralize the
//! "remove if present" semantics used for temporary artifacts.

use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Remove a file if it exists.
///
/// Returns `true` when a file was actually deleted. A missing file is not an error;
/// any other failure is logged and reported as `false`.
pub async fn remove_file_if_exists(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed local artifact");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove local artifact");
            false
        }
    }
}

/// Synchronous variant of [`remove_file_if_exists`], for `Drop` impls.
pub fn remove_file_if_exists_sync(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove local artifact");
            false
        }
    }
}

/// Remove a directory and everything under it, if it exists.
///
/// Same reporting rules as [`remove_file_if_exists`].
pub async fn remove_dir_if_exists(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed scratch directory");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
            false
        }
    }
}

/// Synchronous variant of [`remove_dir_if_exists`], for `Drop` impls.
pub fn remove_dir_if_exists_sync(path: &Path) -> bool {
    match std::fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
            false
        }
    }
}
