use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use log::{info, warn};
use path_clean::PathClean;
use regex::Regex;

use crate::common::MAX_DELETE_ATTEMPTS;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9.]").unwrap());

/// Reduce an uploaded filename to ASCII alphanumerics and `.`; everything else becomes `_`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized = UNSAFE_FILENAME_CHARS.replace_all(name, "_").into_owned();
    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

/// Absolute, lexically cleaned form of `path`. Does not touch the filesystem,
/// so it works for files that no longer exist.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.clean()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path).clean(),
            Err(_) => path.clean(),
        }
    }
}

/// Whether `path` lies strictly inside `dir`.
pub fn is_within(dir: &Path, path: &Path) -> bool {
    let dir = absolutize(dir);
    let path = absolutize(path);
    path != dir && path.starts_with(&dir)
}

/// Create `dir` and its parents. A directory that already exists, including one
/// created concurrently by another task, is success.
pub async fn ensure_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(err) => Err(err),
    }
}

/// Remove a file, retrying transient failures with a growing delay.
///
/// Returns `Ok(false)` if the file was already absent.
pub async fn remove_file_with_retry(path: &Path) -> io::Result<bool> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!("Deleted file: {:?}", path);
                return Ok(true);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) if attempts < MAX_DELETE_ATTEMPTS => {
                warn!(
                    "Failed deleting {:?} (attempt {}), retrying in {}ms: {}",
                    path,
                    attempts,
                    100 * attempts,
                    err
                );
                tokio::time::sleep(Duration::from_millis(100 * attempts)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Best-effort removal used for rollback. Failures are logged, never returned,
/// because the caller is already propagating the error that triggered the rollback.
pub async fn discard_files<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) {
    for path in paths {
        let path = path.as_ref();
        if let Err(err) = remove_file_with_retry(path).await {
            warn!("Failed to discard {:?}: {}", path, err);
        }
    }
}
