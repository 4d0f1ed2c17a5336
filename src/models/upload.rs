use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};

/// A temporary upload waiting to be consumed by the pipeline.
///
/// The handle owns the file on disk: dropping it removes the file. Whatever
/// path a batch takes (processed, failed, rejected, or a task that panicked),
/// each upload is removed exactly once.
#[derive(Debug)]
pub struct UploadedFile {
    original_name: String,
    path: PathBuf,
}

impl UploadedFile {
    pub fn new(original_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            original_name: original_name.into(),
            path: path.into(),
        }
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary upload {:?}", self.path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Failed to remove temporary upload {:?} ('{}'): {}",
                self.path, self.original_name, err
            ),
        }
    }
}
