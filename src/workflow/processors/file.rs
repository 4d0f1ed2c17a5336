//! Per-file processing stage
//!
//! Runs the per-file worker on one upload and normalizes its output into
//! `FileMetadata`. The upload is consumed (deleted) before `process` returns.

use crate::{
    common::errors::{ProcessingError, WorkerError},
    models::{FileMetadata, Location, UploadedFile},
    utils::{absolutize, ensure_dir, is_within, sanitize_filename},
    workflow::processors::worker::{WorkerClient, WorkerCommand},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{info, warn};
use serde::Deserialize;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Raw object printed by the per-file worker.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileWorkerOutput {
    #[serde(default, alias = "derived_path")]
    derived_path: Option<PathBuf>,
    #[serde(default, alias = "capture_time")]
    capture_time: Option<String>,
    #[serde(default)]
    location: Option<Location>,
}

#[derive(Debug, Clone)]
pub struct FileProcessor {
    client: WorkerClient,
    command: WorkerCommand,
    output_dir: PathBuf,
}

impl FileProcessor {
    pub fn new(client: WorkerClient, command: WorkerCommand, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            command,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn process(&self, file: UploadedFile) -> Result<FileMetadata, ProcessingError> {
        let start_time = Instant::now();
        let outcome = self.run(&file).await;

        let name = file.original_name().to_string();
        // The temp upload is gone before the caller sees the outcome.
        drop(file);

        match &outcome {
            Ok(metadata) => info!(duration = &*format!("{:?}", start_time.elapsed());
                "Processed '{}' into {:?}",
                name,
                metadata.derived_path
            ),
            Err(err) => warn!(duration = &*format!("{:?}", start_time.elapsed());
                "Processing '{}' failed: {}",
                name,
                err
            ),
        }
        outcome
    }

    async fn run(&self, file: &UploadedFile) -> Result<FileMetadata, ProcessingError> {
        ensure_dir(&self.output_dir)
            .await
            .map_err(|source| ProcessingError::OutputDir {
                path: self.output_dir.clone(),
                source,
            })?;

        let args = [
            file.path().as_os_str().to_owned(),
            self.output_dir.as_os_str().to_owned(),
            OsString::from(unique_token()),
            OsString::from(sanitize_filename(file.original_name())),
        ];

        let value = self
            .client
            .invoke(&self.command, &args, None)
            .await
            .map_err(|source| ProcessingError::Worker {
                file: file.original_name().to_string(),
                source,
            })?;

        let output: FileWorkerOutput =
            serde_json::from_value(value).map_err(|err| ProcessingError::Worker {
                file: file.original_name().to_string(),
                source: WorkerError::OutputParse {
                    program: self.command.program.clone(),
                    reason: err.to_string(),
                },
            })?;

        self.normalize(file.original_name(), output)
    }

    fn normalize(&self, name: &str, output: FileWorkerOutput) -> Result<FileMetadata, ProcessingError> {
        let derived_path = output
            .derived_path
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| ProcessingError::MissingDerivedPath {
                file: name.to_string(),
            })?;

        // Workers may answer with a bare filename relative to the output directory.
        let derived_path =
            if derived_path.is_relative() && !is_within(&self.output_dir, &derived_path) {
                self.output_dir.join(derived_path)
            } else {
                derived_path
            };

        // The store deletes these paths later, so they must stay inside the output directory.
        if !is_within(&self.output_dir, &derived_path) {
            return Err(ProcessingError::ForeignDerivedPath {
                file: name.to_string(),
                path: derived_path,
            });
        }

        let capture_time = output.capture_time.as_deref().and_then(|raw| {
            let parsed = parse_capture_time(raw);
            if parsed.is_none() {
                warn!("Ignoring unparseable capture time {:?} for '{}'", raw, name);
            }
            parsed
        });

        let location = output.location.filter(|location| {
            let valid = location.is_valid();
            if !valid {
                warn!("Ignoring out-of-range location {:?} for '{}'", location, name);
            }
            valid
        });

        Ok(FileMetadata {
            derived_path: absolutize(&derived_path),
            capture_time,
            location,
        })
    }
}

/// Unique per call: wall-clock milliseconds plus a process-wide sequence number.
pub fn unique_token() -> String {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Accepts RFC 3339 and the EXIF `YYYY:MM:DD HH:MM:SS` form; naive times are taken as UTC.
pub fn parse_capture_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
