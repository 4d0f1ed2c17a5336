//! Error taxonomy of the batch pipeline.
//!
//! Each layer has its own enum and wraps the layer below as its `source`, so a
//! failed batch carries the full chain down to the worker invocation that broke.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single external worker invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The process could not be started, or waiting on it failed.
    #[error("failed to run worker `{program}`")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process ran but did not exit successfully.
    #[error("worker `{program}` exited with {}: {stderr}", exit_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Exit code 0, but stdout was not the structured output we expected.
    #[error("worker `{program}` produced unusable output: {reason}")]
    OutputParse { program: String, reason: String },

    #[error("worker `{program}` did not finish within {after:?} and was killed")]
    Timeout { program: String, after: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Failure of the per-file stage.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to prepare output directory {path:?}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("processing '{file}' failed")]
    Worker {
        file: String,
        #[source]
        source: WorkerError,
    },

    #[error("worker output for '{file}' has no derivedPath")]
    MissingDerivedPath { file: String },

    #[error("worker output for '{file}' points outside the output directory: {path:?}")]
    ForeignDerivedPath { file: String, path: PathBuf },

    #[error("processing task for '{file}' was aborted: {reason}")]
    Aborted { file: String, reason: String },
}

/// Failure of the batch-level enrichment stage.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("failed to serialize enrichment payload")]
    Payload(#[source] serde_json::Error),

    #[error("enrichment worker failed")]
    Worker(#[from] WorkerError),
}

/// Failure of a whole batch submission. No record exists for a failed batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no files were submitted")]
    EmptyBatch,

    #[error("{count} files submitted, at most {max} are accepted per batch")]
    TooManyFiles { count: usize, max: usize },

    #[error("batch {batch_id}: {failed} of {total} files failed to process")]
    FileProcessing {
        batch_id: String,
        failed: usize,
        total: usize,
        #[source]
        source: ProcessingError,
    },

    #[error("batch {batch_id}: enrichment failed")]
    Enrichment {
        batch_id: String,
        #[source]
        source: EnrichmentError,
    },

    #[error("batch {batch_id}: result record could not be stored")]
    Persist {
        batch_id: String,
        #[source]
        source: StoreError,
    },
}

impl BatchError {
    /// Whether the submission itself was invalid, as opposed to a pipeline failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BatchError::EmptyBatch | BatchError::TooManyFiles { .. })
    }
}

/// Failure of the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to persist result record {id}")]
    Persist {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("result record {0} not found")]
    NotFound(String),

    #[error("failed to delete result record {id}")]
    Delete {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to scan result records in {path:?}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// True for every error a caller should treat as "no such record".
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Delete { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
