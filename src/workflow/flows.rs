use crate::{
    common::errors::{BatchError, ProcessingError},
    config::AppConfig,
    models::{FileMetadata, ResultRecord, UploadedFile},
    store::ResultStore,
    utils::discard_files,
    workflow::processors::{enrich::Enricher, file::FileProcessor, worker::WorkerClient},
};
use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use rand::Rng;
use std::{path::PathBuf, sync::Arc, time::Instant};

/// Runs whole batches: concurrent per-file processing, one enrichment call,
/// then a single store write. A batch either yields one record or nothing.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    file_processor: Arc<FileProcessor>,
    enricher: Arc<Enricher>,
    store: ResultStore,
    max_files: usize,
}

impl BatchCoordinator {
    pub fn new(
        file_processor: FileProcessor,
        enricher: Enricher,
        store: ResultStore,
        max_files: usize,
    ) -> Self {
        Self {
            file_processor: Arc::new(file_processor),
            enricher: Arc::new(enricher),
            store,
            max_files,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let client = WorkerClient::new(config.worker_timeout(), config.stderr_excerpt_chars);
        Self::new(
            FileProcessor::new(client.clone(), config.file_worker(), &config.derived_dir),
            Enricher::new(client, config.enrichment_worker()),
            config.result_store(),
            config.max_files_per_batch,
        )
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub async fn submit(&self, files: Vec<UploadedFile>) -> Result<ResultRecord, BatchError> {
        if files.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        if files.len() > self.max_files {
            // Dropping the rejected handles removes their temp files.
            return Err(BatchError::TooManyFiles {
                count: files.len(),
                max: self.max_files,
            });
        }

        let start_time = Instant::now();
        let batch_id = generate_batch_id();
        let total = files.len();
        info!("Batch {} accepted {} file(s)", batch_id, total);

        // Step 1: Process every file; all of them run to completion
        let outcomes = self.process_all(files).await;

        let mut metadata = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(file_metadata) => metadata.push(file_metadata),
                Err(err) => {
                    error!("Batch {}: file #{} failed: {}", batch_id, index, err);
                    failures.push(err);
                }
            }
        }

        if let Some(first_failure) = failures.into_iter().next() {
            let failed = total - metadata.len();
            self.rollback(&batch_id, derived_paths(&metadata)).await;
            return Err(BatchError::FileProcessing {
                batch_id,
                failed,
                total,
                source: first_failure,
            });
        }

        // Step 2: One enrichment call for the whole batch
        let enrichment = match self.enricher.enrich(&metadata).await {
            Ok(enrichment) => enrichment,
            Err(source) => {
                error!("Batch {}: enrichment failed: {}", batch_id, source);
                self.rollback(&batch_id, derived_paths(&metadata)).await;
                return Err(BatchError::Enrichment { batch_id, source });
            }
        };

        // Step 3: Merge by position and persist
        let record = ResultRecord::assemble(batch_id.clone(), Utc::now(), metadata, enrichment);
        if let Err(source) = self.store.create(&record).await {
            error!("Batch {}: storing the record failed: {}", batch_id, source);
            let owned: Vec<PathBuf> = record
                .referenced_paths()
                .into_iter()
                .filter(|path| self.store.owns(path))
                .collect();
            self.rollback(&batch_id, owned).await;
            return Err(BatchError::Persist { batch_id, source });
        }

        info!(duration = &*format!("{:?}", start_time.elapsed());
            "Batch {} stored with {} item(s)",
            batch_id,
            record.file_count
        );
        Ok(record)
    }

    /// One task per file; results come back in submission order regardless of
    /// completion order.
    async fn process_all(
        &self,
        files: Vec<UploadedFile>,
    ) -> Vec<Result<FileMetadata, ProcessingError>> {
        let (names, handles): (Vec<String>, Vec<_>) = files
            .into_iter()
            .map(|file| {
                let name = file.original_name().to_string();
                let processor = Arc::clone(&self.file_processor);
                (name, tokio::spawn(async move { processor.process(file).await }))
            })
            .unzip();

        join_all(handles)
            .await
            .into_iter()
            .zip(names)
            .map(|(joined, file)| {
                joined.unwrap_or_else(|err| {
                    Err(ProcessingError::Aborted {
                        file,
                        reason: err.to_string(),
                    })
                })
            })
            .collect()
    }

    async fn rollback(&self, batch_id: &str, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        warn!(
            "Batch {}: discarding {} derived file(s) of the failed batch",
            batch_id,
            paths.len()
        );
        discard_files(paths).await;
    }
}

fn derived_paths(metadata: &[FileMetadata]) -> Vec<PathBuf> {
    metadata.iter().map(|m| m.derived_path.clone()).collect()
}

/// Millisecond UTC timestamp plus a random suffix, so batches submitted in the
/// same millisecond still get distinct ids.
pub fn generate_batch_id() -> String {
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{}-{:06x}", Utc::now().format("%Y%m%d%H%M%S%3f"), suffix)
}
