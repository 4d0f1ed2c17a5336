//! Batch enrichment stage
//!
//! One worker call per batch: the worker sees every file of the batch at once,
//! which it needs for batch-wide choices such as effects that do not repeat.

use crate::{
    common::errors::{EnrichmentError, WorkerError},
    models::{EnrichmentRecord, FileMetadata},
    workflow::processors::worker::{WorkerClient, WorkerCommand},
};
use log::{info, warn};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Enricher {
    client: WorkerClient,
    command: WorkerCommand,
}

impl Enricher {
    pub fn new(client: WorkerClient, command: WorkerCommand) -> Self {
        Self { client, command }
    }

    /// Returns at most `batch.len()` records, positionally aligned with `batch`.
    /// `null` entries come back as default records; a short answer stays short
    /// and the caller pads it.
    pub async fn enrich(
        &self,
        batch: &[FileMetadata],
    ) -> Result<Vec<EnrichmentRecord>, EnrichmentError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let start_time = Instant::now();
        let payload = serde_json::to_vec(batch).map_err(EnrichmentError::Payload)?;
        let value = self.client.invoke(&self.command, &[], Some(payload)).await?;

        let entries: Vec<Option<EnrichmentRecord>> =
            serde_json::from_value(value).map_err(|err| WorkerError::OutputParse {
                program: self.command.program.clone(),
                reason: format!("expected an array of enrichment records: {}", err),
            })?;

        if entries.len() > batch.len() {
            warn!(
                "Enrichment worker returned {} records for {} files, ignoring the surplus",
                entries.len(),
                batch.len()
            );
        } else if entries.len() < batch.len() {
            warn!(
                "Enrichment worker returned {} records for {} files, the rest get defaults",
                entries.len(),
                batch.len()
            );
        }

        let records: Vec<EnrichmentRecord> = entries
            .into_iter()
            .take(batch.len())
            .map(Option::unwrap_or_default)
            .collect();

        info!(duration = &*format!("{:?}", start_time.elapsed());
            "Enriched {} of {} files",
            records.len(),
            batch.len()
        );
        Ok(records)
    }
}
