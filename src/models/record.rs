use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::metadata::{EnrichmentRecord, FileMetadata};

/// The stored result of one successful batch.
///
/// `items` keeps the upload order of the batch. `file_count` always equals
/// `items.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub items: Vec<ResultItem>,
}

/// One file of a batch: its processing metadata merged with its enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(flatten)]
    pub metadata: FileMetadata,
    #[serde(flatten)]
    pub enrichment: EnrichmentRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
}

impl ResultRecord {
    /// Merge the two stage outputs by position. Enrichment entries missing at
    /// the tail become default records; surplus entries are dropped.
    pub fn assemble(
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        metadata: Vec<FileMetadata>,
        enrichment: Vec<EnrichmentRecord>,
    ) -> Self {
        let mut enrichment = enrichment.into_iter();
        let items: Vec<ResultItem> = metadata
            .into_iter()
            .map(|metadata| ResultItem {
                metadata,
                enrichment: enrichment.next().unwrap_or_default(),
            })
            .collect();

        Self {
            id: id.into(),
            created_at,
            file_count: items.len(),
            items,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.file_count == self.items.len()
    }

    /// Every filesystem path the record mentions, derived outputs first.
    /// Callers decide which of them the record actually owns.
    pub fn referenced_paths(&self) -> Vec<PathBuf> {
        let derived = self.items.iter().map(|item| item.metadata.derived_path.clone());
        let effects = self.items.iter().flat_map(|item| {
            [&item.enrichment.effects.sound, &item.enrichment.effects.stamp]
                .into_iter()
                .flatten()
                .map(PathBuf::from)
        });
        derived.chain(effects).collect()
    }

    /// A copy with items ordered by capture time. Items without a capture time
    /// keep their relative order after the dated ones. The stored record is
    /// never reordered.
    pub fn sorted_by_capture_time(&self) -> Self {
        let mut sorted = self.clone();
        sorted
            .items
            .sort_by_key(|item| (item.metadata.capture_time.is_none(), item.metadata.capture_time));
        sorted
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            file_count: self.file_count,
        }
    }
}
