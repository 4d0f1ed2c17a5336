//! Result store - one JSON file per result record
//!
//! Layout:
//! - `<records_dir>/<id>.json`: the full `ResultRecord`
//! - `<derived_dir>/*`: derived media shared by all records, owned by the record that references it
//!
//! Records are written to a hidden temp file first and renamed into place, so
//! readers never observe a partially written record.

use crate::{
    common::{MAX_RECORD_ID_LEN, RECORD_EXTENSION, TEMP_RECORD_EXTENSION, errors::StoreError},
    models::{RecordSummary, ResultRecord},
    utils::{ensure_dir, is_within, remove_file_with_retry},
};
use log::{debug, info, warn};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ResultStore {
    records_dir: PathBuf,
    derived_dir: PathBuf,
}

impl ResultStore {
    pub fn new(records_dir: impl Into<PathBuf>, derived_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
            derived_dir: derived_dir.into(),
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    pub fn derived_dir(&self) -> &Path {
        &self.derived_dir
    }

    /// Path of the record file for `id`, or `None` if `id` could escape the records directory.
    pub fn record_path(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.records_dir.join(format!("{}.{}", id, RECORD_EXTENSION)))
    }

    /// Whether `path` is a derived artifact this store may delete.
    pub fn owns(&self, path: &Path) -> bool {
        is_within(&self.derived_dir, path)
    }

    pub async fn create(&self, record: &ResultRecord) -> Result<String, StoreError> {
        let id = record.id.clone();
        let persist = |source: io::Error| StoreError::Persist {
            id: id.clone(),
            source,
        };

        let path = self.record_path(&id).ok_or_else(|| {
            persist(io::Error::new(
                io::ErrorKind::InvalidInput,
                "malformed record id",
            ))
        })?;
        if !record.is_consistent() {
            return Err(persist(io::Error::new(
                io::ErrorKind::InvalidData,
                "fileCount does not match the number of items",
            )));
        }

        ensure_dir(&self.records_dir).await.map_err(persist)?;
        if fs::try_exists(&path).await.map_err(persist)? {
            return Err(persist(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a record with this id already exists",
            )));
        }

        let bytes = serde_json::to_vec_pretty(record).map_err(|err| persist(io::Error::other(err)))?;
        let temp_path = self.records_dir.join(format!(
            ".{}.{}.{}",
            id,
            Uuid::new_v4().simple(),
            TEMP_RECORD_EXTENSION
        ));

        if let Err(err) = write_then_rename(&temp_path, &path, &bytes).await {
            if let Err(cleanup_err) = remove_file_with_retry(&temp_path).await {
                warn!("Failed to remove partial record {:?}: {}", temp_path, cleanup_err);
            }
            return Err(persist(err));
        }

        info!("Stored result record {} ({} items)", id, record.file_count);
        Ok(id)
    }

    /// Missing, malformed and unreadable records all come back as `NotFound`.
    pub async fn get(&self, id: &str) -> Result<ResultRecord, StoreError> {
        let not_found = || StoreError::NotFound(id.to_string());
        let path = self.record_path(id).ok_or_else(not_found)?;

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => {
                warn!("Failed to read result record {:?}: {}", path, err);
                return Err(not_found());
            }
        };

        let record: ResultRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!("Result record {:?} is corrupt: {}", path, err);
                return Err(not_found());
            }
        };

        if record.id != id || !record.is_consistent() {
            warn!("Result record {:?} does not describe id {}", path, id);
            return Err(not_found());
        }
        Ok(record)
    }

    /// Delete the derived files a record owns, then the record itself.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let delete_error = |source: io::Error| StoreError::Delete {
            id: id.to_string(),
            source,
        };

        let record = self.get(id).await.map_err(|_| {
            delete_error(io::Error::new(
                io::ErrorKind::NotFound,
                "no such result record",
            ))
        })?;

        for path in record.referenced_paths() {
            if !self.owns(&path) {
                debug!("Keeping shared asset {:?} of record {}", path, id);
                continue;
            }
            if !remove_file_with_retry(&path).await.map_err(delete_error)? {
                debug!("Derived file {:?} of record {} was already gone", path, id);
            }
        }

        // Validated by `get` above.
        let record_path = self.record_path(id).ok_or_else(|| {
            delete_error(io::Error::new(
                io::ErrorKind::NotFound,
                "no such result record",
            ))
        })?;
        if !remove_file_with_retry(&record_path).await.map_err(delete_error)? {
            return Err(delete_error(io::Error::new(
                io::ErrorKind::NotFound,
                "result record was deleted concurrently",
            )));
        }

        info!("Deleted result record {} ({} items)", id, record.file_count);
        Ok(())
    }

    /// Summaries of every readable record, newest first.
    pub async fn list(&self) -> Result<Vec<RecordSummary>, StoreError> {
        let scan_error = |source: io::Error| StoreError::Scan {
            path: self.records_dir.clone(),
            source,
        };

        let mut entries = match fs::read_dir(&self.records_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(scan_error(err)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
            let path = entry.path();
            let Some(id) = record_id_of(&path) else {
                continue;
            };
            match self.get(&id).await {
                Ok(record) => summaries.push(record.summary()),
                Err(_) => warn!("Skipping unreadable result record {:?}", path),
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(summaries)
    }
}

/// Record ids are limited to `[A-Za-z0-9_-]`, which also rules out path traversal.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_RECORD_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn record_id_of(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    is_valid_id(stem).then(|| stem.to_string())
}

async fn write_then_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_restricted() {
        assert!(is_valid_id("20241018123456789-a1b2c3"));
        assert!(is_valid_id("abc_DEF-1"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id("a.json"));
        assert!(!is_valid_id(&"x".repeat(MAX_RECORD_ID_LEN + 1)));
    }

    #[test]
    fn only_visible_json_files_are_records() {
        assert_eq!(record_id_of(Path::new("/r/abc.json")), Some("abc".to_string()));
        assert_eq!(record_id_of(Path::new("/r/.abc.123.tmp")), None);
        assert_eq!(record_id_of(Path::new("/r/.abc.json")), None);
        assert_eq!(record_id_of(Path::new("/r/abc.txt")), None);
    }
}
