use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Per-file result of the processing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub derived_path: PathBuf,
    #[serde(default)]
    pub capture_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Batch-level decisions for one file, positionally aligned with its `FileMetadata`.
///
/// The default value stands in for entries the enrichment worker did not return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    #[serde(default)]
    pub analysis: Map<String, Value>,
    #[serde(default)]
    pub effects: Effects,
}

/// Asset references chosen for a file. These usually point at shared assets
/// (`/assets/sounds/...`), which a record never owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effects {
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default)]
    pub stamp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_uses_camel_case_and_optional_fields() {
        let metadata: FileMetadata = serde_json::from_value(json!({
            "derivedPath": "public/results/images/1-a.jpg"
        }))
        .unwrap();
        assert_eq!(metadata.capture_time, None);
        assert_eq!(metadata.location, None);

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["derivedPath"], "public/results/images/1-a.jpg");
        assert!(value.get("captureTime").is_some());
    }

    #[test]
    fn enrichment_fields_default_when_missing() {
        let record: EnrichmentRecord =
            serde_json::from_value(json!({ "effects": { "sound": "/assets/sounds/a.mp3" } }))
                .unwrap();
        assert!(record.analysis.is_empty());
        assert_eq!(record.effects.sound.as_deref(), Some("/assets/sounds/a.mp3"));
        assert_eq!(record.effects.stamp, None);

        let empty: EnrichmentRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, EnrichmentRecord::default());
    }

    #[test]
    fn location_bounds() {
        assert!(Location { latitude: 34.69, longitude: 135.50 }.is_valid());
        assert!(!Location { latitude: 91.0, longitude: 0.0 }.is_valid());
        assert!(!Location { latitude: 0.0, longitude: -180.5 }.is_valid());
    }
}
