use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeederResult;
use crate::feeder::destination::{Destination, FolderRef};
use crate::feeder::model::Timestamp;
use crate::feeder::util::iso8601;

pub const METADATA_FILE_SUFFIX: &str = "_last_export.json";

/// The high-water mark for one conversation, stored next to its artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub latest_message_timestamp: f64,
    pub updated_at: String,
}

impl ExportMetadata {
    pub fn latest(&self) -> Option<Timestamp> {
        Timestamp::from_f64(self.latest_message_timestamp)
    }
}

pub fn metadata_name(safe_name: &str) -> String {
    format!("{safe_name}{METADATA_FILE_SUFFIX}")
}

#[derive(Debug, Clone, Default)]
pub struct ExportMetadataStore;

impl ExportMetadataStore {
    /// `Ok(None)` when no export has happened yet.
    pub fn read(
        &self,
        destination: &mut dyn Destination,
        folder: &FolderRef,
        safe_name: &str,
    ) -> FeederResult<Option<ExportMetadata>> {
        let Some(artifact) = destination.find(folder, &metadata_name(safe_name))? else {
            return Ok(None);
        };
        let raw = destination.read_text(&artifact)?;
        let parsed: ExportMetadata = serde_json::from_str(raw.trim())?;
        Ok(Some(parsed))
    }

    /// Persist `max(latest, previous)` so the mark never moves backwards.
    pub fn write(
        &self,
        destination: &mut dyn Destination,
        folder: &FolderRef,
        safe_name: &str,
        latest: Timestamp,
        previous: Option<&ExportMetadata>,
        now: DateTime<Utc>,
    ) -> FeederResult<ExportMetadata> {
        let mark = previous
            .and_then(ExportMetadata::latest)
            .map_or(latest, |prev| prev.max(latest));
        let metadata = ExportMetadata {
            latest_message_timestamp: mark.as_f64(),
            updated_at: iso8601(now),
        };
        let body = serde_json::to_string_pretty(&metadata)?;

        let name = metadata_name(safe_name);
        match destination.find(folder, &name)? {
            Some(artifact) => destination.overwrite(&artifact, &body)?,
            None => {
                destination.create(folder, &name, &body, None)?;
            }
        }
        tracing::debug!(conversation = safe_name, mark = %mark, "export metadata written");
        Ok(metadata)
    }
}
