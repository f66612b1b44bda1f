//! JSON file sink with idempotent overwrite-by-key semantics.
//!
//! The destination is one JSON document holding every record scraped so far.
//! Persisting a run replaces the destination's existing records for the same
//! `(entity_name, source_url)` keys and leaves everything else untouched, so
//! persisting the same run twice yields byte-identical content. A destination
//! that exists but does not parse as a cost table is a schema mismatch, not
//! something to overwrite blindly.

use crate::errors::PersistError;
use crate::models::{NormalizedRecord, PersistSummary, ScrapeRun};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// The persisted document shape. Round-trips losslessly through
/// [`NormalizedRecord`]'s serde impls.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CostTable {
    pub records: Vec<NormalizedRecord>,
}

/// Persists runs into a single JSON cost-table file.
#[derive(Debug)]
pub struct JsonSink {
    path: PathBuf,
}

impl JsonSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn destination(&self) -> &Path {
        &self.path
    }

    /// Persist a run's records.
    ///
    /// Existing records whose `(entity_name, source_url)` key appears in the
    /// incoming run are replaced; incoming records are appended in run order.
    #[instrument(level = "info", skip_all, fields(destination = %self.path.display()))]
    pub async fn persist(&self, run: &ScrapeRun) -> Result<PersistSummary, PersistError> {
        let mut table = self.load_existing().await?;

        let incoming_keys: BTreeSet<(&str, &str)> = run
            .records
            .iter()
            .map(|r| (r.entity_name.as_str(), r.source_url.as_str()))
            .collect();

        let before = table.records.len();
        table
            .records
            .retain(|r| !incoming_keys.contains(&(r.entity_name.as_str(), r.source_url.as_str())));
        let replaced = before - table.records.len();

        table.records.extend(run.records.iter().cloned());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&table).map_err(|e| PersistError::SchemaMismatch {
            reason: format!("serialization failed: {e}"),
        })?;
        fs::write(&self.path, json).await?;

        info!(
            written = run.records.len(),
            replaced,
            total = table.records.len(),
            "persisted run"
        );
        Ok(PersistSummary {
            written: run.records.len(),
            replaced,
            destination: self.path.display().to_string(),
        })
    }

    async fn load_existing(&self) -> Result<CostTable, PersistError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| PersistError::SchemaMismatch {
                    reason: format!("destination is not a cost table: {e}"),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("destination does not exist yet");
                Ok(CostTable::default())
            }
            Err(e) => Err(PersistError::Io(e)),
        }
    }
}
