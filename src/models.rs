//! Data models for scraped building cost data and run bookkeeping.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`FetchTarget`]: one page to retrieve plus its fetch-strategy requirement
//! - [`RawPage`]: the fetched HTML, scoped to a single pipeline pass
//! - [`RawRecord`]: one extracted table row as raw text, pre-validation
//! - [`NormalizedRecord`]: the typed, validated record that reaches storage
//! - [`ScrapeRun`]: the unit of work and error aggregation for one target
//!
//! Only [`NormalizedRecord`] crosses into persistent storage; everything else
//! lives and dies inside one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The game's closed set of resource kinds.
///
/// Every cost column in the knowledge base maps to exactly one of these.
/// Unmapped labels are a validation error, never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Wood,
    Clay,
    Iron,
    Crop,
}

impl ResourceKind {
    /// All kinds, in canonical order.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Wood,
        ResourceKind::Clay,
        ResourceKind::Iron,
        ResourceKind::Crop,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Wood => "wood",
            ResourceKind::Clay => "clay",
            ResourceKind::Iron => "iron",
            ResourceKind::Crop => "crop",
        };
        f.write_str(s)
    }
}

/// One page to scrape plus its fetch-strategy requirement.
///
/// Immutable once created; the pipeline routes to the static or rendered
/// fetcher based on `requires_render` and never escalates from one to the
/// other.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    /// Absolute URL of the page.
    pub url: String,
    /// Whether the page needs a browser session to execute its scripts
    /// before the cost table exists in the DOM.
    pub requires_render: bool,
}

impl FetchTarget {
    pub fn new(url: impl Into<String>, requires_render: bool) -> Self {
        Self {
            url: url.into(),
            requires_render,
        }
    }
}

/// The raw HTML of a fetched page.
///
/// Produced by a fetcher, consumed only by the extractor, never persisted.
#[derive(Debug)]
pub struct RawPage {
    pub url: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

/// One extracted table row as raw text, keyed by schema field name.
///
/// `row_index` preserves document order so downstream ordering is stable.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub row_index: usize,
    pub fields: BTreeMap<String, String>,
}

/// A validated, typed record for one building level.
///
/// This is the only entity that crosses into persistent storage, so it
/// round-trips losslessly through serde. Costs use a `BTreeMap` keyed by
/// [`ResourceKind`] for deterministic serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Building name, e.g. "Woodcutter". Never empty.
    pub entity_name: String,
    /// Building level. Levels for one entity form a contiguous sequence
    /// from the schema's base; gaps are flagged at the run level.
    pub level: u32,
    /// Non-negative cost per resource kind.
    pub resource_costs: BTreeMap<ResourceKind, u64>,
    /// The page this record was extracted from.
    pub source_url: String,
}

impl NormalizedRecord {
    /// Sum of all resource costs for this level.
    pub fn total_cost(&self) -> u64 {
        self.resource_costs.values().sum()
    }
}

/// The pipeline stage a run is in, or the stage it failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pending,
    Fetching,
    Extracting,
    Normalizing,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Pending => "pending",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Normalizing => "normalizing",
            Stage::Persisting => "persisting",
        };
        f.write_str(s)
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Done => f.write_str("DONE"),
            RunStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// An error recorded against a run, tagged with the stage that produced it.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: Stage,
    pub reason: String,
}

impl StageError {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// The unit of work for one target: its records, errors, and warnings.
///
/// Row-level errors accumulate here without aborting the run; fetch and
/// persist errors move the run to [`RunStatus::Failed`] but the accumulated
/// diagnostics are still returned to the caller.
#[derive(Debug)]
pub struct ScrapeRun {
    pub target: FetchTarget,
    pub records: Vec<NormalizedRecord>,
    pub errors: Vec<StageError>,
    /// Non-fatal findings, e.g. level-continuity gaps.
    pub warnings: Vec<String>,
    pub status: RunStatus,
}

impl ScrapeRun {
    pub fn new(target: FetchTarget) -> Self {
        Self {
            target,
            records: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            status: RunStatus::Failed,
        }
    }
}

/// What the sink did with a run's records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistSummary {
    /// Records written in this persist call.
    pub written: usize,
    /// Pre-existing records that were replaced (overwrite-by-key).
    pub replaced: usize,
    /// Destination path or identifier.
    pub destination: String,
}
