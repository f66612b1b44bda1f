//! Validation and normalization of raw records into typed records.
//!
//! Numeric fields are stripped of thousands separators and sign noise before
//! parsing; resource labels are resolved against an explicit lookup table of
//! known variants (English names, the site's icon classes, and the German
//! localization). An unmapped label is a hard per-record error — a resource
//! kind is never silently dropped.
//!
//! Level continuity is a run-level concern: after all rows for an entity are
//! normalized, gaps in the level sequence produce warnings attached to the
//! run, not record failures.

use crate::errors::ValidationError;
use crate::extract::ENTITY_FIELD;
use crate::models::{NormalizedRecord, RawRecord, ResourceKind};
use crate::schema::TableSchema;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Known label variants for each resource kind, lowercased.
///
/// Covers the English column names, the knowledge base's `icon-*` classes,
/// and the German localization the site also serves.
static RESOURCE_LABELS: Lazy<HashMap<&'static str, ResourceKind>> = Lazy::new(|| {
    HashMap::from([
        ("wood", ResourceKind::Wood),
        ("icon-wood", ResourceKind::Wood),
        ("holz", ResourceKind::Wood),
        ("clay", ResourceKind::Clay),
        ("icon-clay", ResourceKind::Clay),
        ("lehm", ResourceKind::Clay),
        ("iron", ResourceKind::Iron),
        ("icon-iron", ResourceKind::Iron),
        ("eisen", ResourceKind::Iron),
        ("crop", ResourceKind::Crop),
        ("icon-crop", ResourceKind::Crop),
        ("getreide", ResourceKind::Crop),
    ])
});

/// Thousands separators, whitespace (incl. NBSP / narrow NBSP), and leading
/// `+` noise found in cost cells.
static NUMERIC_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,.\s+\u{00a0}\u{202f}]").expect("static regex compiles"));

/// Resolve a resource label to its kind.
pub fn resource_kind_for_label(label: &str) -> Result<ResourceKind, ValidationError> {
    RESOURCE_LABELS
        .get(label.trim().to_lowercase().as_str())
        .copied()
        .ok_or_else(|| ValidationError::UnknownResourceKind {
            label: label.to_string(),
        })
}

/// Coerce a raw cost cell into a non-negative integer.
fn parse_quantity(field: &str, value: &str) -> Result<u64, ValidationError> {
    let cleaned = NUMERIC_NOISE.replace_all(value, "");
    if cleaned.is_empty() {
        return Err(ValidationError::NotNumeric {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    cleaned
        .parse::<u64>()
        .map_err(|_| ValidationError::NotNumeric {
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// Validate and type one raw record.
///
/// Every field other than the entity name and the level field is treated as
/// a resource cost column whose name must resolve through the label table.
pub fn normalize(
    raw: &RawRecord,
    schema: &TableSchema,
    source_url: &str,
) -> Result<NormalizedRecord, ValidationError> {
    let entity_name = raw
        .fields
        .get(ENTITY_FIELD)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::MissingRequiredField {
            field: ENTITY_FIELD.to_string(),
        })?
        .to_string();

    let level_raw =
        raw.fields
            .get(&schema.level_field)
            .ok_or_else(|| ValidationError::MissingRequiredField {
                field: schema.level_field.clone(),
            })?;
    let level = u32::try_from(parse_quantity(&schema.level_field, level_raw)?).map_err(|_| {
        ValidationError::NotNumeric {
            field: schema.level_field.clone(),
            value: level_raw.clone(),
        }
    })?;

    let mut resource_costs = BTreeMap::new();
    for (name, value) in &raw.fields {
        if name == ENTITY_FIELD || *name == schema.level_field {
            continue;
        }
        let kind = resource_kind_for_label(name)?;
        let amount = parse_quantity(name, value)?;
        resource_costs.insert(kind, amount);
    }

    debug!(entity = %entity_name, level, costs = resource_costs.len(), "normalized record");
    Ok(NormalizedRecord {
        entity_name,
        level,
        resource_costs,
        source_url: source_url.to_string(),
    })
}

/// Check that each entity's levels form a gapless sequence from `level_base`.
///
/// Runs once per target after all rows are normalized. Gaps are surfaced as
/// warnings on the run; they never change run status.
pub fn check_level_continuity(records: &[NormalizedRecord], level_base: u32) -> Vec<String> {
    let mut warnings = Vec::new();

    let groups = records.iter().chunk_by(|r| r.entity_name.clone());
    for (entity, group) in &groups {
        let mut levels: Vec<u32> = group.map(|r| r.level).collect();
        levels.sort_unstable();
        levels.dedup();

        if let Some(&first) = levels.first() {
            if first != level_base {
                warnings.push(format!(
                    "entity '{}': levels start at {}, expected base {}",
                    entity, first, level_base
                ));
            }
        }
        for pair in levels.windows(2) {
            if pair[1] != pair[0] + 1 {
                warnings.push(format!(
                    "entity '{}': level gap between {} and {}",
                    entity, pair[0], pair[1]
                ));
            }
        }
    }

    warnings
}
