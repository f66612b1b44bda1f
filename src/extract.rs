//! Schema-driven extraction of raw records from fetched HTML.
//!
//! The extractor walks the rows matched by a [`TableSchema`] in document
//! order and produces one [`RawRecord`] per data row. Failure is per-row:
//! a malformed row is recorded and skipped, and never aborts the page.
//!
//! Row classification:
//! - A row where the *first* schema field matches no cell is a header or
//!   separator row — skipped silently, not an error.
//! - A row missing a *required* field fails that row only.

use crate::models::{RawPage, RawRecord, Stage, StageError};
use crate::schema::{CellLocator, ExtractMode, TableSchema};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Reserved field name for the page-level entity (building) name, injected
/// into every raw record.
pub const ENTITY_FIELD: &str = "entity";

/// Parses the area name out of a `grid-area` declaration, tolerating missing
/// whitespace after the colon and a missing trailing semicolon.
static GRID_AREA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"grid-area:\s*([^;]+)").expect("static regex compiles"));

/// A field locator compiled for one extraction pass.
enum CellMatcher {
    Css(Selector),
    GridArea(String),
}

/// Extract raw records from a page according to a schema.
///
/// Returns the records in document order together with any per-row errors.
/// Page-level failures (unparseable selector, missing table container) are
/// returned as `Err` and fail the enclosing run's extracting stage.
#[instrument(level = "debug", skip_all, fields(url = %page.url))]
pub fn extract(
    page: &RawPage,
    schema: &TableSchema,
) -> Result<(Vec<RawRecord>, Vec<StageError>), String> {
    if schema.fields.is_empty() {
        return Err("schema declares no fields".to_string());
    }
    let container_sel = parse_selector(&schema.container_selector)?;
    let row_sel = parse_selector(&schema.row_selector)?;
    let entity_sel = parse_selector(&schema.entity_selector)?;
    let styled_sel = parse_selector("[style]")?;
    let field_matchers = schema
        .fields
        .iter()
        .map(|f| compile_locator(&f.locator).map(|m| (f, m)))
        .collect::<Result<Vec<_>, _>>()?;

    let document = Html::parse_document(&page.html);

    let Some(container) = document.select(&container_sel).next() else {
        return Err(format!(
            "table container '{}' not found",
            schema.container_selector
        ));
    };

    let entity_name = document
        .select(&entity_sel)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (row_index, row) in container.select(&row_sel).enumerate() {
        // Probe with the first schema field: no match means header/separator.
        let (first_field, first_matcher) = &field_matchers[0];
        if find_cell(row, first_matcher, &styled_sel).is_none() {
            debug!(row_index, probe = %first_field.name, "skipping non-data row");
            continue;
        }

        let mut fields = BTreeMap::new();
        fields.insert(ENTITY_FIELD.to_string(), entity_name.clone());

        let mut row_failed = false;
        for (spec, matcher) in &field_matchers {
            match find_cell(row, matcher, &styled_sel).and_then(|cell| extract_cell(cell, &spec.mode)) {
                Some(value) => {
                    fields.insert(spec.name.clone(), value);
                }
                None if spec.required => {
                    warn!(row_index, field = %spec.name, "row missing required field");
                    errors.push(StageError::new(
                        Stage::Extracting,
                        format!("row {}: missing required field '{}'", row_index, spec.name),
                    ));
                    row_failed = true;
                    break;
                }
                None => {}
            }
        }
        if row_failed {
            continue;
        }

        records.push(RawRecord { row_index, fields });
    }

    debug!(
        records = records.len(),
        errors = errors.len(),
        "extraction complete"
    );
    Ok((records, errors))
}

fn parse_selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("invalid selector '{}': {}", css, e))
}

fn compile_locator(locator: &CellLocator) -> Result<CellMatcher, String> {
    match locator {
        CellLocator::Css(css) => parse_selector(css).map(CellMatcher::Css),
        CellLocator::GridArea(area) => {
            let area = area.trim();
            if area.is_empty() {
                Err("empty grid-area name in cell locator".to_string())
            } else {
                Ok(CellMatcher::GridArea(area.to_string()))
            }
        }
    }
}

/// Find the cell for a field within a row.
///
/// Grid-area matching compares the parsed area name exactly, so `r1` never
/// matches a `grid-area: r10` cell and `grid-area:r1` (no space) matches.
fn find_cell<'a>(
    row: ElementRef<'a>,
    matcher: &CellMatcher,
    styled_sel: &Selector,
) -> Option<ElementRef<'a>> {
    match matcher {
        CellMatcher::Css(sel) => row.select(sel).next(),
        CellMatcher::GridArea(area) => row.select(styled_sel).find(|el| {
            el.value()
                .attr("style")
                .and_then(|style| GRID_AREA.captures(style))
                .is_some_and(|caps| caps[1].trim() == area)
        }),
    }
}

/// Pull a value out of one cell according to the field's extraction mode.
///
/// Returns `None` for an empty result so required-field handling treats
/// "matched but empty" the same as "not matched".
fn extract_cell(cell: ElementRef<'_>, mode: &ExtractMode) -> Option<String> {
    let value = match mode {
        ExtractMode::Text => element_text(cell),
        ExtractMode::Attribute(name) => cell.value().attr(name)?.trim().to_string(),
        ExtractMode::TitleTooltip => match cell.value().attr("title") {
            Some(title) => title.trim().to_string(),
            None => {
                let tooltip_sel =
                    Selector::parse(".bt-with-tooltip").expect("static selector parses");
                cell.select(&tooltip_sel)
                    .next()
                    .map(element_text)
                    .unwrap_or_default()
            }
        },
    };
    if value.is_empty() { None } else { Some(value) }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}
