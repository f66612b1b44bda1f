//! Declarative table schemas: which cells to extract, and how.
//!
//! A [`TableSchema`] is plain data — container selector, row selector, and an
//! ordered list of field specs. New page layouts are new schema values, not
//! new code. The built-in `travian-buildings` target set reproduces the
//! knowledge base's grid layout, where each cell carries a `grid-area` inline
//! style instead of a semantic class, and discovers one target per building
//! from the index page.

use crate::models::FetchTarget;

/// Where a field's cell lives within a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellLocator {
    /// CSS selector, evaluated within the row.
    Css(String),
    /// A `grid-area` name parsed out of the cell's inline style. Matching is
    /// exact on the parsed name, so `r1` never matches `r10`, and tolerant of
    /// whitespace around the colon.
    GridArea(String),
}

/// How to pull a value out of a matched cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractMode {
    /// Concatenated text content of the cell.
    Text,
    /// A named attribute on the cell element.
    Attribute(String),
    /// The `title` attribute, falling back to the text of a nested
    /// `.bt-with-tooltip` element (the knowledge base's tooltip markup).
    TitleTooltip,
}

/// One column of the table: a name, a cell locator, and an extraction mode.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name in the raw record. Resource columns are named by their
    /// resource label and resolved against the kind lookup table downstream.
    pub name: String,
    pub locator: CellLocator,
    pub mode: ExtractMode,
    /// A row matching the row selector but missing a required field fails
    /// that row only; other rows continue.
    pub required: bool,
}

impl FieldSpec {
    pub fn text(name: &str, cell_selector: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            locator: CellLocator::Css(cell_selector.to_string()),
            mode: ExtractMode::Text,
            required,
        }
    }

    pub fn grid(name: &str, grid_area: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            locator: CellLocator::GridArea(grid_area.to_string()),
            mode: ExtractMode::Text,
            required,
        }
    }
}

/// Declarative description of one cost table layout.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Selector for the table container within the page.
    pub container_selector: String,
    /// Selector for data rows within the container.
    pub row_selector: String,
    /// Page-level selector for the entity (building) name.
    pub entity_selector: String,
    /// Name of the field that carries the level number.
    pub level_field: String,
    /// First level an entity is expected to have; continuity is checked
    /// upward from here.
    pub level_base: u32,
    /// Ordered field specs. The first field doubles as the data-row probe:
    /// a row where it matches nothing is a header/separator and is skipped.
    pub fields: Vec<FieldSpec>,
}

/// An index page whose tiles link to the per-entity detail pages.
///
/// Discovery fetches the index once, collects each tile's detail link, and
/// turns the links into [`FetchTarget`]s that inherit the index's fetch
/// strategy.
#[derive(Debug, Clone)]
pub struct IndexDiscovery {
    /// The index page itself.
    pub target: FetchTarget,
    /// Selector for one entity tile on the index page.
    pub tile_selector: String,
    /// Selector for the detail link within (or on) a tile.
    pub link_selector: String,
}

/// A named set of scrape work: a table schema plus either fixed targets or
/// an index page to discover them from.
#[derive(Debug, Clone)]
pub struct TargetSet {
    pub schema: TableSchema,
    pub discovery: Option<IndexDiscovery>,
    pub targets: Vec<FetchTarget>,
}

/// The Travian knowledge base buildings table.
///
/// Grid cells are addressed by `grid-area` inline styles, so cell locators
/// match on the parsed style value. The pages are React-rendered; targets
/// using this schema always require the rendered fetch path.
pub fn travian_buildings_schema() -> TableSchema {
    TableSchema {
        container_selector: "div.buildingLevelTable".to_string(),
        row_selector: "div.buildingLevelRow.buildingLevelRowData".to_string(),
        entity_selector: "div.buildingTitle".to_string(),
        level_field: "level".to_string(),
        level_base: 1,
        fields: vec![
            FieldSpec::grid("level", "lvl", true),
            FieldSpec::grid("wood", "r1", true),
            FieldSpec::grid("clay", "r2", true),
            FieldSpec::grid("iron", "r3", true),
            FieldSpec::grid("crop", "r4", true),
        ],
    }
}

/// Resolve a named target set.
///
/// Returns `None` for unknown set names; the caller reports the error.
pub fn target_set(name: &str) -> Option<TargetSet> {
    match name {
        // The buildings index only shows the building tiles; the level
        // tables live one click deeper, so the set is discovered from the
        // index rather than listed here.
        "travian-buildings" => Some(TargetSet {
            schema: travian_buildings_schema(),
            discovery: Some(IndexDiscovery {
                target: FetchTarget::new(
                    "https://knowledgebase.legends.travian.com/en-US/buildings",
                    true,
                ),
                tile_selector: "div.buildingContainer".to_string(),
                link_selector: "a[href]".to_string(),
            }),
            targets: Vec::new(),
        }),
        _ => None,
    }
}
