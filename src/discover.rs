//! Index-page discovery of per-entity targets.
//!
//! The knowledge base's buildings index only shows one tile per building;
//! the level tables live one navigation deeper. Discovery fetches the index
//! once, collects each tile's detail link, and turns the links into
//! [`FetchTarget`]s that inherit the index's fetch strategy. A tile without
//! a resolvable link is skipped with a warning; an index with no tiles at
//! all is a page-level error.

use crate::models::{FetchTarget, RawPage};
use crate::schema::IndexDiscovery;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};
use url::Url;

/// Enumerate detail-page targets from a fetched index page.
///
/// Targets come back in tile document order, relative links resolved against
/// the index URL, duplicates removed.
#[instrument(level = "debug", skip_all, fields(url = %page.url))]
pub fn discover_targets(
    page: &RawPage,
    discovery: &IndexDiscovery,
) -> Result<Vec<FetchTarget>, String> {
    let tile_sel = parse_selector(&discovery.tile_selector)?;
    let link_sel = parse_selector(&discovery.link_selector)?;
    let base = Url::parse(&page.url).map_err(|e| format!("invalid index URL '{}': {e}", page.url))?;

    let document = Html::parse_document(&page.html);

    let mut seen = BTreeSet::new();
    let mut targets = Vec::new();
    let mut tiles = 0usize;
    for tile in document.select(&tile_sel) {
        tiles += 1;
        let Some(href) = tile_link(tile, &link_sel) else {
            warn!(tile = tiles - 1, "index tile has no detail link");
            continue;
        };
        let resolved = match base.join(href.trim()) {
            Ok(url) => url,
            Err(e) => {
                warn!(href, error = %e, "index tile link does not resolve");
                continue;
            }
        };
        if seen.insert(resolved.to_string()) {
            targets.push(FetchTarget::new(
                resolved.to_string(),
                discovery.target.requires_render,
            ));
        }
    }

    if tiles == 0 {
        return Err(format!(
            "no index tiles matched '{}'",
            discovery.tile_selector
        ));
    }
    if targets.is_empty() {
        return Err("index tiles carry no detail links".to_string());
    }
    debug!(tiles, targets = targets.len(), "index discovery complete");
    Ok(targets)
}

fn parse_selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("invalid selector '{}': {}", css, e))
}

/// The tile may be the anchor itself or wrap one.
fn tile_link<'a>(tile: ElementRef<'a>, link_sel: &Selector) -> Option<&'a str> {
    if let Some(href) = tile.value().attr("href") {
        return Some(href);
    }
    tile.select(link_sel).next().and_then(|a| a.value().attr("href"))
}
