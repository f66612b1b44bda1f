//! Persistence sinks for normalized records.
//!
//! One sink ships today:
//!
//! - [`json`]: a single JSON cost-table document, overwritten by key so that
//!   re-running a scrape never duplicates entries.
//!
//! # Output Structure
//!
//! ```text
//! out.json
//! └── { "records": [ {entity_name, level, resource_costs, source_url}, … ] }
//! ```

pub mod json;

pub use json::JsonSink;
