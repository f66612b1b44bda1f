//! Per-target orchestration: fetch → extract → normalize → persist.
//!
//! Each target moves through `PENDING → FETCHING → EXTRACTING → NORMALIZING →
//! PERSISTING → DONE`, with `FAILED` reachable from any stage. Only the
//! fetching stage retries, and only for `Network`/`Timeout` failures — the
//! later stages are deterministic given the page, so retrying them without a
//! new fetch cannot change the outcome. The backoff discipline is exponential
//! with a cap and random jitter.
//!
//! Row-level extraction and normalization errors are recovered locally: the
//! row is dropped and the error recorded, and the run continues. A run that
//! ends `FAILED` still carries every diagnostic accumulated up to that point.
//!
//! A run may be cancelled between stages by dropping its future; the fetchers'
//! scoped session handling releases browser sessions even mid-fetch.

use crate::errors::FetchError;
use crate::extract::extract;
use crate::fetch::PageFetcher;
use crate::models::{FetchTarget, RawPage, RunStatus, ScrapeRun, Stage, StageError};
use crate::normalize::{check_level_continuity, normalize};
use crate::outputs::JsonSink;
use crate::schema::TableSchema;
use rand::{rng, Rng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Retry policy knobs for the fetching stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum fetch retries; a fetch is attempted at most `max + 1` times.
    pub max_fetch_retries: usize,
    /// Initial backoff delay, doubled per attempt.
    pub retry_base_delay: Duration,
    /// Backoff cap.
    pub retry_max_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_fetch_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}

/// Composes the fetchers, schema, and sink into runnable units of work.
///
/// Targets share no mutable state, so any number of [`Pipeline::run_target`]
/// calls may run concurrently; the sink is the one shared resource and is
/// serialized behind a mutex.
pub struct Pipeline {
    static_fetcher: Arc<dyn PageFetcher>,
    rendered_fetcher: Arc<dyn PageFetcher>,
    schema: TableSchema,
    sink: Mutex<JsonSink>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        static_fetcher: Arc<dyn PageFetcher>,
        rendered_fetcher: Arc<dyn PageFetcher>,
        schema: TableSchema,
        sink: JsonSink,
        config: PipelineConfig,
    ) -> Self {
        Self {
            static_fetcher,
            rendered_fetcher,
            schema,
            sink: Mutex::new(sink),
            config,
        }
    }

    /// Run one target to completion and return its [`ScrapeRun`].
    ///
    /// Never returns an error: failures are recorded on the run itself so
    /// the caller always gets the accumulated diagnostics.
    #[instrument(level = "info", skip_all, fields(url = %target.url, render = target.requires_render))]
    pub async fn run_target(&self, target: FetchTarget) -> ScrapeRun {
        let mut run = ScrapeRun::new(target.clone());

        // FETCHING
        let page = match self.fetch_routed(&target).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "fetch failed; run moves to FAILED");
                run.errors.push(StageError::new(Stage::Fetching, e.to_string()));
                return run;
            }
        };

        debug!(fetched_at = %page.fetched_at, bytes = page.html.len(), "page fetched");

        // EXTRACTING
        let (raw_records, row_errors) = match extract(&page, &self.schema) {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!(%reason, "extraction failed; run moves to FAILED");
                run.errors.push(StageError::new(Stage::Extracting, reason));
                return run;
            }
        };
        run.errors.extend(row_errors);

        // NORMALIZING — per-row, order-preserving
        for raw in &raw_records {
            match normalize(raw, &self.schema, &page.url) {
                Ok(record) => run.records.push(record),
                Err(e) => {
                    run.errors.push(StageError::new(
                        Stage::Normalizing,
                        format!("row {}: {}", raw.row_index, e),
                    ));
                }
            }
        }
        run.warnings = check_level_continuity(&run.records, self.schema.level_base);
        for warning in &run.warnings {
            warn!(%warning, "level continuity");
        }

        // PERSISTING — the sink is shared across targets, so serialize
        let persisted = {
            let sink = self.sink.lock().await;
            sink.persist(&run).await
        };
        match persisted {
            Ok(summary) => {
                info!(
                    records = run.records.len(),
                    errors = run.errors.len(),
                    replaced = summary.replaced,
                    "run complete"
                );
                run.status = RunStatus::Done;
            }
            Err(e) => {
                warn!(error = %e, "persist failed; run moves to FAILED");
                run.errors.push(StageError::new(Stage::Persisting, e.to_string()));
            }
        }

        run
    }

    /// Route to the static or rendered fetcher per the target's requirement.
    async fn fetch_routed(&self, target: &FetchTarget) -> Result<RawPage, FetchError> {
        let fetcher: &dyn PageFetcher = if target.requires_render {
            &*self.rendered_fetcher
        } else {
            &*self.static_fetcher
        };
        fetch_with_retry(fetcher, target, &self.config).await
    }
}

/// Fetch with bounded retries for retryable failure kinds only.
///
/// Shared between per-target runs and the one-off index fetch that seeds
/// discovered targets.
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    target: &FetchTarget,
    config: &PipelineConfig,
) -> Result<RawPage, FetchError> {
    let mut attempt = 0usize;
    loop {
        match fetcher.fetch(target).await {
            Ok(page) => return Ok(page),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt > config.max_fetch_retries {
                    return Err(e);
                }

                // backoff calc
                let mut delay = config.retry_base_delay.saturating_mul(1 << (attempt - 1));
                if delay > config.retry_max_delay {
                    delay = config.retry_max_delay;
                }
                let jitter_ms: u64 = rng().random_range(0..=250);
                let delay = delay + Duration::from_millis(jitter_ms);

                warn!(
                    attempt,
                    max = config.max_fetch_retries,
                    ?delay,
                    error = %e,
                    "fetch attempt failed; backing off"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawPage;
    use crate::schema::{travian_buildings_schema, FieldSpec, TableSchema};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FixedPageFetcher {
        html: String,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageFetcher for FixedPageFetcher {
        async fn fetch(&self, target: &FetchTarget) -> Result<RawPage, FetchError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(RawPage {
                url: target.url.clone(),
                html: self.html.clone(),
                fetched_at: Utc::now(),
            })
        }
    }

    struct FailingFetcher {
        attempts: Arc<AtomicUsize>,
        status: Option<u16>,
    }

    #[async_trait]
    impl PageFetcher for FailingFetcher {
        async fn fetch(&self, target: &FetchTarget) -> Result<RawPage, FetchError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.status {
                Some(status) => Err(FetchError::HttpStatus {
                    url: target.url.clone(),
                    status,
                }),
                None => Err(FetchError::Network {
                    url: target.url.clone(),
                    reason: "connection refused".to_string(),
                }),
            }
        }
    }

    fn fast_config(max_fetch_retries: usize) -> PipelineConfig {
        PipelineConfig {
            max_fetch_retries,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
        }
    }

    fn pipeline_with(
        fetcher: Arc<dyn PageFetcher>,
        schema: TableSchema,
        sink: JsonSink,
        config: PipelineConfig,
    ) -> Pipeline {
        Pipeline::new(Arc::clone(&fetcher), fetcher, schema, sink, config)
    }

    fn woodcutter_html() -> String {
        let mut rows = String::new();
        for (level, wood, clay, iron, crop) in [
            (1, "100", "80", "60", "40"),
            (2, "150", "120", "90", "60"),
            (3, "220", "175", "130", "85"),
        ] {
            rows.push_str(&format!(
                r#"<div class="buildingLevelRow buildingLevelRowData">
                    <div style="grid-area: lvl;">{level}</div>
                    <div style="grid-area: r1;">{wood}</div>
                    <div style="grid-area: r2;">{clay}</div>
                    <div style="grid-area: r3;">{iron}</div>
                    <div style="grid-area: r4;">{crop}</div>
                </div>"#
            ));
        }
        format!(
            r#"<html><body>
                <div class="buildingTitle">Woodcutter</div>
                <div class="buildingLevelTable">{rows}</div>
            </body></html>"#
        )
    }

    #[tokio::test]
    async fn test_full_run_woodcutter_levels_in_order() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(FixedPageFetcher {
            html: woodcutter_html(),
            attempts: Arc::new(AtomicUsize::new(0)),
        });
        let pipeline = pipeline_with(
            fetcher,
            travian_buildings_schema(),
            JsonSink::new(dir.path().join("costs.json")),
            fast_config(0),
        );

        let run = pipeline
            .run_target(FetchTarget::new("https://example.com/woodcutter", false))
            .await;

        assert_eq!(run.status, RunStatus::Done);
        assert!(run.errors.is_empty());
        assert!(run.warnings.is_empty());
        assert_eq!(run.records.len(), 3);
        for (i, record) in run.records.iter().enumerate() {
            assert_eq!(record.entity_name, "Woodcutter");
            assert_eq!(record.level, (i + 1) as u32);
        }
        assert_eq!(run.records[0].resource_costs.values().copied().sum::<u64>(), 280);
    }

    #[tokio::test]
    async fn test_network_failure_attempted_retries_plus_one_times() {
        let dir = tempdir().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let fetcher = Arc::new(FailingFetcher {
            attempts: Arc::clone(&attempts),
            status: None,
        });
        let pipeline = pipeline_with(
            fetcher,
            travian_buildings_schema(),
            JsonSink::new(dir.path().join("costs.json")),
            fast_config(2),
        );

        let run = pipeline
            .run_target(FetchTarget::new("https://example.com/down", false))
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].stage, Stage::Fetching);
    }

    #[tokio::test]
    async fn test_http_status_not_retried() {
        let dir = tempdir().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let fetcher = Arc::new(FailingFetcher {
            attempts: Arc::clone(&attempts),
            status: Some(404),
        });
        let pipeline = pipeline_with(
            fetcher,
            travian_buildings_schema(),
            JsonSink::new(dir.path().join("costs.json")),
            fast_config(5),
        );

        let run = pipeline
            .run_target(FetchTarget::new("https://example.com/missing", false))
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(run.errors[0].reason.contains("404"));
    }

    #[tokio::test]
    async fn test_unknown_resource_label_drops_row_only() {
        // Schema names one column "Lumber", which has no entry in the
        // resource-kind table: each row fails normalization for that field
        // while the page itself is not aborted.
        let schema = TableSchema {
            container_selector: "table".to_string(),
            row_selector: "tr".to_string(),
            entity_selector: "h1".to_string(),
            level_field: "level".to_string(),
            level_base: 1,
            fields: vec![
                FieldSpec::text("level", "td.lvl", true),
                FieldSpec::text("Lumber", "td.lumber", false),
                FieldSpec::text("clay", "td.clay", true),
            ],
        };
        let html = r#"<html><body><h1>Sawpit</h1><table>
            <tr><td class="lvl">1</td><td class="lumber">100</td><td class="clay">50</td></tr>
            <tr><td class="lvl">2</td><td class="clay">70</td></tr>
        </table></body></html>"#;

        let dir = tempdir().unwrap();
        let fetcher = Arc::new(FixedPageFetcher {
            html: html.to_string(),
            attempts: Arc::new(AtomicUsize::new(0)),
        });
        let pipeline = pipeline_with(
            fetcher,
            schema,
            JsonSink::new(dir.path().join("costs.json")),
            fast_config(0),
        );

        let run = pipeline
            .run_target(FetchTarget::new("https://example.com/sawpit", false))
            .await;

        // Row 1 carries the unmapped label and is dropped with an error;
        // row 2 has no lumber cell and normalizes fine.
        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.records.len(), 1);
        assert_eq!(run.records[0].level, 2);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].stage, Stage::Normalizing);
        assert!(run.errors[0].reason.contains("Lumber"));
    }

    #[tokio::test]
    async fn test_level_gap_is_warning_not_failure() {
        let html = r#"<html><body>
            <div class="buildingTitle">Woodcutter</div>
            <div class="buildingLevelTable">
                <div class="buildingLevelRow buildingLevelRowData">
                    <div style="grid-area: lvl;">1</div>
                    <div style="grid-area: r1;">100</div>
                    <div style="grid-area: r2;">80</div>
                    <div style="grid-area: r3;">60</div>
                    <div style="grid-area: r4;">40</div>
                </div>
                <div class="buildingLevelRow buildingLevelRowData">
                    <div style="grid-area: lvl;">3</div>
                    <div style="grid-area: r1;">220</div>
                    <div style="grid-area: r2;">175</div>
                    <div style="grid-area: r3;">130</div>
                    <div style="grid-area: r4;">85</div>
                </div>
            </div>
        </body></html>"#;

        let dir = tempdir().unwrap();
        let fetcher = Arc::new(FixedPageFetcher {
            html: html.to_string(),
            attempts: Arc::new(AtomicUsize::new(0)),
        });
        let pipeline = pipeline_with(
            fetcher,
            travian_buildings_schema(),
            JsonSink::new(dir.path().join("costs.json")),
            fast_config(0),
        );

        let run = pipeline
            .run_target(FetchTarget::new("https://example.com/woodcutter", false))
            .await;

        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.records.len(), 2);
        assert_eq!(run.warnings.len(), 1);
        assert!(run.warnings[0].contains("gap"));
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_diagnostics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("costs.json");
        std::fs::write(&path, "not json").unwrap();

        let fetcher = Arc::new(FixedPageFetcher {
            html: woodcutter_html(),
            attempts: Arc::new(AtomicUsize::new(0)),
        });
        let pipeline = pipeline_with(
            fetcher,
            travian_buildings_schema(),
            JsonSink::new(&path),
            fast_config(0),
        );

        let run = pipeline
            .run_target(FetchTarget::new("https://example.com/woodcutter", false))
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.records.len(), 3);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].stage, Stage::Persisting);
    }
}
