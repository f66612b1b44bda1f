//! Static HTTP fetcher: one GET, bounded timeout, no retries.

use crate::errors::FetchError;
use crate::fetch::PageFetcher;
use crate::models::{FetchTarget, RawPage};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Fetches a page with a single HTTP GET.
///
/// Non-2xx responses fail with [`FetchError::HttpStatus`] and are never
/// retried here; the pipeline decides what is retryable.
#[derive(Debug, Clone)]
pub struct StaticFetcher {
    client: reqwest::Client,
}

impl StaticFetcher {
    /// Build a fetcher whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self { client })
    }

    fn classify(url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    #[instrument(level = "info", skip_all, fields(url = %target.url))]
    async fn fetch(&self, target: &FetchTarget) -> Result<RawPage, FetchError> {
        let response = self
            .client
            .get(&target.url)
            .send()
            .await
            .map_err(|e| Self::classify(&target.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: target.url.clone(),
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| Self::classify(&target.url, e))?;

        debug!(bytes = html.len(), "fetched static page");
        Ok(RawPage {
            url: target.url.clone(),
            html,
            fetched_at: Utc::now(),
        })
    }
}
