//! Page retrieval strategies.
//!
//! Two [`PageFetcher`] implementations cover the two kinds of pages the
//! knowledge base serves:
//!
//! - [`StaticFetcher`]: a single HTTP GET with a bounded timeout, for pages
//!   whose tables exist in the served HTML.
//! - [`RenderedFetcher`]: a WebDriver browser session that executes page
//!   scripts and waits for a readiness selector, for React-rendered pages.
//!
//! The pipeline routes per [`FetchTarget::requires_render`]; there is no
//! automatic escalation from static to rendered fetch. Neither fetcher
//! retries — retry policy belongs to the pipeline.

use crate::errors::FetchError;
use crate::models::{FetchTarget, RawPage};
use async_trait::async_trait;

pub mod rendered;
pub mod static_http;

pub use rendered::{RenderedFetcher, SessionPool};
pub use static_http::StaticFetcher;

/// Retrieves raw HTML for a target URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, target: &FetchTarget) -> Result<RawPage, FetchError>;
}
