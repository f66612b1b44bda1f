//! Rendered fetcher: WebDriver sessions behind a bounded pool.
//!
//! The knowledge base builds its cost tables client-side, so the rendered
//! path drives a real browser through geckodriver, waits for the table
//! container to appear, and captures the resulting DOM.
//!
//! Sessions are expensive, so they live in a [`SessionPool`]: a semaphore
//! bounds how many exist at once (and therefore how many rendered fetches
//! run concurrently, regardless of pipeline parallelism), and an idle list
//! reuses sessions across fetches. Checkout hands back a [`SessionGuard`]
//! whose `Drop` returns the session on every exit path — success, error, or
//! cancellation mid-fetch. A session that saw a command error is torn down
//! through [`SessionGuard::discard`] instead of returned, so a wedged
//! browser never poisons later fetches and never outlives its guard.

use crate::errors::FetchError;
use crate::fetch::PageFetcher;
use crate::models::{FetchTarget, RawPage};
use async_trait::async_trait;
use chrono::Utc;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

/// A bounded pool of WebDriver sessions.
pub struct SessionPool {
    webdriver_url: String,
    headless: bool,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Client>>>,
}

impl SessionPool {
    /// Create a pool that allows at most `capacity` live sessions.
    ///
    /// Sessions are created lazily on first checkout, so constructing the
    /// pool does not require a reachable WebDriver server.
    pub fn new(webdriver_url: impl Into<String>, capacity: usize, headless: bool) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            headless,
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check out a session, waiting for a permit if the pool is exhausted.
    pub async fn checkout(&self) -> Result<SessionGuard, FetchError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::RenderFailure {
                url: self.webdriver_url.clone(),
                reason: "session pool closed".to_string(),
            })?;

        let reused = self.idle.lock().expect("pool mutex poisoned").pop();
        let client = match reused {
            Some(client) => {
                debug!("reusing idle browser session");
                client
            }
            None => self.connect().await?,
        };

        Ok(SessionGuard {
            client: Some(client),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    async fn connect(&self) -> Result<Client, FetchError> {
        let args: Vec<&str> = if self.headless { vec!["-headless"] } else { vec![] };
        let mut caps = serde_json::map::Map::new();
        caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));

        info!(webdriver_url = %self.webdriver_url, headless = self.headless, "starting browser session");
        let mut builder = ClientBuilder::rustls().map_err(|e| FetchError::RenderFailure {
            url: self.webdriver_url.clone(),
            reason: format!("TLS setup failed: {e}"),
        })?;
        builder
            .capabilities(caps)
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| FetchError::RenderFailure {
                url: self.webdriver_url.clone(),
                reason: format!("could not start session: {e}"),
            })
    }

    /// Close all idle sessions. Best-effort; call once at shutdown.
    pub async fn shutdown(&self) {
        let clients = {
            let mut idle = self.idle.lock().expect("pool mutex poisoned");
            std::mem::take(&mut *idle)
        };
        for client in clients {
            if let Err(e) = client.close().await {
                warn!(error = %e, "failed to close browser session");
            }
        }
    }
}

/// Scoped checkout of one pooled session.
///
/// Dropping the guard returns the session to the pool and releases the
/// concurrency permit. A session that should not be reused must be torn
/// down with [`SessionGuard::discard`] instead.
pub struct SessionGuard {
    client: Option<Client>,
    idle: Arc<Mutex<Vec<Client>>>,
    _permit: OwnedSemaphorePermit,
}

impl SessionGuard {
    pub fn client(&self) -> &Client {
        self.client.as_ref().expect("client present until drop")
    }

    /// Tear the session down instead of returning it to the pool.
    ///
    /// Dropping a `Client` handle does not end the WebDriver session, and
    /// geckodriver does not reap orphans, so the session must be closed
    /// explicitly or its browser process outlives the guard. The permit is
    /// released once the close command has been sent.
    pub async fn discard(mut self) {
        if let Some(client) = self.client.take() {
            debug!("closing browser session after command failure");
            if let Err(e) = client.close().await {
                warn!(error = %e, "failed to close discarded browser session");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.idle.lock().expect("pool mutex poisoned").push(client);
        }
    }
}

/// Fetches a page by driving a pooled browser session.
pub struct RenderedFetcher {
    pool: Arc<SessionPool>,
    /// CSS selector whose presence signals the page is ready to capture.
    ready_selector: String,
    render_wait_timeout: Duration,
}

impl RenderedFetcher {
    pub fn new(
        pool: Arc<SessionPool>,
        ready_selector: impl Into<String>,
        render_wait_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            ready_selector: ready_selector.into(),
            render_wait_timeout,
        }
    }

    async fn render(&self, client: &Client, target: &FetchTarget) -> Result<String, FetchError> {
        client
            .goto(&target.url)
            .await
            .map_err(|e| FetchError::RenderFailure {
                url: target.url.clone(),
                reason: format!("navigation failed: {e}"),
            })?;

        match client
            .wait()
            .at_most(self.render_wait_timeout)
            .for_element(Locator::Css(&self.ready_selector))
            .await
        {
            Ok(_) => {}
            Err(CmdError::WaitTimeout) => {
                return Err(FetchError::Timeout {
                    url: target.url.clone(),
                });
            }
            Err(e) => {
                return Err(FetchError::RenderFailure {
                    url: target.url.clone(),
                    reason: format!("readiness wait failed: {e}"),
                });
            }
        }

        client
            .source()
            .await
            .map_err(|e| FetchError::RenderFailure {
                url: target.url.clone(),
                reason: format!("DOM capture failed: {e}"),
            })
    }
}

#[async_trait]
impl PageFetcher for RenderedFetcher {
    #[instrument(level = "info", skip_all, fields(url = %target.url))]
    async fn fetch(&self, target: &FetchTarget) -> Result<RawPage, FetchError> {
        let session = self.pool.checkout().await?;

        let result = self.render(session.client(), target).await;
        let html = match result {
            Ok(html) => html,
            Err(e) => {
                // A timed-out wait leaves the session on a half-loaded page
                // but still functional; command errors do not.
                if !matches!(e, FetchError::Timeout { .. }) {
                    session.discard().await;
                }
                return Err(e);
            }
        };

        debug!(bytes = html.len(), "captured rendered DOM");
        Ok(RawPage {
            url: target.url.clone(),
            html,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_capacity_floor_is_one() {
        let pool = SessionPool::new("http://localhost:4444", 0, true);
        assert_eq!(pool.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_permit_bounds_concurrent_checkouts() {
        // Permits are taken before any connection attempt, so exhaustion is
        // observable without a WebDriver server: seize the only permit and
        // verify a second checkout blocks.
        let pool = SessionPool::new("http://localhost:4444", 1, true);
        let permit = Arc::clone(&pool.permits).acquire_owned().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), pool.checkout()).await;
        assert!(waited.is_err(), "checkout should block while pool is full");

        drop(permit);
        assert_eq!(pool.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_discard_releases_permit_without_pooling() {
        let pool = SessionPool::new("http://localhost:4444", 1, true);
        let permit = Arc::clone(&pool.permits).acquire_owned().await.unwrap();
        let guard = SessionGuard {
            client: None,
            idle: Arc::clone(&pool.idle),
            _permit: permit,
        };

        guard.discard().await;
        assert_eq!(pool.permits.available_permits(), 1);
        assert!(pool.idle.lock().unwrap().is_empty());
    }
}
