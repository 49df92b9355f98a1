//! Outbound page fetching.
//!
//! [`PageFetcher`] is the seam between the worker pool and the network. The
//! production implementation, [`HttpFetcher`], issues one GET per call with a
//! bounded timeout and classifies every failure as transient or permanent.
//! Retrying is left to the queue.

use crate::config::CrawlConfig;
use crate::error::FetchFailure;
use crate::utils::truncate_for_log;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use std::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

/// Fetch one page's HTML.
///
/// Implementors must report every outcome through the return value and keep
/// no per-call state.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchFailure>;
}

/// [`PageFetcher`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client })
    }
}

/// Map an HTTP status to a failure, or `None` for success.
fn classify_status(status: StatusCode) -> Option<FetchFailure> {
    if status.is_success() {
        None
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(FetchFailure::transient(format!("HTTP {status}")))
    } else {
        Some(FetchFailure::permanent(format!("HTTP {status}")))
    }
}

fn classify_transport(e: &reqwest::Error) -> FetchFailure {
    if e.is_builder() {
        FetchFailure::permanent(format!("invalid request: {e}"))
    } else if e.is_timeout() {
        FetchFailure::transient(format!("timed out: {e}"))
    } else {
        // connect errors, resets and body read failures are all worth another try
        FetchFailure::transient(e.to_string())
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let parsed = Url::parse(url)
            .map_err(|e| FetchFailure::permanent(format!("malformed URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchFailure::permanent(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let t0 = Instant::now();
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        if let Some(failure) = classify_status(response.status()) {
            warn!(
                status = %response.status(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Fetch returned an error status"
            );
            return Err(failure);
        }

        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            preview = %truncate_for_log(&body, 80),
            "Fetched page"
        );
        Ok(body)
    }
}
