//! Crawl settings.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! command-line flags (applied by `main`). [`CrawlConfig::validate`] runs
//! once the layers are merged.

use crate::error::ConfigError;
use crate::models::Category;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

const DEFAULT_WORKERS: usize = 8;
const DEFAULT_QUEUE_DEPTH: usize = 64;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_MAX_PAGES: u32 = 50;
const DEFAULT_BASE_URL: &str = "https://habr.com";
const DEFAULT_INDEX_TEMPLATE: &str =
    "{base}/ru/flows/{flow}/articles/top/daily/page{page}/?date={date}";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Settings for one crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Number of concurrent workers; fixed for the life of the pool.
    pub workers: usize,
    /// Maximum number of article jobs queued or in flight.
    pub queue_depth: usize,
    /// Total attempts per job before a transient failure is discarded.
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Upper bound on listing pages followed per date and category.
    pub max_pages: u32,
    pub base_url: String,
    pub index_url_template: String,
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            max_pages: DEFAULT_MAX_PAGES,
            base_url: DEFAULT_BASE_URL.to_string(),
            index_url_template: DEFAULT_INDEX_TEMPLATE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlConfig {
    /// Load settings from a YAML file; missing keys keep their defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded crawl configuration");
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers < 2 {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth(0));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::InvalidMaxPages(0));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        let t = &self.index_url_template;
        if !(t.contains("{flow}") && t.contains("{date}") && t.contains("{page}")) {
            return Err(ConfigError::InvalidTemplate(t.clone()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Listing page URL for one flow, day and page number (1-based).
    pub fn index_url(&self, category: Category, date: NaiveDate, page: u32) -> String {
        self.index_url_template
            .replace("{base}", self.base_url.trim_end_matches('/'))
            .replace("{flow}", category.slug())
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
            .replace("{page}", &page.to_string())
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    ///
    /// `base * 2^(attempt-1)`, capped at `backoff_max_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.backoff_base_ms);
        let max = Duration::from_millis(self.backoff_max_ms);
        let shift = attempt.saturating_sub(1).min(16);
        base.saturating_mul(1 << shift).min(max)
    }
}

/// An inclusive range of site-local calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, ConfigError> {
        if from > to {
            return Err(ConfigError::InvertedRange { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d <= to)
    }
}
