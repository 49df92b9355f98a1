//! Error types for fetching, parsing, exporting and configuration.
//!
//! Fetch and parse failures never abort a run: the worker pool turns them
//! into discard reports. Export failures are fatal for one category's file
//! only. Configuration errors stop the binary before any request is made.

use crate::models::CrawlJob;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether a failed fetch is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Timeout, connection failure, HTTP 5xx or 429.
    Transient,
    /// HTTP 4xx, malformed URL, anything retrying cannot fix.
    Permanent,
}

/// Failure reported by a [`PageFetcher`](crate::fetcher::PageFetcher).
///
/// The fetcher knows only the URL; the worker attaches the job to turn this
/// into a [`FetchError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} fetch failure: {message}")]
pub struct FetchFailure {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn with_job(self, job: CrawlJob) -> FetchError {
        FetchError {
            kind: self.kind,
            job,
            message: self.message,
        }
    }
}

/// A failed fetch with the originating job retained for retry or reporting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} failure fetching {job}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub job: CrawlJob,
    pub message: String,
}

/// Errors extracting an article record from HTML.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A mandatory field has no matching element on the page.
    #[error("required field '{field}' not found")]
    MissingField { field: &'static str },

    /// A field is present but its text cannot be interpreted.
    #[error("field '{field}' has malformed value '{value}'")]
    Malformed { field: &'static str, value: String },
}

/// Failure writing one category's output file.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error writing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("could not move finished export into place at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// Invalid crawl settings, detected before the pool starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Worker count must be at least 2, got {0}")]
    InvalidWorkers(usize),

    #[error("Queue depth must be greater than 0, got {0}")]
    InvalidQueueDepth(usize),

    #[error("Max attempts must be greater than 0, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("Max pages must be greater than 0, got {0}")]
    InvalidMaxPages(u32),

    #[error("Request timeout must be greater than 0 seconds")]
    InvalidTimeout,

    #[error("Index URL template must contain {{flow}}, {{date}} and {{page}}: '{0}'")]
    InvalidTemplate(String),

    #[error("Date range is inverted: {from} is after {to}")]
    InvertedRange { from: NaiveDate, to: NaiveDate },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
