//! Run-level accounting: discarded jobs and the final manifest.
//!
//! Every job that does not end in a record is reported here exactly once.
//! Reports accumulate during the run and are handed to the caller when the
//! pool stops; they never abort the crawl.

use crate::error::{FetchError, FetchErrorKind, ParseError};
use crate::models::{Category, CrawlJob};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Why a job was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardKind {
    /// Transient fetch failures exhausted the attempt budget.
    Transient,
    Permanent,
    MissingField,
    Malformed,
    /// Never ran, or stopped mid-way, because the run was stopped.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardReport {
    pub job: CrawlJob,
    pub kind: DiscardKind,
    /// Fetch attempts spent on the job.
    pub attempts: u32,
    pub reason: String,
}

impl DiscardReport {
    pub fn from_fetch(error: FetchError, attempts: u32) -> Self {
        let kind = match error.kind {
            FetchErrorKind::Transient => DiscardKind::Transient,
            FetchErrorKind::Permanent => DiscardKind::Permanent,
        };
        Self {
            kind,
            attempts,
            reason: error.message,
            job: error.job,
        }
    }

    pub fn from_parse(job: CrawlJob, error: &ParseError, attempts: u32) -> Self {
        let kind = match error {
            ParseError::MissingField { .. } => DiscardKind::MissingField,
            ParseError::Malformed { .. } => DiscardKind::Malformed,
        };
        Self {
            job,
            kind,
            attempts,
            reason: error.to_string(),
        }
    }

    pub fn cancelled(job: CrawlJob, attempts: u32) -> Self {
        Self {
            job,
            kind: DiscardKind::Cancelled,
            attempts,
            reason: "run stopped before the job finished".to_string(),
        }
    }
}

/// Thread-safe accumulator of discard reports.
#[derive(Debug, Default)]
pub struct DiscardLog {
    reports: Mutex<Vec<DiscardReport>>,
}

impl DiscardLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: DiscardReport) {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(report);
    }

    /// Hand back everything recorded so far, leaving the log empty.
    pub fn take(&self) -> Vec<DiscardReport> {
        std::mem::take(
            &mut *self
                .reports
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// Per-category section of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryManifest {
    /// Article URLs found on listing pages, before de-duplication.
    pub discovered: usize,
    pub exported: usize,
    pub by_date: BTreeMap<NaiveDate, usize>,
    pub discarded: Vec<DiscardReport>,
    /// Set when this category's file could not be written.
    pub export_error: Option<String>,
    pub top_authors: Vec<(String, usize)>,
    pub top_tags: Vec<(String, usize)>,
}

/// Summary of one run, written next to the CSV files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub categories: BTreeMap<Category, CategoryManifest>,
}

impl RunManifest {
    pub fn total_exported(&self) -> usize {
        self.categories.values().map(|c| c.exported).sum()
    }

    pub fn total_discarded(&self) -> usize {
        self.categories.values().map(|c| c.discarded.len()).sum()
    }
}

/// Group discard reports by the category of their job.
pub fn discards_by_category(
    reports: Vec<DiscardReport>,
) -> BTreeMap<Category, Vec<DiscardReport>> {
    let mut grouped: BTreeMap<Category, Vec<DiscardReport>> = BTreeMap::new();
    for report in reports {
        grouped.entry(report.job.category()).or_default().push(report);
    }
    grouped
}
