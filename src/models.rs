//! Data models for crawled articles and the jobs that produce them.
//!
//! This module defines the core data structures shared by the pipeline:
//! - [`Category`]: The six fixed flows the crawl covers
//! - [`ArticleRecord`]: One article's extracted metadata, the unit of export
//! - [`CrawlJob`] / [`QueuedJob`]: Units of fetch work owned by the queue
//! - [`IndexPage`]: Article links and pagination read from one listing page
//! - [`CrawlResult`]: What a worker produced from a claimed job

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A thematic flow on the site.
///
/// The set is fixed; each variant knows its URL slug and a human-readable
/// name. Serialized as the slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Develop,
    Admin,
    Design,
    Management,
    Marketing,
    Popsci,
}

impl Category {
    /// Every flow, in the order the crawl seeds them.
    pub const ALL: [Category; 6] = [
        Category::Develop,
        Category::Admin,
        Category::Design,
        Category::Management,
        Category::Marketing,
        Category::Popsci,
    ];

    /// URL path segment of the flow, e.g. `develop` in `/ru/flows/develop/`.
    pub fn slug(self) -> &'static str {
        match self {
            Category::Develop => "develop",
            Category::Admin => "admin",
            Category::Design => "design",
            Category::Management => "management",
            Category::Marketing => "marketing",
            Category::Popsci => "popsci",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Category::Develop => "Development",
            Category::Admin => "Administration",
            Category::Design => "Design",
            Category::Management => "Management",
            Category::Marketing => "Marketing",
            Category::Popsci => "Popular Science",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts either the slug or the display name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| {
                c.slug().eq_ignore_ascii_case(wanted) || c.display_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("unknown category '{wanted}'"))
    }
}

/// One article's metadata as extracted from its page.
///
/// `id` is the site-assigned numeric identifier and is unique within a
/// category's aggregated result set. `author == None` is the absent-value
/// marker for pages without a visible author handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    pub category: Category,
    /// Publication time in the site's local offset.
    pub published_at: DateTime<FixedOffset>,
    /// Net vote score; negative for downvoted articles.
    pub rating: i64,
    pub comments: u64,
    pub views: u64,
    pub author: Option<String>,
    pub tags: Vec<String>,
}

/// A unit of fetch work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlJob {
    /// A page of the daily top listing for one flow.
    Index {
        date: NaiveDate,
        category: Category,
        page: u32,
    },
    /// A single article discovered on an index page for `date`.
    Article {
        url: String,
        category: Category,
        date: NaiveDate,
    },
}

impl CrawlJob {
    pub fn category(&self) -> Category {
        match self {
            CrawlJob::Index { category, .. } | CrawlJob::Article { category, .. } => *category,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            CrawlJob::Index { date, .. } | CrawlJob::Article { date, .. } => *date,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, CrawlJob::Index { .. })
    }
}

impl fmt::Display for CrawlJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlJob::Index {
                date,
                category,
                page,
            } => write!(f, "index {}/{} page {}", category.slug(), date, page),
            CrawlJob::Article { url, .. } => write!(f, "article {url}"),
        }
    }
}

/// A job together with the number of attempts already spent on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job: CrawlJob,
    pub attempt: u32,
}

impl QueuedJob {
    pub fn new(job: CrawlJob) -> Self {
        Self { job, attempt: 0 }
    }
}

/// What one listing page says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    /// Absolute article URLs, in page order.
    pub urls: Vec<String>,
    /// Highest page number in the pagination block; `None` when the
    /// listing has no pagination, i.e. a single page.
    pub last_page: Option<u32>,
}

impl IndexPage {
    /// Whether a page after `page` exists. An empty page never has one.
    pub fn has_next(&self, page: u32) -> bool {
        !self.urls.is_empty() && self.last_page.is_some_and(|last| page < last)
    }
}

/// Successful outcome of a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlResult {
    /// A parsed index page; no URLs ends pagination.
    Discovered(IndexPage),
    Extracted(ArticleRecord),
}
