//! HTML extraction for listing and article pages.
//!
//! [`PageParser`] is pure: it never touches the network, the filesystem or
//! the clock, so identical HTML always yields an identical result.
//!
//! # Listing pages
//!
//! Each entry of `.tm-articles-list` is an `<article>` element. Entries
//! without a `.tm-article-snippet` are company megaposts and are skipped.
//! The `.tm-pagination__page` links give the last page number; a listing
//! without them is a single page. No page past the last one is requested,
//! and an empty page also ends pagination.
//!
//! # Article pages
//!
//! The identifier comes from the canonical link. Title, publication time,
//! rating and view count are mandatory; author and tags are optional.

use crate::error::ParseError;
use crate::models::{ArticleRecord, Category, IndexPage};
use chrono::{DateTime, FixedOffset, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, trace};
use url::Url;

/// The site publishes in Moscow time.
const SITE_UTC_OFFSET_SECS: i32 = 3 * 3600;

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

static LISTING_ITEM: Lazy<Selector> = Lazy::new(|| sel(".tm-articles-list article"));
static SNIPPET: Lazy<Selector> = Lazy::new(|| sel(".tm-article-snippet"));
static LISTING_LINK: Lazy<Vec<Selector>> =
    Lazy::new(|| vec![sel("a.tm-title__link[href]"), sel("h2 a[href]")]);
static TIME: Lazy<Selector> = Lazy::new(|| sel("time[datetime]"));
static PAGINATION_PAGE: Lazy<Selector> = Lazy::new(|| sel(".tm-pagination__page"));

static CANONICAL: Lazy<Vec<(Selector, &'static str)>> = Lazy::new(|| {
    vec![
        (sel("link[rel='canonical'][href]"), "href"),
        (sel("meta[property='og:url'][content]"), "content"),
    ]
});
static TITLE: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        sel("h1.tm-title"),
        sel("h1.tm-article-snippet__title"),
        sel("h1"),
    ]
});
static PUBLISHED: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        sel(".tm-article-datetime-published time[datetime]"),
        sel("time[datetime]"),
    ]
});
static RATING: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        sel(".tm-votes-meter__value"),
        sel(".tm-votes-lever__score-counter"),
    ]
});
static VIEWS: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        sel("span[title='Количество просмотров'] .tm-icon-counter__value"),
        sel(".tm-icon-counter__value"),
    ]
});
static COMMENTS: Lazy<Selector> = Lazy::new(|| sel(".tm-article-comments-counter-link__value"));
static AUTHOR: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        sel("a.tm-user-info__username"),
        sel(".tm-article-snippet__author"),
    ]
});
static META_LIST: Lazy<Selector> = Lazy::new(|| sel(".tm-article-presenter__meta-list"));
static LIST_ITEM: Lazy<Selector> = Lazy::new(|| sel("li"));

static ARTICLE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?:articles|post|news)/(\d+)").expect("static regex must parse"));
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex must parse"));

fn site_offset() -> FixedOffset {
    FixedOffset::east_opt(SITE_UTC_OFFSET_SECS).expect("offset within a day")
}

/// Text content with runs of whitespace collapsed to one space.
fn clean_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text<'a>(root: ElementRef<'a>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| root.select(s).next())
        .map(clean_text)
        .find(|t| !t.is_empty())
}

fn first_attr<'a>(root: ElementRef<'a>, selectors: &[(Selector, &str)]) -> Option<String> {
    selectors.iter().find_map(|(s, attr)| {
        root.select(s)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, ParseError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&site_offset()))
        .map_err(|_| ParseError::Malformed {
            field: "published_at",
            value: raw.to_string(),
        })
}

/// Parse a vote score such as `+42`, `0`, `-3` or `–3`.
fn parse_rating(raw: &str) -> Result<i64, ParseError> {
    let normalized: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '+')
        .map(|c| if c == '–' || c == '−' { '-' } else { c })
        .collect();
    normalized.parse().map_err(|_| ParseError::Malformed {
        field: "rating",
        value: raw.to_string(),
    })
}

/// Parse a view counter such as `980`, `1.2K`, `12K` or `3,4M`.
fn parse_views(raw: &str) -> Result<u64, ParseError> {
    let malformed = || ParseError::Malformed {
        field: "views",
        value: raw.to_string(),
    };
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut chars = compact.chars();
    let (number, multiplier) = match chars.next_back() {
        Some('K' | 'k' | 'К' | 'к') => (chars.as_str(), 1_000.0),
        Some('M' | 'm' | 'М' | 'м') => (chars.as_str(), 1_000_000.0),
        _ => (compact.as_str(), 1.0),
    };
    if number.is_empty() {
        return Err(malformed());
    }
    if multiplier == 1.0 {
        return number.parse::<u64>().map_err(|_| malformed());
    }
    let value: f64 = number.replace(',', ".").parse().map_err(|_| malformed())?;
    if !value.is_finite() || value < 0.0 {
        return Err(malformed());
    }
    Ok((value * multiplier).round() as u64)
}

/// Extracts listing URLs and article records from the site's HTML.
#[derive(Debug, Clone)]
pub struct PageParser {
    base: Url,
}

impl PageParser {
    /// `base` is used to resolve relative links, e.g. `https://habr.com`.
    pub fn new(base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base)?,
        })
    }

    /// Article URLs listed on one index page, in page order, and the last
    /// page number of the listing.
    ///
    /// No URLs means there are no more pages for this date and category.
    pub fn parse_index(&self, html: &str, category: Category, date: NaiveDate) -> IndexPage {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for item in document.select(&LISTING_ITEM) {
            if item.select(&SNIPPET).next().is_none() {
                trace!(id = ?item.value().attr("id"), "Skipping megapost");
                continue;
            }

            if let Some(published) = item
                .select(&TIME)
                .next()
                .and_then(|t| t.value().attr("datetime"))
                .and_then(|raw| parse_timestamp(raw).ok())
                && published.date_naive() != date
            {
                trace!(%published, %date, "Skipping entry from another day");
                continue;
            }

            let href = LISTING_LINK
                .iter()
                .find_map(|s| item.select(s).next())
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| self.base.join(href).ok())
                .or_else(|| {
                    item.value()
                        .attr("id")
                        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
                        .and_then(|id| self.base.join(&format!("/ru/articles/{id}/")).ok())
                });

            if let Some(url) = href.map(|u| u.to_string())
                && seen.insert(url.clone())
            {
                urls.push(url);
            }
        }

        let last_page = document
            .select(&PAGINATION_PAGE)
            .filter_map(|p| clean_text(p).parse::<u32>().ok())
            .max();

        debug!(
            category = category.slug(),
            %date,
            count = urls.len(),
            ?last_page,
            "Parsed index page"
        );
        IndexPage { urls, last_page }
    }

    /// Extract one article's record from its page.
    pub fn parse_article(&self, html: &str, category: Category) -> Result<ArticleRecord, ParseError> {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let canonical = first_attr(root, &CANONICAL)
            .and_then(|href| self.base.join(&href).ok())
            .ok_or(ParseError::MissingField { field: "identifier" })?;
        let id = ARTICLE_ID
            .captures(canonical.path())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ParseError::Malformed {
                field: "identifier",
                value: canonical.to_string(),
            })?;

        let title = first_text(root, &TITLE).ok_or(ParseError::MissingField { field: "title" })?;

        let published_raw = PUBLISHED
            .iter()
            .filter_map(|s| root.select(s).next())
            .find_map(|t| t.value().attr("datetime"))
            .ok_or(ParseError::MissingField {
                field: "published_at",
            })?;
        let published_at = parse_timestamp(published_raw)?;

        let rating = first_text(root, &RATING)
            .ok_or(ParseError::MissingField { field: "rating" })
            .and_then(|raw| parse_rating(&raw))?;

        let views = first_text(root, &VIEWS)
            .ok_or(ParseError::MissingField { field: "views" })
            .and_then(|raw| parse_views(&raw))?;

        // "Comment" call-to-action instead of a count means none yet
        let comments = root
            .select(&COMMENTS)
            .next()
            .map(clean_text)
            .and_then(|t| FIRST_NUMBER.find(&t).and_then(|m| m.as_str().parse().ok()))
            .unwrap_or(0);

        let author = first_text(root, &AUTHOR);

        let mut seen = HashSet::new();
        let tags: Vec<String> = root
            .select(&META_LIST)
            .next()
            .map(|list| {
                list.select(&LIST_ITEM)
                    .map(clean_text)
                    .filter(|t| !t.is_empty() && seen.insert(t.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ArticleRecord {
            id,
            url: canonical.to_string(),
            title,
            category,
            published_at,
            rating,
            comments,
            views,
            author,
            tags,
        })
    }
}
