//! Summary statistics over a category snapshot.

use crate::models::ArticleRecord;
use itertools::Itertools;

/// Sort counted keys by descending count, ties alphabetically, and keep `n`.
fn top_n<'a>(keys: impl Iterator<Item = &'a str>, n: usize) -> Vec<(String, usize)> {
    keys.counts()
        .into_iter()
        .sorted_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)))
        .take(n)
        .map(|(k, c)| (k.to_string(), c))
        .collect()
}

/// Authors with the most articles. Records without an author are ignored.
pub fn most_active_authors(records: &[ArticleRecord], n: usize) -> Vec<(String, usize)> {
    top_n(records.iter().filter_map(|r| r.author.as_deref()), n)
}

/// Tags used by the most articles.
pub fn most_common_tags(records: &[ArticleRecord], n: usize) -> Vec<(String, usize)> {
    top_n(
        records.iter().flat_map(|r| r.tags.iter().map(String::as_str)),
        n,
    )
}
