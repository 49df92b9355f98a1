//! Thread-safe collection of extracted records.
//!
//! Records are keyed by category and article id. When the same id is
//! published twice, the record with the strictly later fetch time wins;
//! ties keep the record already held. Each record is replaced whole under
//! the lock, so a snapshot never sees a half-written entry.

use crate::models::{ArticleRecord, Category};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// What `publish` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Inserted,
    /// An older fetch of the same article was replaced.
    Replaced,
    /// The held record was fetched at the same time or later.
    KeptExisting,
}

#[derive(Debug, Clone)]
struct Stamped {
    record: ArticleRecord,
    fetched_at: DateTime<Utc>,
}

/// Immutable view of one category's records at a point in time.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub category: Category,
    pub taken_at: DateTime<Utc>,
    /// Sorted by publication time, then id.
    pub records: Vec<ArticleRecord>,
}

impl RunSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    by_category: Mutex<HashMap<Category, HashMap<String, Stamped>>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Category, HashMap<String, Stamped>>> {
        // a panicking publisher cannot leave a record half-replaced, so the data stays usable
        self.by_category
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, record: ArticleRecord, fetched_at: DateTime<Utc>) -> PublishOutcome {
        let mut guard = self.lock();
        let records = guard.entry(record.category).or_default();

        match records.get_mut(&record.id) {
            None => {
                records.insert(record.id.clone(), Stamped { record, fetched_at });
                PublishOutcome::Inserted
            }
            Some(held) if fetched_at > held.fetched_at => {
                debug!(
                    id = %record.id,
                    category = record.category.slug(),
                    previous = %held.fetched_at,
                    %fetched_at,
                    "Replacing record with a later fetch"
                );
                *held = Stamped { record, fetched_at };
                PublishOutcome::Replaced
            }
            Some(held) => {
                debug!(
                    id = %record.id,
                    category = record.category.slug(),
                    held = %held.fetched_at,
                    %fetched_at,
                    "Keeping record from a later or equal fetch"
                );
                PublishOutcome::KeptExisting
            }
        }
    }

    pub fn snapshot(&self, category: Category) -> RunSnapshot {
        let mut records: Vec<ArticleRecord> = self
            .lock()
            .get(&category)
            .map(|held| held.values().map(|s| s.record.clone()).collect())
            .unwrap_or_default();
        records.sort_by(|a, b| {
            a.published_at
                .cmp(&b.published_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        RunSnapshot {
            category,
            taken_at: Utc::now(),
            records,
        }
    }

    /// Record counts per site-local publication day.
    pub fn count_by_date(&self, category: Category) -> BTreeMap<NaiveDate, usize> {
        let mut counts = BTreeMap::new();
        if let Some(held) = self.lock().get(&category) {
            for stamped in held.values() {
                *counts
                    .entry(stamped.record.published_at.date_naive())
                    .or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn len(&self, category: Category) -> usize {
        self.lock().get(&category).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};
    use std::sync::Arc;

    fn record(id: &str, title: &str, category: Category) -> ArticleRecord {
        ArticleRecord {
            id: id.to_string(),
            url: format!("https://habr.com/ru/articles/{id}/"),
            title: title.to_string(),
            category,
            published_at: FixedOffset::east_opt(3 * 3600)
                .unwrap()
                .with_ymd_and_hms(2023, 1, 1, 12, 0, 0)
                .unwrap(),
            rating: 1,
            comments: 0,
            views: 10,
            author: None,
            tags: vec![],
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_later_fetch_replaces_earlier() {
        let agg = ResultAggregator::new();
        assert_eq!(
            agg.publish(record("1", "old", Category::Develop), t(1)),
            PublishOutcome::Inserted
        );
        assert_eq!(
            agg.publish(record("1", "new", Category::Develop), t(2)),
            PublishOutcome::Replaced
        );
        assert_eq!(
            agg.publish(record("1", "stale", Category::Develop), t(0)),
            PublishOutcome::KeptExisting
        );
        assert_eq!(
            agg.publish(record("1", "same time", Category::Develop), t(2)),
            PublishOutcome::KeptExisting
        );

        let snap = agg.snapshot(Category::Develop);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.records[0].title, "new");
    }

    #[test]
    fn test_categories_are_independent() {
        let agg = ResultAggregator::new();
        agg.publish(record("1", "dev", Category::Develop), t(1));
        agg.publish(record("1", "admin", Category::Admin), t(1));

        assert_eq!(agg.len(Category::Develop), 1);
        assert_eq!(agg.len(Category::Admin), 1);
        assert!(agg.snapshot(Category::Design).is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let agg = ResultAggregator::new();
        agg.publish(record("1", "first", Category::Develop), t(1));
        let snap = agg.snapshot(Category::Develop);
        agg.publish(record("2", "second", Category::Develop), t(2));

        assert_eq!(snap.len(), 1);
        assert_eq!(agg.snapshot(Category::Develop).len(), 2);
    }

    #[test]
    fn test_count_by_date() {
        let agg = ResultAggregator::new();
        let mut next_day = record("2", "b", Category::Design);
        next_day.published_at += Duration::days(1);
        agg.publish(record("1", "a", Category::Design), t(0));
        agg.publish(next_day, t(0));

        let counts = agg.count_by_date(Category::Design);
        assert_eq!(counts.len(), 2);
        assert!(counts.values().all(|&n| n == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_workers_collide_later_fetch_wins() {
        for _ in 0..50 {
            let agg = Arc::new(ResultAggregator::new());
            let early = {
                let agg = agg.clone();
                tokio::spawn(async move { agg.publish(record("9", "t1", Category::Develop), t(1)) })
            };
            let late = {
                let agg = agg.clone();
                tokio::spawn(async move { agg.publish(record("9", "t2", Category::Develop), t(2)) })
            };
            early.await.unwrap();
            late.await.unwrap();

            let snap = agg.snapshot(Category::Develop);
            assert_eq!(snap.len(), 1);
            assert_eq!(snap.records[0].title, "t2");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_publish_with_collisions_is_deterministic() {
        const N: usize = 400;
        const M: usize = 20;
        let agg = Arc::new(ResultAggregator::new());

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let agg = agg.clone();
                tokio::spawn(async move {
                    let id = (i % M).to_string();
                    agg.publish(record(&id, &format!("v{i}"), Category::Popsci), t(i as i64));
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let snap = agg.snapshot(Category::Popsci);
        assert_eq!(snap.len(), M);
        for rec in &snap.records {
            let id: usize = rec.id.parse().unwrap();
            let latest = (0..N).filter(|i| i % M == id).max().unwrap();
            assert_eq!(rec.title, format!("v{latest}"));
        }
    }
}
