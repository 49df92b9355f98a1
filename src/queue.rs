//! Shared job queue for the worker pool.
//!
//! Jobs live in two lanes:
//! - **index lane**: listing pages. Seed jobs are kept as a lazy plan and
//!   only turned into jobs when an index slot is free, and a follow-up page
//!   only appears while the page before it is still in flight. The lane
//!   therefore never holds more than `index_limit` jobs.
//! - **article lane**: article pages discovered on listings, bounded by the
//!   configured depth.
//!
//! Together the lanes never hold more than [`WorkQueue::bound`] jobs, however
//! long the seeded date range is.
//!
//! An article job holds one slot of the depth from the moment it is queued
//! until it reaches a terminal state, so requeueing a transient failure
//! reuses its own slot and never blocks. Producers of new article jobs wait
//! for a free slot (backpressure). At most `index_limit` index jobs run at
//! once, and claims prefer article jobs, so some worker is always free to
//! drain the article lane.
//!
//! The queue closes itself once the seed plan is exhausted, both lanes are
//! empty and no job is in flight; every parked consumer is then woken and
//! sees `None`.

use crate::models::{Category, CrawlJob, QueuedJob};
use crate::utils::normalize_url;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet, VecDeque};
use std::iter::Peekable;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, trace};

type Partition = (NaiveDate, Category);
type SeedPlan = Peekable<Box<dyn Iterator<Item = CrawlJob> + Send>>;

/// Result of offering a discovered article to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The same URL was already queued for this category during the run.
    Duplicate,
}

#[derive(Default)]
struct QueueState {
    /// Index jobs not yet materialized.
    seeds: Option<SeedPlan>,
    index_lane: VecDeque<QueuedJob>,
    article_lane: VecDeque<QueuedJob>,
    /// Article jobs queued or in flight.
    article_slots: usize,
    active_index: usize,
    in_flight: usize,
    /// Non-terminal jobs per date and category.
    outstanding: HashMap<Partition, usize>,
    seen: HashSet<(Category, String)>,
    peak_article_len: usize,
    peak_len: usize,
    closed: bool,
}

impl QueueState {
    fn has_seeds(&mut self) -> bool {
        self.seeds.as_mut().is_some_and(|plan| plan.peek().is_some())
    }

    fn is_drained(&mut self) -> bool {
        self.in_flight == 0
            && self.index_lane.is_empty()
            && self.article_lane.is_empty()
            && !self.has_seeds()
    }

    fn next_seed(&mut self) -> Option<QueuedJob> {
        let job = self.seeds.as_mut()?.next()?;
        self.add_outstanding(&job);
        Some(QueuedJob::new(job))
    }

    fn track_len(&mut self) {
        self.peak_article_len = self.peak_article_len.max(self.article_lane.len());
        self.peak_len = self
            .peak_len
            .max(self.article_lane.len() + self.index_lane.len());
    }

    fn add_outstanding(&mut self, job: &CrawlJob) {
        *self
            .outstanding
            .entry((job.date(), job.category()))
            .or_insert(0) += 1;
    }
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    job_ready: Notify,
    slot_freed: Notify,
    depth: usize,
    index_limit: usize,
}

impl WorkQueue {
    /// `depth` bounds the article lane; `index_limit` bounds concurrently
    /// running index jobs. Both are clamped to at least 1.
    pub fn new(depth: usize, index_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            job_ready: Notify::new(),
            slot_freed: Notify::new(),
            depth: depth.max(1),
            index_limit: index_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install the initial index jobs. They are pulled from `jobs` one at a
    /// time as index slots free up, so the iterator may be arbitrarily long.
    /// Never blocks.
    pub fn seed<I>(&self, jobs: I)
    where
        I: IntoIterator<Item = CrawlJob>,
        I::IntoIter: Send + 'static,
    {
        let plan: Box<dyn Iterator<Item = CrawlJob> + Send> = Box::new(jobs.into_iter());
        let mut state = self.lock();
        state.seeds = Some(plan.peekable());
        state.closed = state.is_drained();
        debug!(closed = state.closed, "Seeded queue");
        drop(state);
        self.job_ready.notify_waiters();
    }

    /// Queue the next listing page. Must be called by the worker holding
    /// the page before it, so the queue cannot close in between.
    pub fn follow_up(&self, job: CrawlJob) {
        let mut state = self.lock();
        state.add_outstanding(&job);
        state.index_lane.push_back(QueuedJob::new(job));
        state.track_len();
        drop(state);
        self.job_ready.notify_waiters();
    }

    /// Offer a discovered article job, waiting while the article lane is at
    /// capacity. Cancel-safe: dropping the future before it resolves leaves
    /// the queue untouched.
    pub async fn push_article(&self, job: CrawlJob) -> PushOutcome {
        let key = match &job {
            CrawlJob::Article { url, category, .. } => Some((*category, normalize_url(url))),
            CrawlJob::Index { .. } => None,
        };
        let Some(key) = key else {
            self.follow_up(job);
            return PushOutcome::Queued;
        };

        loop {
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.seen.contains(&key) {
                    trace!(url = %key.1, "Duplicate article URL");
                    return PushOutcome::Duplicate;
                }
                if state.article_slots < self.depth {
                    state.seen.insert(key);
                    state.article_slots += 1;
                    state.add_outstanding(&job);
                    state.article_lane.push_back(QueuedJob::new(job));
                    state.track_len();
                    drop(state);
                    self.job_ready.notify_waiters();
                    return PushOutcome::Queued;
                }
            }

            trace!(depth = self.depth, "Article lane full; waiting for a slot");
            notified.await;
        }
    }

    /// Claim the next job, waiting while none is claimable. Returns `None`
    /// once the queue is closed. Cancel-safe.
    pub async fn claim(&self) -> Option<QueuedJob> {
        loop {
            let notified = self.job_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(job) = state.article_lane.pop_front() {
                    state.in_flight += 1;
                    return Some(job);
                }
                // queued follow-ups go before new seeds, which keeps the lane within the limit
                if state.active_index < self.index_limit
                    && let Some(job) = state.index_lane.pop_front().or_else(|| state.next_seed())
                {
                    state.active_index += 1;
                    state.in_flight += 1;
                    return Some(job);
                }
            }

            notified.await;
        }
    }

    /// Put a claimed job back after a transient failure. The caller bumps
    /// the attempt count.
    pub fn requeue(&self, job: QueuedJob) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if job.job.is_index() {
            state.active_index = state.active_index.saturating_sub(1);
            state.index_lane.push_back(job);
        } else {
            // keeps the slot it already holds
            state.article_lane.push_back(job);
        }
        state.track_len();
        drop(state);
        self.job_ready.notify_waiters();
    }

    /// Mark a claimed job terminal (succeeded or discarded). Returns `true`
    /// when this was the last open job of its date and category.
    pub fn complete(&self, job: &CrawlJob) -> bool {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if job.is_index() {
            state.active_index = state.active_index.saturating_sub(1);
        } else {
            state.article_slots = state.article_slots.saturating_sub(1);
        }

        let partition = (job.date(), job.category());
        let partition_done = match state.outstanding.get_mut(&partition) {
            Some(n) if *n > 1 => {
                *n -= 1;
                false
            }
            Some(_) => {
                state.outstanding.remove(&partition);
                true
            }
            None => false,
        };

        if state.is_drained() {
            state.closed = true;
        }
        drop(state);

        self.slot_freed.notify_waiters();
        self.job_ready.notify_waiters();
        partition_done
    }

    /// Close the queue and hand back every job that was never claimed,
    /// including seed jobs never materialized. Jobs in flight still finish
    /// through `complete` or `requeue`.
    pub fn drain_pending(&self) -> Vec<QueuedJob> {
        let mut state = self.lock();
        state.closed = true;
        let mut pending: Vec<QueuedJob> = state.article_lane.drain(..).collect();
        pending.extend(state.index_lane.drain(..));
        if let Some(plan) = state.seeds.take() {
            pending.extend(plan.map(QueuedJob::new));
        }
        for queued in &pending {
            if !queued.job.is_index() {
                state.article_slots = state.article_slots.saturating_sub(1);
            }
        }
        drop(state);
        self.job_ready.notify_waiters();
        self.slot_freed.notify_waiters();
        pending
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether an article URL was already queued for `category` this run.
    pub fn is_known(&self, category: Category, url: &str) -> bool {
        self.lock().seen.contains(&(category, normalize_url(url)))
    }

    /// Jobs currently held in both lanes.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.index_lane.len() + state.article_lane.len()
    }

    /// Most jobs both lanes may hold at once: the article depth plus one
    /// listing page per concurrently walked listing.
    pub fn bound(&self) -> usize {
        self.depth + self.index_limit
    }

    /// Most jobs both lanes have held at once during the run.
    pub fn peak_len(&self) -> usize {
        self.lock().peak_len
    }

    pub fn article_len(&self) -> usize {
        self.lock().article_lane.len()
    }

    /// Longest the article lane has been during the run.
    pub fn peak_article_len(&self) -> usize {
        self.lock().peak_article_len
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
    }

    fn index(page: u32) -> CrawlJob {
        CrawlJob::Index {
            date: day(),
            category: Category::Develop,
            page,
        }
    }

    fn article(n: u32) -> CrawlJob {
        CrawlJob::Article {
            url: format!("https://habr.com/ru/articles/{n}/"),
            category: Category::Develop,
            date: day(),
        }
    }

    #[tokio::test]
    async fn test_empty_seed_closes_immediately() {
        let queue = WorkQueue::new(4, 1);
        queue.seed(Vec::new());
        assert!(queue.is_closed());
        assert_eq!(queue.claim().await, None);
    }

    #[tokio::test]
    async fn test_articles_claimed_before_index_jobs() {
        let queue = WorkQueue::new(4, 1);
        queue.seed(vec![index(1), index(2)]);

        let first = queue.claim().await.unwrap();
        assert_eq!(first.job, index(1));
        assert_eq!(queue.push_article(article(1)).await, PushOutcome::Queued);

        let second = queue.claim().await.unwrap();
        assert_eq!(second.job, article(1));
    }

    #[tokio::test]
    async fn test_index_limit_holds_back_index_jobs() {
        let queue = WorkQueue::new(4, 1);
        queue.seed(vec![index(1), index(2)]);
        let _running = queue.claim().await.unwrap();

        assert!(timeout(Duration::from_millis(50), queue.claim()).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_urls_are_not_queued_twice() {
        let queue = WorkQueue::new(4, 1);
        queue.seed(vec![index(1)]);
        let _running = queue.claim().await.unwrap();

        assert_eq!(queue.push_article(article(7)).await, PushOutcome::Queued);
        let same_without_slash = CrawlJob::Article {
            url: "https://habr.com/ru/articles/7#comments".into(),
            category: Category::Develop,
            date: day(),
        };
        assert_eq!(queue.push_article(same_without_slash).await, PushOutcome::Duplicate);

        let other_category = CrawlJob::Article {
            url: "https://habr.com/ru/articles/7/".into(),
            category: Category::Admin,
            date: day(),
        };
        assert_eq!(queue.push_article(other_category).await, PushOutcome::Queued);
        assert_eq!(queue.article_len(), 2);
    }

    #[tokio::test]
    async fn test_push_blocks_until_a_slot_frees() {
        let queue = Arc::new(WorkQueue::new(2, 1));
        queue.seed(vec![index(1)]);
        let _producer_job = queue.claim().await.unwrap();

        queue.push_article(article(1)).await;
        queue.push_article(article(2)).await;
        assert!(
            timeout(Duration::from_millis(50), queue.push_article(article(3)))
                .await
                .is_err()
        );

        let consumer = queue.claim().await.unwrap();
        // claimed but not terminal: still holds its slot
        assert!(
            timeout(Duration::from_millis(50), queue.push_article(article(3)))
                .await
                .is_err()
        );

        queue.complete(&consumer.job);
        assert_eq!(
            timeout(Duration::from_millis(200), queue.push_article(article(3)))
                .await
                .unwrap(),
            PushOutcome::Queued
        );
        assert!(queue.peak_article_len() <= 2);
    }

    #[tokio::test]
    async fn test_requeue_keeps_slot_and_does_not_block() {
        let queue = WorkQueue::new(1, 1);
        queue.seed(vec![index(1)]);
        let producer = queue.claim().await.unwrap();
        queue.push_article(article(1)).await;

        let mut failed = queue.claim().await.unwrap();
        failed.attempt += 1;
        queue.requeue(failed);

        let retried = queue.claim().await.unwrap();
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.job, article(1));
        assert!(queue.article_len() <= queue.depth());

        assert!(!queue.complete(&retried.job));
        assert!(queue.complete(&producer.job));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_queue_closes_when_last_job_completes() {
        let queue = Arc::new(WorkQueue::new(4, 2));
        queue.seed(vec![index(1)]);
        let held = queue.claim().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.claim().await })
        };
        tokio::task::yield_now().await;

        assert!(queue.complete(&held.job));
        assert!(queue.is_closed());
        let woken = timeout(Duration::from_millis(200), waiter).await.unwrap().unwrap();
        assert_eq!(woken, None);
    }

    #[tokio::test]
    async fn test_follow_up_keeps_partition_open() {
        let queue = WorkQueue::new(4, 1);
        queue.seed(vec![index(1)]);
        let page1 = queue.claim().await.unwrap();
        queue.follow_up(index(2));
        assert!(!queue.complete(&page1.job));
        assert!(!queue.is_closed());

        let page2 = queue.claim().await.unwrap();
        assert_eq!(page2.job, index(2));
        assert!(queue.complete(&page2.job));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_drain_pending_returns_unclaimed_jobs() {
        let queue = WorkQueue::new(4, 1);
        queue.seed(vec![index(1), index(2)]);
        let running = queue.claim().await.unwrap();
        queue.push_article(article(1)).await;

        let pending = queue.drain_pending();
        assert_eq!(pending.len(), 2);
        assert!(queue.is_closed());
        assert_eq!(queue.claim().await, None);
        queue.complete(&running.job);
    }

    #[tokio::test]
    async fn test_year_of_seeds_stays_within_bound() {
        let queue = WorkQueue::new(4, 1);
        let seeds = day()
            .iter_days()
            .take(365)
            .flat_map(|date| {
                Category::ALL.into_iter().map(move |category| CrawlJob::Index {
                    date,
                    category,
                    page: 1,
                })
            });
        queue.seed(seeds);
        assert!(queue.len() <= queue.bound());

        let mut done = 0;
        while let Some(queued) = timeout(Duration::from_millis(200), queue.claim()).await.unwrap() {
            if let CrawlJob::Index {
                date,
                category,
                page,
            } = queued.job
            {
                if page == 1 {
                    queue.follow_up(CrawlJob::Index {
                        date,
                        category,
                        page: 2,
                    });
                } else {
                    let article = CrawlJob::Article {
                        url: format!("https://habr.com/ru/articles/{}{}/", date.format("%Y%m%d"), category as u8),
                        category,
                        date,
                    };
                    assert_eq!(queue.push_article(article).await, PushOutcome::Queued);
                }
            }
            assert!(queue.len() <= queue.bound(), "queue held {} jobs", queue.len());
            queue.complete(&queued.job);
            done += 1;
        }

        assert_eq!(done, 365 * 6 * 3);
        assert!(queue.peak_len() <= queue.bound());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_drain_pending_includes_unstarted_seeds() {
        let queue = WorkQueue::new(4, 1);
        queue.seed((1..=10).map(index));
        let running = queue.claim().await.unwrap();
        assert_eq!(queue.len(), 0);

        let pending = queue.drain_pending();
        assert_eq!(pending.len(), 9);
        assert!(pending.iter().all(|q| q.job.is_index()));
        queue.complete(&running.job);
    }

    #[tokio::test]
    async fn test_is_known_matches_normalized_url_per_category() {
        let queue = WorkQueue::new(4, 1);
        queue.seed(vec![index(1)]);
        let _running = queue.claim().await.unwrap();
        queue.push_article(article(9)).await;

        assert!(queue.is_known(Category::Develop, "https://habr.com/ru/articles/9#comments"));
        assert!(!queue.is_known(Category::Admin, "https://habr.com/ru/articles/9/"));
        assert!(!queue.is_known(Category::Develop, "https://habr.com/ru/articles/10/"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bound_holds_under_producer_burst() {
        let queue = Arc::new(WorkQueue::new(3, 4));
        queue.seed((1..=4).map(index));

        let mut producers = Vec::new();
        for _ in 0..4 {
            let job = queue.claim().await.unwrap();
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                let base = match job.job {
                    CrawlJob::Index { page, .. } => page * 100,
                    CrawlJob::Article { .. } => unreachable!(),
                };
                for n in 0..25 {
                    queue.push_article(article(base + n)).await;
                }
                queue.complete(&job.job);
            }));
        }

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut done = 0;
                while let Some(job) = queue.claim().await {
                    assert!(queue.article_len() <= queue.depth());
                    tokio::task::yield_now().await;
                    queue.complete(&job.job);
                    done += 1;
                }
                done
            })
        };

        for p in producers {
            p.await.unwrap();
        }
        assert_eq!(consumer.await.unwrap(), 100);
        assert!(queue.peak_article_len() <= 3);
    }
}
