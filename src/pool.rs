//! Fixed-size worker pool driving the crawl.
//!
//! Each worker runs the same loop: claim a job, fetch its page, parse it,
//! then publish the outcome. Index pages feed article jobs (and the next
//! listing page) back into the [`WorkQueue`]; article pages become records
//! in the [`ResultAggregator`]. Failures end up in the [`DiscardLog`].
//!
//! # Retries
//!
//! A transient fetch failure is requeued after an exponential backoff with
//! jitter, until the job has used `max_attempts` attempts. Permanent fetch
//! failures and parse failures are discarded immediately.
//!
//! # Stopping
//!
//! Cancelling the token stops workers from claiming new jobs. Fetches
//! already in flight run to completion or timeout. Whatever was queued but
//! never claimed, and any discovered URL that could not be queued, is
//! reported with [`DiscardKind::Cancelled`](crate::report::DiscardKind).

use crate::aggregator::{PublishOutcome, ResultAggregator};
use crate::config::{CrawlConfig, DateRange};
use crate::error::{ConfigError, FetchErrorKind};
use crate::fetcher::PageFetcher;
use crate::models::{Category, CrawlJob, CrawlResult, IndexPage, QueuedJob};
use crate::parser::PageParser;
use crate::queue::{PushOutcome, WorkQueue};
use crate::report::{DiscardLog, DiscardReport};
use crate::utils::jittered;
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub records_published: usize,
    pub duplicates_skipped: usize,
    pub retries: usize,
    pub partitions_completed: usize,
    /// Article URLs found on listings per category, duplicates included.
    pub discovered: BTreeMap<Category, usize>,
    pub peak_queue_len: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct StatsTracker {
    pages_fetched: AtomicUsize,
    records_published: AtomicUsize,
    duplicates_skipped: AtomicUsize,
    retries: AtomicUsize,
    partitions_completed: AtomicUsize,
    discovered: Mutex<BTreeMap<Category, usize>>,
}

impl StatsTracker {
    // Relaxed throughout: the counters are informational and read after every worker has joined.
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn discovered(&self, category: Category, n: usize) {
        *self
            .discovered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(category)
            .or_insert(0) += n;
    }

    fn snapshot(&self, peak_queue_len: usize, elapsed: Duration) -> CrawlStats {
        CrawlStats {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            partitions_completed: self.partitions_completed.load(Ordering::Relaxed),
            discovered: self
                .discovered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            peak_queue_len,
            elapsed,
        }
    }
}

/// Everything a finished run hands back besides the aggregated records.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub discards: Vec<DiscardReport>,
    pub stats: CrawlStats,
    pub cancelled: bool,
}

struct Shared {
    config: CrawlConfig,
    fetcher: Arc<dyn PageFetcher>,
    parser: PageParser,
    aggregator: Arc<ResultAggregator>,
    queue: WorkQueue,
    discards: DiscardLog,
    stats: StatsTracker,
    cancelled: AtomicBool,
}

pub struct WorkerPool {
    config: CrawlConfig,
    fetcher: Arc<dyn PageFetcher>,
    parser: PageParser,
    aggregator: Arc<ResultAggregator>,
}

impl WorkerPool {
    /// Build a pool; the worker count is fixed from here on.
    pub fn new(
        config: CrawlConfig,
        fetcher: Arc<dyn PageFetcher>,
        parser: PageParser,
        aggregator: Arc<ResultAggregator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher,
            parser,
            aggregator,
        })
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    /// Crawl every day in `range` for each category until the queue drains
    /// or `cancel` fires.
    #[instrument(level = "info", skip_all, fields(from = %range.from, to = %range.to, workers = self.config.workers))]
    pub async fn run(
        &self,
        range: DateRange,
        categories: &[Category],
        cancel: CancellationToken,
    ) -> RunReport {
        let t0 = Instant::now();
        let shared = Arc::new(Shared {
            config: self.config.clone(),
            fetcher: self.fetcher.clone(),
            parser: self.parser.clone(),
            aggregator: self.aggregator.clone(),
            queue: WorkQueue::new(self.config.queue_depth, self.config.workers - 1),
            discards: DiscardLog::new(),
            stats: StatsTracker::default(),
            cancelled: AtomicBool::new(false),
        });

        let flows = categories.to_vec();
        info!(
            index_jobs = range.days().count() * flows.len(),
            queue_depth = shared.queue.depth(),
            queue_bound = shared.queue.bound(),
            "Seeding crawl"
        );
        shared.queue.seed(range.days().flat_map(move |date| {
            flows.clone().into_iter().map(move |category| CrawlJob::Index {
                date,
                category,
                page: 1,
            })
        }));

        let handles: Vec<_> = (0..self.config.workers)
            .map(|worker| {
                let shared = shared.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { worker_loop(worker, shared, cancel).await })
            })
            .collect();

        for (worker, joined) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!(worker, error = %e, "Worker task failed");
            }
        }

        let leftover = shared.queue.drain_pending();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Reporting unclaimed jobs as cancelled");
        }
        for queued in leftover {
            shared
                .discards
                .record(DiscardReport::cancelled(queued.job, queued.attempt));
        }

        let cancelled = cancel.is_cancelled() || shared.cancelled.load(Ordering::Relaxed);
        let stats = shared
            .stats
            .snapshot(shared.queue.peak_len(), t0.elapsed());
        let discards = shared.discards.take();

        info!(
            pages = stats.pages_fetched,
            records = stats.records_published,
            duplicates = stats.duplicates_skipped,
            retries = stats.retries,
            partitions = stats.partitions_completed,
            peak_queue_len = stats.peak_queue_len,
            peak_article_len = shared.queue.peak_article_len(),
            discarded = discards.len(),
            cancelled,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Crawl finished"
        );

        RunReport {
            discards,
            stats,
            cancelled,
        }
    }
}

async fn worker_loop(worker: usize, shared: Arc<Shared>, cancel: CancellationToken) {
    debug!(worker, "Worker started");
    loop {
        let queued = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                shared.cancelled.store(true, Ordering::Relaxed);
                debug!(worker, "Stop requested; not claiming more jobs");
                break;
            }
            next = shared.queue.claim() => match next {
                Some(queued) => queued,
                None => break,
            },
        };
        shared.run_job(worker, queued, &cancel).await;
    }
    debug!(worker, queue_closed = shared.queue.is_closed(), "Worker finished");
}

impl Shared {
    fn url_for(&self, job: &CrawlJob) -> String {
        match job {
            CrawlJob::Index {
                date,
                category,
                page,
            } => self.config.index_url(*category, *date, *page),
            CrawlJob::Article { url, .. } => url.clone(),
        }
    }

    async fn run_job(&self, worker: usize, queued: QueuedJob, cancel: &CancellationToken) {
        let url = self.url_for(&queued.job);
        let attempt = queued.attempt + 1;
        debug!(
            worker,
            %url,
            attempt,
            job = %queued.job,
            queued_articles = self.queue.article_len(),
            queued = self.queue.len(),
            "Claimed job"
        );

        // in-flight fetches are not interrupted by a stop; the client timeout bounds them
        let fetched = self.fetcher.fetch(&url).await;
        let fetched_at = Utc::now();

        let html = match fetched {
            Ok(html) => html,
            Err(failure) => {
                let error = failure.with_job(queued.job.clone());
                match error.kind {
                    FetchErrorKind::Transient if attempt < self.config.max_attempts => {
                        self.retry_later(queued, attempt, &error.message, cancel).await;
                    }
                    _ => {
                        warn!(%url, attempt, kind = ?error.kind, error = %error.message, "Discarding job");
                        let job = queued.job;
                        self.discards.record(DiscardReport::from_fetch(error, attempt));
                        self.finish(&job);
                    }
                }
                return;
            }
        };
        StatsTracker::bump(&self.stats.pages_fetched);

        match self.parse(&queued.job, &html) {
            Ok(CrawlResult::Discovered(listing)) => {
                self.enqueue_discovered(&queued.job, listing, cancel).await;
                self.finish(&queued.job);
            }
            Ok(CrawlResult::Extracted(record)) => {
                let outcome = self.aggregator.publish(record, fetched_at);
                if outcome != PublishOutcome::KeptExisting {
                    StatsTracker::bump(&self.stats.records_published);
                }
                self.finish(&queued.job);
            }
            Err(report) => {
                warn!(%url, kind = ?report.kind, reason = %report.reason, "Discarding unparseable page");
                let job = report.job.clone();
                self.discards.record(DiscardReport { attempts: attempt, ..report });
                self.finish(&job);
            }
        }
    }

    fn parse(&self, job: &CrawlJob, html: &str) -> Result<CrawlResult, DiscardReport> {
        match job {
            CrawlJob::Index { date, category, .. } => Ok(CrawlResult::Discovered(
                self.parser.parse_index(html, *category, *date),
            )),
            CrawlJob::Article { category, .. } => self
                .parser
                .parse_article(html, *category)
                .map(CrawlResult::Extracted)
                .map_err(|e| DiscardReport::from_parse(job.clone(), &e, 0)),
        }
    }

    /// Queue article jobs found on a listing page, then the next page if
    /// the listing's pagination has one.
    async fn enqueue_discovered(&self, job: &CrawlJob, listing: IndexPage, cancel: &CancellationToken) {
        let CrawlJob::Index {
            date,
            category,
            page,
        } = *job
        else {
            return;
        };

        if listing.urls.is_empty() {
            debug!(category = category.slug(), %date, page, "End of listing");
            return;
        }
        self.stats.discovered(category, listing.urls.len());
        let has_next = listing.has_next(page);

        let mut urls = listing.urls.into_iter();
        while let Some(url) = urls.next() {
            let article = CrawlJob::Article { url, category, date };
            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.queue.push_article(article.clone()) => Some(outcome),
            };
            match pushed {
                Some(PushOutcome::Queued) => {}
                Some(PushOutcome::Duplicate) => StatsTracker::bump(&self.stats.duplicates_skipped),
                None => {
                    self.cancelled.store(true, Ordering::Relaxed);
                    // URLs queued earlier are accounted for by their own job
                    let unqueued = std::iter::once(article).chain(
                        urls.by_ref()
                            .map(|url| CrawlJob::Article { url, category, date }),
                    );
                    for skipped in unqueued {
                        if let CrawlJob::Article { url, .. } = &skipped
                            && self.queue.is_known(category, url)
                        {
                            StatsTracker::bump(&self.stats.duplicates_skipped);
                            continue;
                        }
                        self.discards.record(DiscardReport::cancelled(skipped, 0));
                    }
                    return;
                }
            }
        }

        if !has_next {
            debug!(category = category.slug(), %date, page, "Last listing page");
        } else if page < self.config.max_pages {
            self.queue.follow_up(CrawlJob::Index {
                date,
                category,
                page: page + 1,
            });
        } else {
            warn!(category = category.slug(), %date, page, "Reached max pages; not following listing further");
        }
    }

    async fn retry_later(&self, mut queued: QueuedJob, attempt: u32, reason: &str, cancel: &CancellationToken) {
        let delay = jittered(self.config.backoff_delay(attempt));
        warn!(
            job = %queued.job,
            attempt,
            max = self.config.max_attempts,
            ?delay,
            error = %reason,
            "Transient failure; backing off"
        );
        StatsTracker::bump(&self.stats.retries);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cancelled.store(true, Ordering::Relaxed);
                let job = queued.job;
                self.discards.record(DiscardReport::cancelled(job.clone(), attempt));
                self.finish(&job);
            }
            _ = sleep(delay) => {
                queued.attempt = attempt;
                self.queue.requeue(queued);
            }
        }
    }

    fn finish(&self, job: &CrawlJob) {
        if self.queue.complete(job) {
            StatsTracker::bump(&self.stats.partitions_completed);
            info!(
                category = job.category().slug(),
                date = %job.date(),
                records = self.aggregator.len(job.category()),
                "Date fully resolved for category"
            );
        }
    }
}
