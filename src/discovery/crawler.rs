use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use url::Url;

use super::autodiscovery::autodiscover;
use super::queries;
use super::search::SearchProvider;
use super::sink::DiscoverySink;
use crate::feed::{FetchRequest, Transport};
use crate::util::validate_url;

/// Pages between two progress log lines.
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Number of worker tasks fetching candidate pages.
    pub threads: usize,
    /// Results requested from the search provider per query.
    pub results_per_query: usize,
    /// Language hint passed to the search provider.
    pub language: String,
    /// Worker sleep when the page queue is empty but the producer is active.
    pub empty_queue_backoff: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            threads: 8,
            results_per_query: 50,
            language: "en".to_string(),
            empty_queue_backoff: Duration::from_millis(100),
        }
    }
}

/// Snapshot of the progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub queries_searched: usize,
    pub pages_queued: usize,
    pub pages_checked: usize,
    pub feeds_found: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
struct Counters {
    queries_searched: AtomicUsize,
    pages_queued: AtomicUsize,
    pages_checked: AtomicUsize,
    feeds_found: AtomicUsize,
    errors: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize, by: usize) -> usize {
        counter.fetch_add(by, Ordering::Relaxed) + by
    }

    fn snapshot(&self) -> DiscoveryStats {
        DiscoveryStats {
            queries_searched: self.queries_searched.load(Ordering::Relaxed),
            pages_queued: self.pages_queued.load(Ordering::Relaxed),
            pages_checked: self.pages_checked.load(Ordering::Relaxed),
            feeds_found: self.feeds_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Producer/consumer crawler that turns search queries into feed URLs.
///
/// One producer task drains the query queue through the [`SearchProvider`]
/// and fills the page queue. `threads` worker tasks wait until the first
/// results exist, then fetch pages, run autodiscovery and append every hit
/// to the [`DiscoverySink`]. The pool stops once both queues are empty and
/// the producer has finished.
pub struct FeedDiscovery {
    search: Arc<dyn SearchProvider>,
    transport: Arc<dyn Transport>,
    sink: Arc<DiscoverySink>,
    settings: DiscoverySettings,
    queries: Mutex<VecDeque<String>>,
    pages: Mutex<VecDeque<String>>,
    seen_pages: Mutex<HashSet<String>>,
    producer_done: AtomicBool,
    counters: Counters,
}

impl FeedDiscovery {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        transport: Arc<dyn Transport>,
        sink: Arc<DiscoverySink>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            search,
            transport,
            sink,
            settings,
            queries: Mutex::new(VecDeque::new()),
            pages: Mutex::new(VecDeque::new()),
            seen_pages: Mutex::new(HashSet::new()),
            producer_done: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn add_query(&self, query: impl Into<String>) {
        let query = query.into();
        let query = query.trim();
        if !query.is_empty() {
            lock(&self.queries).push_back(query.to_owned());
        }
    }

    pub fn add_queries<I, S>(&self, queries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for query in queries {
            self.add_query(query);
        }
    }

    /// Queues pages to check directly, bypassing search.
    ///
    /// Returns how many were queued; pages already seen are skipped.
    pub fn add_urls<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added = urls
            .into_iter()
            .map(Into::into)
            .filter(|url: &String| self.enqueue_page(url.clone()))
            .count();
        Counters::bump(&self.counters.pages_queued, added);
        added
    }

    /// Replaces the pending queries with their expansion to `target` entries.
    ///
    /// See [`queries::combine_queries`].
    pub fn combine_queries(&self, target: usize) -> usize {
        let mut pending = lock(&self.queries);
        let current: Vec<String> = pending.drain(..).collect();
        let combined = queries::combine_queries(&current, target);
        tracing::info!(
            queries = current.len(),
            target = target,
            combined = combined.len(),
            "Expanded search queries"
        );
        pending.extend(combined);
        pending.len()
    }

    pub fn pending_queries(&self) -> usize {
        lock(&self.queries).len()
    }

    pub fn pending_pages(&self) -> usize {
        lock(&self.pages).len()
    }

    pub fn stats(&self) -> DiscoveryStats {
        self.counters.snapshot()
    }

    /// Runs the producer and the worker pool until both queues are exhausted.
    pub async fn run(self: Arc<Self>) -> DiscoveryStats {
        self.producer_done.store(false, Ordering::Release);

        let (ready_tx, ready_rx) = watch::channel(false);
        if self.pending_pages() > 0 {
            ready_tx.send_replace(true);
        }

        tracing::info!(
            queries = self.pending_queries(),
            pages = self.pending_pages(),
            workers = self.settings.threads.max(1),
            output = %self.sink.path().display(),
            "Starting feed discovery"
        );

        let producer = tokio::spawn(Arc::clone(&self).produce(ready_tx));
        let workers: Vec<_> = (0..self.settings.threads.max(1))
            .map(|worker| tokio::spawn(Arc::clone(&self).work(worker, ready_rx.clone())))
            .collect();

        if let Err(e) = producer.await {
            tracing::error!(error = %e, "Discovery producer task failed");
            self.producer_done.store(true, Ordering::Release);
        }
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Discovery worker task failed");
            }
        }

        let stats = self.stats();
        tracing::info!(
            queries = stats.queries_searched,
            pages = stats.pages_checked,
            feeds = stats.feeds_found,
            errors = stats.errors,
            "Feed discovery finished"
        );
        stats
    }

    async fn produce(self: Arc<Self>, ready: watch::Sender<bool>) {
        loop {
            let Some(query) = lock(&self.queries).pop_front() else {
                break;
            };

            let results = match self
                .search
                .search(&query, self.settings.results_per_query, &self.settings.language)
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    Counters::bump(&self.counters.errors, 1);
                    tracing::warn!(query = %query, error = %e, "Search failed");
                    continue;
                }
            };
            Counters::bump(&self.counters.queries_searched, 1);

            let queued = results
                .into_iter()
                .filter(|url| match validate_url(url) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Skipping search result");
                        false
                    }
                })
                .filter(|url| self.enqueue_page(url.clone()))
                .count();
            Counters::bump(&self.counters.pages_queued, queued);
            tracing::debug!(query = %query, queued = queued, "Queued search results");

            if queued > 0 {
                ready.send_replace(true);
            }
        }

        self.producer_done.store(true, Ordering::Release);
        // Release workers even when no query produced anything
        ready.send_replace(true);
    }

    async fn work(self: Arc<Self>, worker: usize, mut ready: watch::Receiver<bool>) {
        // Err means the producer is gone, which only happens after it finished
        let _ = ready.wait_for(|ready| *ready).await;
        tracing::trace!(worker = worker, "Discovery worker started");

        loop {
            let next = lock(&self.pages).pop_front();
            match next {
                Some(page) => self.check_page(&page).await,
                None => {
                    if self.producer_done.load(Ordering::Acquire) && self.pending_pages() == 0 {
                        break;
                    }
                    tokio::time::sleep(self.settings.empty_queue_backoff).await;
                }
            }
        }

        tracing::trace!(worker = worker, "Discovery worker finished");
    }

    async fn check_page(&self, page: &str) {
        let response = match self.transport.fetch(&FetchRequest::unconditional(page)).await {
            Ok(response) if !response.is_http_error() => response,
            Ok(response) => {
                Counters::bump(&self.counters.errors, 1);
                tracing::debug!(url = %page, status = response.status, "Page returned HTTP error");
                self.page_checked();
                return;
            }
            Err(e) => {
                Counters::bump(&self.counters.errors, 1);
                tracing::debug!(url = %page, error = %e, "Page fetch failed");
                self.page_checked();
                return;
            }
        };

        let page_url = Url::parse(&response.final_url)
            .or_else(|_| Url::parse(page))
            .ok();
        let Some(page_url) = page_url else {
            Counters::bump(&self.counters.errors, 1);
            tracing::debug!(url = %page, "Page URL could not be parsed");
            self.page_checked();
            return;
        };

        let html = String::from_utf8_lossy(&response.body);
        let feeds = autodiscover(&html, &page_url);

        for feed in &feeds {
            match self.sink.write(feed).await {
                Ok(()) => {
                    Counters::bump(&self.counters.feeds_found, 1);
                    tracing::debug!(feed = %feed.feed_url, page = %feed.page_url, "Feed discovered");
                }
                Err(e) => {
                    Counters::bump(&self.counters.errors, 1);
                    tracing::warn!(feed = %feed.feed_url, error = %e, "Failed to write discovered feed");
                }
            }
        }

        self.page_checked();
    }

    fn page_checked(&self) {
        let checked = Counters::bump(&self.counters.pages_checked, 1);
        if checked % PROGRESS_EVERY == 0 {
            let stats = self.stats();
            tracing::info!(
                pages = stats.pages_checked,
                queued = stats.pages_queued,
                feeds = stats.feeds_found,
                errors = stats.errors,
                "Discovery progress"
            );
        }
    }

    /// Returns false when the page was already queued once in this crawler.
    fn enqueue_page(&self, page: String) -> bool {
        if !lock(&self.seen_pages).insert(page.clone()) {
            return false;
        }
        lock(&self.pages).push_back(page);
        true
    }
}

/// Queue locks are never held across an await, so a poisoned lock only
/// means another task panicked mid-push; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
