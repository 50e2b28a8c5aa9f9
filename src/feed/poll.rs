use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::actions::FeedActions;
use super::dedup::distinct_items;
use super::outcome::{OutcomeFlags, PollOutcome};
use super::parser::FeedParser;
use super::request::build_request;
use super::transport::{FetchResponse, Transport};
use crate::schedule::{ScheduleController, WindowStats};
use crate::storage::{Feed, FeedStore};

/// Tunables of the poll task.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// A cycle slower than this is flagged `ExecutionTimeWarning`.
    pub execution_warning: Duration,
    /// A feed idle for longer than this gets a cold-start schedule.
    pub cold_start_after: Duration,
    /// Feeds polled in parallel by [`FeedPoller::poll_due`].
    pub concurrency: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            execution_warning: Duration::from_secs(60),
            cold_start_after: Duration::from_secs(7 * 24 * 3600),
            concurrency: 10,
        }
    }
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub feed_id: i64,
    pub outcome: PollOutcome,
    /// Items of the window that were not in the previous window.
    pub new_items: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    Modified,
    Unmodified,
    Error,
    Exception,
}

/// Executes poll cycles against injected collaborators.
///
/// Cheap to clone. Running two cycles for the same feed at once is not
/// supported; [`FeedPoller::poll_due`] never does.
#[derive(Clone)]
pub struct FeedPoller {
    transport: Arc<dyn Transport>,
    parser: Arc<dyn FeedParser>,
    schedule: Arc<dyn ScheduleController>,
    store: Arc<dyn FeedStore>,
    actions: Arc<dyn FeedActions>,
    settings: PollSettings,
}

impl FeedPoller {
    pub fn new(
        transport: Arc<dyn Transport>,
        parser: Arc<dyn FeedParser>,
        schedule: Arc<dyn ScheduleController>,
        store: Arc<dyn FeedStore>,
        actions: Arc<dyn FeedActions>,
        settings: PollSettings,
    ) -> Self {
        Self {
            transport,
            parser,
            schedule,
            store,
            actions,
            settings,
        }
    }

    /// Runs one full cycle on `feed` and returns its outcome.
    ///
    /// Never fails: transport, HTTP, parse, callback and persistence
    /// failures are logged, counted on the feed and folded into the outcome.
    /// `feed` is persisted before returning and its item window released.
    pub async fn poll(&self, feed: &mut Feed) -> PollReport {
        let started = Instant::now();
        let poll_time = Utc::now().timestamp();
        let force_reset = self.needs_cold_start(feed, poll_time);
        let mut flags = OutcomeFlags::new();
        let mut new_items = 0;
        let mut replace_cache = false;

        let request = build_request(feed);
        tracing::debug!(
            feed_id = feed.id,
            url = %feed.url,
            conditional = request.is_conditional(),
            "Polling feed"
        );

        match self.transport.fetch(&request).await {
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed unreachable");
                flags.insert(PollOutcome::Unreachable);
                feed.unreachable_count += 1;
                self.advance(feed, &WindowStats::failed(poll_time), force_reset, &mut flags);
            }
            Ok(response) if response.is_http_error() => {
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    status = response.status,
                    "Feed returned HTTP error"
                );
                flags.insert(PollOutcome::Unreachable);
                feed.unreachable_count += 1;
                self.run_hook(Hook::Error, feed, &response, &mut flags).await;
                self.advance(feed, &WindowStats::failed(poll_time), force_reset, &mut flags);
            }
            Ok(response) if response.is_not_modified() => {
                self.advance(feed, &WindowStats::unmodified(poll_time), force_reset, &mut flags);
                feed.last_success = Some(poll_time);
                self.run_hook(Hook::Unmodified, feed, &response, &mut flags).await;
            }
            Ok(response) => {
                feed.etag = response.etag.clone();
                feed.last_modified = response.last_modified;

                match self.parser.parse(&response.body) {
                    Err(e) => {
                        tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed unparsable");
                        flags.insert(PollOutcome::Unparsable);
                        feed.unparsable_count += 1;
                        self.run_hook(Hook::Exception, feed, &response, &mut flags).await;
                    }
                    Ok(parsed) => {
                        let window = parsed.items;
                        let distinct = distinct_items(&window);
                        new_items = feed.item_cache.count_new(&window);
                        let timestamps: Vec<i64> = distinct
                            .iter()
                            .map(|item| feed.item_cache.corrected_timestamp(item, poll_time))
                            .collect();

                        replace_cache = !feed.item_cache.matches(&window);
                        if replace_cache {
                            feed.item_cache.replace(&window, poll_time);
                        }
                        if parsed.title.is_some() {
                            feed.title = parsed.title;
                        }
                        feed.window_size = timestamps.len() as i64;
                        feed.items = window;
                        feed.last_success = Some(poll_time);

                        let stats = WindowStats::fetched(poll_time, timestamps, new_items);
                        self.advance(feed, &stats, force_reset, &mut flags);
                        self.run_hook(Hook::Modified, feed, &response, &mut flags).await;
                    }
                }
            }
        }

        if flags.is_empty() {
            flags.insert(PollOutcome::Success);
        }

        let duration = started.elapsed();
        if duration > self.settings.execution_warning {
            tracing::warn!(
                feed_id = feed.id,
                url = %feed.url,
                elapsed_ms = duration.as_millis() as u64,
                "Feed poll exceeded execution time warning"
            );
            flags.insert(PollOutcome::ExecutionTimeWarning);
        }

        feed.checks += 1;
        feed.last_poll = Some(poll_time);
        feed.last_outcome = flags.resolve();

        if let Err(e) = self.store.upsert_feed(feed, replace_cache).await {
            tracing::error!(feed_id = feed.id, error = %e, "Failed to persist feed");
            flags.insert(PollOutcome::Error);
            feed.last_outcome = flags.resolve();
        }

        feed.items = Vec::new();

        let outcome = flags.resolve();
        tracing::info!(
            feed_id = feed.id,
            outcome = %outcome,
            new_items = new_items,
            interval_min = feed.check_interval,
            elapsed_ms = duration.as_millis() as u64,
            "Feed polled"
        );

        PollReport {
            feed_id: feed.id,
            outcome,
            new_items,
            duration,
        }
    }

    /// Loads a feed from the store and polls it. Blocked feeds are skipped.
    pub async fn poll_by_id(&self, feed_id: i64) -> Option<PollReport> {
        let mut feed = match self.store.load_feed(feed_id).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::error!(feed_id = feed_id, error = %e, "Failed to load feed");
                return Some(PollReport {
                    feed_id,
                    outcome: PollOutcome::Error,
                    new_items: 0,
                    duration: Duration::ZERO,
                });
            }
        };

        if feed.blocked {
            tracing::debug!(feed_id = feed_id, "Skipping blocked feed");
            return None;
        }

        Some(self.poll(&mut feed).await)
    }

    /// Polls every listed feed once with bounded concurrency.
    ///
    /// Duplicate ids are dropped so a feed never runs in two cycles at once.
    /// Reports are returned in completion order.
    pub async fn poll_due(&self, feed_ids: Vec<i64>) -> Vec<PollReport> {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = feed_ids.into_iter().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Vec::new();
        }

        let total = ids.len();
        let reports: Vec<PollReport> = stream::iter(ids)
            .map(|feed_id| {
                let poller = self.clone();
                async move { poller.poll_by_id(feed_id).await }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .filter_map(|report| async move { report })
            .collect()
            .await;

        tracing::info!(
            due = total,
            polled = reports.len(),
            failed = reports
                .iter()
                .filter(|r| matches!(
                    r.outcome,
                    PollOutcome::Error | PollOutcome::Unreachable | PollOutcome::Unparsable
                ))
                .count(),
            "Poll round complete"
        );

        reports
    }

    fn needs_cold_start(&self, feed: &Feed, poll_time: i64) -> bool {
        match feed.last_poll {
            None => true,
            Some(last) => {
                let limit = i64::try_from(self.settings.cold_start_after.as_secs())
                    .unwrap_or(i64::MAX);
                poll_time.saturating_sub(last) > limit
            }
        }
    }

    fn advance(
        &self,
        feed: &mut Feed,
        stats: &WindowStats,
        force_reset: bool,
        flags: &mut OutcomeFlags,
    ) {
        let missed = self.schedule.advance(feed, stats, force_reset);
        feed.check_interval = feed.check_interval.max(1);
        if missed {
            feed.misses += 1;
            feed.last_miss = Some(stats.poll_time);
            flags.insert(PollOutcome::Miss);
        }
    }

    async fn run_hook(
        &self,
        hook: Hook,
        feed: &Feed,
        response: &FetchResponse,
        flags: &mut OutcomeFlags,
    ) {
        let result = match hook {
            Hook::Modified => self.actions.on_modified(feed, response).await,
            Hook::Unmodified => self.actions.on_unmodified(feed, response).await,
            Hook::Error => self.actions.on_error(feed, response).await,
            Hook::Exception => self.actions.on_exception(feed, response).await,
        };
        if let Err(e) = result {
            tracing::error!(
                feed_id = feed.id,
                hook = ?hook,
                error = %e,
                "Feed action failed"
            );
            flags.insert(PollOutcome::Error);
        }
    }
}
