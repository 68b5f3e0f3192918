//! Periodic feed polling.
//!
//! Every feed with its own interval gets a dedicated timer task. Feeds without
//! one share a single timer on the default interval and are polled one after
//! another on each of its ticks. All tasks of one [`Scheduler::start`] call form
//! a generation with its own cancellation token, so a reload can replace them
//! without touching the rest of the service.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::announce::{format, shorten_or_original, Announcer, UrlShortener};
use crate::config::FeedDescriptor;
use crate::feed::{ChangeDetector, FeedFetcher};

/// One tick's worth of work for a feed: fetch, diff, format, enqueue.
pub struct FeedPoller {
    fetcher: FeedFetcher,
    detector: ChangeDetector,
    announcer: Announcer,
    shortener: Arc<dyn UrlShortener>,
    wrap_url: Option<String>,
    /// Fallback destinations for a feed without a channel.
    all_channels: Vec<String>,
}

impl FeedPoller {
    pub fn new(
        fetcher: FeedFetcher,
        detector: ChangeDetector,
        announcer: Announcer,
        shortener: Arc<dyn UrlShortener>,
        wrap_url: Option<String>,
        all_channels: Vec<String>,
    ) -> Self {
        Self {
            fetcher,
            detector,
            announcer,
            shortener,
            wrap_url,
            all_channels,
        }
    }

    /// Polls `feed` once and enqueues an announcement for each new entry.
    /// Returns how many entries were announced.
    pub async fn poll_feed(&self, feed: &FeedDescriptor, interval: Duration) -> usize {
        let old = self.fetcher.cache().last_result(&feed.name);
        let new = self.fetcher.fetch(&feed.name, &feed.url, interval).await;
        let fresh = self.detector.diff(old.as_ref(), &new);
        if fresh.is_empty() {
            tracing::trace!(feed = %feed.name, "Nothing new");
            return 0;
        }

        let destinations = self.destinations(feed);
        if destinations.is_empty() {
            tracing::warn!(feed = %feed.name, "No channel to announce to");
            return 0;
        }

        tracing::info!(feed = %feed.name, count = fresh.len(), "Announcing new entries");
        for entry in &fresh {
            let Some(link) = entry.link.as_deref() else {
                continue;
            };
            let link = shorten_or_original(self.shortener.as_ref(), link).await;
            let text = format::announcement(
                &feed.name,
                &feed.color,
                &entry.title,
                &link,
                self.wrap_url.as_deref(),
            );
            for destination in destinations {
                self.announcer.enqueue(text.clone(), destination.clone());
            }
        }
        fresh.len()
    }

    fn destinations<'a>(&'a self, feed: &'a FeedDescriptor) -> &'a [String] {
        match &feed.channel {
            Some(channel) => std::slice::from_ref(channel),
            None => &self.all_channels,
        }
    }
}

struct Generation {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    feeds: Vec<String>,
}

/// Owner of all feed timers.
pub struct Scheduler {
    root: CancellationToken,
    current: tokio::sync::Mutex<Option<Generation>>,
}

impl Scheduler {
    /// Timers also stop when `root` is cancelled.
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts timers for the enabled `feeds`, replacing any running set.
    pub async fn start(
        &self,
        poller: Arc<FeedPoller>,
        feeds: Vec<FeedDescriptor>,
        default_interval: Duration,
    ) {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            shutdown_generation(old).await;
        }

        let cancel = self.root.child_token();
        let mut handles = Vec::new();
        let mut names = Vec::new();
        let mut shared = Vec::new();

        for feed in feeds.into_iter().filter(|f| f.enabled) {
            names.push(feed.name.clone());
            match feed.interval {
                Some(interval) => {
                    tracing::debug!(
                        feed = %feed.name,
                        interval_secs = interval.as_secs_f64(),
                        "Starting feed timer"
                    );
                    handles.push(tokio::spawn(run_timer(
                        Arc::clone(&poller),
                        vec![feed],
                        interval,
                        cancel.clone(),
                    )));
                }
                None => shared.push(feed),
            }
        }
        if !shared.is_empty() {
            tracing::debug!(
                feeds = shared.len(),
                interval_secs = default_interval.as_secs_f64(),
                "Starting shared timer"
            );
            handles.push(tokio::spawn(run_timer(
                poller,
                shared,
                default_interval,
                cancel.clone(),
            )));
        }

        tracing::info!(feeds = names.len(), timers = handles.len(), "Scheduler started");
        *current = Some(Generation {
            cancel,
            handles,
            feeds: names,
        });
    }

    /// Stops every timer and waits for in-flight ticks to finish. Idempotent.
    pub async fn stop(&self) {
        if let Some(generation) = self.current.lock().await.take() {
            shutdown_generation(generation).await;
            tracing::info!("Scheduler stopped");
        }
    }

    /// Names of the feeds with a running timer.
    pub async fn scheduled_feeds(&self) -> Vec<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|g| g.feeds.clone())
            .unwrap_or_default()
    }
}

async fn shutdown_generation(generation: Generation) {
    generation.cancel.cancel();
    for handle in generation.handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Feed timer task ended abnormally");
        }
    }
}

async fn run_timer(
    poller: Arc<FeedPoller>,
    feeds: Vec<FeedDescriptor>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'ticks: loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for feed in &feeds {
            let tick = AssertUnwindSafe(poller.poll_feed(feed, period)).catch_unwind();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'ticks,
                outcome = tick => {
                    if let Err(panic) = outcome {
                        tracing::error!(
                            feed = %feed.name,
                            panic = %panic_message(panic.as_ref()),
                            "Feed poll panicked"
                        );
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
