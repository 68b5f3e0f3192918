//! The running bot: configuration, feed timers, delivery and the connection,
//! wired together behind one handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::announce::{Announcer, UrlShortener};
use crate::commands::{self, Command};
use crate::config::{Config, ConfigError};
use crate::feed::{ChangeDetector, FeedCache, FeedFetcher, FeedSource};
use crate::reconnect::ReconnectSupervisor;
use crate::scheduler::{FeedPoller, Scheduler};
use crate::transport::{Transport, TransportEvent};

/// Handle to the running service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Feedie {
    inner: Arc<Inner>,
}

struct Inner {
    config_path: PathBuf,
    config: RwLock<Config>,
    transport: Arc<dyn Transport>,
    source: Arc<dyn FeedSource>,
    shortener: Arc<dyn UrlShortener>,
    cache: Arc<FeedCache>,
    announcer: Announcer,
    supervisor: ReconnectSupervisor,
    scheduler: Scheduler,
    cancel: CancellationToken,
    started_at: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes reloads so two rehashes cannot interleave stop/start.
    reload_lock: tokio::sync::Mutex<()>,
}

impl Feedie {
    /// Loads the config at `config_path`, connects and starts polling.
    ///
    /// A failed first connection is not fatal: it is handed to the reconnect
    /// supervisor like any later outage.
    pub async fn start(
        config_path: impl Into<PathBuf>,
        transport: Arc<dyn Transport>,
        source: Arc<dyn FeedSource>,
        shortener: Arc<dyn UrlShortener>,
    ) -> Result<Self, ConfigError> {
        let config_path = config_path.into();
        let config = Config::load(&config_path)?;
        let policy = config.backoff_policy()?;

        let cancel = CancellationToken::new();
        let supervisor = ReconnectSupervisor::new(policy, Arc::clone(&transport), cancel.clone());
        let (announcer, queue) = Announcer::channel();

        // Subscribe before connecting so the first Connected event is seen.
        let events = transport.subscribe();

        let delivery = tokio::spawn(queue.run(
            Arc::clone(&transport),
            supervisor.clone(),
            config.pacing(),
            cancel.clone(),
        ));

        let feedie = Self {
            inner: Arc::new(Inner {
                config_path,
                config: RwLock::new(config),
                transport,
                source,
                shortener,
                cache: Arc::new(FeedCache::new()),
                announcer,
                supervisor,
                scheduler: Scheduler::new(cancel.child_token()),
                cancel,
                started_at: Instant::now(),
                tasks: Mutex::new(vec![delivery]),
                reload_lock: tokio::sync::Mutex::new(()),
            }),
        };

        let pump = tokio::spawn(feedie.clone().pump_events(events));
        lock(&feedie.inner.tasks).push(pump);

        let params = feedie.config().connect_params();
        if let Err(e) = feedie.inner.transport.connect(params).await {
            tracing::warn!(error = %e, "Initial connection failed");
            feedie.inner.supervisor.on_disconnect();
        }

        feedie.start_scheduler().await;
        tracing::info!(config = %feedie.inner.config_path.display(), "Feedie started");
        Ok(feedie)
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> Config {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config_path(&self) -> &Path {
        &self.inner.config_path
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.inner.started_at.elapsed()
    }

    pub fn supervisor(&self) -> &ReconnectSupervisor {
        &self.inner.supervisor
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.inner.cache
    }

    /// Names of the feeds with a running timer.
    pub async fn scheduled_feeds(&self) -> Vec<String> {
        self.inner.scheduler.scheduled_feeds().await
    }

    /// Re-reads the config file and restarts every feed timer from it.
    ///
    /// An unreadable or invalid file leaves the running configuration and
    /// timers untouched. Connection settings, pacing and the shortener service
    /// only change on restart.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let _guard = self.inner.reload_lock.lock().await;

        let config = match Config::load(&self.inner.config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Reload failed, keeping current configuration");
                return Err(e);
            }
        };

        self.inner.scheduler.stop().await;
        self.inner.cache.clear();
        self.inner.transport.set_channels(config.channels()).await;
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;

        self.start_scheduler().await;
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Stops everything and leaves the network with `reason`.
    pub async fn shutdown(&self, reason: &str) {
        tracing::info!(reason, "Shutting down");
        self.inner.cancel.cancel();
        self.inner.scheduler.stop().await;
        self.inner.transport.disconnect(reason).await;

        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Task ended abnormally during shutdown");
            }
        }
    }

    /// Completes once shutdown has begun, whether from [`Feedie::shutdown`]
    /// or the `quit` command.
    pub async fn stopped(&self) {
        self.inner.cancel.cancelled().await
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    async fn start_scheduler(&self) {
        let config = self.config();
        let fetcher = FeedFetcher::new(
            Arc::clone(&self.inner.source),
            Arc::clone(&self.inner.cache),
            config.fetch_timeout(),
        );
        let all_channels = config.channels().into_iter().map(|c| c.name).collect();
        let poller = FeedPoller::new(
            fetcher,
            ChangeDetector::new(config.network.startup_announces),
            self.inner.announcer.clone(),
            Arc::clone(&self.inner.shortener),
            config.feedie.wrap_url.clone(),
            all_channels,
        );
        self.inner
            .scheduler
            .start(
                Arc::new(poller),
                config.feed_descriptors(),
                config.default_interval(),
            )
            .await;
    }

    async fn pump_events(self, mut events: tokio::sync::broadcast::Receiver<TransportEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(TransportEvent::Connected) => {
                    tracing::info!("Connected to network");
                }
                Ok(TransportEvent::Disconnected(reason)) => {
                    tracing::warn!(reason = %reason, "Disconnected from network");
                    self.inner.supervisor.on_disconnect();
                }
                Ok(TransportEvent::Message { nick, target, text }) => {
                    self.handle_message(&nick, &target, &text).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event pump fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Event pump stopped");
    }

    /// Runs the command in a channel message, if there is one.
    pub async fn handle_message(&self, nick: &str, target: &str, text: &str) {
        if !commands::is_channel(target) {
            return;
        }
        let config = self.config();
        let Some(prefix) = config.cmd_prefix() else {
            return;
        };
        let Some(command) = Command::parse(text, prefix) else {
            return;
        };
        if command.owner_only() && !config.is_owner(nick) {
            tracing::warn!(nick, ?command, "Ignoring owner-only command");
            return;
        }
        tracing::info!(nick, channel = target, ?command, "Command");

        let reply = |text: String| {
            self.inner.announcer.enqueue(text, target);
        };
        match command {
            Command::Help => reply(commands::help_text(prefix)),
            Command::Version => reply(commands::version_text(&config.network.bot_name)),
            Command::Uptime => reply(commands::uptime_text(self.uptime())),
            Command::Feeds => {
                for line in commands::feed_lines(&config, target) {
                    reply(line);
                }
            }
            Command::Rehash => match self.reload().await {
                Ok(()) => reply(commands::rehash_ok_text()),
                Err(e) => reply(commands::rehash_failed_text(&e.to_string())),
            },
            Command::Quit => {
                // Leave first; the owner of the handle sees stopped() and
                // finishes the shutdown.
                self.inner
                    .transport
                    .disconnect(&format!("Quit requested by {nick}"))
                    .await;
                self.inner.cancel.cancel();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::NoShortener;
    use crate::feed::{Entry, FetchError, ParseResult};
    use crate::transport::testing::FakeTransport;
    use async_trait::async_trait;
    use std::time::Duration;

    struct OneEntry;

    #[async_trait]
    impl FeedSource for OneEntry {
        async fn fetch_and_parse(
            &self,
            url: &str,
            _timeout: Duration,
        ) -> Result<ParseResult, FetchError> {
            Ok(ParseResult::new(vec![Entry::new(
                "hello".to_string(),
                Some(&format!("{url}/1")),
            )]))
        }
    }

    const CONFIG: &str = r##"
[feedie]
bot_owner = ["boss"]
cmd_prefix = "!"

[network]
bot_name = "feedie test"
announce_delay_secs = 0.1

[feeds.news]
url = "https://news.example/rss"
color = "red"
channel = "#news"
"##;

    async fn started(content: &str) -> (Feedie, Arc<FakeTransport>, tempfile::NamedTempFile) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        let transport = FakeTransport::new(false);
        let feedie = Feedie::start(
            file.path(),
            transport.clone(),
            Arc::new(OneEntry),
            Arc::new(NoShortener),
        )
        .await
        .unwrap();
        (feedie, transport, file)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_connects_and_schedules() {
        let (feedie, transport, _file) = started(CONFIG).await;

        assert!(transport.is_connected());
        assert_eq!(transport.channels()[0].name, "#news");
        assert_eq!(feedie.scheduled_feeds().await, vec!["news"]);

        feedie.shutdown("test").await;
        assert!(feedie.is_stopped());
        assert!(!transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_reply_in_channel() {
        let (feedie, transport, _file) = started(CONFIG).await;

        feedie.handle_message("someone", "#news", "!version").await;
        feedie.handle_message("someone", "#news", "!feeds").await;
        feedie.handle_message("someone", "FEED", "!version").await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.contains("feedie test"));
        assert!(sent[1].text.contains("https://news.example/rss"));
        assert!(sent.iter().all(|s| s.destination == "#news"));

        feedie.shutdown("test").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_only_commands() {
        let (feedie, transport, _file) = started(CONFIG).await;

        feedie.handle_message("stranger", "#news", "!quit").await;
        assert!(!feedie.is_stopped());

        feedie.handle_message("BOSS", "#news", "!quit").await;
        assert!(feedie.is_stopped());
        assert!(!transport.is_connected());

        feedie.shutdown("test").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_event_schedules_reconnect() {
        let (feedie, transport, _file) = started(CONFIG).await;

        transport.set_connected(false);
        transport.emit(TransportEvent::Disconnected("reset".to_string()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(feedie.supervisor().is_check_scheduled());

        // Default policy waits at least a minute before the check runs.
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(transport.reconnects() >= 1);
        assert!(transport.is_connected());

        feedie.shutdown("test").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_reload_keeps_running_config() {
        let (feedie, _transport, file) = started(CONFIG).await;
        assert_eq!(feedie.config_path(), file.path());

        std::fs::write(
            feedie.config_path(),
            "[feeds.bad]\nurl = \"ftp://x\"\ncolor = \"red\"\n",
        )
        .unwrap();
        assert!(feedie.reload().await.is_err());
        assert_eq!(feedie.scheduled_feeds().await, vec!["news"]);
        assert!(feedie.config().feeds.contains_key("news"));

        feedie.shutdown("test").await;
    }
}
