//! Shared fakes for the integration tests: an in-memory transport, a scripted
//! feed source and a shortener that always fails.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use feedie::announce::{ShortenError, UrlShortener};
use feedie::feed::{Entry, FeedSource, FetchError, ParseResult};
use feedie::transport::{ChannelSpec, ConnectParams, Transport, TransportError, TransportEvent};

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone)]
pub struct Sent {
    pub text: String,
    pub destination: String,
    pub at: Instant,
}

pub struct FakeTransport {
    connected: AtomicBool,
    reconnects: AtomicUsize,
    sent: Mutex<Vec<Sent>>,
    channels: Mutex<Vec<ChannelSpec>>,
    quit_reason: Mutex<Option<String>>,
    events: broadcast::Sender<TransportEvent>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            quit_reason: Mutex::new(None),
            events: broadcast::channel(64).0,
        })
    }

    /// Simulates the link dropping, as the real transport reports it.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .send(TransportEvent::Disconnected("Connection reset".to_string()));
    }

    pub fn say(&self, nick: &str, target: &str, text: &str) {
        let _ = self.events.send(TransportEvent::Message {
            nick: nick.to_string(),
            target: target.to_string(),
            text: text.to_string(),
        });
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn quit_reason(&self) -> Option<String> {
        self.quit_reason.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, params: ConnectParams) -> Result<(), TransportError> {
        *self.channels.lock().unwrap() = params.channels;
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, text: &str, destination: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(Sent {
            text: text.to_string(),
            destination: destination.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn disconnect(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            *self.quit_reason.lock().unwrap() = Some(reason.to_string());
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn set_channels(&self, channels: Vec<ChannelSpec>) {
        *self.channels.lock().unwrap() = channels;
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Feed source
// ============================================================================

/// One scripted fetch outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `(title, link)` pairs, newest first.
    Entries(Vec<(&'static str, &'static str)>),
    Timeout,
    Unparsable,
    NotFound,
}

/// Serves scripted replies per URL. The last reply repeats once the script
/// runs out; URLs without a script get [`Reply::NotFound`].
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, Vec<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch_and_parse(
        &self,
        url: &str,
        _timeout: Duration,
    ) -> Result<ParseResult, FetchError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(url.to_string()).or_default();
            *n += 1;
            *n
        };
        let reply = {
            let scripts = self.scripts.lock().unwrap();
            scripts
                .get(url)
                .and_then(|s| s.get(n - 1).or_else(|| s.last()))
                .cloned()
                .unwrap_or(Reply::NotFound)
        };
        match reply {
            Reply::Entries(entries) => Ok(ParseResult::new(
                entries
                    .into_iter()
                    .map(|(title, link)| Entry::new(title, Some(link)))
                    .collect(),
            )),
            Reply::Timeout => Err(FetchError::Timeout),
            Reply::Unparsable => Err(FetchError::Unparsable("not a feed".to_string())),
            Reply::NotFound => Err(FetchError::HttpStatus(404)),
        }
    }
}

// ============================================================================
// Shortener
// ============================================================================

pub struct FailingShortener {
    pub calls: AtomicUsize,
}

impl FailingShortener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UrlShortener for FailingShortener {
    async fn shorten(&self, _url: &str) -> Result<String, ShortenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ShortenError::HttpStatus(503))
    }
}

// ============================================================================
// Config files
// ============================================================================

/// Writes `content` to a fresh temp file. Keep the handle alive for the test.
pub fn config_file(content: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), content).unwrap();
    file
}

pub fn rewrite(file: &tempfile::NamedTempFile, content: &str) {
    std::fs::write(file.path(), content).unwrap();
}
