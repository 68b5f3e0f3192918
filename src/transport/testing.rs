//! In-memory transport for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{ChannelSpec, ConnectParams, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub text: String,
    pub destination: String,
    pub at: Instant,
}

pub struct FakeTransport {
    connected: AtomicBool,
    /// Whether `reconnect()` brings the link back up.
    heals: AtomicBool,
    reconnects: AtomicUsize,
    sent: Mutex<Vec<Sent>>,
    channels: Mutex<Vec<ChannelSpec>>,
    events: broadcast::Sender<TransportEvent>,
}

impl FakeTransport {
    pub fn new(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            heals: AtomicBool::new(true),
            reconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            events: broadcast::channel(64).0,
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_heals(&self, heals: bool) {
        self.heals.store(heals, Ordering::SeqCst);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn channels(&self) -> Vec<ChannelSpec> {
        self.channels.lock().unwrap().clone()
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, params: ConnectParams) -> Result<(), TransportError> {
        *self.channels.lock().unwrap() = params.channels;
        self.set_connected(true);
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

    async fn disconnect(&self, _reason: &str) {
        self.set_connected(false);
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.heals.load(Ordering::SeqCst) {
            self.set_connected(true);
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn set_channels(&self, channels: Vec<ChannelSpec>) {
        *self.channels.lock().unwrap() = channels;
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
