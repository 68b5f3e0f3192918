//! Minimal IRC client over plain TCP.
//!
//! A session is two tasks: a writer draining an unbounded line channel into
//! the socket, and a reader that answers protocol chatter (PING, nick
//! collisions, kicks, invites, CTCP) and publishes [`TransportEvent`]s.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::message::{self, Message};
use super::{ChannelSpec, ConnectParams, Transport, TransportError, TransportEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const QUIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const EVENT_CAPACITY: usize = 256;

pub struct IrcTransport {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Session>,
}

/// State visible to the reader task.
struct Shared {
    events: broadcast::Sender<TransportEvent>,
    registered: AtomicBool,
    /// Bumped on every connect; a reader only reports a drop for its own generation.
    generation: AtomicU64,
    nick: Mutex<String>,
    realname: Mutex<String>,
    password: Mutex<Option<secrecy::SecretString>>,
    channels: Mutex<Vec<ChannelSpec>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

#[derive(Default)]
struct Session {
    params: Option<ConnectParams>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Default for IrcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl IrcTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                events: broadcast::channel(EVENT_CAPACITY).0,
                registered: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                nick: Mutex::new(String::new()),
                realname: Mutex::new(String::new()),
                password: Mutex::new(None),
                channels: Mutex::new(Vec::new()),
                outgoing: Mutex::new(None),
            }),
            session: tokio::sync::Mutex::new(Session::default()),
        }
    }

    /// Nick currently in use, which may carry `_` suffixes after collisions.
    pub fn nick(&self) -> String {
        lock(&self.shared.nick).clone()
    }

    async fn close_session(&self, session: &mut Session, reason: &str) {
        // Silence the old reader before it notices the socket going away.
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.registered.store(false, Ordering::Release);

        if let Some(reader) = session.reader.take() {
            reader.abort();
        }
        if let Some(tx) = lock(&self.shared.outgoing).take() {
            let _ = tx.send(message::quit(reason));
        }
        // Every sender is gone now, so the writer drains QUIT and exits.
        if let Some(writer) = session.writer.take() {
            if tokio::time::timeout(QUIT_FLUSH_TIMEOUT, writer).await.is_err() {
                tracing::debug!("Writer did not flush QUIT in time");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Transport for IrcTransport {
    async fn connect(&self, params: ConnectParams) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if session.writer.is_some() {
            self.close_session(&mut session, "Reconnecting").await;
        }

        *lock(&self.shared.nick) = params.nick.clone();
        *lock(&self.shared.realname) = params.realname.clone();
        *lock(&self.shared.password) = params.password.clone();
        *lock(&self.shared.channels) = params.channels.clone();
        session.params = Some(params.clone());

        tracing::info!(server = %params.server, port = params.port, "Connecting");
        let stream = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((params.server.as_str(), params.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let _ = tx.send(format!("NICK {}", params.nick));
        let _ = tx.send(format!("USER {} 0 * :{}", params.nick, params.realname));

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *lock(&self.shared.outgoing) = Some(tx.clone());

        session.writer = Some(tokio::spawn(write_loop(write_half, rx)));
        session.reader = Some(tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            read_half,
            tx,
            generation,
        )));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.registered.load(Ordering::Acquire)
    }

    async fn send(&self, text: &str, destination: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let outgoing = lock(&self.shared.outgoing);
        let tx = outgoing.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(message::privmsg(destination, text))
            .map_err(|_| TransportError::NotConnected)
    }

    async fn disconnect(&self, reason: &str) {
        let mut session = self.session.lock().await;
        tracing::info!(reason = %reason, "Disconnecting");
        self.close_session(&mut session, reason).await;
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let params = self
            .session
            .lock()
            .await
            .params
            .clone()
            .ok_or(TransportError::MissingConnectParams)?;
        self.connect(params).await
    }

    async fn set_channels(&self, channels: Vec<ChannelSpec>) {
        let previous = std::mem::replace(&mut *lock(&self.shared.channels), channels.clone());
        if let Some(params) = self.session.lock().await.params.as_mut() {
            params.channels = channels.clone();
        }
        if !self.is_connected() {
            return;
        }
        let outgoing = lock(&self.shared.outgoing);
        if let Some(tx) = outgoing.as_ref() {
            for channel in channels.iter().filter(|c| !previous.contains(c)) {
                let _ = tx.send(message::join(&channel.name, channel.key.as_deref()));
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}

async fn write_loop(mut socket: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        tracing::trace!(line = %line, "IRC >>");
        let mut bytes = line.into_bytes();
        bytes.extend_from_slice(b"\r\n");
        if let Err(e) = socket.write_all(&bytes).await {
            tracing::debug!(error = %e, "IRC write failed");
            return;
        }
    }
    let _ = socket.shutdown().await;
}

async fn read_loop(
    shared: Arc<Shared>,
    socket: OwnedReadHalf,
    tx: mpsc::UnboundedSender<String>,
    generation: u64,
) {
    let mut reader = BufReader::new(socket);
    let mut buf = Vec::with_capacity(1024);

    let reason = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break "Connection closed by server".to_string(),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::trace!(line = %line.trim_end(), "IRC <<");
                if let Some(msg) = Message::parse(&line) {
                    handle_message(&shared, &tx, msg);
                }
            }
            Err(e) => break format!("Read error: {e}"),
        }
    };

    if shared.generation.load(Ordering::Acquire) == generation {
        shared.registered.store(false, Ordering::Release);
        lock(&shared.outgoing).take();
        tracing::warn!(reason = %reason, "Disconnected");
        let _ = shared.events.send(TransportEvent::Disconnected(reason));
    }
}

fn handle_message(shared: &Shared, tx: &mpsc::UnboundedSender<String>, msg: Message) {
    let send = |line: String| {
        let _ = tx.send(line);
    };

    match msg.command.as_str() {
        "PING" => send(format!("PONG :{}", msg.param(0).unwrap_or_default())),
        "001" => {
            if let Some(nick) = msg.param(0) {
                *lock(&shared.nick) = nick.to_string();
            }
            if let Some(password) = lock(&shared.password).as_ref() {
                send(message::privmsg(
                    "NickServ",
                    &format!("IDENTIFY {}", password.expose_secret()),
                ));
                send(message::privmsg("ChanServ", "SET irc_auto_rejoin ON"));
                send(message::privmsg("ChanServ", "SET irc_join_delay 0"));
            }
            for channel in lock(&shared.channels).iter() {
                send(message::join(&channel.name, channel.key.as_deref()));
            }
            shared.registered.store(true, Ordering::Release);
            tracing::info!(nick = %lock(&shared.nick), "Registered with server");
            let _ = shared.events.send(TransportEvent::Connected);
        }
        "433" => {
            let mut nick = lock(&shared.nick);
            nick.push('_');
            tracing::info!(nick = %nick, "Nick in use, retrying");
            send(format!("NICK {nick}"));
        }
        "KICK" => {
            let (Some(channel), Some(kicked)) = (msg.param(0), msg.param(1)) else {
                return;
            };
            if !kicked.eq_ignore_ascii_case(&lock(&shared.nick)) {
                return;
            }
            tracing::warn!(channel = %channel, by = ?msg.nick(), "Kicked, rejoining");
            let key = lock(&shared.channels)
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(channel))
                .and_then(|c| c.key.clone());
            send(message::join(channel, key.as_deref()));
        }
        "INVITE" => {
            if let Some(channel) = msg.param(1) {
                tracing::info!(channel = %channel, by = ?msg.nick(), "Invited, joining");
                send(message::join(channel, None));
            }
        }
        "PRIVMSG" => {
            let (Some(nick), Some(target), Some(text)) = (msg.nick(), msg.param(0), msg.param(1))
            else {
                return;
            };
            match message::ctcp(text) {
                Some(("VERSION", _)) => {
                    send(message::ctcp_reply(nick, "VERSION", &lock(&shared.realname)));
                }
                Some(("PING", args)) => send(message::ctcp_reply(nick, "PING", args)),
                Some(_) => {}
                None => {
                    let _ = shared.events.send(TransportEvent::Message {
                        nick: nick.to_string(),
                        target: target.to_string(),
                        text: text.to_string(),
                    });
                }
            }
        }
        "ERROR" => {
            tracing::warn!(message = ?msg.param(0), "Server error");
        }
        _ => {}
    }
}
