//! Connection to the messaging network.
//!
//! [`Transport`] is the capability the rest of the crate talks to; [`IrcTransport`]
//! is the production implementation. Tests substitute in-memory fakes.

mod irc;
pub mod message;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::broadcast;

pub use irc::IrcTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Not registered with the server (never connected, or the link dropped)
    #[error("Not connected")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection timed out")]
    Timeout,
    /// `reconnect()` called before any `connect()`
    #[error("No connection parameters; connect() was never called")]
    MissingConnectParams,
}

/// A channel to join, with its optional key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub name: String,
    pub key: Option<String>,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, key: Option<String>) -> Self {
        Self {
            name: name.into(),
            key: key.filter(|k| !k.is_empty()),
        }
    }
}

/// Everything needed to (re)establish a session.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub server: String,
    pub port: u16,
    pub nick: String,
    pub realname: String,
    /// NickServ password; identification is skipped when `None`.
    pub password: Option<SecretString>,
    pub channels: Vec<ChannelSpec>,
}

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Registration completed; sending is possible.
    Connected,
    /// The link dropped. Carries a human-readable reason.
    Disconnected(String),
    /// A `PRIVMSG` addressed to a channel or to the bot.
    Message {
        nick: String,
        target: String,
        text: String,
    },
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, params: ConnectParams) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Sends `text` to `destination`. Never retries.
    async fn send(&self, text: &str, destination: &str) -> Result<(), TransportError>;

    async fn disconnect(&self, reason: &str);

    /// Drops any current session and connects again with the last parameters.
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Replaces the channel list. Channels not joined yet are joined now if connected.
    async fn set_channels(&self, channels: Vec<ChannelSpec>);

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}
