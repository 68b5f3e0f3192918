//! Configuration file parser for the bot's TOML config.
//!
//! The file has three sections: `[feedie]` for bot behaviour, `[network]` for
//! the connection and timing, and one `[feeds.NAME]` table per feed. Every key
//! except a feed's `url` and `color` has a default. Unknown keys are accepted
//! but logged as warnings, since they are usually typos.
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::announce::format::color_code;
use crate::announce::ShortenService;
use crate::reconnect::{BackoffError, BackoffPolicy};
use crate::transport::{ChannelSpec, ConnectParams};
use crate::util::validate_url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed fine but breaks a rule; the message names the offending key.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<BackoffError> for ConfigError {
    fn from(e: BackoffError) -> Self {
        ConfigError::Invalid(format!("network.reconnect_min_secs/reconnect_max_secs: {e}"))
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feedie: FeedieConfig,
    pub network: NetworkConfig,
    pub feeds: BTreeMap<String, FeedConfig>,
}

/// `[feedie]`: bot behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedieConfig {
    /// Nicks allowed to run `rehash` and `quit`.
    pub bot_owner: Vec<String>,

    /// Command prefix. Empty disables commands.
    pub cmd_prefix: String,

    /// `"tinyurl.com"`, `"v.gd"`, or empty for no shortening.
    pub shorten_service: String,

    /// First and last characters are put around announced links.
    pub wrap_url: Option<String>,
}

impl Default for FeedieConfig {
    fn default() -> Self {
        Self {
            bot_owner: vec!["xstill".to_string()],
            cmd_prefix: "@".to_string(),
            shorten_service: "tinyurl.com".to_string(),
            wrap_url: None,
        }
    }
}

/// `[network]`: connection, pacing and timing.
///
/// Custom Debug impl masks `password`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub server: String,
    pub port: u16,

    /// NickServ password. Empty skips identification.
    pub password: String,

    pub bot_nick: String,

    /// Realname, CTCP VERSION reply and `version` command output.
    pub bot_name: String,

    /// Minimum gap between two outbound messages.
    pub announce_delay_secs: f64,

    /// Poll interval for feeds without their own `refresh_delay_secs`.
    pub default_refresh_delay_secs: f64,

    /// Announce what a feed already contains on its first poll.
    pub startup_announces: bool,

    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,

    pub fetch_timeout_secs: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server: "chat.freenode.net".to_string(),
            port: 6667,
            password: String::new(),
            bot_nick: "FEED".to_string(),
            bot_name: concat!("feedie v", env!("CARGO_PKG_VERSION")).to_string(),
            announce_delay_secs: 0.5,
            default_refresh_delay_secs: 35.0,
            startup_announces: false,
            reconnect_min_secs: 60,
            reconnect_max_secs: 300,
            fetch_timeout_secs: 30.0,
        }
    }
}

impl std::fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field(
                "password",
                &(!self.password.is_empty()).then_some("[REDACTED]"),
            )
            .field("bot_nick", &self.bot_nick)
            .field("bot_name", &self.bot_name)
            .field("announce_delay_secs", &self.announce_delay_secs)
            .field("default_refresh_delay_secs", &self.default_refresh_delay_secs)
            .field("startup_announces", &self.startup_announces)
            .field("reconnect_min_secs", &self.reconnect_min_secs)
            .field("reconnect_max_secs", &self.reconnect_max_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .finish()
    }
}

/// `[feeds.NAME]`: one feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    pub color: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Own poll interval; absent means the shared default timer.
    #[serde(default)]
    pub refresh_delay_secs: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

/// A feed as the scheduler sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedDescriptor {
    pub name: String,
    pub url: String,
    pub color: String,
    pub channel: Option<String>,
    pub channel_key: Option<String>,
    pub enabled: bool,
    pub interval: Option<Duration>,
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load and validate configuration from a TOML file.
    ///
    /// Unlike many tools the file is required: a bot with no feeds has nothing to do.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion.
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            server = %config.network.server,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every rule `load` enforces. Violations name the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let net = &self.network;

        if net.server.trim().is_empty() {
            return Err(invalid("network.server", "must not be empty"));
        }
        if net.bot_nick.trim().is_empty() || net.bot_nick.contains(char::is_whitespace) {
            return Err(invalid("network.bot_nick", "must be a single non-empty word"));
        }
        require_duration("network.announce_delay_secs", net.announce_delay_secs)?;
        require_duration(
            "network.default_refresh_delay_secs",
            net.default_refresh_delay_secs,
        )?;
        require_duration("network.fetch_timeout_secs", net.fetch_timeout_secs)?;
        self.backoff_policy()?;

        if !self.feedie.shorten_service.trim().is_empty() {
            ShortenService::from_name(&self.feedie.shorten_service)
                .map_err(|e| invalid("feedie.shorten_service", &e.to_string()))?;
        }
        if self.feedie.cmd_prefix.contains(char::is_whitespace) {
            return Err(invalid("feedie.cmd_prefix", "must not contain whitespace"));
        }

        for (name, feed) in &self.feeds {
            let key = |field: &str| format!("feeds.{name}.{field}");

            validate_url(&feed.url).map_err(|e| invalid(&key("url"), &e.to_string()))?;
            if color_code(&feed.color).is_none() {
                return Err(invalid(
                    &key("color"),
                    &format!("unknown color {:?}", feed.color),
                ));
            }
            if let Some(channel) = &feed.channel {
                if channel.trim().is_empty() || channel.contains(char::is_whitespace) {
                    return Err(invalid(&key("channel"), "must be a non-empty channel name"));
                }
            }
            if let Some(delay) = feed.refresh_delay_secs {
                require_duration(&key("refresh_delay_secs"), delay)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived values
    // ------------------------------------------------------------------------

    pub fn pacing(&self) -> Duration {
        Duration::from_secs_f64(self.network.announce_delay_secs)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs_f64(self.network.default_refresh_delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.network.fetch_timeout_secs)
    }

    pub fn backoff_policy(&self) -> Result<BackoffPolicy, BackoffError> {
        BackoffPolicy::new(
            Duration::from_secs(self.network.reconnect_min_secs),
            Duration::from_secs(self.network.reconnect_max_secs),
        )
    }

    /// `None` when commands are disabled.
    pub fn cmd_prefix(&self) -> Option<&str> {
        Some(self.feedie.cmd_prefix.as_str()).filter(|p| !p.is_empty())
    }

    /// `None` when shortening is disabled.
    pub fn shorten_service(&self) -> Option<ShortenService> {
        let name = self.feedie.shorten_service.trim();
        if name.is_empty() {
            return None;
        }
        ShortenService::from_name(name).ok()
    }

    pub fn is_owner(&self, nick: &str) -> bool {
        self.feedie
            .bot_owner
            .iter()
            .any(|owner| owner.eq_ignore_ascii_case(nick))
    }

    /// Every configured feed, enabled or not, in name order.
    pub fn feed_descriptors(&self) -> Vec<FeedDescriptor> {
        self.feeds
            .iter()
            .map(|(name, feed)| FeedDescriptor {
                name: name.clone(),
                url: feed.url.clone(),
                color: feed.color.clone(),
                channel: feed.channel.clone(),
                channel_key: Some(feed.channel_key.clone()).filter(|k| !k.is_empty()),
                enabled: feed.enabled,
                interval: feed.refresh_delay_secs.map(Duration::from_secs_f64),
            })
            .collect()
    }

    /// Distinct channels of enabled feeds, in feed name order.
    pub fn channels(&self) -> Vec<ChannelSpec> {
        let mut seen = HashSet::new();
        self.feed_descriptors()
            .into_iter()
            .filter(|f| f.enabled)
            .filter_map(|f| {
                let name = f.channel?;
                seen.insert(name.to_ascii_lowercase())
                    .then(|| ChannelSpec::new(name, f.channel_key))
            })
            .collect()
    }

    pub fn connect_params(&self) -> ConnectParams {
        let net = &self.network;
        ConnectParams {
            server: net.server.clone(),
            port: net.port,
            nick: net.bot_nick.clone(),
            realname: net.bot_name.clone(),
            password: Some(net.password.clone())
                .filter(|p| !p.is_empty())
                .map(secrecy::SecretString::from),
            channels: self.channels(),
        }
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid(format!("{key}: {reason}"))
}

/// Seconds that convert to a non-zero [`Duration`]. Rejects values too large
/// to represent and values that round down to zero.
fn require_duration(key: &str, secs: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(()),
        Ok(_) => Err(invalid(key, &format!("must be a positive duration, got {secs}"))),
        Err(e) => Err(invalid(key, &format!("not a usable duration ({secs}): {e}"))),
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    const TOP: &[&str] = &["feedie", "network", "feeds"];
    const FEEDIE: &[&str] = &["bot_owner", "cmd_prefix", "shorten_service", "wrap_url"];
    const NETWORK: &[&str] = &[
        "server",
        "port",
        "password",
        "bot_nick",
        "bot_name",
        "announce_delay_secs",
        "default_refresh_delay_secs",
        "startup_announces",
        "reconnect_min_secs",
        "reconnect_max_secs",
        "fetch_timeout_secs",
    ];
    const FEED: &[&str] = &[
        "url",
        "color",
        "channel",
        "channel_key",
        "enabled",
        "refresh_delay_secs",
    ];

    let check = |section: &str, table: &toml::Table, known: &[&str]| {
        for key in table.keys() {
            if !known.contains(&key.as_str()) {
                tracing::warn!(section = %section, key = %key, "Unknown key in config file, ignoring");
            }
        }
    };

    check("(top level)", raw, TOP);
    if let Some(toml::Value::Table(t)) = raw.get("feedie") {
        check("feedie", t, FEEDIE);
    }
    if let Some(toml::Value::Table(t)) = raw.get("network") {
        check("network", t, NETWORK);
    }
    if let Some(toml::Value::Table(feeds)) = raw.get("feeds") {
        for (name, feed) in feeds {
            if let toml::Value::Table(t) = feed {
                check(&format!("feeds.{name}"), t, FEED);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
