//! Operator commands typed into a channel, e.g. `@feeds`.
//!
//! Parsing and reply text live here; [`crate::app::Feedie`] executes them.

use std::time::Duration;

use crate::announce::format::{bold, color, BOLD, RESET, UNDERLINE};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Version,
    Uptime,
    Feeds,
    /// Reload the configuration file. Owners only.
    Rehash,
    /// Leave the network and exit. Owners only.
    Quit,
}

impl Command {
    /// Parses a channel message. The whole message must be the prefix plus a
    /// command name; case is ignored.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let name = text.trim().strip_prefix(prefix)?;
        match name.to_ascii_lowercase().as_str() {
            "help" => Some(Self::Help),
            "version" => Some(Self::Version),
            "uptime" => Some(Self::Uptime),
            "feeds" => Some(Self::Feeds),
            "rehash" => Some(Self::Rehash),
            "quit" => Some(Self::Quit),
            _ => None,
        }
    }

    pub fn owner_only(self) -> bool {
        matches!(self, Self::Rehash | Self::Quit)
    }
}

/// Channel names start with one of these.
pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}

pub fn help_text(prefix: &str) -> String {
    let names = ["help", "version", "uptime", "feeds", "rehash", "quit"]
        .iter()
        .map(|name| format!("{prefix}{name}"))
        .collect::<Vec<_>>()
        .join(" || ");
    format!(
        "{BOLD}{UNDERLINE}{}{BOLD}{UNDERLINE} {names}",
        color("Available commands:", "blue")
    )
}

pub fn version_text(bot_name: &str) -> String {
    format!("{BOLD}{}{RESET}", color(bot_name, "blue"))
}

pub fn uptime_text(uptime: Duration) -> String {
    format!(
        "{BOLD}{} {} {RESET}",
        color("[UPTIME]", "teal"),
        format_uptime(uptime)
    )
}

pub fn rehash_ok_text() -> String {
    bold(&color("Successfully rehashed.", "blue"))
}

pub fn rehash_failed_text(error: &str) -> String {
    bold(&color(&format!("Rehash failed: {error}"), "red"))
}

/// `H:MM:SS`, with a leading `N day(s), ` once past 24 hours.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let clock = format!("{hours}:{minutes:02}:{seconds:02}");
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

/// One `name: url` line per enabled feed announcing to `channel`.
pub fn feed_lines(config: &Config, channel: &str) -> Vec<String> {
    config
        .feed_descriptors()
        .into_iter()
        .filter(|f| f.enabled)
        .filter(|f| {
            f.channel
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(channel))
        })
        .map(|f| format!("{}: {}", color(&f.name, &f.color), f.url))
        .collect()
}
