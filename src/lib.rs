//! feedie: watches RSS/Atom feeds and announces new entries to IRC channels.
//!
//! - [`feed`] fetches, caches and diffs feeds
//! - [`scheduler`] runs the per-feed timers
//! - [`announce`] formats announcements and paces delivery
//! - [`transport`] is the IRC connection, kept alive by [`reconnect`]
//! - [`app`] wires it all together as [`Feedie`]

pub mod announce;
pub mod app;
pub mod commands;
pub mod config;
pub mod feed;
pub mod reconnect;
pub mod scheduler;
pub mod transport;
pub mod util;

pub use app::Feedie;
pub use config::{Config, ConfigError};
