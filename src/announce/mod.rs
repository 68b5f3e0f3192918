//! Everything between "this entry is new" and a line on the wire.
//!
//! - [`format`] - mIRC colors and the announcement layout
//! - [`shorten`] - optional link shortening that never fails the announcement
//! - [`queue`] - the paced FIFO delivery queue

pub mod format;
pub mod queue;
pub mod shorten;

pub use queue::{Announcer, DeliveryQueue, OutboundMessage};
pub use shorten::{
    shorten_or_original, NoShortener, ServiceShortener, ShortenError, ShortenService,
    UrlShortener,
};
