use feed_rs::parser;

use super::types::{Entry, ParseResult};
use crate::util::single_line;

/// Parses RSS/Atom/JSON Feed bytes into a [`ParseResult`].
///
/// Entries keep the document order. Titles are folded onto one line; entries
/// without a title get `"Untitled"`. The first link of each entry is used.
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| single_line(&t.content).into_owned())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let link = entry
                .links
                .into_iter()
                .map(|l| l.href.trim().to_string())
                .find(|href| !href.is_empty());

            Entry {
                title,
                link,
                published_at: entry.published,
                updated_at: entry.updated,
            }
        })
        .collect();

    Ok(ParseResult::new(entries))
}
