//! IRC line parsing and the few outgoing commands the bot needs.

use std::borrow::Cow;

use crate::util::truncate_bytes;

/// Longest line body allowed by RFC 1459, CR LF excluded.
pub const MAX_LINE_BYTES: usize = 510;

const CTCP_DELIM: char = '\x01';

/// One parsed server line: `[:prefix] COMMAND params... [:trailing]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    /// Middle params followed by the trailing one, if present.
    pub params: Vec<String>,
}

impl Message {
    /// Parses a line with or without its CR LF. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, tail) = stripped.split_once(' ')?;
                rest = tail;
                Some(prefix.to_string())
            }
            None => None,
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nick part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split_once('!').map_or(p, |(nick, _)| nick))
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

/// Splits a CTCP request `\x01COMMAND args\x01` into its command and arguments.
pub fn ctcp(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
    let (command, args) = inner.split_once(' ').unwrap_or((inner, ""));
    if command.is_empty() {
        return None;
    }
    Some((command, args))
}

/// `PRIVMSG target :text`, with line breaks in `text` blanked and the line cut so the
/// whole line fits in [`MAX_LINE_BYTES`].
pub fn privmsg(target: &str, text: &str) -> String {
    line_with_trailing("PRIVMSG", target, text)
}

pub fn notice(target: &str, text: &str) -> String {
    line_with_trailing("NOTICE", target, text)
}

/// CTCP reply sent back as a NOTICE.
pub fn ctcp_reply(target: &str, command: &str, args: &str) -> String {
    let body = if args.is_empty() {
        format!("{CTCP_DELIM}{command}{CTCP_DELIM}")
    } else {
        format!("{CTCP_DELIM}{command} {args}{CTCP_DELIM}")
    };
    notice(target, &body)
}

pub fn join(channel: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("JOIN {channel} {key}"),
        None => format!("JOIN {channel}"),
    }
}

pub fn quit(reason: &str) -> String {
    format!("QUIT :{}", wire_safe(reason))
}

fn line_with_trailing(command: &str, target: &str, text: &str) -> String {
    let head = format!("{command} {target} :");
    let budget = MAX_LINE_BYTES.saturating_sub(head.len());
    let text = wire_safe(text);
    format!("{head}{}", truncate_bytes(&text, budget))
}

/// Replaces line breaks with spaces and drops NUL. Formatting control bytes
/// (color, bold, CTCP delimiters) pass through.
fn wire_safe(text: &str) -> Cow<'_, str> {
    if !text.contains(['\r', '\n', '\0']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .filter(|&c| c != '\0')
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect(),
    )
}
