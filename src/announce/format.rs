//! mIRC text formatting and the announcement line layout.

pub const BOLD: char = '\x02';
pub const COLOR: char = '\x03';
pub const UNDERLINE: char = '\x1f';
pub const RESET: char = '\x0f';

/// The 16 standard mIRC colors with their codes.
const COLORS: &[(&str, u8)] = &[
    ("white", 0),
    ("black", 1),
    ("blue", 2),
    ("green", 3),
    ("red", 4),
    ("brown", 5),
    ("purple", 6),
    ("orange", 7),
    ("yellow", 8),
    ("light green", 9),
    ("teal", 10),
    ("light blue", 11),
    ("dark blue", 12),
    ("pink", 13),
    ("dark grey", 14),
    ("dark gray", 14),
    ("light grey", 15),
    ("light gray", 15),
];

/// Color code for a (case-insensitive) color name.
pub fn color_code(name: &str) -> Option<u8> {
    let name = name.trim();
    COLORS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, code)| code)
}

/// Wraps `text` in a color. Unknown color names leave the text uncolored.
pub fn color(text: &str, name: &str) -> String {
    match color_code(name) {
        Some(code) => format!("{COLOR}{code:02}{text}{COLOR}"),
        None => text.to_string(),
    }
}

pub fn bold(text: &str) -> String {
    format!("{BOLD}{text}{BOLD}")
}

pub fn underline(text: &str) -> String {
    format!("{UNDERLINE}{text}{UNDERLINE}")
}

/// Surrounds `link` with the first and last characters of `wrap`.
///
/// A single-character `wrap` is used on both sides; an empty one is ignored.
pub fn wrap(link: &str, wrap: Option<&str>) -> String {
    let Some(wrap) = wrap else {
        return link.to_string();
    };
    match (wrap.chars().next(), wrap.chars().last()) {
        (Some(open), Some(close)) => format!("{open}{link}{close}"),
        _ => link.to_string(),
    }
}

/// `<feed name in feed color> <title in blue> <wrapped, underlined link>`
pub fn announcement(
    feed_name: &str,
    feed_color: &str,
    title: &str,
    link: &str,
    wrap_url: Option<&str>,
) -> String {
    format!(
        "{} {} {}",
        color(feed_name, feed_color),
        color(title, "blue"),
        wrap(&underline(link), wrap_url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_color_codes_are_two_digits() {
        assert_eq!(color("hi", "blue"), "\x0302hi\x03");
        assert_eq!(color("hi", "Light Grey"), "\x0315hi\x03");
        assert_eq!(color("hi", "dark gray"), "\x0314hi\x03");
    }

    #[test]
    fn test_unknown_color_is_plain() {
        assert_eq!(color("hi", "chartreuse"), "hi");
        assert_eq!(color_code("chartreuse"), None);
    }

    #[test]
    fn test_bold_and_underline() {
        assert_eq!(bold("x"), "\x02x\x02");
        assert_eq!(underline("x"), "\x1fx\x1f");
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("u", Some("<>")), "<u>");
        assert_eq!(wrap("u", Some("|")), "|u|");
        assert_eq!(wrap("u", Some("")), "u");
        assert_eq!(wrap("u", None), "u");
    }

    #[test]
    fn test_announcement_layout() {
        let line = announcement("rust", "orange", "Rust 2.0", "https://r/2", Some("<>"));
        assert_eq!(line, "\x0307rust\x03 \x0302Rust 2.0\x03 <\x1fhttps://r/2\x1f>");
    }
}
