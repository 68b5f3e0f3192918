use std::borrow::Cow;

/// Collapses a string into a single printable line.
///
/// Removes terminal escape sequences (CSI and OSC), C0 control bytes and DEL,
/// then folds every run of whitespace (including `\r`, `\n` and tabs) into a
/// single space and trims both ends. Feed titles go through this before they
/// are put on the wire, where a stray line break would end the message early.
///
/// Returns `Cow::Borrowed` when the input is already clean.
///
/// # Examples
///
/// ```
/// use feedie::util::single_line;
///
/// assert_eq!(single_line("Hello\r\n  world"), "Hello world");
/// assert_eq!(single_line("\x1b[31mRed\x1b[0m"), "Red");
/// assert_eq!(single_line("clean title"), "clean title");
/// ```
pub fn single_line(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();

    let needs_work = s.starts_with(char::is_whitespace)
        || s.ends_with(char::is_whitespace)
        || bytes.iter().any(|&b| b < 0x20 || b == 0x7f)
        || s.contains("  ")
        || s.chars().any(|c| c.is_whitespace() && c != ' ');

    if !needs_work {
        return Cow::Borrowed(s);
    }

    let stripped = strip_escapes(s);
    let folded = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    Cow::Owned(folded)
}

/// Removes ESC-introduced sequences and non-whitespace control bytes.
/// Whitespace controls (`\t`, `\n`, `\r`) are kept for the caller to fold.
fn strip_escapes(s: &str) -> String {
    let bytes = s.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: parameters run until a final byte in 0x40..=0x7e
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: terminated by BEL or ST (ESC \)
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_dropped_control(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && bytes[i] != 0x1b && !is_dropped_control(bytes[i]) {
                i += 1;
            }
            // Runs only break on ASCII bytes, so the slice is on char boundaries.
            out.push_str(&s[start..i]);
        }
    }

    out
}

fn is_dropped_control(b: u8) -> bool {
    b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// Truncates `s` to at most `max_bytes` bytes without splitting a character.
///
/// # Examples
///
/// ```
/// use feedie::util::truncate_bytes;
///
/// assert_eq!(truncate_bytes("hello", 3), "hel");
/// assert_eq!(truncate_bytes("héllo", 2), "h");
/// assert_eq!(truncate_bytes("short", 64), "short");
/// ```
pub fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
