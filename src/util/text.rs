use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Placeholder used when an entry has no usable title.
pub const NO_TITLE: &str = "No Title";

/// Calculates the display width of a string in terminal columns.
///
/// CJK characters and emoji count as two columns, zero-width characters as none.
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Truncates a string to fit within `max_width` terminal columns.
///
/// Appends "..." when text is cut, unless the width is too narrow to hold
/// anything besides the ellipsis, in which case as many characters as fit
/// are returned. Returns `Cow::Borrowed` when the string already fits.
///
/// ```
/// use canopy::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, suffix) = if max_width <= ELLIPSIS_WIDTH {
        (max_width, "")
    } else {
        (max_width - ELLIPSIS_WIDTH, ELLIPSIS)
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }

    Cow::Owned(format!("{}{}", &s[..end], suffix))
}

/// Strip terminal control characters and ANSI escape sequences.
///
/// Feed titles and summaries come from untrusted servers. Removes ASCII
/// controls except tab, newline and carriage return, DEL, CSI sequences
/// (`\x1b[` ... final byte), OSC sequences (`\x1b]` ... BEL or ST) and bare ESC.
///
/// Returns `Cow::Borrowed` when nothing needs stripping (the common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    fn is_stripped(b: u8) -> bool {
        b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
    }

    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| is_stripped(b)) {
        return Cow::Borrowed(s);
    }

    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        if b == 0x1b {
            match bytes.get(i + 1) {
                Some(b'[') => {
                    i += 2;
                    while i < len {
                        let c = bytes[i];
                        i += 1;
                        if (0x40..=0x7e).contains(&c) {
                            break;
                        }
                    }
                }
                Some(b']') => {
                    i += 2;
                    while i < len {
                        if bytes[i] == 0x07 {
                            i += 1;
                            break;
                        }
                        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        } else if is_stripped(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_stripped(bytes[i]) {
                i += 1;
            }
            // SAFETY: runs end only at ASCII bytes, which never split a UTF-8 sequence.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

fn is_zero_width(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{2060}'
    )
}

/// Normalizes an article title for display and screen readers.
///
/// Braille displays and screen readers render stray zero-width characters,
/// non-breaking spaces and control characters as blank cells, so titles are
/// reduced to plain single-spaced text:
///
/// - escape sequences and control characters are removed
/// - zero-width space/non-joiner/joiner, BOM and word joiner are removed
/// - every run of whitespace (NBSP, thin and narrow no-break spaces, tabs and
///   newlines included) becomes one ordinary space
/// - leading and trailing whitespace is dropped
///
/// An input that is empty after cleaning yields [`NO_TITLE`].
///
/// ```
/// use canopy::util::sanitize_title;
///
/// assert_eq!(sanitize_title("Hello\u{200B}\u{A0}World\t\n"), "Hello World");
/// assert_eq!(sanitize_title("\u{1}\u{2}\u{7f}"), "No Title");
/// ```
pub fn sanitize_title(raw: &str) -> String {
    let stripped = strip_control_chars(raw);
    let mut out = String::with_capacity(stripped.len());
    let mut pending_space = false;

    for c in stripped.chars() {
        if is_zero_width(c) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    if out.is_empty() {
        NO_TITLE.to_string()
    } else {
        out
    }
}
