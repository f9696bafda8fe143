//! Helpers that keep SMS text and raw modem lines readable in single-line logs.

use std::fmt::Write;

/// Default preview length for message bodies in log lines.
pub const TEXT_PREVIEW: usize = 160;

/// Escape control characters and cap the result at `max_chars` characters:
/// - `\n` => `\\n`, `\r` => `\\r`, `\t` => `\\t`, backslash => `\\\\`
/// - other controls (Ctrl-Z, ESC, ...) => `\\xNN`
///
/// Truncated output ends with an ellipsis.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// [`preview`] with the default SMS-sized cap.
pub fn escape_log(s: &str) -> String {
    preview(s, TEXT_PREVIEW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_modem_line_endings() {
        assert_eq!(escape_log("+CMTI: \"SM\",3\r\n"), "+CMTI: \"SM\",3\\r\\n");
    }

    #[test]
    fn test_escapes_ctrl_z_terminator() {
        assert_eq!(escape_log("0011\u{1a}"), "0011\\x1A");
    }

    #[test]
    fn test_truncates_long_bodies() {
        let long = "a".repeat(200);
        let out = preview(&long, 10);
        assert_eq!(out, format!("{}…", "a".repeat(10)));
    }
}
