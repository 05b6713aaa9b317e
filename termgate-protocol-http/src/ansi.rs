use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(concat!(
        r"\x1b\[[0-9;?]*[A-Za-z]",              // CSI
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",  // OSC, BEL- or ST-terminated
        r"|\x1b[()][0-9A-Za-z]",                // charset selectors
        r"|\x1b[><=]",
        r"|\r",
    ))
    .unwrap()
});

/// Strips terminal control sequences and carriage returns. Line feeds are
/// kept so line-oriented heuristics still see the output structure.
pub fn strip_ansi(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_csi_colors() {
        assert_eq!(strip_ansi("\x1b[1;32mgreen\x1b[0m"), "green");
    }

    #[test]
    fn test_strips_cursor_movement() {
        assert_eq!(strip_ansi("a\x1b[2Jb\x1b[Hc"), "abc");
    }

    #[test]
    fn test_strips_osc_titles() {
        assert_eq!(strip_ansi("\x1b]0;user@host: ~\x07$ "), "$ ");
        assert_eq!(strip_ansi("\x1b]2;title\x1b\\done"), "done");
    }

    #[test]
    fn test_strips_charset_and_keypad_modes() {
        assert_eq!(strip_ansi("\x1b(B\x1b)0\x1b>\x1b=\x1b<x"), "x");
    }

    #[test]
    fn test_keeps_line_feeds_drops_carriage_returns() {
        assert_eq!(strip_ansi("one\r\ntwo\r"), "one\ntwo");
    }
}
