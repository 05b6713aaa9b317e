use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::messages::{Hint, HintAction};

/// What the shell appears to be blocked on, if anything. Precedence when
/// several patterns match is pager, then confirm, then interactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveState {
    None,
    Pager,
    Interactive,
    Confirm,
}

#[allow(clippy::unwrap_used)]
fn patterns(sources: &[&str]) -> Vec<Regex> {
    sources.iter().map(|s| Regex::new(s).unwrap()).collect()
}

static PAGER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"lines \d+-\d+",
        r"\(END\)",
        r"--More--",
        r"byte \d+",
        r"^:$",
    ])
});

static CONFIRM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"\[Y/n\]",
        r"\[y/N\]",
        r"(?m)\(yes/no[^)]*\)\s*[:?]?\s*$",
        r"(?im)password[^\n]*:\s*$",
        r"(?im)passphrase[^\n]*:\s*$",
        r"(?i)continue\?",
        r"(?i)proceed\?",
        r"Do you want to continue",
    ])
});

static REPL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"^>>>$",
        r"^\.\.\.$",
        r"^mysql>$",
        r"^postgres=[#>]$",
        r"^redis(?: \d+\.\d+\.\d+)?>$",
        r"^\(gdb\)$",
        r"^irb\(main\):\d+:\d+>$",
        r"^node>$",
    ])
});

/// Builds the ready-for-input prompt matcher for one SSH user. Matches, at
/// the end of a line, `user@host:path$`/`#`, `[user@host]$`/`#` and
/// `root@host:path#`. Custom PS1 prompts are a known limitation.
pub fn build_prompt_pattern(username: &str) -> Result<Regex, regex::Error> {
    let user = regex::escape(username);
    Regex::new(&format!(
        r"(?m)(?:{user}@[\w.\-]+:[^\n]*[$#]\s*$|\[{user}@[^\]\n]+\][$#]\s*$|root@[\w.\-]+:[^\n]*#\s*$)"
    ))
}

/// Returns the last `n` lines of `text`, newline-joined.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

pub fn detect_interactive_state(clean: &str) -> InteractiveState {
    let trimmed = clean.trim_end();
    if trimmed.is_empty() {
        return InteractiveState::None;
    }
    let last_line = trimmed.lines().last().unwrap_or("").trim();
    let last_three = tail_lines(trimmed, 3);

    if PAGER_PATTERNS.iter().any(|p| p.is_match(last_line)) {
        InteractiveState::Pager
    } else if CONFIRM_PATTERNS.iter().any(|p| p.is_match(&last_three)) {
        InteractiveState::Confirm
    } else if REPL_PATTERNS.iter().any(|p| p.is_match(last_line)) {
        InteractiveState::Interactive
    } else {
        InteractiveState::None
    }
}

/// Quick-action hints shown next to the notification in the browser.
pub fn hint_for(state: InteractiveState) -> Option<Hint> {
    match state {
        InteractiveState::Pager => Some(Hint {
            message: "检测到分页器（less/more），输出已暂停".to_owned(),
            actions: vec![
                HintAction::new("退出 (q)", "q"),
                HintAction::new("下一页 (空格)", " "),
                HintAction::new("跳到末尾 (G)", "G"),
            ],
        }),
        InteractiveState::Confirm => Some(Hint {
            message: "命令正在等待确认输入".to_owned(),
            actions: vec![
                HintAction::new("确认 (Y)", "Y\r"),
                HintAction::new("取消 (n)", "n\r"),
                HintAction::new("中断 (Ctrl+C)", "\u{3}"),
            ],
        }),
        InteractiveState::Interactive => Some(Hint {
            message: "检测到交互式程序（REPL）".to_owned(),
            actions: vec![
                HintAction::new("退出 (exit)", "exit\r"),
                HintAction::new("发送 Ctrl+D", "\u{4}"),
                HintAction::new("中断 (Ctrl+C)", "\u{3}"),
            ],
        }),
        InteractiveState::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pager_detection() {
        assert_eq!(detect_interactive_state("some text\n:"), InteractiveState::Pager);
        assert_eq!(
            detect_interactive_state("manual page\n(END)"),
            InteractiveState::Pager
        );
        assert_eq!(
            detect_interactive_state("file contents\n--More--(34%)"),
            InteractiveState::Pager
        );
        assert_eq!(
            detect_interactive_state("log\nlines 1-24"),
            InteractiveState::Pager
        );
    }

    #[test]
    fn test_confirm_detection() {
        assert_eq!(
            detect_interactive_state("After this operation, 5 MB used.\nDo you want to continue? [Y/n] "),
            InteractiveState::Confirm
        );
        assert_eq!(
            detect_interactive_state("[sudo] password for deploy: "),
            InteractiveState::Confirm
        );
        assert_eq!(
            detect_interactive_state("Are you sure you want to continue connecting (yes/no/[fingerprint])? "),
            InteractiveState::Confirm
        );
    }

    #[test]
    fn test_repl_detection() {
        assert_eq!(
            detect_interactive_state("Python 3.11.2\n>>> "),
            InteractiveState::Interactive
        );
        assert_eq!(detect_interactive_state("mysql> "), InteractiveState::Interactive);
        assert_eq!(detect_interactive_state("(gdb) "), InteractiveState::Interactive);
        assert_eq!(
            detect_interactive_state("irb(main):001:0> "),
            InteractiveState::Interactive
        );
    }

    #[test]
    fn test_pager_wins_over_repl() {
        // The last line decides; a stray REPL marker above does not.
        assert_eq!(
            detect_interactive_state(">>> output scrolled away\n(END)"),
            InteractiveState::Pager
        );
    }

    #[test]
    fn test_plain_output_is_none() {
        assert_eq!(
            detect_interactive_state("total 4\n-rw-r--r-- 1 root root 0 a.txt\n"),
            InteractiveState::None
        );
        assert_eq!(detect_interactive_state(""), InteractiveState::None);
    }

    #[test]
    fn test_prompt_pattern_matches_common_shapes() {
        let pattern = build_prompt_pattern("deploy").unwrap();
        assert!(pattern.is_match("deploy@web1:~$ "));
        assert!(pattern.is_match("deploy@web1:/var/log$"));
        assert!(pattern.is_match("[deploy@web1 ~]$ "));
        assert!(pattern.is_match("root@web1:/etc# "));
        assert!(!pattern.is_match("downloading... 42%"));
        assert!(!pattern.is_match("other@web1:~$ "));
    }

    #[test]
    fn test_prompt_pattern_escapes_username() {
        let pattern = build_prompt_pattern("we.ird+user").unwrap();
        assert!(pattern.is_match("we.ird+user@box:~$ "));
        assert!(!pattern.is_match("weXird+user@box:~$ "));
    }

    #[test]
    fn test_prompt_pattern_matches_mid_buffer_lines() {
        let pattern = build_prompt_pattern("deploy").unwrap();
        let buffer = "deploy@web1:~$ ls\nfile-a\nfile-b\ndeploy@web1:~$ ";
        assert!(pattern.is_match(&tail_lines(buffer, 5)));
    }

    #[test]
    fn test_hints_cover_all_blocked_states() {
        for state in [
            InteractiveState::Pager,
            InteractiveState::Confirm,
            InteractiveState::Interactive,
        ] {
            let hint = hint_for(state).unwrap();
            assert!(!hint.message.is_empty());
            assert_eq!(hint.actions.len(), 3);
        }
        assert!(hint_for(InteractiveState::None).is_none());
    }
}
