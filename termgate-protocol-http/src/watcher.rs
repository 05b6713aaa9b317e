use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::heuristics::{detect_interactive_state, tail_lines, InteractiveState};
use crate::messages::Detection;
use crate::session::TerminalSession;

pub(crate) const PROMPT_IDLE: Duration = Duration::from_secs(2);
pub(crate) const INTERACTIVE_IDLE: Duration = Duration::from_secs(3);
pub(crate) const FORCE_IDLE: Duration = Duration::from_secs(30);
pub(crate) const FORCE_TOTAL: Duration = Duration::from_secs(300);
pub(crate) const POLL: Duration = Duration::from_millis(900);
pub(crate) const WATCH_CAP: usize = 50_000;
pub(crate) const READ_CHUNK: usize = 4096;
pub(crate) const READ_DEADLINE: Duration = Duration::from_millis(500);

const PROMPT_TAIL_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchVerdict {
    Finished(Detection),
    Interactive(InteractiveState),
}

/// One watcher inspection over a snapshot of the watch state. Rules are
/// ordered; the first that fires wins:
///
/// 1. idle >= 2s, prompt redrawn in the last five lines, nothing interactive
///    on screen: the command finished normally.
/// 2. idle >= 3s with an interactive state on screen: notify, but only on the
///    first detection or a state change; keep watching.
/// 3. idle >= 30s or 300s of total output: force-finish.
/// 4. idle >= 30s with no output at all: finish with an empty result.
pub(crate) fn evaluate_watch(
    prompt_pattern: &Regex,
    buffer_empty: bool,
    clean: &str,
    idle: Duration,
    total: Duration,
    interactive_state: InteractiveState,
    interactive_notified: bool,
) -> Option<WatchVerdict> {
    if buffer_empty {
        if idle >= FORCE_IDLE {
            return Some(WatchVerdict::Finished(Detection::EmptyTimeout));
        }
        return None;
    }

    if idle >= PROMPT_IDLE
        && prompt_pattern.is_match(&tail_lines(clean, PROMPT_TAIL_LINES))
        && detect_interactive_state(clean) == InteractiveState::None
    {
        return Some(WatchVerdict::Finished(Detection::Prompt));
    }

    if idle >= INTERACTIVE_IDLE {
        let detected = detect_interactive_state(clean);
        if detected != InteractiveState::None {
            if !interactive_notified || detected != interactive_state {
                return Some(WatchVerdict::Interactive(detected));
            }
            // Still blocked on the same prompt; the user has been told.
            return None;
        }
    }

    if idle >= FORCE_IDLE {
        return Some(WatchVerdict::Finished(Detection::IdleTimeout));
    }
    if total >= FORCE_TOTAL {
        return Some(WatchVerdict::Finished(Detection::TotalTimeout));
    }

    None
}

/// Timer loop inspecting the watch state roughly once per second. Errors in
/// an inspection only affect that tick; the loop is stopped by task abort
/// during session teardown.
pub(crate) async fn run_watcher(session: Arc<TerminalSession>) {
    loop {
        tokio::time::sleep(POLL).await;
        session.inspect_watch().await;
    }
}
