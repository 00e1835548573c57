//! Colored CLI display utilities for Codex events.
//!
//! Used by `codex-bridge exec --pretty` to render the event stream for a
//! human instead of as raw JSON lines.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::exec::{Event, EventMsg, ExecError};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 80;

/// Truncate a string to a maximum number of characters, adding ellipsis if
/// truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let head: String = s.chars().take(max_len - 3).collect();
    format!("{head}...")
}

/// Render one event as a colored line, or `None` for events not worth showing.
#[must_use]
pub fn format_event(event: &Event, raw_mode: bool) -> Option<String> {
    let Ok(msg) = event.typed() else {
        return Some(format!(
            "{} {}",
            "[EVENT]".dimmed(),
            event.msg_type().unwrap_or("?")
        ));
    };

    let line = match msg {
        EventMsg::SessionConfigured { session_id, model } => format!(
            "{} model={}, session={}",
            "[SESSION]".blue().bold(),
            model.cyan(),
            truncate(&session_id, 20, raw_mode).dimmed()
        ),
        EventMsg::TaskStarted => format!("{} Task started", "[TASK]".blue().bold()),
        EventMsg::TaskComplete { last_agent_message } => format!(
            "{} Task complete {}",
            "[TASK]".green().bold(),
            last_agent_message
                .map(|m| truncate(&m, DEFAULT_MAX_LEN, raw_mode))
                .unwrap_or_default()
                .dimmed()
        ),
        EventMsg::AgentMessage { message } => {
            format!("{} {}", "[AGENT]".magenta().bold(), message)
        }
        EventMsg::AgentReasoning { text } => format!(
            "{} {}",
            "[THINK]".dimmed(),
            truncate(&text, 200, raw_mode).dimmed()
        ),
        EventMsg::ExecCommandBegin { command, .. } => format!(
            "{} {}",
            "[EXEC]".cyan().bold(),
            truncate(&command.join(" "), DEFAULT_MAX_LEN, raw_mode).bold()
        ),
        EventMsg::ExecCommandEnd { exit_code: 0, .. } => {
            format!("{} exit=0", "[EXEC]".green())
        }
        EventMsg::ExecCommandEnd {
            exit_code, stderr, ..
        } => format!(
            "{} exit={} {}",
            "[EXEC]".red(),
            exit_code,
            truncate(stderr.trim(), DEFAULT_MAX_LEN, raw_mode).red()
        ),
        EventMsg::ExecCommandOutputDelta { .. }
        | EventMsg::AgentMessageDelta { .. }
        | EventMsg::AgentReasoningDelta { .. }
        | EventMsg::Unknown => return None,
        EventMsg::ExecApprovalRequest { command, .. } => format!(
            "{} approve command? {}",
            "[APPROVAL]".yellow().bold(),
            truncate(&command.join(" "), DEFAULT_MAX_LEN, raw_mode)
        ),
        EventMsg::ApplyPatchApprovalRequest { reason, .. } => format!(
            "{} approve patch? {}",
            "[APPROVAL]".yellow().bold(),
            reason.unwrap_or_default()
        ),
        EventMsg::PatchApplyBegin { auto_approved, .. } => format!(
            "{} Applying patch (auto_approved={auto_approved})",
            "[PATCH]".cyan().bold()
        ),
        EventMsg::PatchApplyEnd { success: true, .. } => {
            format!("{} Patch applied", "[PATCH]".green())
        }
        EventMsg::PatchApplyEnd { stderr, .. } => format!(
            "{} Patch failed {}",
            "[PATCH]".red(),
            truncate(stderr.trim(), DEFAULT_MAX_LEN, raw_mode).red()
        ),
        EventMsg::TokenCount(usage) => format!(
            "{} in={} out={} total={}",
            "[TOKENS]".dimmed(),
            usage.input_tokens,
            usage.output_tokens,
            usage.total_tokens
        ),
        EventMsg::BackgroundEvent { message } => {
            format!("{} {}", "[INFO]".dimmed(), message.dimmed())
        }
        EventMsg::Error { message } => format!("{} {}", "[ERROR]".red().bold(), message.red()),
    };
    Some(line)
}

/// Print one event if it is worth showing.
pub fn print_event(event: &Event, raw_mode: bool) {
    if let Some(line) = format_event(event, raw_mode) {
        println!("{} {}", timestamp().dimmed(), line);
        let _ = io::stdout().flush();
    }
}

/// Print how the run ended.
pub fn print_run_end(result: &Result<(), ExecError>) {
    let ts = timestamp();
    match result {
        Ok(()) => eprintln!("{} {} Run completed", ts.dimmed(), "[RUN]".blue().bold()),
        Err(err) if err.is_cancelled() => {
            eprintln!("{} {} Run cancelled", ts.dimmed(), "[RUN]".yellow().bold());
        }
        Err(err) => eprintln!("{} {} {}", ts.dimmed(), "[RUN]".red().bold(), err.red()),
    }
}
