//! Render a message window as a transcript for evaluation.

use std::collections::HashSet;

use chrono::Duration;

use crate::types::{ChatMessage, Platform, Transcript};

pub const EMPTY_TRANSCRIPT: &str = "No messages found.";

/// Maximum gap between two messages of the same active period.
pub const ACTIVE_PERIOD_GAP_MINUTES: i64 = 5;

fn channel_label(message: &ChatMessage, platform: Platform) -> String {
    match platform {
        Platform::Discord => match message.content.discord_location() {
            Some((_, channel)) => format!("#{}", channel),
            None => format!(
                "#{}",
                message.content.channel_id.as_deref().unwrap_or("unknown")
            ),
        },
        Platform::Telegram => message
            .content
            .thread_id
            .clone()
            .unwrap_or_else(|| "Unknown Channel".to_string()),
    }
}

/// One line per message: `[createdAt] platform/channel username: text`.
pub fn render_line(message: &ChatMessage, platform: Platform) -> String {
    format!(
        "[{}] {}/{} {}: {}",
        message.created_at.to_rfc3339(),
        platform,
        channel_label(message, platform),
        message.display_name(),
        message.content.text
    )
}

/// Runs of at least two messages with gaps of at most five minutes.
pub fn active_periods(messages: &[ChatMessage]) -> usize {
    let mut times: Vec<_> = messages.iter().map(|m| m.created_at).collect();
    times.sort_unstable();

    let gap = Duration::minutes(ACTIVE_PERIOD_GAP_MINUTES);
    let mut periods = 0;
    let mut run = 0;
    let mut last = None;
    for at in times {
        match last {
            Some(prev) if at - prev <= gap => run += 1,
            _ => {
                if run > 1 {
                    periods += 1;
                }
                run = 1;
            }
        }
        last = Some(at);
    }
    if run > 1 {
        periods += 1;
    }
    periods
}

/// Build the transcript and activity counts for a window.
pub fn build(messages: &[ChatMessage], platform: Platform) -> Transcript {
    if messages.is_empty() {
        return Transcript {
            transcript: EMPTY_TRANSCRIPT.to_string(),
            ..Default::default()
        };
    }

    let transcript = messages
        .iter()
        .map(|m| render_line(m, platform))
        .collect::<Vec<_>>()
        .join("\n");
    let users: HashSet<&str> = messages.iter().map(|m| m.user_id.as_str()).collect();

    Transcript {
        transcript,
        message_count: messages.len(),
        unique_user_count: users.len(),
        active_periods_count: active_periods(messages),
    }
}
