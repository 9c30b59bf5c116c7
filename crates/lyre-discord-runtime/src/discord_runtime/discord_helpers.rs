//! Pure text helpers for the Discord surface.

use lyre_ai::LyreAiError;

/// Hard per-message character limit imposed by Discord.
pub(crate) const DISCORD_MESSAGE_LIMIT: usize = 2_000;

/// In-flight previews stay under the hard limit so the ellipsis and a late
/// burst of deltas still fit.
pub(crate) const STREAM_PREVIEW_MAX_CHARS: usize = 1_900;

pub(crate) const PENDING_REPLY_PLACEHOLDER: &str = "…";
pub(crate) const EMPTY_REPLY_PLACEHOLDER: &str = "(no response)";

const ERROR_DETAIL_MAX_CHARS: usize = 500;

/// Splits `content` into fixed-width chunks of at most `max_chars`
/// characters. Concatenating the chunks reproduces the input exactly.
pub(crate) fn split_into_chunks(content: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in content.chars() {
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Truncates `text` to `max_chars` characters, replacing the tail with an
/// ellipsis when anything was cut.
pub(crate) fn truncate_for_discord(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

/// Resolves the name an utterance is attributed to: guild nickname, then
/// global display name, then the plain username.
pub(crate) fn resolve_display_name(
    nick: Option<&str>,
    global_name: Option<&str>,
    username: &str,
) -> String {
    nick.or(global_name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(username)
        .to_string()
}

/// Returns the prompt text when `content` addresses the bot, either through
/// a configured prefix at the start or an @-mention anywhere. The trigger
/// itself is stripped. Prefix matches are case-insensitive and must sit on a
/// word boundary so a prefix never swallows the start of an ordinary word.
pub(crate) fn extract_triggered_prompt(
    content: &str,
    prefixes: &[String],
    bot_user_id: u64,
) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    for prefix in prefixes {
        if prefix.is_empty() {
            continue;
        }
        let Some(candidate) = trimmed.get(..prefix.len()) else {
            continue;
        };
        if !candidate.eq_ignore_ascii_case(prefix) {
            continue;
        }
        let rest = &trimmed[prefix.len()..];
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let prompt = rest.trim();
        if prompt.is_empty() {
            return None;
        }
        return Some(prompt.to_string());
    }

    if bot_user_id != 0 {
        let direct = format!("<@{bot_user_id}>");
        let nickname = format!("<@!{bot_user_id}>");
        if trimmed.contains(&direct) || trimmed.contains(&nickname) {
            let stripped = trimmed.replace(&direct, " ").replace(&nickname, " ");
            let prompt = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
            if !prompt.is_empty() {
                return Some(prompt);
            }
            return None;
        }
    }

    None
}

/// Renders a generation failure as a short user-visible reply.
pub(crate) fn render_user_facing_error(error: &LyreAiError) -> String {
    let detail = truncate_for_discord(&error.to_string(), ERROR_DETAIL_MAX_CHARS);
    format!("⚠️ {detail}")
}
