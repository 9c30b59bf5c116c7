//! Pure flush decisions for in-flight streamed replies.

use super::discord_helpers::{truncate_for_discord, STREAM_PREVIEW_MAX_CHARS};

/// Decides when the in-flight reply should be edited while deltas stream in.
/// Pure over `(now, accumulated text)` so the throttle is testable with
/// synthetic fragments and a fake clock.
pub(crate) struct StreamFlushPolicy {
    min_interval_ms: u64,
    last_flush_unix_ms: u64,
    last_rendered: String,
}

impl StreamFlushPolicy {
    pub(crate) fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_flush_unix_ms: 0,
            last_rendered: String::new(),
        }
    }

    /// Returns the display text to flush, or `None` when the edit should be
    /// suppressed: empty accumulations, unchanged previews, and anything
    /// inside the throttle window.
    pub(crate) fn observe(&mut self, now_unix_ms: u64, accumulated: &str) -> Option<String> {
        if accumulated.trim().is_empty() {
            return None;
        }
        if now_unix_ms.saturating_sub(self.last_flush_unix_ms) < self.min_interval_ms {
            return None;
        }
        let rendered = truncate_for_discord(accumulated, STREAM_PREVIEW_MAX_CHARS);
        if rendered == self.last_rendered {
            return None;
        }
        self.last_flush_unix_ms = now_unix_ms;
        self.last_rendered = rendered.clone();
        Some(rendered)
    }
}
