//! Window compaction: renders the rolling windows into a digest request and
//! folds the model's answer back into the store.

use lyre_ai::{ChatRequest, LlmClient, Message};
use lyre_core::ESTIMATED_CHARS_PER_TOKEN;
use tracing::{debug, warn};

use crate::memory::{MemoryPolicy, PrivateTurn, SessionKey, SessionStore, SharedTurn, TurnRole};

/// Public struct `SummarizerConfig` used across Lyre components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizerConfig {
    /// Estimated combined token count above which a digest pass runs even
    /// before the private window fills up.
    pub trigger_token_estimate: usize,
    /// How much private transcript tail feeds the digest request.
    pub private_source_chars: usize,
    /// How much shared transcript tail feeds the digest request.
    pub shared_source_chars: usize,
    /// Hard cap applied to the stored digest.
    pub summary_max_chars: usize,
    /// Private turns kept verbatim after a successful digest pass.
    pub keep_recent_turns: usize,
}

pub const DEFAULT_TRIGGER_TOKEN_ESTIMATE: usize = 6_000;
pub const DEFAULT_PRIVATE_SOURCE_CHARS: usize = 8_000;
pub const DEFAULT_SHARED_SOURCE_CHARS: usize = 4_000;
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 4_000;
pub const DEFAULT_KEEP_RECENT_TURNS: usize = 4;

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            trigger_token_estimate: DEFAULT_TRIGGER_TOKEN_ESTIMATE,
            private_source_chars: DEFAULT_PRIVATE_SOURCE_CHARS,
            shared_source_chars: DEFAULT_SHARED_SOURCE_CHARS,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            keep_recent_turns: DEFAULT_KEEP_RECENT_TURNS,
        }
    }
}

/// Returns `true` when the session has grown enough to warrant a digest pass,
/// either because the private window hit its turn cap or because the combined
/// transcript text exceeds the token-estimate trigger.
pub fn summary_due(
    private_turn_count: usize,
    private_text: &str,
    shared_text: &str,
    max_private_turns: usize,
    trigger_token_estimate: usize,
) -> bool {
    if private_turn_count >= max_private_turns.max(1) {
        return true;
    }
    let total_chars = private_text.chars().count() + shared_text.chars().count();
    total_chars.div_ceil(ESTIMATED_CHARS_PER_TOKEN) > trigger_token_estimate
}

fn render_private_transcript(turns: &[PrivateTurn]) -> String {
    let mut rendered = String::new();
    for turn in turns {
        let label = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        rendered.push_str(label);
        rendered.push_str(": ");
        rendered.push_str(&turn.text);
        rendered.push('\n');
    }
    rendered
}

fn render_shared_transcript(turns: &[SharedTurn]) -> String {
    let mut rendered = String::new();
    for turn in turns {
        rendered.push('[');
        rendered.push_str(&turn.speaker);
        rendered.push_str("]: ");
        rendered.push_str(&turn.text);
        rendered.push('\n');
    }
    rendered
}

/// Returns the last `max_chars` characters of `text`, always cutting on a
/// character boundary.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((byte_index, _)) => &text[byte_index..],
        None => text,
    }
}

/// Returns the first `max_chars` characters of `text`, always cutting on a
/// character boundary.
fn head_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn build_summary_request(
    model: &str,
    previous_summary: Option<&str>,
    private_text: &str,
    shared_text: &str,
) -> ChatRequest {
    let mut prompt = String::from("Condense the conversation state below into an updated digest.\n");
    prompt.push_str("\nPrevious digest:\n");
    prompt.push_str(previous_summary.unwrap_or("(none)"));
    prompt.push_str("\n\nRecent direct conversation:\n");
    prompt.push_str(if private_text.is_empty() {
        "(none)\n"
    } else {
        private_text
    });
    prompt.push_str("\nRecent channel activity:\n");
    prompt.push_str(if shared_text.is_empty() {
        "(none)\n"
    } else {
        shared_text
    });

    let mut request = ChatRequest::new(model, vec![Message::user(prompt)]);
    request.system_instruction = Some(
        "You maintain a running digest of a chat conversation. Reply with a \
         bulleted digest of at most 12 lines. Attribute points to their \
         speakers and keep only details worth carrying forward. Fold the \
         previous digest into the new one instead of repeating it."
            .to_string(),
    );
    request
}

/// Runs one digest pass when the session's windows warrant it.
///
/// Returns `true` when a fresh digest was stored and the private window
/// truncated. Failures are logged and leave the session untouched so the
/// exchange that triggered the pass can still proceed on the full window.
pub async fn maybe_summarize(
    client: &dyn LlmClient,
    store: &dyn SessionStore,
    key: &SessionKey,
    model: &str,
    policy: &MemoryPolicy,
    config: &SummarizerConfig,
) -> bool {
    let private = store.private_window(key);
    let shared = store.shared_window(&key.channel_id);
    let private_text = render_private_transcript(&private);
    let shared_text = render_shared_transcript(&shared);
    if !summary_due(
        private.len(),
        &private_text,
        &shared_text,
        policy.max_private_turns,
        config.trigger_token_estimate,
    ) {
        return false;
    }

    let previous = store.summary(key);
    let request = build_summary_request(
        model,
        previous.as_deref(),
        tail_chars(&private_text, config.private_source_chars),
        tail_chars(&shared_text, config.shared_source_chars),
    );
    match client.complete(request).await {
        Ok(response) => {
            let digest = head_chars(response.text.trim(), config.summary_max_chars).to_string();
            if digest.is_empty() {
                debug!(
                    channel = key.channel_id.as_str(),
                    user = key.user_id.as_str(),
                    "summarizer returned an empty digest, keeping the full window"
                );
                return false;
            }
            store.set_summary(key, digest);
            store.truncate_private(key, config.keep_recent_turns);
            debug!(
                channel = key.channel_id.as_str(),
                user = key.user_id.as_str(),
                kept_turns = config.keep_recent_turns,
                "session digest refreshed"
            );
            true
        }
        Err(error) => {
            warn!(
                channel = key.channel_id.as_str(),
                user = key.user_id.as_str(),
                error = %error,
                "summarization failed, continuing with the full window"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySessionStore;
    use async_trait::async_trait;
    use lyre_ai::{ChatResponse, ChatUsage, LyreAiError};
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<Result<ChatResponse, LyreAiError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<ChatResponse, LyreAiError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn replying(text: &str) -> Self {
            Self::new(vec![Ok(ChatResponse {
               text: text.to_string(),
               finish_reason: Some("STOP".to_string()),
               usage: ChatUsage::default(),
            })])
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LyreAiError> {
            self.requests.lock().expect("request log poisoned").push(request);
            self.responses
                .lock()
                .expect("script poisoned")
                .remove(0)
        }
    }

    fn key() -> SessionKey {
        SessionKey::new("chan-1", "user-1")
    }

    fn fill_private(store: &InMemorySessionStore, turns: usize) {
        for index in 0..turns {
            store.record_private_turn(&key(), PrivateTurn::user(format!("message {index}")));
        }
    }

    #[test]
    fn summary_due_fires_when_private_window_is_full() {
        assert!(summary_due(12, "", "", 12, 6_000));
        assert!(!summary_due(11, "", "", 12, 6_000));
    }

    #[test]
    fn summary_due_fires_on_token_estimate_overflow() {
        let private = "x".repeat(20_000);
        let shared = "y".repeat(4_001);
        // 24_001 chars estimate to 6_001 tokens, one over the trigger.
        assert!(summary_due(1, &private, &shared, 12, 6_000));
        let shared = "y".repeat(4_000);
        assert!(!summary_due(1, &private, &shared, 12, 6_000));
    }

    #[test]
    fn unit_tail_chars_cuts_on_character_boundaries() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("abc", 5), "abc");
        assert_eq!(tail_chars("héllo", 4), "éllo");
        assert_eq!(tail_chars("", 4), "");
    }

    #[test]
    fn unit_head_chars_cuts_on_character_boundaries() {
        assert_eq!(head_chars("abcdef", 3), "abc");
        assert_eq!(head_chars("abc", 5), "abc");
        assert_eq!(head_chars("héllo", 2), "hé");
    }

    #[test]
    fn summary_request_folds_previous_digest_and_transcripts() {
        let request = build_summary_request(
            "gemini-2.5-flash",
            Some("- old point"),
            "User: hi\n",
            "[alice]: hello\n",
        );

        assert_eq!(request.model, "gemini-2.5-flash");
        assert_eq!(request.messages.len(), 1);
        let prompt = &request.messages[0].text;
        assert!(prompt.contains("- old point"));
        assert!(prompt.contains("User: hi"));
        assert!(prompt.contains("[alice]: hello"));
        assert!(request
            .system_instruction
            .as_deref()
            .is_some_and(|instruction| instruction.contains("12 lines")));
    }

    #[tokio::test]
    async fn functional_digest_pass_stores_summary_and_truncates_window() {
        let store = InMemorySessionStore::default();
        fill_private(&store, 12);
        let client = ScriptedClient::replying("- user asked twelve things");

        let summarized = maybe_summarize(
            &client,
            &store,
            &key(),
            "gemini-2.5-flash",
            &MemoryPolicy::default(),
            &SummarizerConfig::default(),
        )
        .await;

        assert!(summarized);
        assert_eq!(
            store.summary(&key()).as_deref(),
            Some("- user asked twelve things")
        );
        let window = store.private_window(&key());
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].text, "message 8");
    }

    #[tokio::test]
    async fn functional_digest_pass_skips_short_sessions_without_a_call() {
        let store = InMemorySessionStore::default();
        fill_private(&store, 3);
        let client = ScriptedClient::new(Vec::new());

        let summarized = maybe_summarize(
            &client,
            &store,
            &key(),
            "gemini-2.5-flash",
            &MemoryPolicy::default(),
            &SummarizerConfig::default(),
        )
        .await;

        assert!(!summarized);
        assert!(client.requests.lock().expect("request log poisoned").is_empty());
        assert_eq!(store.private_window(&key()).len(), 3);
    }

    #[tokio::test]
    async fn regression_digest_failure_leaves_window_untouched() {
        let store = InMemorySessionStore::default();
        fill_private(&store, 12);
        store.set_summary(&key(), "previous digest".to_string());
        let client = ScriptedClient::new(vec![Err(LyreAiError::InvalidResponse(
            "response contained no candidates".to_string(),
        ))]);

        let summarized = maybe_summarize(
            &client,
            &store,
            &key(),
            "gemini-2.5-flash",
            &MemoryPolicy::default(),
            &SummarizerConfig::default(),
        )
        .await;

        assert!(!summarized);
        assert_eq!(store.summary(&key()).as_deref(), Some("previous digest"));
        assert_eq!(store.private_window(&key()).len(), 12);
    }

    #[tokio::test]
    async fn regression_oversized_digest_is_capped_before_storage() {
        let store = InMemorySessionStore::default();
        fill_private(&store, 12);
        let client = ScriptedClient::replying(&"d".repeat(5_000));

        let summarized = maybe_summarize(
            &client,
            &store,
            &key(),
            "gemini-2.5-flash",
            &MemoryPolicy::default(),
            &SummarizerConfig::default(),
        )
        .await;

        assert!(summarized);
        let stored = store.summary(&key()).unwrap_or_default();
        assert_eq!(stored.chars().count(), 4_000);
    }

    #[tokio::test]
    async fn regression_empty_digest_reply_is_discarded() {
        let store = InMemorySessionStore::default();
        fill_private(&store, 12);
        let client = ScriptedClient::replying("   ");

        let summarized = maybe_summarize(
            &client,
            &store,
            &key(),
            "gemini-2.5-flash",
            &MemoryPolicy::default(),
            &SummarizerConfig::default(),
        )
        .await;

        assert!(!summarized);
        assert!(store.summary(&key()).is_none());
        assert_eq!(store.private_window(&key()).len(), 12);
    }
}
