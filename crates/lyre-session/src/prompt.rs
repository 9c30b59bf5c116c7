//! Bounded request assembly from session state.

use lyre_ai::{ChatRequest, Message, RequestTools};

use crate::memory::{SessionKey, SessionStore, TurnRole};

/// Public struct `PromptSettings` used across Lyre components.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub model: String,
    pub persona: String,
    pub tools: RequestTools,
    pub temperature: Option<f32>,
}

/// Builds the generation request for one exchange.
///
/// The caller's private window becomes the conversation contents; the latest
/// user turn must already be recorded so it arrives as the final message. The
/// digest and the shared-channel recap ride in the system instruction only
/// when no cached-content handle is attached, since a fresh handle already
/// carries the digest server-side.
pub fn assemble_chat_request(
    store: &dyn SessionStore,
    key: &SessionKey,
    speaker_display_name: &str,
    cached_content: Option<String>,
    settings: &PromptSettings,
) -> ChatRequest {
    let mut instruction = settings.persona.clone();
    if !instruction.is_empty() {
        instruction.push('\n');
    }
    instruction.push_str(&format!(
        "You are replying to {speaker_display_name} in a group chat."
    ));

    if cached_content.is_none() {
        if let Some(summary) = store.summary(key) {
            instruction.push_str("\n\nConversation digest so far:\n");
            instruction.push_str(&summary);
        }
        let shared = store.shared_window(&key.channel_id);
        if !shared.is_empty() {
            instruction.push_str("\n\nRecent channel activity:\n");
            for turn in &shared {
                instruction.push('[');
                instruction.push_str(&turn.speaker);
                instruction.push_str("]: ");
                instruction.push_str(&turn.text);
                instruction.push('\n');
            }
        }
    }

    let messages = store
        .private_window(key)
        .into_iter()
        .map(|turn| match turn.role {
            TurnRole::User => Message::user(turn.text),
            TurnRole::Assistant => Message::assistant(turn.text),
        })
        .collect();

    let mut request = ChatRequest::new(settings.model.clone(), messages);
    request.system_instruction = Some(instruction);
    request.cached_content = cached_content;
    request.tools = settings.tools;
    request.temperature = settings.temperature;
    request
}
