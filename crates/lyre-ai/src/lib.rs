//! Gemini wire client and shared chat types for the Lyre relay.
mod google;
mod types;

pub use google::{GeminiClient, GeminiConfig};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, LyreAiError, Message, MessageRole,
    RequestTools, StreamDeltaHandler,
};
