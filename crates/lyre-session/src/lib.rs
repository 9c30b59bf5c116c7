//! Short-lived conversational memory for the Lyre relay.
//!
//! Rolling per-caller and per-channel windows, the digest pass that compacts
//! them, cached-content bookkeeping, and bounded request assembly all live
//! here behind the `SessionStore` seam.

mod memory;
mod prompt;
mod prompt_cache;
mod summarizer;

pub use memory::{
    CacheHandle, InMemorySessionStore, MemoryPolicy, PrivateTurn, SessionKey, SessionStore,
    SharedTurn, TurnRole,
};
pub use prompt::{assemble_chat_request, PromptSettings};
pub use prompt_cache::{ensure_cache, CachePolicy};
pub use summarizer::{maybe_summarize, summary_due, SummarizerConfig};
