//! Discord-facing runtime for the Lyre relay: gateway event handling, slash
//! commands, trigger detection, and streamed reply editing.

mod discord_runtime;

pub use discord_runtime::{run_discord_relay, DiscordRelayConfig};
