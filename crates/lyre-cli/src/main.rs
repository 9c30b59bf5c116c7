//! Binary entry point wiring configuration flags into the Discord relay.

mod cli_args;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use lyre_ai::RequestTools;
use lyre_core::parse_string_list;
use lyre_discord_runtime::{run_discord_relay, DiscordRelayConfig};
use lyre_provider::{build_gemini_key_pool, parse_api_key_list, KeyPoolConfig};
use lyre_session::{CachePolicy, InMemorySessionStore, MemoryPolicy, SummarizerConfig};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_relay(cli).await
}

async fn run_relay(cli: Cli) -> Result<()> {
    let discord_token = require_configured_value(
        cli.discord_token.as_deref(),
        "Discord bot token (--discord-token or LYRE_DISCORD_TOKEN)",
    )?;
    let raw_keys = require_configured_value(
        cli.gemini_api_keys.as_deref(),
        "Gemini API keys (--gemini-api-keys or LYRE_GEMINI_API_KEYS)",
    )?;
    let credentials = parse_api_key_list(&raw_keys);
    if credentials.is_empty() {
        bail!("Gemini API key list contains no usable entries");
    }

    let pool = build_gemini_key_pool(
        &credentials,
        &cli.google_api_base,
        cli.request_timeout_ms,
        KeyPoolConfig {
            cooldown_ms: cli.key_cooldown_ms,
        },
    )?;

    let memory_policy = MemoryPolicy {
        max_private_turns: cli.max_private_turns,
        max_shared_turns: cli.max_shared_turns,
    };
    let config = DiscordRelayConfig {
        discord_token,
        pool: Arc::new(pool),
        store: Arc::new(InMemorySessionStore::new(memory_policy)),
        model: cli.model.clone(),
        persona: cli.persona.clone(),
        streaming: cli.streaming,
        stream_edit_interval_ms: cli.stream_edit_interval_ms,
        temperature: cli.temperature,
        tools: RequestTools {
            web_search: cli.web_search_tool,
            url_context: cli.url_context_tool,
        },
        trigger_prefixes: parse_string_list(&cli.trigger_prefixes),
        history_seed_limit: cli.history_seed_limit,
        memory_policy,
        summarizer: SummarizerConfig::default(),
        cache_policy: CachePolicy {
            ttl_seconds: cli.cache_ttl_seconds,
            min_summary_tokens: cli.min_cache_tokens,
        },
    };

    info!(
        model = %cli.model,
        keys = credentials.len(),
        streaming = cli.streaming,
        "starting discord relay"
    );

    tokio::select! {
        result = run_discord_relay(config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, closing gateway connection");
            Ok(())
        }
    }
}

fn require_configured_value(value: Option<&str>, hint: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(configured) if !configured.is_empty() => Ok(configured.to_string()),
        _ => bail!("missing {hint}"),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::require_configured_value;

    #[test]
    fn unit_require_configured_value_returns_trimmed_content() {
        let value = require_configured_value(Some("  token-123  "), "Discord bot token")
            .expect("non-empty value should pass");
        assert_eq!(value, "token-123");
    }

    #[test]
    fn regression_require_configured_value_rejects_blank_content() {
        let error = require_configured_value(Some(" \n\t"), "Discord bot token (--discord-token)")
            .expect_err("blank value should be rejected");
        assert!(error.to_string().contains("--discord-token"));
    }

    #[test]
    fn regression_require_configured_value_rejects_missing_content() {
        let error = require_configured_value(None, "Gemini API keys")
            .expect_err("missing value should be rejected");
        assert!(error.to_string().contains("missing Gemini API keys"));
    }
}
