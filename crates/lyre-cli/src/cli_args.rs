use clap::{ArgAction, Parser};

use lyre_core::{parse_bool_value, parse_f32_value, parse_u64_value, parse_usize_value};

fn parse_flag_bool(value: &str) -> Result<bool, String> {
    parse_bool_value(value)
        .ok_or_else(|| format!("expected true/false, yes/no, on/off, or 1/0, got '{value}'"))
}

fn parse_flag_u64(value: &str) -> Result<u64, String> {
    parse_u64_value(value).ok_or_else(|| format!("failed to parse integer from '{value}'"))
}

fn parse_flag_usize(value: &str) -> Result<usize, String> {
    parse_usize_value(value).ok_or_else(|| format!("failed to parse integer from '{value}'"))
}

fn parse_flag_f32(value: &str) -> Result<f32, String> {
    parse_f32_value(value).ok_or_else(|| format!("failed to parse number from '{value}'"))
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = parse_flag_u64(value)?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = parse_flag_usize(value)?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "lyre",
    about = "Discord relay bot backed by the Gemini API",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "LYRE_DISCORD_TOKEN",
        hide_env_values = true,
        help = "Discord bot token used for the gateway connection"
    )]
    pub(crate) discord_token: Option<String>,

    #[arg(
        long,
        env = "LYRE_GEMINI_API_KEYS",
        hide_env_values = true,
        help = "Comma-separated Gemini API keys, tried in order when quotas run out"
    )]
    pub(crate) gemini_api_keys: Option<String>,

    #[arg(
        long,
        env = "LYRE_MODEL",
        default_value = "gemini-2.5-flash",
        help = "Gemini model identifier used for replies and digest passes"
    )]
    pub(crate) model: String,

    #[arg(
        long,
        env = "LYRE_GOOGLE_API_BASE",
        default_value = "https://generativelanguage.googleapis.com/v1beta",
        help = "Base URL for the Gemini API"
    )]
    pub(crate) google_api_base: String,

    #[arg(
        long,
        env = "LYRE_REQUEST_TIMEOUT_MS",
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        help = "Per-request timeout for Gemini calls in milliseconds"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long,
        env = "LYRE_STREAMING",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = parse_flag_bool,
        help = "Stream replies and edit the placeholder message as text arrives"
    )]
    pub(crate) streaming: bool,

    #[arg(
        long,
        env = "LYRE_STREAM_EDIT_INTERVAL_MS",
        default_value_t = 750,
        value_parser = parse_positive_u64,
        help = "Minimum delay between streaming preview edits in milliseconds"
    )]
    pub(crate) stream_edit_interval_ms: u64,

    #[arg(
        long,
        env = "LYRE_TEMPERATURE",
        value_parser = parse_flag_f32,
        help = "Optional sampling temperature forwarded on generation requests"
    )]
    pub(crate) temperature: Option<f32>,

    #[arg(
        long,
        env = "LYRE_WEB_SEARCH_TOOL",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = parse_flag_bool,
        help = "Enable the Google Search grounding tool on generation requests"
    )]
    pub(crate) web_search_tool: bool,

    #[arg(
        long,
        env = "LYRE_URL_CONTEXT_TOOL",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = parse_flag_bool,
        help = "Enable the URL context tool on generation requests"
    )]
    pub(crate) url_context_tool: bool,

    #[arg(
        long,
        env = "LYRE_TRIGGER_PREFIXES",
        default_value = "!ai",
        help = "Comma-separated message prefixes that trigger a reply; @-mentions always trigger"
    )]
    pub(crate) trigger_prefixes: String,

    #[arg(
        long,
        env = "LYRE_PERSONA",
        default_value = "You are Lyre, a helpful and concise chat assistant.",
        help = "Persona line placed at the top of every system instruction"
    )]
    pub(crate) persona: String,

    #[arg(
        long,
        env = "LYRE_MAX_PRIVATE_TURNS",
        default_value_t = 12,
        value_parser = parse_positive_usize,
        help = "Per-user conversation turns kept verbatim before eviction"
    )]
    pub(crate) max_private_turns: usize,

    #[arg(
        long,
        env = "LYRE_MAX_SHARED_TURNS",
        default_value_t = 8,
        value_parser = parse_positive_usize,
        help = "Per-channel shared turns kept for ambient context"
    )]
    pub(crate) max_shared_turns: usize,

    #[arg(
        long,
        env = "LYRE_HISTORY_SEED_LIMIT",
        default_value_t = 20,
        value_parser = parse_flag_usize,
        help = "Recent channel messages fetched to seed shared context on first contact (0 disables seeding)"
    )]
    pub(crate) history_seed_limit: usize,

    #[arg(
        long,
        env = "LYRE_CACHE_TTL_SECONDS",
        default_value_t = 1_800,
        value_parser = parse_positive_u64,
        help = "Server-side TTL requested for cached digest content in seconds"
    )]
    pub(crate) cache_ttl_seconds: u64,

    #[arg(
        long,
        env = "LYRE_MIN_CACHE_TOKENS",
        default_value_t = 1_024,
        value_parser = parse_flag_usize,
        help = "Digest token estimate below which no cached content is created"
    )]
    pub(crate) min_cache_tokens: usize,

    #[arg(
        long,
        env = "LYRE_KEY_COOLDOWN_MS",
        default_value_t = 60_000,
        value_parser = parse_flag_u64,
        help = "How long a quota-exhausted API key stays out of rotation in milliseconds"
    )]
    pub(crate) key_cooldown_ms: u64,
}
