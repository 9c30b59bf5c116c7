//! Provider-side prompt caching for session digests.
//!
//! Large digests are parked in Gemini cached content so repeat exchanges can
//! reference them by resource name instead of resending the text. The cached
//! contents endpoint has shipped two request shapes; both are tried in order
//! and every failure here is non-fatal.

use lyre_core::{current_unix_timestamp_ms, rough_token_estimate};
use lyre_provider::GeminiKeyPool;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::memory::{CacheHandle, SessionKey, SessionStore};

/// Public struct `CachePolicy` used across Lyre components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Server-side TTL requested for cached content; the local freshness
    /// window uses the same value.
    pub ttl_seconds: u64,
    /// Digests estimated below this token floor are never cached.
    pub min_summary_tokens: usize,
}

pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 1_800;
pub const DEFAULT_MIN_CACHE_TOKENS: usize = 1_024;

impl CachePolicy {
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_seconds.saturating_mul(1_000)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            min_summary_tokens: DEFAULT_MIN_CACHE_TOKENS,
        }
    }
}

type CacheBodyBuilder = fn(&str, &str, u64) -> Value;

/// Request shapes in preference order; the nested `config` form is current,
/// the flat `ttlSeconds` form is the one older deployments accept.
const CACHE_BODY_SHAPES: &[(&str, CacheBodyBuilder)] = &[
    ("nested-config", build_nested_config_body),
    ("flat-ttl", build_flat_ttl_body),
];

fn build_nested_config_body(model: &str, summary: &str, ttl_seconds: u64) -> Value {
    json!({
        "model": format!("models/{model}"),
        "config": {
            "contents": [{ "role": "user", "parts": [{ "text": summary }] }],
            "ttl": format!("{ttl_seconds}s"),
        },
    })
}

fn build_flat_ttl_body(model: &str, summary: &str, ttl_seconds: u64) -> Value {
    json!({
        "model": format!("models/{model}"),
        "contents": [{ "role": "user", "parts": [{ "text": summary }] }],
        "ttlSeconds": ttl_seconds,
    })
}

/// Ensures a usable cached-content handle for the session, creating one when
/// the stored digest is large enough and no fresh handle exists.
///
/// Returns the resource name to attach to the next generation request, or
/// `None` when the session should proceed uncached. Never fails the exchange.
pub async fn ensure_cache(
    pool: &GeminiKeyPool,
    store: &dyn SessionStore,
    key: &SessionKey,
    model: &str,
    policy: &CachePolicy,
) -> Option<String> {
    let now_unix_ms = current_unix_timestamp_ms();
    if let Some(handle) = store.cache_handle(key) {
        if handle.is_fresh(now_unix_ms, policy.ttl_ms()) {
            return Some(handle.name);
        }
        store.clear_cache_handle(key);
    }

    let summary = store.summary(key)?;
    let estimated_tokens = rough_token_estimate(&summary);
    if estimated_tokens < policy.min_summary_tokens {
        debug!(
            channel = key.channel_id.as_str(),
            user = key.user_id.as_str(),
            estimated_tokens,
            floor = policy.min_summary_tokens,
            "digest below cache floor, sending inline"
        );
        return None;
    }

    let mut last_error = None;
    for (shape, builder) in CACHE_BODY_SHAPES {
        let body = builder(model, &summary, policy.ttl_seconds);
        let created = pool
            .call(|client| {
                let body = body.clone();
                async move { client.create_cached_content(&body).await }
            })
            .await;
        match created {
            Ok(name) => {
                store.set_cache_handle(key, CacheHandle::new(name.clone(), now_unix_ms));
                debug!(
                    channel = key.channel_id.as_str(),
                    user = key.user_id.as_str(),
                    shape,
                    "cached content created"
                );
                return Some(name);
            }
            Err(error) => {
                debug!(shape, error = %error, "cached content request shape rejected");
                last_error = Some(error);
            }
        }
    }

    if let Some(error) = last_error {
        warn!(
            channel = key.channel_id.as_str(),
            user = key.user_id.as_str(),
            error = %error,
            "cached content creation failed, sending digest inline"
        );
    }
    None
}
