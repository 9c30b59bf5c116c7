//! API credential parsing and pool construction.
//!
//! Keys arrive as one comma-separated env value; order is preserved because
//! it is the rotation order. Labels identify keys in logs without leaking
//! the key material itself.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use lyre_ai::{GeminiClient, GeminiConfig};
use lyre_core::parse_string_list;

use crate::pool::{GeminiKeyPool, KeyPoolConfig, PooledKeyClient};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ProviderCredential` used across Lyre components.
pub struct ProviderCredential {
    pub label: String,
    pub api_key: String,
}

/// Parses an ordered credential list from a raw comma-separated flag value.
pub fn parse_api_key_list(raw: &str) -> Vec<ProviderCredential> {
    parse_string_list(raw)
        .into_iter()
        .enumerate()
        .map(|(index, api_key)| ProviderCredential {
            label: format!("key-{}", index + 1),
            api_key,
        })
        .collect()
}

/// Builds the failover pool from parsed credentials.
pub fn build_gemini_key_pool(
    credentials: &[ProviderCredential],
    api_base: &str,
    request_timeout_ms: u64,
    pool_config: KeyPoolConfig,
) -> Result<GeminiKeyPool> {
    if credentials.is_empty() {
        bail!("no Gemini API keys configured");
    }

    let mut keys = Vec::with_capacity(credentials.len());
    for credential in credentials {
        let client = GeminiClient::new(GeminiConfig {
            api_base: api_base.to_string(),
            api_key: credential.api_key.clone(),
            request_timeout_ms,
        })
        .with_context(|| format!("failed to create Gemini client for {}", credential.label))?;
        keys.push(PooledKeyClient {
            label: credential.label.clone(),
            client: Arc::new(client),
        });
    }

    Ok(GeminiKeyPool::new(keys, pool_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordered_labeled_credentials() {
        let credentials = parse_api_key_list("alpha, beta ,gamma");
        assert_eq!(credentials.len(), 3);
        assert_eq!(credentials[0].label, "key-1");
        assert_eq!(credentials[0].api_key, "alpha");
        assert_eq!(credentials[2].label, "key-3");
        assert_eq!(credentials[2].api_key, "gamma");
    }

    #[test]
    fn unit_skips_empty_entries_and_cleans_quotes() {
        let credentials = parse_api_key_list("\"alpha\",, 'beta' ");
        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials[0].api_key, "alpha");
        assert_eq!(credentials[1].api_key, "beta");
    }

    #[test]
    fn build_pool_rejects_empty_credential_list() {
        let error = build_gemini_key_pool(&[], "http://127.0.0.1:0", 1_000, KeyPoolConfig::default())
            .expect_err("empty credentials must fail");
        assert!(error.to_string().contains("no Gemini API keys"));
    }

    #[test]
    fn build_pool_creates_one_client_per_credential() {
        let credentials = parse_api_key_list("alpha,beta");
        let pool = build_gemini_key_pool(
            &credentials,
            "http://127.0.0.1:0",
            1_000,
            KeyPoolConfig::default(),
        )
        .expect("pool should build");
        assert_eq!(pool.key_count(), 2);
    }
}
