use httpmock::prelude::*;
use serde_json::json;

use lyre_ai::{LlmClient, LyreAiError};
use lyre_provider::{build_gemini_key_pool, parse_api_key_list, GeminiKeyPool, KeyPoolConfig};
use lyre_session::{
    assemble_chat_request, ensure_cache, maybe_summarize, CachePolicy, InMemorySessionStore,
    MemoryPolicy, PrivateTurn, PromptSettings, SessionKey, SessionStore, SharedTurn,
    SummarizerConfig, TurnRole,
};

const BOT_DISPLAY_NAME: &str = "Lyre";
const MODEL: &str = "gemini-2.5-flash";
const GENERATE_PATH: &str = "/models/gemini-2.5-flash:generateContent";

fn pool_for(server: &MockServer, raw_keys: &str) -> GeminiKeyPool {
    let credentials = parse_api_key_list(raw_keys);
    build_gemini_key_pool(
        &credentials,
        &server.base_url(),
        2_000,
        KeyPoolConfig::default(),
    )
    .expect("pool should build from test credentials")
}

fn reply_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }],
        "usageMetadata": {
            "promptTokenCount": 20,
            "candidatesTokenCount": 10,
            "totalTokenCount": 30
        }
    })
}

fn quota_body() -> serde_json::Value {
    json!({
        "error": {
            "code": 429,
            "status": "RESOURCE_EXHAUSTED",
            "message": "Quota exceeded for quota metric"
        }
    })
}

fn prompt_settings() -> PromptSettings {
    PromptSettings {
        model: MODEL.to_string(),
        persona: "You are Lyre, a helpful relay.".to_string(),
        tools: Default::default(),
        temperature: None,
    }
}

/// Mirrors the relay dispatcher: record the caller's turn in both windows,
/// run the digest and cache steps, generate, then record the reply.
#[allow(clippy::too_many_arguments)]
async fn run_relay_exchange(
    pool: &GeminiKeyPool,
    store: &dyn SessionStore,
    key: &SessionKey,
    speaker: &str,
    prompt: &str,
    memory_policy: &MemoryPolicy,
    summarizer: &SummarizerConfig,
    cache_policy: &CachePolicy,
    settings: &PromptSettings,
) -> Result<String, LyreAiError> {
    store.record_private_turn(key, PrivateTurn::user(prompt));
    store.record_shared_turn(&key.channel_id, SharedTurn::new(speaker, prompt));

    maybe_summarize(pool, store, key, &settings.model, memory_policy, summarizer).await;
    let cached = ensure_cache(pool, store, key, &settings.model, cache_policy).await;
    let request = assemble_chat_request(store, key, speaker, cached, settings);
    let response = pool.complete(request).await?;

    store.record_private_turn(key, PrivateTurn::assistant(&response.text));
    store.record_shared_turn(
        &key.channel_id,
        SharedTurn::new(BOT_DISPLAY_NAME, &response.text),
    );
    Ok(response.text)
}

#[tokio::test]
async fn integration_exchange_round_trip_records_both_memory_windows() {
    let server = MockServer::start();
    let generate = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .query_param("key", "relay-key")
            .json_body_includes(
                json!({
                    "contents": [{
                        "role": "user",
                        "parts": [{ "text": "what time does the launch window open?" }]
                    }]
                })
                .to_string(),
            );
        then.status(200)
            .json_body(reply_body("The window opens at 06:00 UTC."));
    });

    let pool = pool_for(&server, "relay-key");
    let store = InMemorySessionStore::new(MemoryPolicy::default());
    let key = SessionKey::new("channel-7", "user-42");

    let reply = run_relay_exchange(
        &pool,
        &store,
        &key,
        "Rosa",
        "what time does the launch window open?",
        &MemoryPolicy::default(),
        &SummarizerConfig::default(),
        &CachePolicy::default(),
        &prompt_settings(),
    )
    .await
    .expect("exchange should succeed");

    generate.assert_calls(1);
    assert_eq!(reply, "The window opens at 06:00 UTC.");

    let private = store.private_window(&key);
    assert_eq!(private.len(), 2);
    assert_eq!(private[0].role, TurnRole::User);
    assert_eq!(private[0].text, "what time does the launch window open?");
    assert_eq!(private[1].role, TurnRole::Assistant);
    assert_eq!(private[1].text, "The window opens at 06:00 UTC.");

    let shared = store.shared_window("channel-7");
    assert_eq!(shared.len(), 2);
    assert_eq!(shared[0].speaker, "Rosa");
    assert_eq!(shared[0].text, "what time does the launch window open?");
    assert_eq!(shared[1].speaker, BOT_DISPLAY_NAME);
    assert_eq!(shared[1].text, "The window opens at 06:00 UTC.");
}

#[tokio::test]
async fn functional_quota_failover_survives_into_the_next_exchange() {
    let server = MockServer::start();
    let exhausted = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .query_param("key", "first-key");
        then.status(429).json_body(quota_body());
    });
    let healthy = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .query_param("key", "second-key");
        then.status(200).json_body(reply_body("Standing by."));
    });

    let pool = pool_for(&server, "first-key,second-key");
    let store = InMemorySessionStore::new(MemoryPolicy::default());
    let key = SessionKey::new("channel-9", "user-1");

    let reply = run_relay_exchange(
        &pool,
        &store,
        &key,
        "Noor",
        "status check",
        &MemoryPolicy::default(),
        &SummarizerConfig::default(),
        &CachePolicy::default(),
        &prompt_settings(),
    )
    .await
    .expect("failover should serve the reply");

    assert_eq!(reply, "Standing by.");
    exhausted.assert_calls(1);
    healthy.assert_calls(1);

    // The first key is still cooling down, so the next exchange skips it
    // without spending another request on it.
    let reply = run_relay_exchange(
        &pool,
        &store,
        &key,
        "Noor",
        "still there?",
        &MemoryPolicy::default(),
        &SummarizerConfig::default(),
        &CachePolicy::default(),
        &prompt_settings(),
    )
    .await
    .expect("second exchange should serve from the healthy key");

    assert_eq!(reply, "Standing by.");
    exhausted.assert_calls(1);
    healthy.assert_calls(2);
}

#[tokio::test]
async fn functional_digest_pass_flows_into_cached_generation() {
    let digest_text =
        "Mika is tracking a fueling hold of about forty minutes; range safety is green.";

    let server = MockServer::start();
    let digest = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .query_param("key", "relay-key")
            .body_includes("Previous digest:");
        then.status(200).json_body(reply_body(digest_text));
    });
    let cache = server.mock(|when, then| {
        when.method(POST)
            .path("/cachedContents")
            .query_param("key", "relay-key");
        then.status(200)
            .json_body(json!({ "name": "cachedContents/relay-digest" }));
    });
    let generate = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .query_param("key", "relay-key")
            .json_body_includes(
                json!({ "cachedContent": "cachedContents/relay-digest" }).to_string(),
            );
        then.status(200).json_body(reply_body("The hold lifts at dawn."));
    });

    let pool = pool_for(&server, "relay-key");
    let memory_policy = MemoryPolicy {
        max_private_turns: 4,
        max_shared_turns: 8,
    };
    let summarizer = SummarizerConfig {
        keep_recent_turns: 2,
        ..Default::default()
    };
    let cache_policy = CachePolicy {
        ttl_seconds: 1_800,
        min_summary_tokens: 8,
    };
    let store = InMemorySessionStore::new(memory_policy);
    let key = SessionKey::new("channel-3", "user-8");

    store.record_private_turn(&key, PrivateTurn::user("how long is the fueling hold?"));
    store.record_private_turn(
        &key,
        PrivateTurn::assistant("About forty minutes, pending weather."),
    );
    store.record_private_turn(&key, PrivateTurn::user("and the range safety status?"));
    store.record_shared_turn("channel-3", SharedTurn::new("Mika", "any word on the hold?"));

    let reply = run_relay_exchange(
        &pool,
        &store,
        &key,
        "Mika",
        "status please, any updates?",
        &memory_policy,
        &summarizer,
        &cache_policy,
        &prompt_settings(),
    )
    .await
    .expect("digested exchange should succeed");

    digest.assert_calls(1);
    cache.assert_calls(1);
    generate.assert_calls(1);
    assert_eq!(reply, "The hold lifts at dawn.");

    assert_eq!(store.summary(&key).as_deref(), Some(digest_text));
    let handle = store
        .cache_handle(&key)
        .expect("cache handle should be stored");
    assert_eq!(handle.name, "cachedContents/relay-digest");

    // The digest pass kept the two most recent turns, then the reply landed
    // on top of them.
    let private = store.private_window(&key);
    assert_eq!(private.len(), 3);
    assert_eq!(private[0].text, "and the range safety status?");
    assert_eq!(private[1].text, "status please, any updates?");
    assert_eq!(private[2].role, TurnRole::Assistant);
}

#[tokio::test]
async fn regression_non_quota_failure_keeps_the_caller_turn_and_skips_rotation() {
    let server = MockServer::start();
    let broken = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .query_param("key", "first-key");
        then.status(500).body("internal error");
    });
    let spare = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .query_param("key", "second-key");
        then.status(200).json_body(reply_body("unused"));
    });

    let pool = pool_for(&server, "first-key,second-key");
    let store = InMemorySessionStore::new(MemoryPolicy::default());
    let key = SessionKey::new("channel-2", "user-5");

    let error = run_relay_exchange(
        &pool,
        &store,
        &key,
        "Priya",
        "ping",
        &MemoryPolicy::default(),
        &SummarizerConfig::default(),
        &CachePolicy::default(),
        &prompt_settings(),
    )
    .await
    .expect_err("a 500 should fail the exchange");

    match error {
        LyreAiError::HttpStatus { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("internal error"));
        }
        other => panic!("expected LyreAiError::HttpStatus, got {other:?}"),
    }

    broken.assert_calls(1);
    spare.assert_calls(0);

    // The caller's turn stays recorded; only the reply is missing.
    let private = store.private_window(&key);
    assert_eq!(private.len(), 1);
    assert_eq!(private[0].role, TurnRole::User);
    assert_eq!(store.shared_window("channel-2").len(), 1);
}
