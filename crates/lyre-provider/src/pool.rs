use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lyre_ai::{
    ChatRequest, ChatResponse, GeminiClient, LlmClient, LyreAiError, StreamDeltaHandler,
};
use lyre_core::current_unix_timestamp_ms;
use tracing::warn;

use crate::quota::is_quota_error;

type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Public struct `KeyPoolConfig` used across Lyre components.
pub struct KeyPoolConfig {
    /// How long an exhausted key stays out of rotation.
    pub cooldown_ms: u64,
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct KeyAvailabilityState {
    exhausted_until_unix_ms: Option<u64>,
}

#[derive(Clone)]
/// Public struct `PooledKeyClient` used across Lyre components.
pub struct PooledKeyClient {
    pub label: String,
    pub client: Arc<GeminiClient>,
}

#[derive(Debug, Default)]
struct PoolRotationState {
    last_used_index: Option<usize>,
    availability: Vec<KeyAvailabilityState>,
}

/// Round-robin failover across upstream API credentials.
///
/// Each key is either available or exhausted until a deadline. A quota error
/// exhausts the key for the configured cooldown and rotation moves on; any
/// other error propagates untouched. When every key is cooling down the pool
/// degrades gracefully and still attempts the next slot after the last-used
/// one rather than failing without trying.
pub struct GeminiKeyPool {
    keys: Vec<PooledKeyClient>,
    config: KeyPoolConfig,
    state: Mutex<PoolRotationState>,
    clock: ClockFn,
}

impl std::fmt::Debug for GeminiKeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiKeyPool")
            .field("key_count", &self.keys.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeminiKeyPool {
    pub fn new(keys: Vec<PooledKeyClient>, config: KeyPoolConfig) -> Self {
        Self::new_with_clock(keys, config, Arc::new(current_unix_timestamp_ms))
    }

    fn new_with_clock(keys: Vec<PooledKeyClient>, config: KeyPoolConfig, clock: ClockFn) -> Self {
        Self {
            state: Mutex::new(PoolRotationState {
                last_used_index: None,
                availability: vec![KeyAvailabilityState::default(); keys.len()],
            }),
            keys,
            config,
            clock,
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Runs `operation` against the pool, rotating credentials on quota
    /// errors. Each key is attempted at most once per call; the last quota
    /// error observed is propagated when every key fails.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, LyreAiError>
    where
        F: Fn(Arc<GeminiClient>) -> Fut,
        Fut: Future<Output = Result<T, LyreAiError>>,
    {
        if self.keys.is_empty() {
            return Err(LyreAiError::MissingApiKey);
        }

        let mut last_error: Option<LyreAiError> = None;
        for _ in 0..self.keys.len() {
            let now_unix_ms = (self.clock)();
            let index = self.select_index(now_unix_ms);
            let key = &self.keys[index];

            match operation(key.client.clone()).await {
                Ok(value) => {
                    self.record_success(index);
                    return Ok(value);
                }
                Err(error) if is_quota_error(&error) => {
                    let open_until = self.mark_exhausted(index, now_unix_ms);
                    warn!(
                        key = key.label.as_str(),
                        open_until_unix_ms = open_until,
                        "api key exhausted, rotating to next credential"
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LyreAiError::InvalidResponse("credential rotation ended without an error".to_string())
        }))
    }

    fn select_index(&self, now_unix_ms: u64) -> usize {
        let mut state = lock_or_recover_mutex(&self.state);
        let len = self.keys.len();
        let start = state
            .last_used_index
            .map(|index| (index + 1) % len)
            .unwrap_or(0);

        for offset in 0..len {
            let candidate = (start + offset) % len;
            let available = match state.availability[candidate].exhausted_until_unix_ms {
                Some(until) if now_unix_ms < until => false,
                _ => true,
            };
            if available {
                state.availability[candidate].exhausted_until_unix_ms = None;
                state.last_used_index = Some(candidate);
                return candidate;
            }
        }

        // Every key is cooling down; serve the least-stale slot anyway.
        state.last_used_index = Some(start);
        start
    }

    fn mark_exhausted(&self, index: usize, now_unix_ms: u64) -> u64 {
        let open_until = now_unix_ms.saturating_add(self.config.cooldown_ms);
        let mut state = lock_or_recover_mutex(&self.state);
        if let Some(slot) = state.availability.get_mut(index) {
            slot.exhausted_until_unix_ms = Some(open_until);
        }
        open_until
    }

    fn record_success(&self, index: usize) {
        let mut state = lock_or_recover_mutex(&self.state);
        if let Some(slot) = state.availability.get_mut(index) {
            slot.exhausted_until_unix_ms = None;
        }
    }
}

#[async_trait]
impl LlmClient for GeminiKeyPool {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LyreAiError> {
        self.call(|client| {
            let request = request.clone();
            async move { client.complete(request).await }
        })
        .await
    }

    async fn complete_with_stream(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, LyreAiError> {
        self.call(|client| {
            let request = request.clone();
            let on_delta = on_delta.clone();
            async move { client.complete_with_stream(request, on_delta).await }
        })
        .await
    }
}

fn lock_or_recover_mutex<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
