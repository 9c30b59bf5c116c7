//! In-memory session state: private and shared rolling windows, digests,
//! and cached-content handles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Public struct `SessionKey` used across Lyre components.
///
/// Identifies one caller's private thread inside one channel. Two callers in
/// the same channel never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub channel_id: String,
    pub user_id: String,
}

impl SessionKey {
    pub fn new(channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Enumerates supported `TurnRole` values for private history entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

/// Public struct `PrivateTurn` used across Lyre components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateTurn {
    pub role: TurnRole,
    pub text: String,
}

impl PrivateTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// Public struct `SharedTurn` used across Lyre components.
///
/// One channel-visible utterance attributed to its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedTurn {
    pub speaker: String,
    pub text: String,
}

impl SharedTurn {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// Public struct `CacheHandle` used across Lyre components.
///
/// Resource name of a provider-side cached-content entry plus its local
/// creation time, which drives the freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    pub name: String,
    pub created_unix_ms: u64,
}

impl CacheHandle {
    pub fn new(name: impl Into<String>, created_unix_ms: u64) -> Self {
        Self {
            name: name.into(),
            created_unix_ms,
        }
    }

    /// Returns `true` while the handle is younger than the configured TTL.
    pub fn is_fresh(&self, now_unix_ms: u64, ttl_ms: u64) -> bool {
        now_unix_ms.saturating_sub(self.created_unix_ms) < ttl_ms
    }
}

/// Public struct `MemoryPolicy` used across Lyre components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPolicy {
    pub max_private_turns: usize,
    pub max_shared_turns: usize,
}

pub const DEFAULT_MAX_PRIVATE_TURNS: usize = 12;
pub const DEFAULT_MAX_SHARED_TURNS: usize = 8;

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            max_private_turns: DEFAULT_MAX_PRIVATE_TURNS,
            max_shared_turns: DEFAULT_MAX_SHARED_TURNS,
        }
    }
}

/// Trait contract for session persistence behavior.
///
/// Every method is atomic on its own; a dispatch flow issues several calls in
/// sequence, so two concurrent exchanges on the same key may interleave
/// between them with last-write-wins outcomes.
pub trait SessionStore: Send + Sync {
    /// Appends one turn to the caller's private window, evicting the oldest
    /// entries beyond the configured cap.
    fn record_private_turn(&self, key: &SessionKey, turn: PrivateTurn);

    /// Returns the private window oldest-first.
    fn private_window(&self, key: &SessionKey) -> Vec<PrivateTurn>;

    /// Drops all but the most recent `keep_last` private turns. A no-op when
    /// the window is already short enough.
    fn truncate_private(&self, key: &SessionKey, keep_last: usize);

    /// Appends one turn to the channel's shared window, evicting the oldest
    /// entries beyond the configured cap.
    fn record_shared_turn(&self, channel_id: &str, turn: SharedTurn);

    /// Returns the shared window oldest-first.
    fn shared_window(&self, channel_id: &str) -> Vec<SharedTurn>;

    fn summary(&self, key: &SessionKey) -> Option<String>;

    fn set_summary(&self, key: &SessionKey, summary: String);

    fn cache_handle(&self, key: &SessionKey) -> Option<CacheHandle>;

    fn set_cache_handle(&self, key: &SessionKey, handle: CacheHandle);

    fn clear_cache_handle(&self, key: &SessionKey);

    /// Forgets the caller's private window, summary, and cache handle. The
    /// channel-wide shared window is deliberately left intact.
    fn clear_session(&self, key: &SessionKey);
}

#[derive(Debug, Default)]
struct MemoryState {
    private: HashMap<SessionKey, VecDeque<PrivateTurn>>,
    shared: HashMap<String, VecDeque<SharedTurn>>,
    summaries: HashMap<SessionKey, String>,
    cache_handles: HashMap<SessionKey, CacheHandle>,
}

/// Process-local `SessionStore` backed by a mutex-guarded map. All state is
/// lost on restart.
#[derive(Debug)]
pub struct InMemorySessionStore {
    policy: MemoryPolicy,
    state: Mutex<MemoryState>,
}

impl InMemorySessionStore {
    pub fn new(policy: MemoryPolicy) -> Self {
        let policy = MemoryPolicy {
            max_private_turns: policy.max_private_turns.max(1),
            max_shared_turns: policy.max_shared_turns.max(1),
        };
        Self {
            policy,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(MemoryPolicy::default())
    }
}

impl SessionStore for InMemorySessionStore {
    fn record_private_turn(&self, key: &SessionKey, turn: PrivateTurn) {
        let mut state = self.lock_state();
        let window = state.private.entry(key.clone()).or_default();
        window.push_back(turn);
        while window.len() > self.policy.max_private_turns {
            window.pop_front();
        }
    }

    fn private_window(&self, key: &SessionKey) -> Vec<PrivateTurn> {
        let state = self.lock_state();
        state
            .private
            .get(key)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn truncate_private(&self, key: &SessionKey, keep_last: usize) {
        let mut state = self.lock_state();
        if let Some(window) = state.private.get_mut(key) {
            while window.len() > keep_last {
                window.pop_front();
            }
        }
    }

    fn record_shared_turn(&self, channel_id: &str, turn: SharedTurn) {
        let mut state = self.lock_state();
        let window = state.shared.entry(channel_id.to_string()).or_default();
        window.push_back(turn);
        while window.len() > self.policy.max_shared_turns {
            window.pop_front();
        }
    }

    fn shared_window(&self, channel_id: &str) -> Vec<SharedTurn> {
        let state = self.lock_state();
        state
            .shared
            .get(channel_id)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn summary(&self, key: &SessionKey) -> Option<String> {
        let state = self.lock_state();
        state.summaries.get(key).cloned()
    }

    fn set_summary(&self, key: &SessionKey, summary: String) {
        let mut state = self.lock_state();
        state.summaries.insert(key.clone(), summary);
    }

    fn cache_handle(&self, key: &SessionKey) -> Option<CacheHandle> {
        let state = self.lock_state();
        state.cache_handles.get(key).cloned()
    }

    fn set_cache_handle(&self, key: &SessionKey, handle: CacheHandle) {
        let mut state = self.lock_state();
        state.cache_handles.insert(key.clone(), handle);
    }

    fn clear_cache_handle(&self, key: &SessionKey) {
        let mut state = self.lock_state();
        state.cache_handles.remove(key);
    }

    fn clear_session(&self, key: &SessionKey) {
        let mut state = self.lock_state();
        state.private.remove(key);
        state.summaries.remove(key);
        state.cache_handles.remove(key);
    }
}
