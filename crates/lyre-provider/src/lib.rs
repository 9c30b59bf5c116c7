//! Credential handling and quota failover for upstream Gemini access.
//!
//! One client is built per configured API key; the pool rotates across them
//! when a key reports quota exhaustion and cools the key down before it is
//! considered again.

mod credentials;
mod pool;
mod quota;

pub use credentials::{build_gemini_key_pool, parse_api_key_list, ProviderCredential};
pub use pool::{GeminiKeyPool, KeyPoolConfig, PooledKeyClient};
pub use quota::{body_reports_quota_exhaustion, is_quota_error};
