//! Foundational low-level utilities shared across Lyre crates.
//!
//! Provides env-flag value parsing, time utilities used by cooldown and cache
//! expiry calculations, and the rough token estimator used for context
//! budgeting.

pub mod env_flags;
pub mod time_utils;
pub mod token_estimate;

pub use env_flags::{
    clean_flag_value, parse_bool_value, parse_f32_value, parse_string_list, parse_u64_value,
    parse_usize_value,
};
pub use time_utils::current_unix_timestamp_ms;
pub use token_estimate::{rough_token_estimate, ESTIMATED_CHARS_PER_TOKEN};
