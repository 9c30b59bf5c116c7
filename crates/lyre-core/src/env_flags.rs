//! Tolerant parsing for env-sourced flag values.
//!
//! Operators paste values out of `.env` files and shell exports, so raw text
//! frequently arrives with wrapping quotes or a trailing inline comment.
//! Every reader here cleans the value first and treats unparseable input as
//! absent rather than failing.

/// Strips surrounding whitespace, a trailing `#` comment, and one pair of
/// matching quotes from `raw`.
///
/// A value that opens with a quote is read up to its closing quote, so `#`
/// inside a quoted value survives. Unquoted values are cut at the first `#`.
pub fn clean_flag_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = matched_quote_inner(trimmed) {
        return inner.to_string();
    }
    strip_inline_comment(trimmed).trim().to_string()
}

/// Parses a cleaned boolean flag. Accepts `1/true/yes/on` and
/// `0/false/no/off` case-insensitively; anything else is `None`.
pub fn parse_bool_value(raw: &str) -> Option<bool> {
    let cleaned = clean_flag_value(raw).to_ascii_lowercase();
    match cleaned.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a cleaned unsigned integer flag.
pub fn parse_u64_value(raw: &str) -> Option<u64> {
    clean_flag_value(raw).parse().ok()
}

/// Parses a cleaned unsigned size flag.
pub fn parse_usize_value(raw: &str) -> Option<usize> {
    clean_flag_value(raw).parse().ok()
}

/// Parses a cleaned floating-point flag.
pub fn parse_f32_value(raw: &str) -> Option<f32> {
    clean_flag_value(raw).parse().ok()
}

/// Splits a comma-separated flag into cleaned, non-empty items.
pub fn parse_string_list(raw: &str) -> Vec<String> {
    strip_inline_comment(raw.trim())
        .split(',')
        .map(|item| {
            let trimmed = item.trim();
            match matched_quote_inner(trimmed) {
                Some(inner) => inner.to_string(),
                None => trimmed.to_string(),
            }
        })
        .filter(|item| !item.is_empty())
        .collect()
}

fn strip_inline_comment(value: &str) -> &str {
    match value.find('#') {
        Some(index) => &value[..index],
        None => value,
    }
}

fn matched_quote_inner(value: &str) -> Option<&str> {
    let mut chars = value.chars();
    let opening = chars.next()?;
    if opening != '"' && opening != '\'' {
        return None;
    }
    let rest = &value[opening.len_utf8()..];
    let closing = rest.find(opening)?;
    Some(&rest[..closing])
}
