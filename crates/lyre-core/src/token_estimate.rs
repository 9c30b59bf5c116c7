/// Average characters per estimated token used for context budgeting.
///
/// A deliberately rough heuristic; callers treat the result as a budget
/// signal, never an exact count.
pub const ESTIMATED_CHARS_PER_TOKEN: usize = 4;

/// Returns a rough token estimate for `text` (ceiling of chars / 4).
pub fn rough_token_estimate(text: &str) -> usize {
    text.chars().count().div_ceil(ESTIMATED_CHARS_PER_TOKEN)
}
