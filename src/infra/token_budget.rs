//! Token estimation against model context windows.
//!
//! ~4 characters per token is a deliberately conservative estimate;
//! actual tokenization varies by model.

use once_cell::sync::Lazy;

/// Known context window sizes (input tokens) for popular models. Keys are
/// prefixes; released model ids usually carry a date suffix.
static MODEL_LIMITS: Lazy<Vec<(&'static str, usize)>> = Lazy::new(|| {
    vec![
        ("gpt-4o", 128_000),
        ("gpt-4o-mini", 128_000),
        ("gpt-4-turbo", 128_000),
        ("gpt-4-turbo-preview", 128_000),
        ("gpt-4", 8_192),
        ("gpt-4-32k", 32_768),
        ("gpt-3.5-turbo", 16_385),
        ("o1", 200_000),
        ("o1-mini", 128_000),
        ("o1-preview", 128_000),
        ("o3", 200_000),
        ("o3-mini", 200_000),
        ("o4-mini", 200_000),
        ("claude-sonnet-4-20250514", 200_000),
        ("claude-opus-4-20250514", 200_000),
        ("claude-3-7-sonnet", 200_000),
        ("claude-3-5-sonnet", 200_000),
        ("claude-3-5-haiku", 200_000),
        ("claude-3-opus", 200_000),
        ("claude-3-sonnet", 200_000),
        ("claude-3-haiku", 200_000),
    ]
});

/// Tokens held back for the system prompt and the generated output.
pub const RESERVED_TOKENS: usize = 20_000;

const DEFAULT_LIMIT: usize = 128_000;

pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Context window for a model id; exact match first, then prefix or
/// substring (ids often carry date suffixes), then provider-pattern
/// heuristics, then a conservative default.
pub fn model_limit(model_id: &str) -> usize {
    if model_id.is_empty() {
        return DEFAULT_LIMIT;
    }
    if let Some((_, limit)) = MODEL_LIMITS.iter().find(|(key, _)| *key == model_id) {
        return *limit;
    }
    if let Some((_, limit)) = MODEL_LIMITS
        .iter()
        .find(|(key, _)| model_id.starts_with(key) || model_id.contains(key))
    {
        return *limit;
    }
    if model_id.contains("claude") {
        return 200_000;
    }
    if model_id.contains("gpt-4o") || model_id.contains("gpt-4-turbo") {
        return 128_000;
    }
    if model_id.contains("o1") || model_id.contains("o3") || model_id.contains("o4") {
        return 200_000;
    }
    DEFAULT_LIMIT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCheck {
    pub fits: bool,
    pub estimated_tokens: usize,
    pub limit: usize,
    pub available_tokens: usize,
    pub over_by: usize,
}

pub fn check_token_limit(text: &str, model_id: &str) -> TokenCheck {
    let estimated_tokens = estimate_tokens(text);
    let limit = model_limit(model_id);
    let available_tokens = limit.saturating_sub(RESERVED_TOKENS);
    let fits = estimated_tokens <= available_tokens;
    TokenCheck {
        fits,
        estimated_tokens,
        limit,
        available_tokens,
        over_by: estimated_tokens.saturating_sub(available_tokens),
    }
}

pub const TRUNCATION_NOTICE: &str =
    "\n\n[... CONTENT TRUNCATED — middle portion removed to fit model context window ...]\n\n";

/// Truncate oversized source text to the model's budget, keeping 70% from
/// the start and 25% from the end with a notice in between; syllabi put
/// the schedule up front and grading policy at the back, the middle is the
/// most expendable. Returns the (possibly unchanged) text and whether it
/// was cut.
pub fn truncate_to_fit(text: &str, model_id: &str) -> (String, bool) {
    let check = check_token_limit(text, model_id);
    if check.fits {
        return (text.to_string(), false);
    }

    let target_chars = check.available_tokens * 4;
    let keep_start = floor_char_boundary(text, target_chars * 7 / 10);
    let keep_end = floor_char_boundary_from_end(text, target_chars / 4);

    let mut out = String::with_capacity(keep_start + TRUNCATION_NOTICE.len() + keep_end);
    out.push_str(&text[..keep_start]);
    out.push_str(TRUNCATION_NOTICE);
    out.push_str(&text[text.len() - keep_end..]);
    (out, true)
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn floor_char_boundary_from_end(text: &str, keep: usize) -> usize {
    let cut = text.len().saturating_sub(keep);
    text.len() - floor_char_boundary_from(text, cut)
}

fn floor_char_boundary_from(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
