//! Weighted lexical similarity between a ground-truth text and a candidate.
//!
//! Both texts are split into `[A-Za-z0-9_]+` tokens. Every ground-truth token
//! carries weight 1, or 2 when it reads as a number, and counts as matched when
//! the candidate contains it anywhere (case-insensitively). The score is the
//! matched share of the total weight, as a percentage.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static PUNCT_SPACING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*([.,!?;:])\s*").expect("valid punctuation regex"));
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("valid token regex"));

/// Trim, collapse whitespace runs to one space, and drop whitespace around
/// `.,!?;:`.
pub fn normalize_text(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ");
    PUNCT_SPACING.replace_all(&collapsed, "$1").into_owned()
}

/// Word tokens of `text`, in order.
pub fn tokenize(text: &str) -> Vec<&str> {
    TOKEN.find_iter(text).map(|m| m.as_str()).collect()
}

/// Whether `token` parses as a floating-point number.
///
/// Accepts what a float literal parser does (`42`, `1e5`, `inf`, `nan`) plus
/// digit groups separated by single underscores (`1_000`).
pub fn is_number(token: &str) -> bool {
    if token.contains('_') {
        let grouped = !token.starts_with('_')
            && !token.ends_with('_')
            && !token.contains("__")
            && token.split('_').all(|group| {
                !group.is_empty() && group.chars().all(|c| c.is_ascii_digit())
            });
        return grouped;
    }
    token.parse::<f64>().is_ok()
}

/// Weighted token similarity of `output` against `ground_truth`, in `[0, 100]`.
///
/// Returns 0 when the ground truth has no tokens.
pub fn weighted_token_similarity(ground_truth: &str, output: &str) -> f64 {
    let candidate: HashSet<String> = tokenize(output)
        .into_iter()
        .map(str::to_lowercase)
        .collect();

    let mut total_weight = 0u64;
    let mut matched_weight = 0u64;
    for token in tokenize(ground_truth) {
        let weight = if is_number(token) { 2 } else { 1 };
        total_weight += weight;
        if candidate.contains(&token.to_lowercase()) {
            matched_weight += weight;
        }
    }

    if total_weight == 0 {
        return 0.0;
    }
    matched_weight as f64 / total_weight as f64 * 100.0
}

/// Score a raw model output: the output is normalized first, the ground truth
/// is tokenized as-is.
pub fn score(ground_truth: &str, output: &str) -> f64 {
    weighted_token_similarity(ground_truth, &normalize_text(output))
}

/// Round to two decimal places, the precision stored in result files.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
