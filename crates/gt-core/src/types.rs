use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EvaluationRecord
// ---------------------------------------------------------------------------

/// Scores attached to a single evaluated sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub weighted_token_similarity: f64,
}

/// The outcome of evaluating one sample against its ground truth.
///
/// Records are created once per processed sample and never mutated; the
/// result store appends them in processing order. The JSON shape nests the
/// score under `metrics`, matching the snapshot files earlier runs produced:
///
/// ```json
/// {
///     "sample_id": "jefferies8",
///     "model_output": "...",
///     "ground_truth": "...",
///     "metrics": { "weighted_token_similarity": 87.5 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub sample_id: String,
    pub model_output: String,
    pub ground_truth: String,
    pub metrics: Metrics,
}

impl EvaluationRecord {
    pub fn new(
        sample_id: impl Into<String>,
        model_output: impl Into<String>,
        ground_truth: impl Into<String>,
        weighted_token_similarity: f64,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            model_output: model_output.into(),
            ground_truth: ground_truth.into(),
            metrics: Metrics {
                weighted_token_similarity,
            },
        }
    }

    /// Shorthand for `metrics.weighted_token_similarity`.
    pub fn similarity(&self) -> f64 {
        self.metrics.weighted_token_similarity
    }
}

/// Number of whitespace-separated words in `text`.
///
/// This is the unit every size limit (context, output) is expressed in.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
