use std::path::Path;

use anyhow::Context;
use gt_eval::similarity::{round2, score};

pub fn run(ground_truth: &Path, output: &Path) -> anyhow::Result<()> {
    let truth = std::fs::read_to_string(ground_truth)
        .with_context(|| format!("failed to read {}", ground_truth.display()))?;
    let candidate = std::fs::read_to_string(output)
        .with_context(|| format!("failed to read {}", output.display()))?;

    let similarity = round2(score(&truth, candidate.trim()));
    println!("Similarity: {similarity:.2}%");
    Ok(())
}
