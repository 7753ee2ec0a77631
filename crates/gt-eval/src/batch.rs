use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gt_core::config::BatchConfig;
use gt_core::types::EvaluationRecord;
use gt_telemetry::tracing_setup::{create_run_span, create_sample_span};
use serde::{Deserialize, Serialize};
use tracing::{error, info, Instrument};

use crate::pipeline::SampleError;
use crate::result_store::{ResultStore, StoreError};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Turns one sample id into a scored record.
#[async_trait]
pub trait SampleProcessor: Send + Sync {
    async fn process(&self, sample_id: &str) -> Result<EvaluationRecord, SampleError>;
}

/// Progress notification emitted once per sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleEvent<'a> {
    Processed { sample_id: &'a str, similarity: f64 },
    Failed { sample_id: &'a str, error: String },
    Skipped { sample_id: &'a str },
}

/// Receives per-sample progress as a run advances.
pub trait RunObserver: Send + Sync {
    fn on_sample(&self, event: &SampleEvent<'_>);

    fn on_batch_complete(&self, _batch: usize, _of: usize) {}
}

// ---------------------------------------------------------------------------
// Summary / errors
// ---------------------------------------------------------------------------

/// Outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub label: String,
    pub trace_id: String,
    pub total: usize,
    pub succeeded: usize,
    /// `(sample_id, error)` in processing order.
    pub failed: Vec<(String, String)>,
    pub skipped: usize,
    /// Mean similarity of the samples that succeeded in this run.
    pub mean_similarity: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Errors that end a run. Per-sample failures never do.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("result store: {0}")]
    Store(#[from] StoreError),
}

/// Contiguous chunks of `items`, `batch_size` long (the last may be
/// shorter). A size of zero is treated as one.
pub fn partition<T>(items: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(batch_size.max(1))
}

// ---------------------------------------------------------------------------
// BatchRunner
// ---------------------------------------------------------------------------

/// Processes samples in fixed-size batches with a pause between batches.
///
/// Samples run one at a time in input order. A sample that fails is reported
/// and skipped; only result-store failures abort the run. The JSON snapshot
/// is flushed once every batch has been processed.
pub struct BatchRunner {
    batch_size: usize,
    inter_batch_delay: Duration,
    skip_completed: bool,
    observer: Option<Arc<dyn RunObserver>>,
}

impl BatchRunner {
    pub fn new(batch_size: usize, inter_batch_delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            inter_batch_delay,
            skip_completed: false,
            observer: None,
        }
    }

    pub fn from_config(cfg: &BatchConfig) -> Self {
        Self::new(cfg.batch_size, cfg.inter_batch_delay())
    }

    /// Skip samples the store already holds a record for.
    pub fn with_skip_completed(mut self, skip: bool) -> Self {
        self.skip_completed = skip;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run `sample_ids` through `processor`, appending each record to `store`.
    pub async fn run(
        &self,
        label: &str,
        sample_ids: &[String],
        store: &mut ResultStore,
        processor: &dyn SampleProcessor,
    ) -> Result<RunSummary, RunError> {
        let (span, trace_id) = create_run_span(label);
        self.run_batches(label, trace_id, sample_ids, store, processor)
            .instrument(span)
            .await
    }

    async fn run_batches(
        &self,
        label: &str,
        trace_id: String,
        sample_ids: &[String],
        store: &mut ResultStore,
        processor: &dyn SampleProcessor,
    ) -> Result<RunSummary, RunError> {
        let started_at = Utc::now();
        let batches: Vec<&[String]> = partition(sample_ids, self.batch_size).collect();
        let batch_count = batches.len();
        info!(
            samples = sample_ids.len(),
            batches = batch_count,
            batch_size = self.batch_size,
            "starting run"
        );

        let mut succeeded = 0usize;
        let mut skipped = 0usize;
        let mut failed = Vec::new();
        let mut similarity_sum = 0.0;

        for (index, batch) in batches.iter().enumerate() {
            let number = index + 1;
            info!(batch = number, of = batch_count, samples = ?batch, "processing batch");

            for sample_id in batch.iter() {
                if self.skip_completed && store.contains(sample_id) {
                    info!(sample_id = %sample_id, "already completed, skipping");
                    skipped += 1;
                    self.notify(&SampleEvent::Skipped { sample_id });
                    continue;
                }

                let outcome = processor
                    .process(sample_id)
                    .instrument(create_sample_span(&trace_id, sample_id))
                    .await;

                match outcome {
                    Ok(record) => {
                        let similarity = record.similarity();
                        store.append(record)?;
                        succeeded += 1;
                        similarity_sum += similarity;
                        info!(sample_id = %sample_id, similarity, "sample processed");
                        self.notify(&SampleEvent::Processed {
                            sample_id,
                            similarity,
                        });
                    }
                    Err(e) => {
                        error!(sample_id = %sample_id, error = %e, "sample failed");
                        let message = e.to_string();
                        self.notify(&SampleEvent::Failed {
                            sample_id,
                            error: message.clone(),
                        });
                        failed.push((sample_id.clone(), message));
                    }
                }
            }

            if let Some(observer) = &self.observer {
                observer.on_batch_complete(number, batch_count);
            }
            if number < batch_count && !self.inter_batch_delay.is_zero() {
                info!(
                    batch = number,
                    wait_secs = self.inter_batch_delay.as_secs(),
                    "batch processed, waiting before next batch"
                );
                tokio::time::sleep(self.inter_batch_delay).await;
            }
        }

        store.flush_final()?;

        let mean_similarity = (succeeded > 0).then(|| similarity_sum / succeeded as f64);
        info!(
            succeeded,
            failed = failed.len(),
            skipped,
            "run complete"
        );

        Ok(RunSummary {
            label: label.to_string(),
            trace_id,
            total: sample_ids.len(),
            succeeded,
            failed,
            skipped,
            mean_similarity,
            started_at,
            completed_at: Utc::now(),
        })
    }

    fn notify(&self, event: &SampleEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer.on_sample(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_every_item_once_in_order() {
        let ids: Vec<u32> = (0..10).collect();
        for size in 1..=12 {
            let chunks: Vec<&[u32]> = partition(&ids, size).collect();
            let flat: Vec<u32> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
            assert_eq!(flat, ids, "batch size {size}");
            assert!(chunks.iter().all(|c| c.len() <= size));
            assert_eq!(chunks.len(), ids.len().div_ceil(size));
        }
    }

    #[test]
    fn partition_zero_size_is_one() {
        let ids = ["a", "b"];
        assert_eq!(partition(&ids, 0).count(), 2);
    }

    #[test]
    fn partition_empty_input() {
        let ids: [&str; 0] = [];
        assert_eq!(partition(&ids, 3).count(), 0);
    }

    #[test]
    fn runner_clamps_zero_batch_size() {
        assert_eq!(BatchRunner::new(0, Duration::ZERO).batch_size(), 1);
    }

    #[test]
    fn runner_from_default_config() {
        let runner = BatchRunner::from_config(&BatchConfig::default());
        assert_eq!(runner.batch_size(), 3);
        assert_eq!(runner.inter_batch_delay, Duration::from_secs(40));
    }
}
