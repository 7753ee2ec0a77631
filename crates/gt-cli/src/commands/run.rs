use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, ValueEnum};
use gt_core::config::Config;
use gt_eval::batch::{BatchRunner, RunObserver, RunSummary, SampleEvent, SampleProcessor};
use gt_eval::pipeline::{ExtractedTextDir, GroundTruthTable, ModelProcessor, PassthroughProcessor};
use gt_eval::result_store::ResultStore;
use gt_harness::invoker::{InvokerPolicy, RetryingInvoker};
use gt_harness::provider::HttpModelClient;
use gt_harness::rate_limiter::{RateLimitPolicy, RateLimiter};
use tracing::warn;

/// How the output under evaluation is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// Score the extracted text as-is.
    Passthrough,
    /// Send the extracted text to the model and score its reply.
    Model,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Name of this evaluation pass; keys the result file names.
    #[arg(long)]
    pub label: String,

    /// Ground-truth CSV (`pdfName,groundTruth` or `sample_id,ground_truth`).
    #[arg(long)]
    pub ground_truth: PathBuf,

    /// Directory holding `<sample_id>.txt` extracted texts.
    #[arg(long)]
    pub extracted_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Method::Passthrough)]
    pub method: Method,

    /// Override `store.output_dir`.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Only process these sample ids (comma-separated), in this order.
    #[arg(long, value_delimiter = ',')]
    pub samples: Vec<String>,

    /// Override `batch.batch_size`.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Override `batch.inter_batch_delay_secs`.
    #[arg(long)]
    pub inter_batch_delay: Option<u64>,

    /// Skip samples already present in the JSON results.
    #[arg(long)]
    pub skip_completed: bool,

    /// Instruction sent ahead of the text with `--method model`.
    #[arg(long)]
    pub instruction: Option<String>,
}

/// Prints one line per sample as the run advances.
struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn on_sample(&self, event: &SampleEvent<'_>) {
        match event {
            SampleEvent::Processed {
                sample_id,
                similarity,
            } => println!("✅ Processed {sample_id} | Similarity: {similarity:.2}%"),
            SampleEvent::Failed { sample_id, error } => {
                println!("❌ Error processing {sample_id}: {error}")
            }
            SampleEvent::Skipped { sample_id } => {
                println!("⏭️  Skipping {sample_id}: already in results")
            }
        }
    }

    fn on_batch_complete(&self, batch: usize, of: usize) {
        if batch < of {
            println!("✅ Batch {batch} processed. Waiting before next batch...");
        } else {
            println!("✅ Batch {batch} processed.");
        }
    }
}

pub async fn run(mut cfg: Config, args: RunArgs) -> anyhow::Result<()> {
    if let Some(dir) = &args.output_dir {
        cfg.store.output_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(size) = args.batch_size {
        cfg.batch.batch_size = size;
    }
    if let Some(secs) = args.inter_batch_delay {
        cfg.batch.inter_batch_delay_secs = secs;
    }
    cfg.validate()?;

    let table = Arc::new(
        GroundTruthTable::from_csv(&args.ground_truth).with_context(|| {
            format!("failed to read ground truth {}", args.ground_truth.display())
        })?,
    );
    let sample_ids = if args.samples.is_empty() {
        table.ids().to_vec()
    } else {
        args.samples.clone()
    };
    let texts = ExtractedTextDir::new(&args.extracted_dir);

    let processor: Box<dyn SampleProcessor> = match args.method {
        Method::Passthrough => Box::new(PassthroughProcessor::new(table.clone(), texts)),
        Method::Model => {
            let client = HttpModelClient::from_config(&cfg.invocation)
                .context("failed to build model client")?;
            let limiter = Arc::new(RateLimiter::new(RateLimitPolicy::from(&cfg.rate_limit)));
            let invoker = Arc::new(RetryingInvoker::new(
                Arc::new(client),
                limiter,
                InvokerPolicy::from(&cfg.invocation),
            ));
            let mut processor = ModelProcessor::new(
                table.clone(),
                texts,
                invoker,
                cfg.invocation.model_id.clone(),
                cfg.invocation.default_output_tokens,
            );
            if let Some(instruction) = &args.instruction {
                processor = processor.with_instruction(instruction.clone());
            }
            Box::new(processor)
        }
    };

    let mut store = ResultStore::for_label(&cfg.store, &args.label)
        .with_context(|| format!("failed to open result files for {}", args.label))?;
    if store.recovered_from_corruption() {
        warn!(
            path = %store.json_path().display(),
            "existing results were unreadable and will be overwritten"
        );
    }

    let runner = BatchRunner::from_config(&cfg.batch)
        .with_skip_completed(args.skip_completed)
        .with_observer(Arc::new(ConsoleObserver));
    let summary = runner
        .run(&args.label, &sample_ids, &mut store, processor.as_ref())
        .await?;

    print_summary(&summary);
    println!(
        "✅ All samples processed and results saved for {}!",
        summary.label
    );
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let elapsed = summary.completed_at - summary.started_at;
    println!(
        "{}: {} processed, {} failed, {} skipped of {} in {}s",
        summary.label,
        summary.succeeded,
        summary.failed.len(),
        summary.skipped,
        summary.total,
        elapsed.num_seconds()
    );
    if let Some(mean) = summary.mean_similarity {
        println!("Mean similarity: {mean:.2}%");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn parses_sample_list_and_defaults() {
        let h = Harness::parse_from([
            "gt",
            "--label",
            "pdfplumber",
            "--ground-truth",
            "gt.csv",
            "--extracted-dir",
            "texts",
            "--samples",
            "jefferies8,jefferies9",
        ]);
        assert_eq!(h.args.label, "pdfplumber");
        assert_eq!(h.args.method, Method::Passthrough);
        assert_eq!(h.args.samples, ["jefferies8", "jefferies9"]);
        assert!(h.args.batch_size.is_none());
        assert!(!h.args.skip_completed);
    }

    #[test]
    fn parses_model_method_and_overrides() {
        let h = Harness::parse_from([
            "gt",
            "--label",
            "model",
            "--ground-truth",
            "gt.csv",
            "--extracted-dir",
            "texts",
            "--method",
            "model",
            "--batch-size",
            "5",
            "--inter-batch-delay",
            "0",
            "--skip-completed",
        ]);
        assert_eq!(h.args.method, Method::Model);
        assert_eq!(h.args.batch_size, Some(5));
        assert_eq!(h.args.inter_batch_delay, Some(0));
        assert!(h.args.skip_completed);
    }

    #[tokio::test]
    async fn passthrough_run_writes_result_files() {
        let dir = tempfile::tempdir().unwrap();
        let gt = dir.path().join("gt.csv");
        std::fs::write(&gt, "pdfName,groundTruth\ns1,Revenue grew 10 percent\n").unwrap();
        let texts = dir.path().join("texts");
        std::fs::create_dir(&texts).unwrap();
        std::fs::write(texts.join("s1.txt"), "Revenue grew percent").unwrap();
        let out = dir.path().join("out");

        let args = RunArgs {
            label: "pdfplumber".into(),
            ground_truth: gt,
            extracted_dir: texts,
            method: Method::Passthrough,
            output_dir: Some(out.clone()),
            samples: Vec::new(),
            batch_size: None,
            inter_batch_delay: Some(0),
            skip_completed: false,
            instruction: None,
        };
        run(Config::default(), args).await.unwrap();

        let json = std::fs::read_to_string(out.join("pdfplumber_results.json")).unwrap();
        assert!(json.contains("\"weighted_token_similarity\": 60.0"));
        assert!(out.join("pdfplumber_results.csv").exists());
    }
}
