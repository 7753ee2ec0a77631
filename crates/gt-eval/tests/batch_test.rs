use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gt_core::config::{JsonFlushPolicy, TabularPolicy};
use gt_core::types::EvaluationRecord;
use gt_eval::batch::{BatchRunner, RunError, RunObserver, SampleEvent, SampleProcessor};
use gt_eval::pipeline::SampleError;
use gt_eval::result_store::{load_records, ResultStore};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Scores every sample at 50.0, except the ids listed in `missing`.
#[derive(Default)]
struct ScriptedProcessor {
    missing: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedProcessor {
    fn failing(ids: &[&str]) -> Self {
        Self {
            missing: ids.iter().map(|s| s.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SampleProcessor for ScriptedProcessor {
    async fn process(&self, sample_id: &str) -> Result<EvaluationRecord, SampleError> {
        self.seen.lock().unwrap().push(sample_id.to_string());
        if self.missing.contains(sample_id) {
            return Err(SampleError::MissingGroundTruth(sample_id.to_string()));
        }
        Ok(EvaluationRecord::new(sample_id, "out", "truth", 50.0))
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
    batches: Mutex<Vec<(usize, usize)>>,
}

impl RunObserver for RecordingObserver {
    fn on_sample(&self, event: &SampleEvent<'_>) {
        let line = match event {
            SampleEvent::Processed { sample_id, .. } => format!("ok:{sample_id}"),
            SampleEvent::Failed { sample_id, .. } => format!("err:{sample_id}"),
            SampleEvent::Skipped { sample_id } => format!("skip:{sample_id}"),
        };
        self.events.lock().unwrap().push(line);
    }

    fn on_batch_complete(&self, batch: usize, of: usize) {
        self.batches.lock().unwrap().push((batch, of));
    }
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn open_store(dir: &tempfile::TempDir) -> ResultStore {
    ResultStore::open(
        dir.path().join("run_results.json"),
        dir.path().join("run_results.csv"),
        JsonFlushPolicy::EndOfRun,
        TabularPolicy::Append,
    )
    .expect("open store")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failing_sample_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let processor = ScriptedProcessor::failing(&["s2"]);
    let runner = BatchRunner::new(3, Duration::ZERO);

    let summary = runner
        .run("run", &ids(&["s1", "s2", "s3"]), &mut store, &processor)
        .await
        .unwrap();

    assert_eq!(processor.seen(), ["s1", "s2", "s3"]);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "s2");
    assert!(summary.failed[0].1.contains("no ground truth"));
    assert_eq!(summary.mean_similarity, Some(50.0));

    let stored: Vec<&str> = store.records().iter().map(|r| r.sample_id.as_str()).collect();
    assert_eq!(stored, ["s1", "s3"]);
}

#[tokio::test(start_paused = true)]
async fn pauses_only_between_batches() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let processor = ScriptedProcessor::default();
    let observer = Arc::new(RecordingObserver::default());
    let runner =
        BatchRunner::new(2, Duration::from_secs(40)).with_observer(observer.clone());

    let start = Instant::now();
    runner
        .run("run", &ids(&["a", "b", "c", "d", "e"]), &mut store, &processor)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    // Three batches, two pauses.
    assert!(elapsed >= Duration::from_secs(80));
    assert!(elapsed < Duration::from_secs(120));
    assert_eq!(*observer.batches.lock().unwrap(), [(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test(start_paused = true)]
async fn single_batch_has_no_pause() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let runner = BatchRunner::new(3, Duration::from_secs(40));

    let start = Instant::now();
    runner
        .run("run", &ids(&["a", "b"]), &mut store, &ScriptedProcessor::default())
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn resumed_store_keeps_prior_records_first() {
    let dir = tempfile::tempdir().unwrap();
    let runner = BatchRunner::new(2, Duration::ZERO);
    let processor = ScriptedProcessor::default();

    {
        let mut store = open_store(&dir);
        runner
            .run("run", &ids(&["p1", "p2", "p3"]), &mut store, &processor)
            .await
            .unwrap();
    }

    let mut store = open_store(&dir);
    assert_eq!(store.len(), 3);
    runner
        .run("run", &ids(&["n1", "n2"]), &mut store, &processor)
        .await
        .unwrap();

    let (records, corrupt) = load_records(&dir.path().join("run_results.json")).unwrap();
    assert!(!corrupt);
    let order: Vec<&str> = records.iter().map(|r| r.sample_id.as_str()).collect();
    assert_eq!(order, ["p1", "p2", "p3", "n1", "n2"]);

    // Tabular log: one header plus a row per appended record.
    let csv = std::fs::read_to_string(dir.path().join("run_results.csv")).unwrap();
    assert_eq!(csv.lines().count(), 6);
}

#[tokio::test(start_paused = true)]
async fn skip_completed_skips_stored_samples() {
    let dir = tempfile::tempdir().unwrap();
    let processor = ScriptedProcessor::default();
    {
        let mut store = open_store(&dir);
        BatchRunner::new(3, Duration::ZERO)
            .run("run", &ids(&["a"]), &mut store, &processor)
            .await
            .unwrap();
    }

    let observer = Arc::new(RecordingObserver::default());
    let mut store = open_store(&dir);
    let summary = BatchRunner::new(3, Duration::ZERO)
        .with_skip_completed(true)
        .with_observer(observer.clone())
        .run("run", &ids(&["a", "b"]), &mut store, &processor)
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(*observer.events.lock().unwrap(), ["skip:a", "ok:b"]);
    assert_eq!(processor.seen(), ["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn observer_sees_failures_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let observer = Arc::new(RecordingObserver::default());
    let runner = BatchRunner::new(1, Duration::ZERO).with_observer(observer.clone());

    runner
        .run(
            "run",
            &ids(&["a", "b", "c"]),
            &mut store,
            &ScriptedProcessor::failing(&["a", "c"]),
        )
        .await
        .unwrap();
    assert_eq!(*observer.events.lock().unwrap(), ["err:a", "ok:b", "err:c"]);
}

#[tokio::test(start_paused = true)]
async fn empty_run_still_writes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let summary = BatchRunner::new(3, Duration::from_secs(40))
        .run("run", &[], &mut store, &ScriptedProcessor::default())
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
    assert!(summary.mean_similarity.is_none());
    let text = std::fs::read_to_string(dir.path().join("run_results.json")).unwrap();
    assert_eq!(text, "[]");
}

#[tokio::test(start_paused = true)]
async fn unwritable_snapshot_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    // A directory where the temporary snapshot file would go.
    std::fs::create_dir(dir.path().join("run_results.json.tmp")).unwrap();

    let err = BatchRunner::new(3, Duration::ZERO)
        .run("run", &ids(&["a"]), &mut store, &ScriptedProcessor::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Store(_)));
}
