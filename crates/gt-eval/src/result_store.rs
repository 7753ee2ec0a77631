use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use gt_core::config::{JsonFlushPolicy, StoreConfig, TabularPolicy};
use gt_core::types::EvaluationRecord;
use serde::Serialize;
use tracing::{debug, warn};

/// Column order of the tabular log.
pub const TABULAR_HEADER: [&str; 4] = [
    "sample_id",
    "model_output",
    "ground_truth",
    "weighted_token_similarity",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Tabular row
// ---------------------------------------------------------------------------

/// Flat form of an [`EvaluationRecord`] for the tabular log.
#[derive(Serialize)]
struct TabularRow<'a> {
    sample_id: &'a str,
    model_output: &'a str,
    ground_truth: &'a str,
    weighted_token_similarity: f64,
}

impl<'a> From<&'a EvaluationRecord> for TabularRow<'a> {
    fn from(record: &'a EvaluationRecord) -> Self {
        Self {
            sample_id: &record.sample_id,
            model_output: &record.model_output,
            ground_truth: &record.ground_truth,
            weighted_token_similarity: record.similarity(),
        }
    }
}

// ---------------------------------------------------------------------------
// ResultStore
// ---------------------------------------------------------------------------

/// Durable, resumable record of one evaluation run.
///
/// Two files back the store:
/// - a JSON snapshot holding the ordered list of records, loaded on open and
///   rewritten by [`flush_final`](ResultStore::flush_final) (and after every
///   append under [`JsonFlushPolicy::PerRecord`]);
/// - an append-only CSV log that gets one flushed row per appended record.
///
/// A snapshot that cannot be read or parsed is logged and treated as empty. Snapshot
/// writes go through a temporary file renamed over the target.
pub struct ResultStore {
    json_path: PathBuf,
    tabular_path: PathBuf,
    json_flush: JsonFlushPolicy,
    tabular_policy: TabularPolicy,
    records: Vec<EvaluationRecord>,
    completed: HashSet<String>,
    /// Ids already in the tabular log; only tracked under `SkipExisting`.
    logged: HashSet<String>,
    writer: csv::Writer<File>,
    recovered_from_corruption: bool,
}

impl ResultStore {
    /// Open (or create) the store at the given paths, loading any prior
    /// snapshot.
    pub fn open(
        json_path: impl Into<PathBuf>,
        tabular_path: impl Into<PathBuf>,
        json_flush: JsonFlushPolicy,
        tabular_policy: TabularPolicy,
    ) -> Result<Self, StoreError> {
        let json_path = json_path.into();
        let tabular_path = tabular_path.into();
        ensure_parent(&json_path)?;
        ensure_parent(&tabular_path)?;

        let (records, recovered_from_corruption) = load_records(&json_path)?;
        let completed = records.iter().map(|r| r.sample_id.clone()).collect();

        let logged = match tabular_policy {
            TabularPolicy::SkipExisting => logged_ids(&tabular_path)?,
            TabularPolicy::Append => HashSet::new(),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&tabular_path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(TABULAR_HEADER)?;
            writer.flush()?;
        }

        debug!(
            json = %json_path.display(),
            tabular = %tabular_path.display(),
            loaded = records.len(),
            "result store opened"
        );

        Ok(Self {
            json_path,
            tabular_path,
            json_flush,
            tabular_policy,
            records,
            completed,
            logged,
            writer,
            recovered_from_corruption,
        })
    }

    /// Open the store for run `label` using the `[store]` config section.
    pub fn for_label(cfg: &StoreConfig, label: &str) -> Result<Self, StoreError> {
        Self::open(
            cfg.json_path(label),
            cfg.tabular_path(label),
            cfg.json_flush,
            cfg.tabular,
        )
    }

    /// Record a result: write its tabular row immediately, then keep it for
    /// the snapshot.
    pub fn append(&mut self, record: EvaluationRecord) -> Result<(), StoreError> {
        let write_row = match self.tabular_policy {
            TabularPolicy::Append => true,
            TabularPolicy::SkipExisting => self.logged.insert(record.sample_id.clone()),
        };
        if write_row {
            self.writer.serialize(TabularRow::from(&record))?;
            self.writer.flush()?;
        } else {
            debug!(sample_id = %record.sample_id, "row already in tabular log, not rewritten");
        }

        self.completed.insert(record.sample_id.clone());
        self.records.push(record);

        if self.json_flush == JsonFlushPolicy::PerRecord {
            self.write_snapshot()?;
        }
        Ok(())
    }

    /// Flush the tabular log and overwrite the JSON snapshot with every
    /// record held.
    pub fn flush_final(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        self.write_snapshot()
    }

    /// Whether a record for `sample_id` is held (loaded or appended).
    pub fn contains(&self, sample_id: &str) -> bool {
        self.completed.contains(sample_id)
    }

    /// Records in load-then-append order.
    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when the snapshot on disk was unreadable at open time and the
    /// store started empty.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered_from_corruption
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    pub fn tabular_path(&self) -> &Path {
        &self.tabular_path
    }

    fn write_snapshot(&self) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.records.serialize(&mut ser)?;

        let tmp = self.json_path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.json_path)?;
        debug!(path = %self.json_path.display(), records = self.records.len(), "snapshot written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load a JSON snapshot.
///
/// A missing file yields no records. A file that cannot be read or parsed
/// yields no records and `true`, after logging a warning.
pub fn load_records(path: &Path) -> Result<(Vec<EvaluationRecord>, bool), StoreError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "result snapshot is unreadable, starting with an empty result list"
            );
            return Ok((Vec::new(), true));
        }
    };
    match serde_json::from_str::<Vec<EvaluationRecord>>(&data) {
        Ok(records) => Ok((records, false)),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "result snapshot is corrupt, starting with an empty result list"
            );
            Ok((Vec::new(), true))
        }
    }
}

/// Sample ids already present in a tabular log. Unreadable rows are skipped.
fn logged_ids(path: &Path) -> Result<HashSet<String>, StoreError> {
    let mut ids = HashSet::new();
    let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(reader) => reader,
        Err(e) => {
            let missing = matches!(
                e.kind(),
                csv::ErrorKind::Io(err) if err.kind() == io::ErrorKind::NotFound
            );
            if missing {
                return Ok(ids);
            }
            return Err(e.into());
        }
    };
    for row in reader.records() {
        match row {
            Ok(row) => {
                if let Some(id) = row.get(0) {
                    ids.insert(id.to_string());
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable tabular row"),
        }
    }
    Ok(ids)
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths() -> (PathBuf, PathBuf, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let json = dir.path().join("run_results.json");
        let csv = dir.path().join("run_results.csv");
        (json, csv, dir)
    }

    fn record(id: &str, sim: f64) -> EvaluationRecord {
        EvaluationRecord::new(id, format!("output for {id}"), "truth", sim)
    }

    #[test]
    fn test_new_store_writes_header_once() {
        let (json, csv, _dir) = temp_paths();
        {
            let mut store =
                ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                    .unwrap();
            assert!(store.is_empty());
            assert!(!store.recovered_from_corruption());
            store.append(record("a", 50.0)).unwrap();
        }
        {
            let mut store =
                ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                    .unwrap();
            store.append(record("b", 75.0)).unwrap();
        }
        let text = std::fs::read_to_string(&csv).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "sample_id,model_output,ground_truth,weighted_token_similarity"
        );
        assert_eq!(lines.len(), 3);
        assert_eq!(text.matches("sample_id,").count(), 1);
    }

    #[test]
    fn test_tabular_row_written_before_flush() {
        let (json, csv, _dir) = temp_paths();
        let mut store =
            ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                .unwrap();
        store.append(record("a", 12.5)).unwrap();

        let text = std::fs::read_to_string(&csv).unwrap();
        assert!(text.contains("a,output for a,truth,12.5"));
        // End-of-run policy leaves the snapshot untouched until flush_final.
        assert!(!json.exists());
    }

    #[test]
    fn test_flush_final_writes_indented_snapshot() {
        let (json, csv, _dir) = temp_paths();
        let mut store =
            ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                .unwrap();
        store.append(record("a", 1.0)).unwrap();
        store.flush_final().unwrap();

        let text = std::fs::read_to_string(&json).unwrap();
        assert!(text.starts_with("[\n    {\n        \"sample_id\": \"a\""));
        assert!(!json.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_per_record_policy_snapshots_each_append() {
        let (json, csv, _dir) = temp_paths();
        let mut store =
            ResultStore::open(&json, &csv, JsonFlushPolicy::PerRecord, TabularPolicy::Append)
                .unwrap();
        store.append(record("a", 1.0)).unwrap();
        let (loaded, _) = load_records(&json).unwrap();
        assert_eq!(loaded.len(), 1);
        store.append(record("b", 2.0)).unwrap();
        let (loaded, _) = load_records(&json).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let (json, csv, _dir) = temp_paths();
        std::fs::write(&json, "[{\"sample_id\": ").unwrap();
        let store =
            ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                .unwrap();
        assert!(store.is_empty());
        assert!(store.recovered_from_corruption());
    }

    #[test]
    fn test_skip_existing_does_not_duplicate_rows() {
        let (json, csv, _dir) = temp_paths();
        {
            let mut store = ResultStore::open(
                &json,
                &csv,
                JsonFlushPolicy::EndOfRun,
                TabularPolicy::SkipExisting,
            )
            .unwrap();
            store.append(record("a", 10.0)).unwrap();
        }
        let mut store = ResultStore::open(
            &json,
            &csv,
            JsonFlushPolicy::EndOfRun,
            TabularPolicy::SkipExisting,
        )
        .unwrap();
        store.append(record("a", 20.0)).unwrap();
        store.append(record("b", 30.0)).unwrap();
        store.append(record("b", 40.0)).unwrap();

        let text = std::fs::read_to_string(&csv).unwrap();
        assert_eq!(text.lines().count(), 3);
        // The records themselves are all kept.
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_append_policy_keeps_duplicates() {
        let (json, csv, _dir) = temp_paths();
        let mut store =
            ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                .unwrap();
        store.append(record("a", 10.0)).unwrap();
        store.append(record("a", 20.0)).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("nested/out/run_results.json");
        let csv = dir.path().join("nested/out/run_results.csv");
        ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append).unwrap();
        assert!(csv.exists());
    }

    #[test]
    fn test_contains_tracks_loaded_and_appended() {
        let (json, csv, _dir) = temp_paths();
        let mut store =
            ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                .unwrap();
        store.append(record("a", 1.0)).unwrap();
        store.flush_final().unwrap();
        drop(store);

        let mut store =
            ResultStore::open(&json, &csv, JsonFlushPolicy::EndOfRun, TabularPolicy::Append)
                .unwrap();
        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        store.append(record("b", 1.0)).unwrap();
        assert!(store.contains("b"));
    }
}
