//! Sample sources and the processors that turn a sample id into an
//! [`EvaluationRecord`].
//!
//! Inputs are laid out the way the extraction tools leave them:
//!
//! - a ground-truth CSV with one row per sample (`pdfName,groundTruth` or
//!   `sample_id,ground_truth` headers; extra columns are ignored);
//! - a directory of extracted texts named `<sample_id>.txt`.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use gt_core::types::EvaluationRecord;
use gt_harness::invoker::{InvokeError, RetryingInvoker};
use gt_harness::provider::InvocationPayload;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::batch::SampleProcessor;
use crate::similarity::{round2, score};

/// Instruction sent ahead of the extracted text by [`ModelProcessor`].
pub const DEFAULT_INSTRUCTION: &str = "Reproduce the content of the following document \
as plain text. Keep every number, label and table value exactly as written and do not \
add commentary.";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why one sample could not be evaluated. None of these stop a run.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("file not found: {}, skipping", path.display())]
    NotFound { sample_id: String, path: PathBuf },

    #[error("no ground truth for sample {0}")]
    MissingGroundTruth(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Invocation(#[from] InvokeError),
}

// ---------------------------------------------------------------------------
// GroundTruthTable
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GroundTruthRow {
    #[serde(alias = "pdfName")]
    sample_id: String,
    #[serde(alias = "groundTruth")]
    ground_truth: String,
}

/// Reference texts keyed by sample id, in file order.
///
/// When an id appears more than once the first row wins.
#[derive(Debug, Clone, Default)]
pub struct GroundTruthTable {
    order: Vec<String>,
    entries: HashMap<String, String>,
}

impl GroundTruthTable {
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, csv::Error> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(reader);
        let mut table = Self::default();
        for row in rdr.deserialize::<GroundTruthRow>() {
            let row = row?;
            let id = row.sample_id.trim().to_string();
            if table.entries.contains_key(&id) {
                debug!(sample_id = %id, "duplicate ground-truth row ignored");
                continue;
            }
            table.order.push(id.clone());
            table.entries.insert(id, row.ground_truth);
        }
        Ok(table)
    }

    /// Sample ids in file order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, sample_id: &str) -> Option<&str> {
        self.entries.get(sample_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ExtractedTextDir
// ---------------------------------------------------------------------------

/// Directory of extracted texts, one `<sample_id>.txt` per sample.
#[derive(Debug, Clone)]
pub struct ExtractedTextDir {
    dir: PathBuf,
}

impl ExtractedTextDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, sample_id: &str) -> PathBuf {
        self.dir.join(format!("{sample_id}.txt"))
    }

    /// Read the extracted text for `sample_id`, trimmed.
    pub async fn read(&self, sample_id: &str) -> Result<String, SampleError> {
        let path = self.path_for(sample_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SampleError::NotFound {
                sample_id: sample_id.to_string(),
                path,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the record for one sample, scoring `output` against `ground_truth`.
pub fn build_record(sample_id: &str, output: String, ground_truth: &str) -> EvaluationRecord {
    let similarity = round2(score(ground_truth, &output));
    EvaluationRecord::new(sample_id, output, ground_truth, similarity)
}

// ---------------------------------------------------------------------------
// Processors
// ---------------------------------------------------------------------------

/// Scores the extracted text itself: the extraction output is the output
/// under evaluation.
pub struct PassthroughProcessor {
    ground_truth: Arc<GroundTruthTable>,
    texts: ExtractedTextDir,
}

impl PassthroughProcessor {
    pub fn new(ground_truth: Arc<GroundTruthTable>, texts: ExtractedTextDir) -> Self {
        Self {
            ground_truth,
            texts,
        }
    }
}

#[async_trait]
impl SampleProcessor for PassthroughProcessor {
    async fn process(&self, sample_id: &str) -> Result<EvaluationRecord, SampleError> {
        let text = self.texts.read(sample_id).await?;
        let truth = self
            .ground_truth
            .get(sample_id)
            .ok_or_else(|| SampleError::MissingGroundTruth(sample_id.to_string()))?;
        Ok(build_record(sample_id, text, truth))
    }
}

/// Sends an instruction plus the extracted text through a
/// [`RetryingInvoker`] and scores the model's reply.
pub struct ModelProcessor {
    ground_truth: Arc<GroundTruthTable>,
    texts: ExtractedTextDir,
    invoker: Arc<RetryingInvoker>,
    model_id: String,
    output_tokens: u32,
    instruction: String,
}

impl ModelProcessor {
    pub fn new(
        ground_truth: Arc<GroundTruthTable>,
        texts: ExtractedTextDir,
        invoker: Arc<RetryingInvoker>,
        model_id: impl Into<String>,
        output_tokens: u32,
    ) -> Self {
        Self {
            ground_truth,
            texts,
            invoker,
            model_id: model_id.into(),
            output_tokens,
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    fn payload(&self, text: String) -> InvocationPayload {
        InvocationPayload::new(self.model_id.clone(), self.output_tokens)
            .with_text(self.instruction.clone())
            .with_text(text)
    }
}

#[async_trait]
impl SampleProcessor for ModelProcessor {
    async fn process(&self, sample_id: &str) -> Result<EvaluationRecord, SampleError> {
        let text = self.texts.read(sample_id).await?;
        let truth = self
            .ground_truth
            .get(sample_id)
            .ok_or_else(|| SampleError::MissingGroundTruth(sample_id.to_string()))?;
        let output = self.invoker.invoke(self.payload(text)).await?;
        Ok(build_record(sample_id, output, truth))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_reads_original_headers() {
        let csv = "pdfName,groundTruth,notes\njefferies8,Revenue grew 10 percent,x\njefferies9,Net loss,\n";
        let table = GroundTruthTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.ids(), ["jefferies8", "jefferies9"]);
        assert_eq!(table.get("jefferies8"), Some("Revenue grew 10 percent"));
        assert!(table.get("jefferies10").is_none());
    }

    #[test]
    fn table_reads_snake_case_headers_and_keeps_first_duplicate() {
        let csv = "sample_id , ground_truth\na,first\nb,only\na,second\n";
        let table = GroundTruthTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a"), Some("first"));
    }

    #[test]
    fn table_missing_column_is_error() {
        let csv = "pdfName,other\na,b\n";
        assert!(GroundTruthTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn build_record_rounds_score() {
        let record = build_record("s", "a".to_string(), "a a b");
        assert_eq!(record.similarity(), 66.67);
        assert_eq!(record.model_output, "a");
        assert_eq!(record.ground_truth, "a a b");
    }

    #[tokio::test]
    async fn missing_text_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let texts = ExtractedTextDir::new(dir.path());
        let err = texts.read("ghost").await.unwrap_err();
        match err {
            SampleError::NotFound { sample_id, path } => {
                assert_eq!(sample_id, "ghost");
                assert!(path.ends_with("ghost.txt"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s1.txt"), "\n  body text \n").unwrap();
        let texts = ExtractedTextDir::new(dir.path());
        assert_eq!(texts.read("s1").await.unwrap(), "body text");
    }
}
