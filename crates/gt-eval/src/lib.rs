pub mod batch;
pub mod pipeline;
pub mod result_store;
pub mod similarity;

// Re-export the types most callers wire together.
pub use batch::{BatchRunner, RunError, RunObserver, RunSummary, SampleEvent, SampleProcessor};
pub use pipeline::{
    build_record, ExtractedTextDir, GroundTruthTable, ModelProcessor, PassthroughProcessor,
    SampleError,
};
pub use result_store::{ResultStore, StoreError};
pub use similarity::{normalize_text, weighted_token_similarity};
