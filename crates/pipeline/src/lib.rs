//! Chunked document generation: usage checks, ordered chunk processing with
//! carried context, progress reporting and record bookkeeping.

pub mod config;
pub mod error;
pub mod gate;
pub mod processor;
pub mod progress;
pub mod store;

pub use config::PipelineConfig;
pub use contextdoc_llm::{Generation, ProviderError, TextGenerator};
pub use error::PipelineError;
pub use gate::{TokenPolicy, UsageError, UsageGate, UsageStatus};
pub use processor::{GenerationRequest, Pipeline};
pub use progress::{
    NullReporter, ProgressEvent, ProgressReporter, RecordReporter, ReportError, StreamReporter,
};
pub use store::{
    run_blocking, LedgerStore, MemoryStore, RecordStore, SqliteStore, StoreError, Submission,
    SubmissionStore,
};
