//! Persistence seams consumed by the pipeline.
//!
//! Generation records are keyed by `(owner, wizard)` and offer get / set /
//! merge semantics plus a status compare-and-set used to claim a run. Usage
//! ledgers expose atomic increments only. Both a SQLite and an in-memory
//! backend implement every trait.

mod memory;
mod sqlite;

use std::sync::Arc;

use contextdoc_core::{
    CoreError, GenerationRecord, GenerationStatus, InputRecord, RecordKey, RecordPatch,
    UsageLedger,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] CoreError),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs a store call on the blocking thread pool.
///
/// Backends may open connections and wait on locks, so async callers never
/// invoke them on a runtime worker directly.
pub async fn run_blocking<S, T, F>(store: &Arc<S>, op: F) -> Result<T, StoreError>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(&store)).await?
}

pub trait RecordStore: Send + Sync {
    fn get(&self, key: &RecordKey) -> Result<Option<GenerationRecord>, StoreError>;

    /// Inserts `record` unless one already exists for its key; returns the
    /// stored record either way.
    fn create_if_absent(&self, record: GenerationRecord) -> Result<GenerationRecord, StoreError>;

    fn set(&self, record: &GenerationRecord) -> Result<(), StoreError>;

    /// Merges the present fields of `patch` into the stored record.
    fn merge(&self, key: &RecordKey, patch: RecordPatch) -> Result<GenerationRecord, StoreError>;

    /// Atomically moves the record from `expected` to `next` and applies
    /// `patch`. Returns `None` without writing when the stored status is not
    /// `expected`.
    fn compare_and_set_status(
        &self,
        key: &RecordKey,
        expected: GenerationStatus,
        next: GenerationStatus,
        patch: RecordPatch,
    ) -> Result<Option<GenerationRecord>, StoreError>;
}

pub trait LedgerStore: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<UsageLedger>, StoreError>;

    /// Adds to the counters without a read-modify-write window.
    fn increment(
        &self,
        user_id: &str,
        tokens: u64,
        documents: u32,
    ) -> Result<UsageLedger, StoreError>;
}

/// Answers submitted through the wizard, as handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub document_type: Option<String>,
    pub input: InputRecord,
}

pub trait SubmissionStore: Send + Sync {
    fn save_submission(&self, key: &RecordKey, submission: &Submission) -> Result<(), StoreError>;

    fn load_submission(&self, key: &RecordKey) -> Result<Option<Submission>, StoreError>;
}

/// Shared body of the compare-and-set used by both backends.
fn apply_transition(
    record: &mut GenerationRecord,
    expected: GenerationStatus,
    next: GenerationStatus,
    patch: RecordPatch,
) -> Result<bool, StoreError> {
    if record.status != expected {
        return Ok(false);
    }
    let now = chrono::Utc::now();
    record.advance(next, now)?;
    record.apply(patch, now);
    Ok(true)
}
