use contextdoc_core::{CoreError, Failure, FailureKind, GenerationStatus, RecordKey};
use thiserror::Error;

use crate::gate::UsageError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The record for this key is already being processed or has finished.
    #[error("generation {key} already started (status {status})")]
    AlreadyStarted {
        key: RecordKey,
        status: GenerationStatus,
    },
    #[error(transparent)]
    Input(#[from] CoreError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Failure persisted on the record for errors raised before processing.
    pub fn failure(&self) -> Failure {
        match self {
            PipelineError::Input(err) => Failure::from(err),
            PipelineError::Usage(err) => err.failure(),
            PipelineError::AlreadyStarted { .. } | PipelineError::Store(_) => {
                Failure::new(FailureKind::Internal, self.to_string())
            }
        }
    }
}
