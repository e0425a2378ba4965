//! Progress sinks.
//!
//! The processor emits the same ordered events whichever sink is plugged in:
//! `start`, then `chunk_processing` followed by `chunk_result` or
//! `chunk_error` per chunk, then `end`. Delivery is best-effort; the stored
//! generation record is the source of truth.

use std::sync::Arc;

use async_trait::async_trait;
use contextdoc_core::{
    ChunkError, Failure, GenerationStatus, ProgressPhase, ProgressSnapshot, RecordKey,
    RecordPatch,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::store::{run_blocking, RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Start {
        total_chunks: usize,
    },
    ChunkProcessing {
        index: usize,
        total_chunks: usize,
    },
    ChunkResult {
        index: usize,
        total_chunks: usize,
        content: String,
        tokens_used: u64,
    },
    ChunkError {
        index: usize,
        total_chunks: usize,
        message: String,
    },
    End {
        status: GenerationStatus,
        total_chunks: usize,
        tokens_used: u64,
        chunk_errors: Vec<ChunkError>,
        failure: Option<Failure>,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::ChunkProcessing { .. } => "chunk_processing",
            ProgressEvent::ChunkResult { .. } => "chunk_result",
            ProgressEvent::ChunkError { .. } => "chunk_error",
            ProgressEvent::End { .. } => "end",
        }
    }

    /// The same information expressed as a record field update.
    pub fn snapshot(&self) -> ProgressSnapshot {
        match self {
            ProgressEvent::Start { total_chunks } => ProgressSnapshot {
                phase: ProgressPhase::Started,
                current_chunk: None,
                total_chunks: *total_chunks,
                message: format!("Starting generation of {total_chunks} chunks"),
            },
            ProgressEvent::ChunkProcessing {
                index,
                total_chunks,
            } => ProgressSnapshot {
                phase: ProgressPhase::Generating,
                current_chunk: Some(*index),
                total_chunks: *total_chunks,
                message: format!("Processing chunk {} of {total_chunks}", index + 1),
            },
            ProgressEvent::ChunkResult {
                index,
                total_chunks,
                ..
            } => ProgressSnapshot {
                phase: ProgressPhase::Generating,
                current_chunk: Some(*index),
                total_chunks: *total_chunks,
                message: format!("Finished chunk {} of {total_chunks}", index + 1),
            },
            ProgressEvent::ChunkError {
                index,
                total_chunks,
                message,
            } => ProgressSnapshot {
                phase: ProgressPhase::Generating,
                current_chunk: Some(*index),
                total_chunks: *total_chunks,
                message: format!("Chunk {} of {total_chunks} failed: {message}", index + 1),
            },
            ProgressEvent::End {
                status,
                total_chunks,
                failure,
                ..
            } => ProgressSnapshot {
                phase: ProgressPhase::Finished,
                current_chunk: None,
                total_chunks: *total_chunks,
                message: match failure {
                    Some(failure) => format!("Generation {status}: {}", failure.message),
                    None => format!("Generation {status}"),
                },
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("progress receiver closed")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, event: &ProgressEvent) -> Result<(), ReportError>;
}

/// Pushes events to a live connection.
pub struct StreamReporter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl StreamReporter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ProgressReporter for StreamReporter {
    async fn report(&self, event: &ProgressEvent) -> Result<(), ReportError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| ReportError::Closed)
    }
}

/// Writes progress into the stored record for observers without a live
/// connection.
pub struct RecordReporter {
    store: Arc<dyn RecordStore>,
    key: RecordKey,
}

impl RecordReporter {
    pub fn new(store: Arc<dyn RecordStore>, key: RecordKey) -> Self {
        Self { store, key }
    }
}

#[async_trait]
impl ProgressReporter for RecordReporter {
    async fn report(&self, event: &ProgressEvent) -> Result<(), ReportError> {
        let key = self.key.clone();
        let patch = RecordPatch::progress(event.snapshot());
        run_blocking(&self.store, move |store| store.merge(&key, patch)).await?;
        Ok(())
    }
}

pub struct NullReporter;

#[async_trait]
impl ProgressReporter for NullReporter {
    async fn report(&self, _event: &ProgressEvent) -> Result<(), ReportError> {
        Ok(())
    }
}
