use std::sync::Arc;

use chrono::Utc;
use contextdoc_core::{
    build_chunk_prompt, Chunk, ChunkError, ChunkOutcome, ChunkPrompt, Chunker, CoreError,
    DocumentType, Failure, FailureKind, GenerationRecord, GenerationStatus, InputRecord,
    OutputBuffer, RecordKey, RecordPatch, RunOutcome,
};
use contextdoc_llm::{Generation, ProviderError, TextGenerator};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::gate::UsageGate;
use crate::progress::{ProgressEvent, ProgressReporter, ReportError};
use crate::store::{run_blocking, LedgerStore, RecordStore, StoreError};

const CANCELLED_CHUNK_MESSAGE: &str = "cancelled before processing";

/// One generation attempt as handed over by an entry point.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub key: RecordKey,
    pub document_type: Option<String>,
    pub input: InputRecord,
}

struct Prepared {
    document_type: DocumentType,
    chunks: Vec<Chunk>,
}

/// Running totals of a pass over the chunks.
struct Tally {
    total_chunks: usize,
    processed: usize,
    tokens_used: u64,
    buffer: OutputBuffer,
    chunk_errors: Vec<ChunkError>,
    cancelled: bool,
}

impl Tally {
    fn new(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            processed: 0,
            tokens_used: 0,
            buffer: OutputBuffer::new(),
            chunk_errors: Vec::new(),
            cancelled: false,
        }
    }

    /// Folds one attempted chunk into the totals and returns its event.
    fn record(&mut self, outcome: ChunkOutcome) -> ProgressEvent {
        self.processed += 1;
        let index = outcome.index();
        match outcome {
            ChunkOutcome::Generated {
                content,
                tokens_used,
                ..
            } => {
                debug!(chunk = index, tokens = tokens_used, "chunk generated");
                self.tokens_used += tokens_used;
                self.buffer.push(index, content.as_str());
                ProgressEvent::ChunkResult {
                    index,
                    total_chunks: self.total_chunks,
                    content,
                    tokens_used,
                }
            }
            ChunkOutcome::Failed { message, .. } => {
                warn!(chunk = index, error = %message, "chunk failed");
                self.chunk_errors.push(ChunkError {
                    index,
                    message: message.clone(),
                });
                ProgressEvent::ChunkError {
                    index,
                    total_chunks: self.total_chunks,
                    message,
                }
            }
        }
    }

    fn cancel_from(&mut self, index: usize) {
        self.cancelled = true;
        for remaining in index..self.total_chunks {
            self.chunk_errors.push(ChunkError {
                index: remaining,
                message: CANCELLED_CHUNK_MESSAGE.to_string(),
            });
        }
    }

    fn progress_patch(&self) -> RecordPatch {
        RecordPatch {
            tokens_used: Some(self.tokens_used),
            chunk_errors: Some(self.chunk_errors.clone()),
            processed_chunks: Some(self.processed),
            ..Default::default()
        }
    }
}

/// Drives chunking, prompting, generation and record bookkeeping for a run.
///
/// Chunks are processed strictly in order: each prompt carries the tail of
/// the output produced so far.
pub struct Pipeline {
    config: PipelineConfig,
    generator: Arc<dyn TextGenerator>,
    records: Arc<dyn RecordStore>,
    gate: UsageGate,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        generator: Arc<dyn TextGenerator>,
        records: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        let gate = UsageGate::new(ledger, config.token_policy);
        Self {
            config,
            generator,
            records,
            gate,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn gate(&self) -> &UsageGate {
        &self.gate
    }

    /// Runs one generation attempt to a terminal state.
    ///
    /// Errors raised before processing starts leave the record in `error`
    /// and are returned; once processing starts, chunk failures are data on
    /// the returned record.
    pub async fn run(
        &self,
        request: GenerationRequest,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<GenerationRecord, PipelineError> {
        let span = tracing::info_span!(
            "generation",
            owner = %request.key.owner_id,
            wizard = %request.key.wizard_id
        );
        self.run_inner(request, reporter, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        request: GenerationRequest,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<GenerationRecord, PipelineError> {
        let key = request.key.clone();
        let pending = GenerationRecord::pending(key.clone(), Utc::now());
        let stored =
            run_blocking(&self.records, move |records| records.create_if_absent(pending)).await?;
        if stored.status != GenerationStatus::Pending {
            return Err(PipelineError::AlreadyStarted {
                key,
                status: stored.status,
            });
        }

        let prepared = match self.prepare(&request).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.reject(&key, err, reporter).await),
        };
        let total_chunks = prepared.chunks.len();
        let start = ProgressEvent::Start { total_chunks };
        let claimed = self
            .transition(
                &key,
                GenerationStatus::Pending,
                GenerationStatus::Processing,
                RecordPatch {
                    document_type: Some(prepared.document_type),
                    total_chunks: Some(total_chunks),
                    progress: Some(start.snapshot()),
                    ..Default::default()
                },
            )
            .await?;
        if claimed.is_none() {
            let lookup = key.clone();
            let status = run_blocking(&self.records, move |records| records.get(&lookup))
                .await?
                .map(|record| record.status)
                .unwrap_or(GenerationStatus::Pending);
            return Err(PipelineError::AlreadyStarted { key, status });
        }
        info!(
            document_type = %prepared.document_type,
            total_chunks,
            generator = %self.generator.label(),
            "generation started"
        );
        self.emit(reporter, &start).await;

        let finished = match self
            .process_chunks(&key, &prepared, &request.input, reporter, cancel)
            .await
        {
            Ok(tally) => self.finish(&key, tally, reporter).await,
            Err(err) => Err(err),
        };
        match finished {
            Ok(record) => Ok(record),
            Err(err) => {
                self.abort(&key, &err, total_chunks, reporter).await;
                Err(err)
            }
        }
    }

    async fn prepare(&self, request: &GenerationRequest) -> Result<Prepared, PipelineError> {
        let tag = request
            .document_type
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| CoreError::InvalidInput("document type is missing".to_string()))?;
        let document_type: DocumentType = tag.parse()?;
        if request.input.is_blank() {
            return Err(CoreError::EmptyInput.into());
        }
        let usage = self.gate.authorize(&request.key.owner_id).await?;
        debug!(
            documents_remaining = usage.documents_remaining,
            tokens_remaining = usage.tokens_remaining,
            reset_due = usage.reset_due,
            "usage authorized"
        );
        let chunker = Chunker::new(&self.config.chunk_config())?;
        let chunks = chunker.chunk(&request.input.serialize_for_chunking())?;
        if chunks.is_empty() {
            return Err(CoreError::EmptyInput.into());
        }
        Ok(Prepared {
            document_type,
            chunks,
        })
    }

    async fn process_chunks(
        &self,
        key: &RecordKey,
        prepared: &Prepared,
        input: &InputRecord,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Tally, PipelineError> {
        let mut tally = Tally::new(prepared.chunks.len());
        for chunk in &prepared.chunks {
            if cancel.is_cancelled() {
                tally.cancel_from(chunk.index);
                break;
            }
            self.emit(
                reporter,
                &ProgressEvent::ChunkProcessing {
                    index: chunk.index,
                    total_chunks: tally.total_chunks,
                },
            )
            .await;
            let tail = tally.buffer.tail(self.config.context_tail_chars);
            let prompt = build_chunk_prompt(
                prepared.document_type,
                input,
                chunk,
                Some(tail.as_str()),
                self.config.summary_chars,
            );
            // A generation that is ready in the same poll as the cancellation
            // is kept.
            let result = tokio::select! {
                biased;
                result = self.call_generator(&prompt) => Some(result),
                _ = cancel.cancelled() => None,
            };
            let Some(result) = result else {
                info!(chunk = chunk.index, "generation cancelled");
                tally.cancel_from(chunk.index);
                break;
            };
            let outcome = match result {
                Ok(generation) if !generation.content.trim().is_empty() => {
                    ChunkOutcome::Generated {
                        index: chunk.index,
                        content: generation.content,
                        tokens_used: generation.tokens_used,
                    }
                }
                Ok(generation) => {
                    tally.tokens_used += generation.tokens_used;
                    ChunkOutcome::Failed {
                        index: chunk.index,
                        message: "provider returned empty content".to_string(),
                    }
                }
                Err(err) => ChunkOutcome::Failed {
                    index: chunk.index,
                    message: err.message(),
                },
            };
            let event = tally.record(outcome);
            let (merge_key, patch) = (key.clone(), tally.progress_patch());
            run_blocking(&self.records, move |records| records.merge(&merge_key, patch)).await?;
            self.emit(reporter, &event).await;
        }
        Ok(tally)
    }

    async fn call_generator(&self, prompt: &ChunkPrompt) -> Result<Generation, ProviderError> {
        let call = self
            .generator
            .generate(&prompt.instructions, &prompt.content);
        match self.config.chunk_timeout() {
            Some(limit) => timeout(limit, call)
                .await
                .unwrap_or(Err(ProviderError::Timeout { after: limit })),
            None => call.await,
        }
    }

    async fn finish(
        &self,
        key: &RecordKey,
        tally: Tally,
        reporter: &dyn ProgressReporter,
    ) -> Result<GenerationRecord, PipelineError> {
        let outcome = RunOutcome::classify(tally.buffer.len(), tally.chunk_errors.len());
        let failure = if tally.cancelled {
            Some(Failure::new(
                FailureKind::Cancelled,
                format!(
                    "cancelled after {} of {} chunks",
                    tally.processed, tally.total_chunks
                ),
            ))
        } else if outcome == RunOutcome::Failed {
            Some(Failure::new(
                FailureKind::AllChunksFailed,
                format!("all {} chunks failed", tally.total_chunks),
            ))
        } else {
            None
        };
        let status = outcome.status();
        let end = ProgressEvent::End {
            status,
            total_chunks: tally.total_chunks,
            tokens_used: tally.tokens_used,
            chunk_errors: tally.chunk_errors.clone(),
            failure: failure.clone(),
        };
        let content = if outcome.produced_document() {
            tally.buffer.join()
        } else {
            String::new()
        };
        let record = self
            .transition(
                key,
                GenerationStatus::Processing,
                status,
                RecordPatch {
                    generated_content: Some(content),
                    failure,
                    progress: Some(end.snapshot()),
                    ..tally.progress_patch()
                },
            )
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{key} is no longer processing")))?;

        if outcome.produced_document() {
            if let Err(err) = self.gate.charge(&key.owner_id, tally.tokens_used).await {
                error!(error = %err, tokens = tally.tokens_used, "failed to charge usage");
            }
        }
        info!(
            status = %status,
            tokens_used = tally.tokens_used,
            chunk_errors = tally.chunk_errors.len(),
            "generation finished"
        );
        self.emit(reporter, &end).await;
        Ok(record)
    }

    /// Persists a fatal pre-processing error as `pending -> error`.
    async fn reject(
        &self,
        key: &RecordKey,
        err: PipelineError,
        reporter: &dyn ProgressReporter,
    ) -> PipelineError {
        let failure = err.failure();
        warn!(kind = ?failure.kind, reason = %failure.message, "generation rejected");
        let end = ProgressEvent::End {
            status: GenerationStatus::Error,
            total_chunks: 0,
            tokens_used: 0,
            chunk_errors: Vec::new(),
            failure: Some(failure.clone()),
        };
        let patch = RecordPatch {
            failure: Some(failure),
            progress: Some(end.snapshot()),
            ..Default::default()
        };
        match self
            .transition(key, GenerationStatus::Pending, GenerationStatus::Error, patch)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => debug!("record left pending before the rejection was stored"),
            Err(store_err) => error!(error = %store_err, "failed to persist rejection"),
        }
        self.emit(reporter, &end).await;
        err
    }

    /// Leaves a record that failed mid-run in `error` instead of `processing`.
    async fn abort(
        &self,
        key: &RecordKey,
        err: &PipelineError,
        total_chunks: usize,
        reporter: &dyn ProgressReporter,
    ) {
        error!(error = %err, "generation aborted");
        let failure = Failure::new(FailureKind::Internal, err.to_string());
        let end = ProgressEvent::End {
            status: GenerationStatus::Error,
            total_chunks,
            tokens_used: 0,
            chunk_errors: Vec::new(),
            failure: Some(failure.clone()),
        };
        let patch = RecordPatch {
            failure: Some(failure),
            progress: Some(end.snapshot()),
            ..Default::default()
        };
        if let Err(store_err) = self
            .transition(key, GenerationStatus::Processing, GenerationStatus::Error, patch)
            .await
        {
            error!(error = %store_err, "failed to persist aborted generation");
        }
        self.emit(reporter, &end).await;
    }

    async fn transition(
        &self,
        key: &RecordKey,
        expected: GenerationStatus,
        next: GenerationStatus,
        patch: RecordPatch,
    ) -> Result<Option<GenerationRecord>, StoreError> {
        let key = key.clone();
        run_blocking(&self.records, move |records| {
            records.compare_and_set_status(&key, expected, next, patch)
        })
        .await
    }

    async fn emit(&self, reporter: &dyn ProgressReporter, event: &ProgressEvent) {
        match reporter.report(event).await {
            Ok(()) => {}
            Err(ReportError::Closed) => {
                debug!(event = event.name(), "progress receiver gone")
            }
            Err(err) => warn!(event = event.name(), error = %err, "progress report failed"),
        }
    }
}
