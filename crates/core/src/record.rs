use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::DocumentType;
use crate::error::{CoreError, Result};

/// Lifecycle of one generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Complete,
    CompleteWithErrors,
    Error,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Complete => "complete",
            GenerationStatus::CompleteWithErrors => "complete_with_errors",
            GenerationStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(GenerationStatus::Pending),
            "processing" => Some(GenerationStatus::Processing),
            "complete" => Some(GenerationStatus::Complete),
            "complete_with_errors" => Some(GenerationStatus::CompleteWithErrors),
            "error" => Some(GenerationStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationStatus::Complete
                | GenerationStatus::CompleteWithErrors
                | GenerationStatus::Error
        )
    }

    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Error)
                | (Processing, Processing)
                | (Processing, Complete)
                | (Processing, CompleteWithErrors)
                | (Processing, Error)
        )
    }

    /// Validated edge of the state machine; terminal states have no exits and
    /// nothing leads back to `Pending`.
    pub fn transition(self, next: GenerationStatus) -> Result<GenerationStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal classification of a processed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    CompleteWithErrors,
    Failed,
}

impl RunOutcome {
    pub fn classify(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, _) => RunOutcome::Failed,
            (_, 0) => RunOutcome::Complete,
            _ => RunOutcome::CompleteWithErrors,
        }
    }

    pub fn status(&self) -> GenerationStatus {
        match self {
            RunOutcome::Complete => GenerationStatus::Complete,
            RunOutcome::CompleteWithErrors => GenerationStatus::CompleteWithErrors,
            RunOutcome::Failed => GenerationStatus::Error,
        }
    }

    pub fn produced_document(&self) -> bool {
        !matches!(self, RunOutcome::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub owner_id: String,
    pub wizard_id: String,
}

impl RecordKey {
    pub fn new(owner_id: impl Into<String>, wizard_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            wizard_id: wizard_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.wizard_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Generated {
        index: usize,
        content: String,
        tokens_used: u64,
    },
    Failed {
        index: usize,
        message: String,
    },
}

impl ChunkOutcome {
    pub fn index(&self) -> usize {
        match self {
            ChunkOutcome::Generated { index, .. } | ChunkOutcome::Failed { index, .. } => *index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    UnsupportedModel,
    InvalidInput,
    SubscriptionInactive,
    DocumentLimitReached,
    TokenAllowanceExhausted,
    AllChunksFailed,
    Cancelled,
    Internal,
}

impl FailureKind {
    /// Quota denials ask the user to upgrade rather than retry.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            FailureKind::SubscriptionInactive
                | FailureKind::DocumentLimitReached
                | FailureKind::TokenAllowanceExhausted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&CoreError> for Failure {
    fn from(err: &CoreError) -> Self {
        let kind = match err {
            CoreError::Configuration(_) => FailureKind::Configuration,
            CoreError::UnsupportedModel(_) => FailureKind::UnsupportedModel,
            CoreError::UnknownDocumentType(_)
            | CoreError::EmptyInput
            | CoreError::InvalidInput(_) => FailureKind::InvalidInput,
            CoreError::InvalidTransition { .. } | CoreError::Tokenizer(_) => FailureKind::Internal,
        };
        Failure::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Started,
    Generating,
    Finished,
}

/// Latest progress as seen by observers of the persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub phase: ProgressPhase,
    pub current_chunk: Option<usize>,
    pub total_chunks: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub key: RecordKey,
    #[serde(default)]
    pub document_type: Option<DocumentType>,
    pub status: GenerationStatus,
    #[serde(default)]
    pub generated_content: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub chunk_errors: Vec<ChunkError>,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub processed_chunks: usize,
    #[serde(default)]
    pub failure: Option<Failure>,
    #[serde(default)]
    pub progress: Option<ProgressSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationRecord {
    pub fn pending(key: RecordKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            document_type: None,
            status: GenerationStatus::Pending,
            generated_content: String::new(),
            tokens_used: 0,
            chunk_errors: Vec::new(),
            total_chunks: 0,
            processed_chunks: 0,
            failure: None,
            progress: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Moves the record along a validated edge, stamping completion time on
    /// terminal states.
    pub fn advance(&mut self, next: GenerationStatus, now: DateTime<Utc>) -> Result<()> {
        self.status = self.status.transition(next)?;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn apply(&mut self, patch: RecordPatch, now: DateTime<Utc>) {
        if let Some(document_type) = patch.document_type {
            self.document_type = Some(document_type);
        }
        if let Some(content) = patch.generated_content {
            self.generated_content = content;
        }
        if let Some(tokens) = patch.tokens_used {
            self.tokens_used = tokens;
        }
        if let Some(errors) = patch.chunk_errors {
            self.chunk_errors = errors;
        }
        if let Some(total) = patch.total_chunks {
            self.total_chunks = total;
        }
        if let Some(processed) = patch.processed_chunks {
            self.processed_chunks = processed;
        }
        if let Some(failure) = patch.failure {
            self.failure = Some(failure);
        }
        if let Some(progress) = patch.progress {
            self.progress = Some(progress);
        }
        self.updated_at = now;
    }
}

/// Partial update merged into a stored record; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub document_type: Option<DocumentType>,
    pub generated_content: Option<String>,
    pub tokens_used: Option<u64>,
    pub chunk_errors: Option<Vec<ChunkError>>,
    pub total_chunks: Option<usize>,
    pub processed_chunks: Option<usize>,
    pub failure: Option<Failure>,
    pub progress: Option<ProgressSnapshot>,
}

impl RecordPatch {
    pub fn progress(snapshot: ProgressSnapshot) -> Self {
        Self {
            progress: Some(snapshot),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GenerationStatus::*;

    #[test]
    fn chunk_outcome_reports_its_index() {
        let generated = ChunkOutcome::Generated {
            index: 2,
            content: "text".to_string(),
            tokens_used: 4,
        };
        let failed = ChunkOutcome::Failed {
            index: 5,
            message: "timeout".to_string(),
        };
        assert_eq!(generated.index(), 2);
        assert_eq!(failed.index(), 5);
    }

    #[test]
    fn quota_kinds_are_flagged() {
        assert!(FailureKind::DocumentLimitReached.is_quota());
        assert!(FailureKind::SubscriptionInactive.is_quota());
        assert!(!FailureKind::InvalidInput.is_quota());
        assert!(!FailureKind::Cancelled.is_quota());
    }

    #[test]
    fn allowed_transitions() {
        assert_eq!(Pending.transition(Processing).unwrap(), Processing);
        assert_eq!(Pending.transition(Error).unwrap(), Error);
        assert_eq!(Processing.transition(Processing).unwrap(), Processing);
        assert_eq!(Processing.transition(Complete).unwrap(), Complete);
        assert_eq!(
            Processing.transition(CompleteWithErrors).unwrap(),
            CompleteWithErrors
        );
        assert_eq!(Processing.transition(Error).unwrap(), Error);
    }

    #[test]
    fn rejected_transitions() {
        for terminal in [Complete, CompleteWithErrors, Error] {
            for next in [Pending, Processing, Complete, CompleteWithErrors, Error] {
                assert!(terminal.transition(next).is_err(), "{terminal} -> {next}");
            }
        }
        assert!(Processing.transition(Pending).is_err());
        assert!(Pending.transition(Complete).is_err());
        assert!(Pending.transition(Pending).is_err());
    }

    #[test]
    fn classify_outcomes() {
        assert_eq!(RunOutcome::classify(3, 0), RunOutcome::Complete);
        assert_eq!(RunOutcome::classify(3, 2), RunOutcome::CompleteWithErrors);
        assert_eq!(RunOutcome::classify(0, 3), RunOutcome::Failed);
        assert_eq!(RunOutcome::classify(0, 0), RunOutcome::Failed);
        assert_eq!(RunOutcome::Failed.status(), Error);
    }

    #[test]
    fn status_serde_names() {
        assert_eq!(
            serde_json::to_string(&CompleteWithErrors).unwrap(),
            "\"complete_with_errors\""
        );
        for status in [Pending, Processing, Complete, CompleteWithErrors, Error] {
            assert_eq!(GenerationStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn advance_stamps_completion() {
        let now = Utc::now();
        let mut record = GenerationRecord::pending(RecordKey::new("u1", "w1"), now);
        record.advance(Processing, now).unwrap();
        assert!(record.completed_at.is_none());
        record.advance(Complete, now).unwrap();
        assert_eq!(record.completed_at, Some(now));
        assert!(record.advance(Processing, now).is_err());
        assert_eq!(record.status, Complete);
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let now = Utc::now();
        let mut record = GenerationRecord::pending(RecordKey::new("u1", "w1"), now);
        record.generated_content = "kept".to_string();
        record.apply(
            RecordPatch {
                tokens_used: Some(42),
                processed_chunks: Some(2),
                ..Default::default()
            },
            now,
        );
        assert_eq!(record.generated_content, "kept");
        assert_eq!(record.tokens_used, 42);
        assert_eq!(record.processed_chunks, 2);
    }

    #[test]
    fn record_json_uses_camel_case() {
        let now = Utc::now();
        let record = GenerationRecord::pending(RecordKey::new("u1", "w1"), now);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["key"]["ownerId"], "u1");
        assert_eq!(value["status"], "pending");
        assert!(value.get("chunkErrors").is_some());
    }
}
