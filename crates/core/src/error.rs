use thiserror::Error;

use crate::record::GenerationStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid chunking configuration: {0}")]
    Configuration(String),
    #[error("no tokenizer known for model {0:?}")]
    UnsupportedModel(String),
    #[error("unknown document type {0:?}")]
    UnknownDocumentType(String),
    #[error("input record is empty")]
    EmptyInput,
    #[error("invalid input record: {0}")]
    InvalidInput(String),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: GenerationStatus,
        to: GenerationStatus,
    },
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
