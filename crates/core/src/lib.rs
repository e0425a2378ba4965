mod chunk;
mod document;
mod error;
mod input;
mod output;
mod prompt;
mod record;
mod tokenizer;
mod usage;

pub use chunk::{chunk_text, token_windows, Chunk, ChunkConfig, Chunker};
pub use document::{DocumentTemplate, DocumentType};
pub use error::{CoreError, Result};
pub use input::InputRecord;
pub use output::{OutputBuffer, PART_SEPARATOR};
pub use prompt::{build_chunk_prompt, ChunkPosition, ChunkPrompt, DEFAULT_SUMMARY_CHARS};
pub use record::{
    ChunkError, ChunkOutcome, Failure, FailureKind, GenerationRecord, GenerationStatus,
    ProgressPhase, ProgressSnapshot, RecordKey, RecordPatch, RunOutcome,
};
pub use tokenizer::TokenizerKind;
pub use usage::UsageLedger;
