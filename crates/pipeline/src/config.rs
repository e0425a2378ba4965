use std::time::Duration;

use contextdoc_core::{ChunkConfig, Chunker, DEFAULT_SUMMARY_CHARS};
use serde::Deserialize;

use crate::gate::TokenPolicy;

pub const DEFAULT_MAX_TOKENS_PER_CHUNK: usize = 2000;
pub const DEFAULT_OVERLAP_TOKENS: usize = 200;
pub const DEFAULT_CONTEXT_TAIL_CHARS: usize = 1500;
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model whose tokenizer bounds the chunks.
    pub model: String,
    pub max_tokens_per_chunk: usize,
    pub overlap_tokens: usize,
    /// Characters of previous output shown to the next chunk's prompt.
    pub context_tail_chars: usize,
    pub summary_chars: usize,
    /// Per-chunk deadline; `None` waits on the provider indefinitely.
    pub chunk_timeout_secs: Option<u64>,
    pub token_policy: TokenPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens_per_chunk: DEFAULT_MAX_TOKENS_PER_CHUNK,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            context_tail_chars: DEFAULT_CONTEXT_TAIL_CHARS,
            summary_chars: DEFAULT_SUMMARY_CHARS,
            chunk_timeout_secs: Some(DEFAULT_CHUNK_TIMEOUT_SECS),
            token_policy: TokenPolicy::Soft,
        }
    }
}

impl PipelineConfig {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens_per_chunk,
            overlap_tokens: self.overlap_tokens,
        }
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Startup check for the chunking knobs; runs re-validate on their own.
    pub fn validate(&self) -> contextdoc_core::Result<()> {
        Chunker::new(&self.chunk_config()).map(|_| ())
    }
}
