use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::tokenizer::TokenizerKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub model: String,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2000,
            overlap_tokens: 200,
        }
    }
}

/// One token window of the serialized input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub total_chunks: usize,
    pub text: String,
    pub token_start: usize,
    pub token_end: usize,
}

impl Chunk {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total_chunks
    }

    pub fn token_len(&self) -> usize {
        self.token_end - self.token_start
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    tokenizer: TokenizerKind,
    max_tokens: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(config: &ChunkConfig) -> Result<Self> {
        validate_window(config.max_tokens, config.overlap_tokens)?;
        let tokenizer = TokenizerKind::for_model(&config.model)?;
        Ok(Self {
            tokenizer,
            max_tokens: config.max_tokens,
            overlap: config.overlap_tokens,
        })
    }

    pub fn tokenizer(&self) -> TokenizerKind {
        self.tokenizer
    }

    pub fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        let tokens = self.tokenizer.encode(text)?;
        let windows = token_windows(tokens.len(), self.max_tokens, self.overlap);
        let total_chunks = windows.len();
        let mut chunks = Vec::with_capacity(total_chunks);
        for (index, (start, end)) in windows.into_iter().enumerate() {
            chunks.push(Chunk {
                index,
                total_chunks,
                text: self.tokenizer.decode_window(&tokens[start..end])?,
                token_start: start,
                token_end: end,
            });
        }
        tracing::debug!(
            tokens = tokens.len(),
            chunks = total_chunks,
            tokenizer = self.tokenizer.as_str(),
            "chunked input"
        );
        Ok(chunks)
    }
}

/// Splits `text` into overlapping token windows for `model`.
pub fn chunk_text(text: &str, model: &str, max_tokens: usize, overlap: usize) -> Result<Vec<Chunk>> {
    Chunker::new(&ChunkConfig {
        model: model.to_string(),
        max_tokens,
        overlap_tokens: overlap,
    })?
    .chunk(text)
}

fn validate_window(max_tokens: usize, overlap: usize) -> Result<()> {
    if max_tokens == 0 {
        return Err(CoreError::Configuration(
            "max_tokens must be greater than zero".to_string(),
        ));
    }
    if overlap >= max_tokens {
        return Err(CoreError::Configuration(format!(
            "overlap ({overlap}) must be smaller than max_tokens ({max_tokens})"
        )));
    }
    Ok(())
}

/// Half-open `[start, end)` windows over `len` tokens.
pub fn token_windows(len: usize, max_tokens: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    if len == 0 || max_tokens == 0 {
        return windows;
    }
    let step = max_tokens.saturating_sub(overlap);
    let mut start = 0usize;
    loop {
        let end = (start + max_tokens).min(len);
        windows.push((start, end));
        if end == len {
            break;
        }
        let next = start + step;
        if next <= start {
            break;
        }
        start = next;
    }
    windows
}
