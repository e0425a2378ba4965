mod client;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{LlmClient, LlmProvider};

/// Text produced for one prompt together with the tokens it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub content: String,
    pub tokens_used: u64,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Request {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} rate limited after {attempts} attempts")]
    RateLimited {
        provider: &'static str,
        attempts: usize,
    },
    #[error("{provider} returned error (status {status}): {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("missing text in {provider} response")]
    MissingText { provider: &'static str },
    #[error("provider configuration error: {0}")]
    Config(String),
    #[error("generation timed out after {}s", .after.as_secs_f32())]
    Timeout { after: Duration },
}

impl ProviderError {
    /// Message recorded against a failed chunk.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// The capability the pipeline drives: turn instructions plus content into
/// generated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, instructions: &str, content: &str)
        -> Result<Generation, ProviderError>;

    /// Provider/model label used in logs.
    fn label(&self) -> String {
        "generator".to_string()
    }
}
