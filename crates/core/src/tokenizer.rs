use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

use crate::error::{CoreError, Result};

static CL100K: OnceCell<CoreBPE> = OnceCell::new();
static O200K: OnceCell<CoreBPE> = OnceCell::new();
static P50K: OnceCell<CoreBPE> = OnceCell::new();
static R50K: OnceCell<CoreBPE> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    Cl100k,
    O200k,
    P50k,
    R50k,
}

impl TokenizerKind {
    /// Resolves the BPE scheme a model tokenizes with.
    pub fn for_model(model: &str) -> Result<Self> {
        let lower = model.trim().to_lowercase();
        let kind = if ["gpt-4o", "gpt-4.1", "o1", "o3", "o4"]
            .iter()
            .any(|prefix| lower.starts_with(prefix))
        {
            TokenizerKind::O200k
        } else if ["gpt-4", "gpt-3.5", "text-embedding-"]
            .iter()
            .any(|prefix| lower.starts_with(prefix))
        {
            TokenizerKind::Cl100k
        } else if lower.starts_with("text-davinci-") || lower.starts_with("code-") {
            TokenizerKind::P50k
        } else if matches!(
            lower.as_str(),
            "gpt2" | "davinci" | "curie" | "babbage" | "ada"
        ) {
            TokenizerKind::R50k
        } else if lower.starts_with("claude") || lower == "local" {
            // Approximation: no public BPE, cl100k counts land close enough for budgeting.
            TokenizerKind::Cl100k
        } else {
            return Err(CoreError::UnsupportedModel(model.to_string()));
        };
        Ok(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerKind::Cl100k => "cl100k_base",
            TokenizerKind::O200k => "o200k_base",
            TokenizerKind::P50k => "p50k_base",
            TokenizerKind::R50k => "r50k_base",
        }
    }

    pub fn bpe(&self) -> Result<&'static CoreBPE> {
        let (cell, build): (&OnceCell<CoreBPE>, fn() -> anyhow::Result<CoreBPE>) = match self {
            TokenizerKind::Cl100k => (&CL100K, tiktoken_rs::cl100k_base),
            TokenizerKind::O200k => (&O200K, tiktoken_rs::o200k_base),
            TokenizerKind::P50k => (&P50K, tiktoken_rs::p50k_base),
            TokenizerKind::R50k => (&R50K, tiktoken_rs::r50k_base),
        };
        cell.get_or_try_init(|| build().map_err(|e| CoreError::Tokenizer(e.to_string())))
    }

    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        Ok(self.bpe()?.encode_with_special_tokens(text))
    }

    pub fn count(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }

    /// Decodes a token window back to text.
    ///
    /// Window edges can split a multi-byte character across tokens; such
    /// dangling partial characters are dropped instead of failing the decode.
    pub fn decode_window(&self, tokens: &[usize]) -> Result<String> {
        let bpe = self.bpe()?;
        if let Ok(text) = bpe.decode(tokens.to_vec()) {
            return Ok(text);
        }
        let mut out = String::new();
        let mut pending: Vec<usize> = Vec::new();
        for &token in tokens {
            pending.push(token);
            let decoded = (0..pending.len())
                .find_map(|skip| bpe.decode(pending[skip..].to_vec()).ok());
            if let Some(piece) = decoded {
                out.push_str(&piece);
                pending.clear();
            } else if pending.len() >= 4 {
                // A UTF-8 scalar never spans more than four byte-level tokens.
                pending.remove(0);
            }
        }
        Ok(out)
    }
}
