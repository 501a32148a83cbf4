//! Token counting, encoding and decoding.
//!
//! All budget arithmetic in the crate goes through the [`Tokenizer`] trait so
//! callers can inject the exact tokenizer of the model they are targeting.
//! Two implementations ship with the crate:
//!
//! * [`TiktokenTokenizer`]: OpenAI BPE vocabularies via `tiktoken-rs`.
//! * [`CharTokenizer`]: one token per Unicode scalar value. Deterministic and
//!   lossless, handy for offline planning and for tests.
//!
//! Decoding an arbitrary token slice is allowed to fail (a BPE cut can land in
//! the middle of a multi-byte character); [`Tokenizer::decode`] returns `None`
//! in that case and the clipper shrinks the slice.

use crate::error::InciseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Injected token measure used for every budget decision.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode a token slice, or `None` when the slice is not valid UTF-8.
    fn decode(&self, tokens: &[u32]) -> Option<String>;

    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// BPE tokenizer backed by `tiktoken-rs`.
#[derive(Clone)]
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
    name: String,
}

impl TiktokenTokenizer {
    /// `cl100k_base` (GPT-4, GPT-3.5).
    pub fn cl100k() -> Result<Self, InciseError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| InciseError::Tokenizer(e.to_string()))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            name: "cl100k_base".into(),
        })
    }

    /// `o200k_base` (GPT-4o, GPT-4.1).
    pub fn o200k() -> Result<Self, InciseError> {
        let bpe = tiktoken_rs::o200k_base().map_err(|e| InciseError::Tokenizer(e.to_string()))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            name: "o200k_base".into(),
        })
    }

    /// Vocabulary used by the named model, e.g. `gpt-4o`.
    pub fn for_model(model: &str) -> Result<Self, InciseError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| InciseError::Tokenizer(format!("{model}: {e}")))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            name: model.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("name", &self.name)
            .finish()
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|t| t as u32)
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Option<String> {
        self.bpe
            .decode(tokens.iter().map(|&t| t as _).collect())
            .ok()
    }
}

/// One token per Unicode scalar value.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    fn decode(&self, tokens: &[u32]) -> Option<String> {
        tokens.iter().map(|&t| char::from_u32(t)).collect()
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

/// Tokenizer selection for the CLI and for serialised run settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerChoice {
    /// `cl100k_base` (default).
    #[default]
    Cl100k,
    /// `o200k_base`.
    O200k,
    /// [`CharTokenizer`].
    Chars,
}

impl TokenizerChoice {
    pub fn build(self) -> Result<Arc<dyn Tokenizer>, InciseError> {
        Ok(match self {
            TokenizerChoice::Cl100k => Arc::new(TiktokenTokenizer::cl100k()?),
            TokenizerChoice::O200k => Arc::new(TiktokenTokenizer::o200k()?),
            TokenizerChoice::Chars => Arc::new(CharTokenizer),
        })
    }
}

impl FromStr for TokenizerChoice {
    type Err = InciseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cl100k" | "cl100k_base" => Ok(TokenizerChoice::Cl100k),
            "o200k" | "o200k_base" => Ok(TokenizerChoice::O200k),
            "chars" | "char" => Ok(TokenizerChoice::Chars),
            other => Err(InciseError::InvalidConfig(format!(
                "unknown tokenizer '{other}' (expected cl100k, o200k or chars)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_tokenizer_round_trips() {
        let t = CharTokenizer;
        let ids = t.encode("héllo → 世界");
        assert_eq!(ids.len(), t.count("héllo → 世界"));
        assert_eq!(t.decode(&ids).as_deref(), Some("héllo → 世界"));
        assert_eq!(t.decode(&ids[..2]).as_deref(), Some("hé"));
    }

    #[test]
    fn char_tokenizer_rejects_invalid_scalar() {
        assert_eq!(CharTokenizer.decode(&[0xD800]), None);
    }

    #[test]
    fn tiktoken_counts_and_decodes() {
        let t = TiktokenTokenizer::cl100k().unwrap();
        let ids = t.encode("The quick brown fox");
        assert!(!ids.is_empty());
        assert_eq!(t.count("The quick brown fox"), ids.len());
        assert_eq!(t.decode(&ids).as_deref(), Some("The quick brown fox"));
    }

    #[test]
    fn choice_parses() {
        assert_eq!("o200k".parse::<TokenizerChoice>().unwrap(), TokenizerChoice::O200k);
        assert_eq!("CHARS".parse::<TokenizerChoice>().unwrap(), TokenizerChoice::Chars);
        assert!("bert".parse::<TokenizerChoice>().is_err());
    }
}
