use crate::error::{ChunkerError, Result};
use std::path::Path;
use tokenizers::Tokenizer;

/// Text ↔ token id conversion used for budget calculations.
///
/// Decoding is only required to produce well-formed text; exact round-trips are not.
pub trait TokenCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32]) -> Result<String>;

    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }
}

/// `tokenizer.json` backed codec (HuggingFace `tokenizers`)
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path).map_err(|e| {
            ChunkerError::tokenization(format!(
                "Tokenizer load failed for {}: {e}",
                path.display()
            ))
        })?;
        log::info!("Loaded tokenizer from {}", path.display());
        Ok(Self { inner })
    }
}

impl TokenCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| ChunkerError::tokenization(format!("encode failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.inner
            .decode(tokens, true)
            .map_err(|e| ChunkerError::tokenization(format!("decode failed: {e}")))
    }
}

/// One token per Unicode scalar value.
///
/// Used when no tokenizer file is configured; it overcounts relative to any subword
/// tokenizer, so budgets computed with it stay on the safe side.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodepointCodec;

impl TokenCodec for CodepointCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        tokens
            .iter()
            .map(|&id| {
                char::from_u32(id)
                    .ok_or_else(|| ChunkerError::tokenization(format!("invalid codepoint {id}")))
            })
            .collect()
    }
}

/// A contiguous token slice decoded back to text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWindow {
    pub ordinal: usize,
    pub text: String,
}

/// Splits text into non-overlapping slices of at most `token_budget` tokens
pub struct TokenBudgetedChunker<'a> {
    codec: &'a dyn TokenCodec,
}

impl<'a> TokenBudgetedChunker<'a> {
    pub fn new(codec: &'a dyn TokenCodec) -> Self {
        Self { codec }
    }

    pub fn chunk(&self, text: &str, token_budget: usize) -> Result<Vec<TokenWindow>> {
        if token_budget == 0 {
            return Err(ChunkerError::invalid_config("token_budget must be > 0"));
        }
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.codec.encode(text)?;
        log::debug!("Total tokens: {}, budget: {}", tokens.len(), token_budget);

        let windows = tokens
            .chunks(token_budget)
            .enumerate()
            .map(|(ordinal, slice)| {
                let text = self.codec.decode(slice)?;
                log::debug!("Created window {ordinal} with {} tokens", slice.len());
                Ok(TokenWindow { ordinal, text })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!("Token chunking completed. Total windows: {}", windows.len());
        Ok(windows)
    }
}
