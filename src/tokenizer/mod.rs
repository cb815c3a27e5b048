// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokenizer seam for attribution.
//!
//! [`TokenEncoder`] is the capability the attention attributor needs: turn
//! text into token ids, with or without special tokens. [`AttribTokenizer`]
//! implements it on top of the `HuggingFace` `tokenizers` crate.

use crate::error::{AttribError, Result};

/// Deterministic text-to-token-ids encoding.
///
/// With `add_special_tokens = false` the encoder must not inject BOS/EOS or
/// any other template tokens, so that a fragment's ids can be searched for
/// inside a full thread's ids.
pub trait TokenEncoder {
    /// Encode `text` into token ids.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Tokenizer`] if encoding fails.
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>>;
}

impl<T: TokenEncoder + ?Sized> TokenEncoder for &T {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        (**self).encode(text, add_special_tokens)
    }
}

/// `HuggingFace` tokenizer handle.
///
/// # Example
///
/// ```no_run
/// use candle_attrib::{AttribTokenizer, TokenEncoder};
///
/// # fn main() -> candle_attrib::Result<()> {
/// let tok = AttribTokenizer::from_hf_path("tokenizer.json")?;
/// let ids = tok.encode("The capital of France is Paris.", false)?;
/// let text = tok.decode(&ids)?;
/// assert!(!ids.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct AttribTokenizer {
    /// The wrapped `tokenizers` instance.
    inner: Box<tokenizers::Tokenizer>,
}

impl AttribTokenizer {
    /// Load a `HuggingFace` tokenizer from a `tokenizer.json` file.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Tokenizer`] if the file cannot be loaded or parsed.
    pub fn from_hf_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let tok = tokenizers::Tokenizer::from_file(path.as_ref()).map_err(|e| {
            AttribError::Tokenizer(format!(
                "failed to load HF tokenizer from {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::from_hf(tok))
    }

    /// Resolve `tokenizer.json` for `model_id` through the `HuggingFace` Hub
    /// cache (downloading it if needed) and load it.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Download`] if the file cannot be resolved and
    /// [`AttribError::Tokenizer`] if it cannot be parsed.
    #[cfg(feature = "hub")]
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| AttribError::Download(format!("HF Hub API: {e}")))?;
        let path = api
            .model(model_id.to_owned())
            .get("tokenizer.json")
            .map_err(|e| AttribError::Download(format!("{model_id}/tokenizer.json: {e}")))?;
        tracing::info!(model_id, path = %path.display(), "loading tokenizer");
        Self::from_hf_path(path)
    }

    /// Wrap an already-loaded `HuggingFace` tokenizer.
    #[must_use]
    pub fn from_hf(tokenizer: tokenizers::Tokenizer) -> Self {
        Self {
            inner: Box::new(tokenizer),
        }
    }

    /// Decode token IDs back to a string.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Tokenizer`] if decoding fails.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| AttribError::Tokenizer(format!("HF decode failed: {e}")))
    }

    /// Get vocabulary size (including added tokens).
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// The wrapped `tokenizers` instance.
    #[must_use]
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }
}

impl TokenEncoder for AttribTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| AttribError::Tokenizer(format!("HF encode failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl std::fmt::Debug for AttribTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttribTokenizer")
            .field("vocab_size", &self.vocab_size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
