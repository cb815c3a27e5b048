// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for candle-attrib.

/// Errors that can occur while attributing an answer to its documents.
#[derive(Debug, thiserror::Error)]
pub enum AttribError {
    /// A token sub-sequence was not found verbatim in the thread tokens.
    ///
    /// Usually a tokenization-boundary mismatch: the text re-tokenizes
    /// differently in isolation than inside the merged thread.
    #[error("{what} tokens ({needle_len}) not found in thread ({haystack_len} tokens)")]
    SpanNotFound {
        /// What was being located (`"query"`, `"answer"`, `"document 2"`, ...).
        what: String,
        /// Length of the searched sub-sequence.
        needle_len: usize,
        /// Length of the sequence that was searched.
        haystack_len: usize,
    },

    /// Forward pass or tensor operation error (wraps candle).
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    /// Attention backend broke its contract (e.g. returned no layers).
    #[error("backend error: {0}")]
    Backend(String),

    /// Attention tensor does not have the expected shape.
    #[error("shape error: {0}")]
    Shape(String),

    /// Tokenizer error.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Embedding model error or embedding shape mismatch.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Model configuration parsing error.
    #[error("config error: {0}")]
    Config(String),

    /// `HuggingFace` Hub resolution or download error.
    #[error("download error: {0}")]
    Download(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AttribError {
    /// Build a [`AttribError::SpanNotFound`] for the named sub-sequence.
    pub(crate) fn span_not_found(what: &str, needle_len: usize, haystack_len: usize) -> Self {
        Self::SpanNotFound {
            what: what.to_owned(),
            needle_len,
            haystack_len,
        }
    }
}

/// Result type alias for candle-attrib operations.
pub type Result<T> = std::result::Result<T, AttribError>;
