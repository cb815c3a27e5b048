// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sentence embeddings for similarity attribution.
//!
//! - [`SentenceEmbedder`]: the capability the similarity attributor needs.
//! - [`cosine_similarity`]: the comparison it applies to embeddings.
//! - [`BertEmbedder`]: a BERT-family sentence embedder on
//!   `candle-transformers` (feature: `embeddings`).

#[cfg(feature = "embeddings")]
mod bert;

#[cfg(feature = "embeddings")]
pub use bert::BertEmbedder;

use crate::error::{AttribError, Result};

/// Maps texts to fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input text, in input
/// order, all of the same dimension.
pub trait SentenceEmbedder: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Embedding`] (or a wrapped model/tokenizer
    /// error) if inference fails.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension, if known without running the model.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

impl<E: SentenceEmbedder + ?Sized> SentenceEmbedder for Box<E> {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }

    fn dimension(&self) -> Option<usize> {
        (**self).dimension()
    }
}

/// Embed a single text.
pub(crate) fn embed_one<E: SentenceEmbedder + ?Sized>(embedder: &E, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text])?
        .into_iter()
        .next()
        .ok_or_else(|| AttribError::Embedding("embedder returned no vector".into()))
}

/// Cosine similarity of two vectors, accumulated in `f64`.
///
/// A zero-norm vector has similarity `0` with everything.
///
/// # Errors
///
/// Returns [`AttribError::Embedding`] if the vectors differ in length.
///
/// ```
/// use candle_attrib::embedding::cosine_similarity;
///
/// let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 1.0]).unwrap();
/// assert!((sim - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(AttribError::Embedding(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
