// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attention pattern cache and range-sum reductions over attention weights.
//!
//! [`AttentionCache`] stores post-softmax attention patterns from each layer
//! of a forward pass, each of shape `[batch, heads, seq_q, seq_k]`.
//!
//! [`AttentionPattern`] is one layer's pattern for batch 0, with axis order
//! `(head, query_position, key_position)`. Its reductions are pure sums
//! over inclusive position ranges, taken across all heads.

use candle_core::{DType, Tensor};

use crate::error::{AttribError, Result};
use crate::util::span::Span;

/// Stores per-layer attention weights from a forward pass.
///
/// Each tensor has shape `[batch, heads, seq_q, seq_k]`.
///
/// # Example
///
/// ```
/// use candle_attrib::AttentionCache;
/// use candle_core::{Device, Tensor};
///
/// let mut cache = AttentionCache::with_capacity(2);
/// cache.push(Tensor::zeros((1, 8, 10, 10), candle_core::DType::F32, &Device::Cpu).unwrap());
/// cache.push(Tensor::ones((1, 8, 10, 10), candle_core::DType::F32, &Device::Cpu).unwrap());
///
/// let last = cache.last_pattern().unwrap();
/// assert_eq!(last.num_heads(), 8);
/// assert_eq!(last.total_mass().unwrap(), 800.0);
/// ```
#[derive(Debug, Default)]
pub struct AttentionCache {
    /// Attention patterns per layer, each shape `[batch, heads, seq_q, seq_k]`.
    patterns: Vec<Tensor>,
}

impl AttentionCache {
    /// Create an empty cache with capacity for `n_layers` layers.
    #[must_use]
    pub fn with_capacity(n_layers: usize) -> Self {
        Self {
            patterns: Vec::with_capacity(n_layers),
        }
    }

    /// Add an attention pattern for the next layer.
    ///
    /// # Shapes
    ///
    /// - `pattern`: `[batch, heads, seq_q, seq_k]`
    pub fn push(&mut self, pattern: Tensor) {
        self.patterns.push(pattern);
    }

    /// Number of cached layers.
    #[must_use]
    pub const fn n_layers(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Batch-0 pattern of the last cached layer.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Backend`] if the cache is empty, or
    /// [`AttribError::Shape`] if the tensor is not rank 4.
    pub fn last_pattern(&self) -> Result<AttentionPattern> {
        let tensor = self
            .patterns
            .last()
            .ok_or_else(|| AttribError::Backend("attention cache is empty".into()))?;
        AttentionPattern::from_layer(tensor)
    }
}

// ---------------------------------------------------------------------------
// AttentionPattern
// ---------------------------------------------------------------------------

/// One layer's attention weights for a single sequence.
///
/// Axis order is `(head, query_position, key_position)`: entry
/// `[h, q, k]` is how much position `q` attends to position `k` in head `h`.
#[derive(Debug, Clone)]
pub struct AttentionPattern {
    /// `[heads, seq_q, seq_k]`, F64.
    weights: Tensor,
}

impl AttentionPattern {
    /// Select batch 0 of a layer tensor.
    ///
    /// # Shapes
    ///
    /// - `layer`: `[batch, heads, seq_q, seq_k]`
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Shape`] if `layer` is not rank 4 or has an
    /// empty batch, and [`AttribError::Model`] on tensor failures.
    pub fn from_layer(layer: &Tensor) -> Result<Self> {
        let dims = layer.dims();
        if dims.len() != 4 {
            return Err(AttribError::Shape(format!(
                "attention must be [batch, heads, seq_q, seq_k], got {dims:?}"
            )));
        }
        if dims.first() == Some(&0) {
            return Err(AttribError::Shape("attention batch is empty".into()));
        }
        // PROMOTE: millions of small weights per sum; F32 drifts, accumulate in F64
        let weights = layer.narrow(0, 0, 1)?.squeeze(0)?.to_dtype(DType::F64)?;
        Ok(Self { weights })
    }

    /// Number of attention heads.
    #[must_use]
    pub fn num_heads(&self) -> usize {
        self.weights.dims().first().copied().unwrap_or(0)
    }

    /// Number of query positions.
    #[must_use]
    pub fn seq_q(&self) -> usize {
        self.weights.dims().get(1).copied().unwrap_or(0)
    }

    /// Number of key positions.
    #[must_use]
    pub fn seq_k(&self) -> usize {
        self.weights.dims().get(2).copied().unwrap_or(0)
    }

    /// Underlying `[heads, seq_q, seq_k]` tensor.
    #[must_use]
    pub const fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Sum of every weight across heads and both position axes.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Model`] on tensor failures.
    pub fn total_mass(&self) -> Result<f64> {
        Ok(self.weights.sum_all()?.to_scalar::<f64>()?)
    }

    /// Attention mass flowing from the `from` query positions to the `to`
    /// key positions, summed over all heads.
    ///
    /// # Shapes
    ///
    /// - sums `weights[.., from.start..=from.end, to.start..=to.end]`
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Shape`] if either span lies outside the
    /// sequence, and [`AttribError::Model`] on tensor failures.
    pub fn mass(&self, from: Span, to: Span) -> Result<f64> {
        if from.end >= self.seq_q() || to.end >= self.seq_k() {
            return Err(AttribError::Shape(format!(
                "span {from:?} -> {to:?} out of range (seq_q={}, seq_k={})",
                self.seq_q(),
                self.seq_k()
            )));
        }
        // narrow(dim=1) → [heads, |from|, seq_k]; narrow(dim=2) → [heads, |from|, |to|]
        let block = self
            .weights
            .narrow(1, from.start, from.len())?
            .narrow(2, to.start, to.len())?;
        Ok(block.sum_all()?.to_scalar::<f64>()?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
