// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attention-producing model seam and the wrapper that owns it.
//!
//! [`AttentionBackend`] is the trait a causal language model implements to
//! take part in attention attribution. [`AttributionModel`] wraps a backend
//! with convenience methods.

use candle_core::{Device, Tensor};

use crate::cache::{AttentionCache, AttentionPattern};
use crate::error::{AttribError, Result};

// ---------------------------------------------------------------------------
// LayerSelection
// ---------------------------------------------------------------------------

/// Which layers' attention patterns a forward pass should capture.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerSelection {
    /// Only the final layer (the one attribution uses).
    #[default]
    Last,
}

impl LayerSelection {
    /// Whether layer `layer` of `num_layers` should be captured.
    #[must_use]
    pub const fn includes(self, layer: usize, num_layers: usize) -> bool {
        match self {
            Self::Last => layer + 1 == num_layers,
        }
    }
}

// ---------------------------------------------------------------------------
// AttentionBackend trait
// ---------------------------------------------------------------------------

/// A self-attention model that can report its attention weights.
///
/// Implementations run one inference-only forward pass and return the
/// post-softmax attention patterns of the requested layers. Model weights
/// are never mutated.
pub trait AttentionBackend: Send + Sync {
    /// Number of transformer layers.
    fn num_layers(&self) -> usize;

    /// Number of attention heads per layer.
    fn num_heads(&self) -> usize;

    /// Device input ids must be placed on.
    fn device(&self) -> &Device;

    /// Forward pass with attention capture.
    ///
    /// The returned cache holds the selected layers in ascending order, so
    /// with [`LayerSelection::Last`] it holds exactly one tensor.
    ///
    /// # Shapes
    /// - `input_ids`: `[batch, seq]` -- token IDs
    /// - returns: per-layer `[batch, heads, seq, seq]`
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Model`] on tensor operation failures.
    fn forward_attention(&self, input_ids: &Tensor, layers: LayerSelection)
    -> Result<AttentionCache>;
}

// ---------------------------------------------------------------------------
// AttributionModel
// ---------------------------------------------------------------------------

/// Owns one attention backend for the lifetime of an attributor.
pub struct AttributionModel {
    /// The underlying model backend.
    // TRAIT_OBJECT: heterogeneous model backends require dynamic dispatch
    backend: Box<dyn AttentionBackend>,
}

impl AttributionModel {
    /// Wrap an existing backend.
    // TRAIT_OBJECT: heterogeneous model backends require dynamic dispatch
    #[must_use]
    pub fn new(backend: Box<dyn AttentionBackend>) -> Self {
        Self { backend }
    }

    /// The device this model lives on.
    #[must_use]
    pub fn device(&self) -> &Device {
        self.backend.device()
    }

    /// Number of layers.
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.backend.num_layers()
    }

    /// Number of attention heads.
    #[must_use]
    pub fn num_heads(&self) -> usize {
        self.backend.num_heads()
    }

    /// Run the model over `token_ids` and return the last layer's pattern.
    ///
    /// # Shapes
    /// - `token_ids`: `[seq]`, batched here to `[1, seq]`
    /// - returns: `[heads, seq, seq]`
    ///
    /// # Errors
    ///
    /// Propagates backend errors; returns [`AttribError::Backend`] if the
    /// backend captured nothing.
    pub fn last_layer_attention(&self, token_ids: &[u32]) -> Result<AttentionPattern> {
        last_layer_attention(&*self.backend, token_ids)
    }

    /// Access the underlying backend.
    // TRAIT_OBJECT: caller needs dynamic dispatch for backend-specific methods
    #[must_use]
    pub fn backend(&self) -> &dyn AttentionBackend {
        &*self.backend
    }
}

impl AttentionBackend for AttributionModel {
    fn num_layers(&self) -> usize {
        self.backend.num_layers()
    }

    fn num_heads(&self) -> usize {
        self.backend.num_heads()
    }

    fn device(&self) -> &Device {
        self.backend.device()
    }

    fn forward_attention(
        &self,
        input_ids: &Tensor,
        layers: LayerSelection,
    ) -> Result<AttentionCache> {
        self.backend.forward_attention(input_ids, layers)
    }
}

impl std::fmt::Debug for AttributionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributionModel")
            .field("num_layers", &self.num_layers())
            .field("num_heads", &self.num_heads())
            .field("device", self.device())
            .finish()
    }
}

/// Forward `token_ids` through `backend` and take its last captured layer.
pub(crate) fn last_layer_attention<B: AttentionBackend + ?Sized>(
    backend: &B,
    token_ids: &[u32],
) -> Result<AttentionPattern> {
    if token_ids.is_empty() {
        return Err(AttribError::Backend("cannot run the model on an empty thread".into()));
    }
    let input = Tensor::new(token_ids, backend.device())?.unsqueeze(0)?; // [1, seq_len]
    let cache = backend.forward_attention(&input, LayerSelection::Last)?;
    cache.last_pattern()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
