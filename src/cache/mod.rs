// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attention capture for attribution.
//!
//! - [`AttentionCache`]: per-layer post-softmax attention patterns.
//! - [`AttentionPattern`]: one layer's batch-0 pattern with range-sum reductions.

mod attention;

pub use attention::{AttentionCache, AttentionPattern};
