// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document attribution strategies.
//!
//! - [`attention`]: last-layer attention mass between document spans and the
//!   answer/query spans of a chat thread.
//! - [`similarity`]: cosine similarity of sentence embeddings.
//! - [`scores`]: the per-document score vector both return.

pub mod attention;
pub mod scores;
pub mod similarity;

pub use attention::{
    AttentionAttributor, AttentionBreakdown, DocumentAttention, compute_attention,
    compute_attention_breakdown,
};
pub use scores::AttributionScores;
pub use similarity::DocumentSimilarityAttribution;
