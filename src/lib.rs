// SPDX-License-Identifier: MIT OR Apache-2.0

//! # candle-attrib
//!
//! Document attribution for retrieval-augmented generation in Rust, built on
//! [candle](https://github.com/huggingface/candle).
//!
//! Given the retrieved documents, the user query and the generated answer,
//! candle-attrib estimates how much each document contributed to the answer.
//!
//! ## Attribution strategies
//!
//! - **Attention**: run the full chat thread through a causal model once and
//!   sum the last-layer attention exchanged between each document span and
//!   the answer (optionally also the query) span. See [`compute_attention`]
//!   and [`AttentionAttributor`]. The model plugs in through
//!   [`AttentionBackend`].
//! - **Embedding similarity**: compare sentence embeddings of each document
//!   with the answer (optionally also the query) by cosine similarity. See
//!   [`DocumentSimilarityAttribution`]; the default embedder is a BERT-family
//!   sentence-transformers model (feature: `embeddings`).
//!
//! Both return [`AttributionScores`], one value per document in input order.

#![deny(warnings)]
#![warn(missing_docs)]

pub mod attribution;
pub mod backend;
pub mod cache;
pub mod config;
pub mod device;
pub mod embedding;
pub mod error;
pub mod thread;
pub mod tokenizer;
pub mod util;

// --- Public re-exports ---

pub use attribution::{
    AttentionAttributor, AttentionBreakdown, AttributionScores, DocumentAttention,
    DocumentSimilarityAttribution, compute_attention, compute_attention_breakdown,
};
pub use backend::{AttentionBackend, AttributionModel, LayerSelection};
pub use cache::{AttentionCache, AttentionPattern};
pub use config::AttributionConfig;
pub use device::select_device;
#[cfg(feature = "embeddings")]
pub use embedding::BertEmbedder;
pub use embedding::{SentenceEmbedder, cosine_similarity};
pub use error::{AttribError, Result};
pub use thread::{ChatMessage, ChatThread};
pub use tokenizer::{AttribTokenizer, TokenEncoder};
pub use util::span::{Span, locate};
