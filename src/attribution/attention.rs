// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attention-based document attribution.
//!
//! The full thread (template applied) is run through the model once and the
//! last layer's attention is read. For each document span the attention
//! mass exchanged with the answer span (and, optionally, the query span) is
//! summed across all heads and divided by the total attention mass of the
//! layer.
//!
//! Scores are **not** re-normalized to sum to one: every document is divided
//! by the same layer total, so scores stay comparable in absolute magnitude
//! across calls. This differs from
//! [`DocumentSimilarityAttribution`](crate::DocumentSimilarityAttribution),
//! whose scores sum to one.
//!
//! This is a heuristic for explainability, not a proof of influence.

use crate::attribution::scores::AttributionScores;
use crate::backend::{AttentionBackend, AttributionModel, last_layer_attention};
use crate::cache::AttentionPattern;
use crate::config::AttributionConfig;
use crate::error::{AttribError, Result};
use crate::tokenizer::TokenEncoder;
use crate::util::span::{Span, locate_named};

// ---------------------------------------------------------------------------
// Breakdown types
// ---------------------------------------------------------------------------

/// Attention mass exchanged between one document and the query/answer.
///
/// "X to Y" is the mass with query positions in X and key positions in Y,
/// i.e. how much X attends to Y, summed over all heads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentAttention {
    /// Where the document sits in the thread tokens.
    pub span: Span,
    /// Query attending to the document.
    pub query_to_doc: f64,
    /// Document attending to the query.
    pub doc_to_query: f64,
    /// Answer attending to the document.
    pub answer_to_doc: f64,
    /// Document attending to the answer.
    pub doc_to_answer: f64,
}

impl DocumentAttention {
    /// Unnormalized score: the answer terms, plus the query terms when
    /// `include_query` is set.
    #[must_use]
    pub fn raw_score(&self, include_query: bool) -> f64 {
        let answer_terms = self.answer_to_doc + self.doc_to_answer;
        if include_query {
            self.query_to_doc + self.doc_to_query + answer_terms
        } else {
            answer_terms
        }
    }
}

/// Everything measured during one attention attribution call.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionBreakdown {
    /// Number of tokens in the thread.
    pub thread_len: usize,
    /// Location of the query in the thread.
    pub query_span: Span,
    /// Location of the answer in the thread.
    pub answer_span: Span,
    /// Sum of all last-layer attention weights (all heads, all positions).
    pub total_weight: f64,
    /// Per-document masses, in input order.
    pub documents: Vec<DocumentAttention>,
}

impl AttentionBreakdown {
    /// Per-document scores: raw score divided by [`total_weight`](Self::total_weight),
    /// or `0` for every document when the total is not positive.
    #[must_use]
    pub fn scores(&self, include_query: bool) -> AttributionScores {
        let raw: Vec<f64> = self
            .documents
            .iter()
            .map(|doc| doc.raw_score(include_query))
            .collect();
        AttributionScores::divided_by(&raw, self.total_weight)
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Attribute `answer` to the `context` documents from last-layer attention.
///
/// `thread` is the full prompt (chat template applied) containing the
/// query, every document and the answer verbatim. All texts are tokenized
/// without special tokens.
///
/// # Errors
///
/// Returns [`AttribError::SpanNotFound`] if the query, the answer or any
/// document cannot be located in the thread tokens, [`AttribError::Shape`]
/// if the captured attention does not match the thread length, and
/// propagates tokenizer and model errors unchanged.
pub fn compute_attention<B, T, S>(
    model: &B,
    tokenizer: &T,
    thread: &str,
    query: &str,
    context: &[S],
    answer: &str,
    include_query: bool,
) -> Result<AttributionScores>
where
    B: AttentionBackend + ?Sized,
    T: TokenEncoder + ?Sized,
    S: AsRef<str>,
{
    let breakdown = compute_attention_breakdown(model, tokenizer, thread, query, context, answer)?;
    let scores = breakdown.scores(include_query);
    tracing::debug!(include_query, scores = ?&*scores, "attention attribution scores");
    Ok(scores)
}

/// Measure every attention term for every document.
///
/// This is the work behind [`compute_attention`]; the four per-document
/// masses are always computed so callers can inspect them.
///
/// # Errors
///
/// Same as [`compute_attention`].
pub fn compute_attention_breakdown<B, T, S>(
    model: &B,
    tokenizer: &T,
    thread: &str,
    query: &str,
    context: &[S],
    answer: &str,
) -> Result<AttentionBreakdown>
where
    B: AttentionBackend + ?Sized,
    T: TokenEncoder + ?Sized,
    S: AsRef<str>,
{
    // --- Forward pass over the whole thread ---
    let thread_tokens = tokenizer.encode(thread, false)?;
    let pattern = last_layer_attention(model, &thread_tokens)?;
    check_pattern_len(&pattern, thread_tokens.len())?;

    // --- Locate query, answer and documents ---
    let query_tokens = tokenizer.encode(query, false)?;
    let answer_tokens = tokenizer.encode(answer, false)?;
    let query_span = locate_named(&thread_tokens, &query_tokens, "query")?;
    let answer_span = locate_named(&thread_tokens, &answer_tokens, "answer")?;

    let mut doc_spans = Vec::with_capacity(context.len());
    for (idx, doc) in context.iter().enumerate() {
        let doc_tokens = tokenizer.encode(doc.as_ref(), false)?;
        let what = format!("document {idx}");
        doc_spans.push(locate_named(&thread_tokens, &doc_tokens, &what)?);
    }

    // --- Attention masses ---
    let total_weight = pattern.total_mass()?;
    tracing::debug!(
        thread_len = thread_tokens.len(),
        heads = pattern.num_heads(),
        ?query_span,
        ?answer_span,
        total_weight,
        "attention attribution spans located"
    );

    let documents = doc_spans
        .into_iter()
        .map(|span| -> Result<DocumentAttention> {
            Ok(DocumentAttention {
                span,
                query_to_doc: pattern.mass(query_span, span)?,
                doc_to_query: pattern.mass(span, query_span)?,
                answer_to_doc: pattern.mass(answer_span, span)?,
                doc_to_answer: pattern.mass(span, answer_span)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(AttentionBreakdown {
        thread_len: thread_tokens.len(),
        query_span,
        answer_span,
        total_weight,
        documents,
    })
}

/// The attention must be square over exactly the thread's positions.
fn check_pattern_len(pattern: &AttentionPattern, thread_len: usize) -> Result<()> {
    if pattern.seq_q() != thread_len || pattern.seq_k() != thread_len {
        return Err(AttribError::Shape(format!(
            "attention covers {}x{} positions but the thread has {thread_len} tokens",
            pattern.seq_q(),
            pattern.seq_k()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AttentionAttributor
// ---------------------------------------------------------------------------

/// Attention attribution with an owned model and tokenizer.
///
/// The model and tokenizer are acquired once at construction and used
/// read-only. Concurrent [`compute`](Self::compute) calls are only as safe
/// as the backend's forward pass; no synchronization is added here.
#[derive(Debug)]
pub struct AttentionAttributor<T> {
    /// Causal model producing attention weights.
    model: AttributionModel,
    /// Tokenizer matching the model's vocabulary.
    tokenizer: T,
    /// Captured from [`AttributionConfig::include_query`] at construction.
    include_query: bool,
}

impl<T: TokenEncoder> AttentionAttributor<T> {
    /// Build an attributor from a model, its tokenizer and the configuration.
    #[must_use]
    pub fn new(model: AttributionModel, tokenizer: T, config: &AttributionConfig) -> Self {
        Self {
            model,
            tokenizer,
            include_query: config.include_query,
        }
    }

    /// Whether query terms are part of each raw score.
    #[must_use]
    pub const fn include_query(&self) -> bool {
        self.include_query
    }

    /// The owned model.
    #[must_use]
    pub const fn model(&self) -> &AttributionModel {
        &self.model
    }

    /// The owned tokenizer.
    #[must_use]
    pub const fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    /// Score each document of `context`; see [`compute_attention`].
    ///
    /// # Errors
    ///
    /// Same as [`compute_attention`].
    pub fn compute<S: AsRef<str>>(
        &self,
        thread: &str,
        query: &str,
        context: &[S],
        answer: &str,
    ) -> Result<AttributionScores> {
        compute_attention(
            &self.model,
            &self.tokenizer,
            thread,
            query,
            context,
            answer,
            self.include_query,
        )
    }

    /// Per-document attention terms; see [`compute_attention_breakdown`].
    ///
    /// # Errors
    ///
    /// Same as [`compute_attention`].
    pub fn breakdown<S: AsRef<str>>(
        &self,
        thread: &str,
        query: &str,
        context: &[S],
        answer: &str,
    ) -> Result<AttentionBreakdown> {
        compute_attention_breakdown(&self.model, &self.tokenizer, thread, query, context, answer)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::indexing_slicing
)]
mod tests {
    use candle_core::{DType, Device, Tensor};

    use super::*;
    use crate::backend::LayerSelection;
    use crate::cache::AttentionCache;

    /// Tokenizer mapping each whitespace-separated word to a fixed id.
    struct WordIds;

    impl TokenEncoder for WordIds {
        fn encode(&self, text: &str, _add_special_tokens: bool) -> Result<Vec<u32>> {
            text.split_whitespace()
                .map(|word| {
                    word.parse::<u32>()
                        .map_err(|e| AttribError::Tokenizer(format!("{word}: {e}")))
                })
                .collect()
        }
    }

    /// Backend returning a fixed single-head pattern as its only layer.
    struct FixedBackend {
        device: Device,
        pattern: Vec<f32>,
        seq: usize,
    }

    impl AttentionBackend for FixedBackend {
        fn num_layers(&self) -> usize {
            1
        }

        fn num_heads(&self) -> usize {
            1
        }

        fn device(&self) -> &Device {
            &self.device
        }

        fn forward_attention(
            &self,
            _input_ids: &Tensor,
            _layers: LayerSelection,
        ) -> Result<AttentionCache> {
            let mut cache = AttentionCache::with_capacity(1);
            cache.push(Tensor::from_vec(
                self.pattern.clone(),
                (1, 1, self.seq, self.seq),
                &self.device,
            )?);
            Ok(cache)
        }
    }

    /// Thread "1 2 3 4 5": query = [1], doc A = [2], doc B = [3, 4], answer = [5].
    ///
    /// Pattern cell `[q, k]` holds `10 * q + k` so every mass is traceable.
    fn fixture() -> FixedBackend {
        let seq = 5;
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let pattern = (0..seq * seq)
            .map(|i| (10 * (i / seq) + i % seq) as f32)
            .collect();
        FixedBackend {
            device: Device::Cpu,
            pattern,
            seq,
        }
    }

    const THREAD: &str = "1 2 3 4 5";

    #[test]
    fn breakdown_masses() {
        let breakdown =
            compute_attention_breakdown(&fixture(), &WordIds, THREAD, "1", &["2", "3 4"], "5")
                .unwrap();

        assert_eq!(breakdown.thread_len, 5);
        assert_eq!(breakdown.query_span, Span { start: 0, end: 0 });
        assert_eq!(breakdown.answer_span, Span { start: 4, end: 4 });
        // sum over q,k of (10q + k) = 10 * 5 * 10 + 5 * 10
        assert_eq!(breakdown.total_weight, 550.0);

        let a = breakdown.documents[0];
        assert_eq!(a.span, Span { start: 1, end: 1 });
        assert_eq!(a.query_to_doc, 1.0); // [0, 1]
        assert_eq!(a.doc_to_query, 10.0); // [1, 0]
        assert_eq!(a.answer_to_doc, 41.0); // [4, 1]
        assert_eq!(a.doc_to_answer, 14.0); // [1, 4]

        // Inclusive spans: document B covers positions 2 and 3.
        let b = breakdown.documents[1];
        assert_eq!(b.span, Span { start: 2, end: 3 });
        assert_eq!(b.query_to_doc, 2.0 + 3.0);
        assert_eq!(b.doc_to_query, 20.0 + 30.0);
        assert_eq!(b.answer_to_doc, 42.0 + 43.0);
        assert_eq!(b.doc_to_answer, 24.0 + 34.0);
    }

    #[test]
    fn scores_with_and_without_query() {
        let backend = fixture();
        let with =
            compute_attention(&backend, &WordIds, THREAD, "1", &["2", "3 4"], "5", true).unwrap();
        let without =
            compute_attention(&backend, &WordIds, THREAD, "1", &["2", "3 4"], "5", false).unwrap();

        assert!((with[0] - 66.0 / 550.0).abs() < 1e-9);
        assert!((with[1] - 198.0 / 550.0).abs() < 1e-9);
        assert!((without[0] - 55.0 / 550.0).abs() < 1e-9);
        assert!((without[1] - 143.0 / 550.0).abs() < 1e-9);

        // Dropping the query removes exactly the query terms.
        assert!((with[0] - without[0] - 11.0 / 550.0).abs() < 1e-9);
        assert!((with[1] - without[1] - 55.0 / 550.0).abs() < 1e-9);
    }

    #[test]
    fn scores_are_not_renormalized() {
        let scores =
            compute_attention(&fixture(), &WordIds, THREAD, "1", &["2", "3 4"], "5", true)
                .unwrap();
        // Divided by the layer total only: the sum stays well below one.
        assert!(scores.total() < 0.5);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn missing_document_fails_whole_call() {
        let err = compute_attention(&fixture(), &WordIds, THREAD, "1", &["2", "9"], "5", true)
            .unwrap_err();
        match err {
            AttribError::SpanNotFound { what, .. } => assert_eq!(what, "document 1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_query_fails_even_without_query_terms() {
        let err = compute_attention(&fixture(), &WordIds, THREAD, "7", &["2"], "5", false)
            .unwrap_err();
        assert!(matches!(err, AttribError::SpanNotFound { .. }));
    }

    #[test]
    fn zero_attention_gives_zero_scores() {
        let backend = FixedBackend {
            device: Device::Cpu,
            pattern: vec![0.0; 25],
            seq: 5,
        };
        let scores =
            compute_attention(&backend, &WordIds, THREAD, "1", &["2", "3 4"], "5", true).unwrap();
        assert_eq!(scores.into_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn pattern_length_must_match_thread() {
        let backend = FixedBackend {
            device: Device::Cpu,
            pattern: vec![1.0; 16],
            seq: 4,
        };
        let err = compute_attention(&backend, &WordIds, THREAD, "1", &["2"], "5", true)
            .unwrap_err();
        assert!(matches!(err, AttribError::Shape(_)));
    }

    #[test]
    fn tokenizer_errors_propagate() {
        let err = compute_attention(&fixture(), &WordIds, "1 x 5", "1", &["2"], "5", true)
            .unwrap_err();
        assert!(matches!(err, AttribError::Tokenizer(_)));
    }

    #[test]
    fn attributor_uses_configured_toggle() {
        let config = AttributionConfig::default().with_include_query(false);
        let attributor =
            AttentionAttributor::new(AttributionModel::new(Box::new(fixture())), WordIds, &config);
        assert!(!attributor.include_query());

        let scores = attributor.compute(THREAD, "1", &["2"], "5").unwrap();
        assert!((scores[0] - 55.0 / 550.0).abs() < 1e-9);

        let breakdown = attributor.breakdown(THREAD, "1", &["2"], "5").unwrap();
        assert_eq!(breakdown.scores(false), scores);
        assert_eq!(attributor.model().num_heads(), 1);
    }

    #[test]
    fn multi_head_masses_sum_over_heads() {
        struct TwoHeads(Device);
        impl AttentionBackend for TwoHeads {
            fn num_layers(&self) -> usize {
                2
            }
            fn num_heads(&self) -> usize {
                2
            }
            fn device(&self) -> &Device {
                &self.0
            }
            fn forward_attention(
                &self,
                input_ids: &Tensor,
                _layers: LayerSelection,
            ) -> Result<AttentionCache> {
                let seq = input_ids.dim(1)?;
                let mut cache = AttentionCache::with_capacity(2);
                // An earlier layer that must be ignored.
                cache.push((Tensor::ones((1, 2, seq, seq), DType::F32, &self.0)? * 100.0)?);
                cache.push(Tensor::ones((1, 2, seq, seq), DType::F32, &self.0)?);
                Ok(cache)
            }
        }

        let breakdown = compute_attention_breakdown(
            &TwoHeads(Device::Cpu),
            &WordIds,
            THREAD,
            "1",
            &["3 4"],
            "5",
        )
        .unwrap();
        assert_eq!(breakdown.total_weight, 50.0);
        // 2 heads * 1 answer position * 2 document positions
        assert_eq!(breakdown.documents[0].answer_to_doc, 4.0);
    }
}
