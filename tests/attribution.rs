// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end attribution tests with in-process models.
//!
//! The attention backend and the sentence embedder are small deterministic
//! stand-ins, so these tests need no downloaded weights.
//!
//! Run: `cargo test --test attribution --no-default-features`

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::cast_precision_loss,
    clippy::as_conversions,
    clippy::float_cmp,
    missing_docs
)]

use candle_attrib::{
    AttentionAttributor, AttentionBackend, AttentionCache, AttribError, AttributionConfig,
    AttributionModel, ChatThread, DocumentSimilarityAttribution, LayerSelection, Result,
    SentenceEmbedder, Span, TokenEncoder, compute_attention, compute_attention_breakdown, locate,
};
use candle_core::{Device, Tensor};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Whitespace tokenizer with `ChatML` markers split into their own tokens.
///
/// Ids are a 32-bit FNV-1a hash of the word, so equal words always map to
/// equal ids regardless of context.
struct WordTokenizer;

fn word_id(word: &str) -> u32 {
    word.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

impl TokenEncoder for WordTokenizer {
    fn encode(&self, text: &str, _add_special_tokens: bool) -> Result<Vec<u32>> {
        let spaced = text
            .replace("<|im_start|>", " <|im_start|> ")
            .replace("<|im_end|>", " <|im_end|> ");
        Ok(spaced.split_whitespace().map(word_id).collect())
    }
}

/// Causal softmax-like backend: every query position attends uniformly to
/// itself and all earlier positions, in every head.
struct CausalUniform {
    device: Device,
    layers: usize,
    heads: usize,
}

impl CausalUniform {
    fn new() -> Self {
        Self {
            device: Device::Cpu,
            layers: 2,
            heads: 4,
        }
    }
}

impl AttentionBackend for CausalUniform {
    fn num_layers(&self) -> usize {
        self.layers
    }

    fn num_heads(&self) -> usize {
        self.heads
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward_attention(
        &self,
        input_ids: &Tensor,
        layers: LayerSelection,
    ) -> Result<AttentionCache> {
        let (batch, seq) = input_ids.dims2()?;
        let mut row_major = Vec::with_capacity(seq * seq);
        for q in 0..seq {
            for k in 0..seq {
                row_major.push(if k <= q { 1.0 / (q + 1) as f32 } else { 0.0 });
            }
        }
        let head = Tensor::from_vec(row_major, (1, 1, seq, seq), &self.device)?;
        let pattern = head.broadcast_as((batch, self.heads, seq, seq))?.contiguous()?;

        let mut cache = AttentionCache::with_capacity(self.layers);
        for layer in 0..self.layers {
            if layers.includes(layer, self.layers) {
                cache.push(pattern.clone());
            }
        }
        Ok(cache)
    }
}

/// Backend returning one explicit single-head pattern.
struct Explicit {
    device: Device,
    seq: usize,
    cells: Vec<f32>,
}

impl Explicit {
    fn new(seq: usize, entries: &[((usize, usize), f32)]) -> Self {
        let mut cells = vec![0.0; seq * seq];
        for &((q, k), value) in entries {
            cells[q * seq + k] = value;
        }
        Self {
            device: Device::Cpu,
            seq,
            cells,
        }
    }
}

impl AttentionBackend for Explicit {
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
            self.cells.clone(),
            (1, 1, self.seq, self.seq),
            &self.device,
        )?);
        Ok(cache)
    }
}

/// Embedder serving fixed vectors per text.
struct Table(Vec<(&'static str, Vec<f32>)>);

impl SentenceEmbedder for Table {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|text| {
                self.0
                    .iter()
                    .find(|(key, _)| key == text)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| AttribError::Embedding(format!("no vector for {text:?}")))
            })
            .collect()
    }
}

/// Bag-of-words embedder over a fixed vocabulary; other words are ignored.
struct BagOfWords;

const VOCAB: [&str; 10] = [
    "dune", "frank", "herbert", "novel", "wrote", "rust", "released", "paris", "capital",
    "france",
];

impl SentenceEmbedder for BagOfWords {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0_f32; VOCAB.len()];
                for word in text.split_whitespace() {
                    let word = word.to_lowercase();
                    if let Some(idx) = VOCAB.iter().position(|w| *w == word) {
                        v[idx] += 1.0;
                    }
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(VOCAB.len())
    }
}

fn rag_thread() -> ChatThread {
    ChatThread::new("Who wrote the novel Dune ?", "Frank Herbert wrote Dune .")
        .with_system("Answer using the documents below .")
        .with_documents([
            "Dune is a science fiction novel by Frank Herbert .",
            "The Rust language was first released in 2015 .",
            "Paris is the capital of France .",
        ])
}

fn assert_close(got: &[f64], want: &[f64], tol: f64) {
    assert_eq!(got.len(), want.len(), "{got:?} vs {want:?}");
    for (g, w) in got.iter().zip(want) {
        assert!((g - w).abs() < tol, "{got:?} vs {want:?}");
    }
}

// ---------------------------------------------------------------------------
// Span localization
// ---------------------------------------------------------------------------

#[test]
fn every_contiguous_slice_is_located() {
    let haystack: Vec<u32> = (0..12).map(|i| i * 7 % 13 + 100).collect();
    for start in 0..haystack.len() {
        for end in start..haystack.len() {
            let needle = &haystack[start..=end];
            let span = locate(&haystack, needle).unwrap();
            assert_eq!(span, Span { start, end });
            assert_eq!(&haystack[span.range()], needle);
        }
    }
}

#[test]
fn absent_and_repeated_needles() {
    let haystack = [5, 6, 7, 5, 6, 7];
    assert!(matches!(
        locate(&haystack, &[7, 7]),
        Err(AttribError::SpanNotFound { .. })
    ));
    assert_eq!(locate(&haystack, &[5, 6]).unwrap(), Span { start: 0, end: 1 });
}

// ---------------------------------------------------------------------------
// Attention attribution
// ---------------------------------------------------------------------------

#[test]
fn attention_worked_example() {
    // Thread "1 2 3 4 5": query 1, documents 2/3/4, answer 5.
    // Answer<->document masses 12, 4, 4; everything else piles on [0, 0].
    let backend = Explicit::new(
        5,
        &[
            ((4, 1), 8.0),
            ((1, 4), 4.0),
            ((4, 2), 4.0),
            ((4, 3), 4.0),
            ((0, 0), 180.0),
        ],
    );
    let scores = compute_attention(
        &backend,
        &WordTokenizer,
        "1 2 3 4 5",
        "1",
        &["2", "3", "4"],
        "5",
        false,
    )
    .unwrap();
    assert_close(&scores, &[0.06, 0.02, 0.02], 1e-9);
    // Not re-normalized.
    assert!((scores.total() - 0.1).abs() < 1e-9);
}

#[test]
fn attention_scores_in_unit_range_and_ordered() {
    let thread = rag_thread();
    let model = CausalUniform::new();
    let text = thread.render();

    let scores = compute_attention(
        &model,
        &WordTokenizer,
        &text,
        thread.query(),
        thread.documents(),
        thread.answer(),
        true,
    )
    .unwrap();
    assert_eq!(scores.len(), 3);
    for &s in &scores {
        assert!((0.0..=1.0).contains(&s), "{s}");
    }
    assert!(scores.total() <= 1.0);

    // Reversing the documents reverses the scores.
    let reversed: Vec<String> = thread.documents().iter().rev().cloned().collect();
    let swapped = compute_attention(
        &model,
        &WordTokenizer,
        &text,
        thread.query(),
        &reversed,
        thread.answer(),
        true,
    )
    .unwrap();
    let mut back = swapped.into_vec();
    back.reverse();
    assert_close(&scores, &back, 1e-12);
}

#[test]
fn include_query_adds_exactly_the_query_terms() {
    let thread = rag_thread();
    let text = thread.render();
    let model = CausalUniform::new();

    let breakdown = compute_attention_breakdown(
        &model,
        &WordTokenizer,
        &text,
        thread.query(),
        thread.documents(),
        thread.answer(),
    )
    .unwrap();
    let with = breakdown.scores(true);
    let without = breakdown.scores(false);

    for (i, doc) in breakdown.documents.iter().enumerate() {
        let query_terms = (doc.query_to_doc + doc.doc_to_query) / breakdown.total_weight;
        assert!((with[i] - without[i] - query_terms).abs() < 1e-12);
        // Documents precede the answer: a causal model never lets them see it.
        assert_eq!(doc.doc_to_answer, 0.0);
        assert!(doc.answer_to_doc > 0.0);
    }
    // Every row of every head sums to one.
    let expected = 4.0 * breakdown.thread_len as f64;
    assert!((breakdown.total_weight / expected - 1.0).abs() < 1e-3);
}

#[test]
fn missing_document_names_its_index() {
    let thread = rag_thread();
    let err = compute_attention(
        &CausalUniform::new(),
        &WordTokenizer,
        &thread.render(),
        thread.query(),
        &["Dune is a science fiction novel by Frank Herbert .", "not in the thread"],
        thread.answer(),
        false,
    )
    .unwrap_err();
    match err {
        AttribError::SpanNotFound { what, .. } => assert_eq!(what, "document 1"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn query_must_be_present_even_when_excluded() {
    let thread = rag_thread();
    let err = compute_attention(
        &CausalUniform::new(),
        &WordTokenizer,
        &thread.render(),
        "an unrelated question",
        thread.documents(),
        thread.answer(),
        false,
    )
    .unwrap_err();
    assert!(matches!(err, AttribError::SpanNotFound { ref what, .. } if what == "query"));
}

#[test]
fn attributor_uses_configured_toggle() {
    let thread = rag_thread();
    let text = thread.render();
    let config = AttributionConfig::default().with_include_query(false);
    let attributor = AttentionAttributor::new(
        AttributionModel::new(Box::new(CausalUniform::new())),
        WordTokenizer,
        &config,
    );
    assert!(!attributor.include_query());

    let via_attributor = attributor
        .compute(&text, thread.query(), thread.documents(), thread.answer())
        .unwrap();
    let direct = compute_attention(
        attributor.model(),
        &WordTokenizer,
        &text,
        thread.query(),
        thread.documents(),
        thread.answer(),
        false,
    )
    .unwrap();
    assert_eq!(via_attributor, direct);
}

#[test]
fn empty_context_gives_empty_scores() {
    let thread = ChatThread::new("q ?", "a .");
    let scores = compute_attention::<_, _, &str>(
        &CausalUniform::new(),
        &WordTokenizer,
        &thread.render(),
        thread.query(),
        &[],
        thread.answer(),
        true,
    )
    .unwrap();
    assert!(scores.is_empty());
}

// ---------------------------------------------------------------------------
// Similarity attribution
// ---------------------------------------------------------------------------

#[test]
fn similarity_worked_example() {
    // Answer on e1, query at (0.6, 0.8): each document is a unit vector with
    // cos(answer, d) = [0.9, 0.1, 0.5] and cos(query, d) = [0.7, 0.3, 0.5].
    let table = Table(vec![
        ("answer", vec![1.0, 0.0, 0.0]),
        ("query", vec![0.6, 0.8, 0.0]),
        ("d1", vec![0.9, 0.2, 0.15_f32.sqrt()]),
        ("d2", vec![0.1, 0.3, 0.9_f32.sqrt()]),
        ("d3", vec![0.5, 0.25, 0.6875_f32.sqrt()]),
    ]);
    let attr = DocumentSimilarityAttribution::with_embedder(Box::new(table), true);
    let scores = attr.compute_similarity("query", &["d1", "d2", "d3"], "answer").unwrap();

    assert_close(&scores, &[0.8 / 1.5, 0.2 / 1.5, 0.5 / 1.5], 1e-5);
    assert!((scores.total() - 1.0).abs() < 1e-6);
}

#[test]
fn similarity_prefers_the_supporting_document() {
    let thread = rag_thread();
    let attr = DocumentSimilarityAttribution::with_embedder(Box::new(BagOfWords), true);
    let scores = attr
        .compute_similarity(thread.query(), thread.documents(), thread.answer())
        .unwrap();

    assert_eq!(scores.argmax(), Some(0));
    assert!((scores.total() - 1.0).abs() < 1e-6);
    for &s in &scores {
        assert!((0.0..=1.0).contains(&s));
    }
}

#[test]
fn similarity_zero_sum_falls_back_to_raw() {
    let table = Table(vec![("answer", vec![1.0, 0.0]), ("d", vec![0.0, 1.0])]);
    let attr = DocumentSimilarityAttribution::with_embedder(Box::new(table), false);
    let scores = attr.compute_similarity("q", &["d", "d"], "answer").unwrap();
    assert_eq!(scores.into_vec(), vec![0.0, 0.0]);
}

#[test]
fn both_attributors_agree_on_document_count() {
    let thread = rag_thread();
    let attention = compute_attention(
        &CausalUniform::new(),
        &WordTokenizer,
        &thread.render(),
        thread.query(),
        thread.documents(),
        thread.answer(),
        true,
    )
    .unwrap();
    let similarity = DocumentSimilarityAttribution::with_embedder(Box::new(BagOfWords), true)
        .compute_similarity(thread.query(), thread.documents(), thread.answer())
        .unwrap();
    assert_eq!(attention.len(), thread.documents().len());
    assert_eq!(similarity.len(), thread.documents().len());
}
