// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding-similarity document attribution.
//!
//! Each document is embedded and compared with the answer (and, optionally,
//! the query) by cosine similarity. Raw scores are normalized to sum to one.

use crate::attribution::scores::AttributionScores;
use crate::embedding::{SentenceEmbedder, cosine_similarity, embed_one};
use crate::error::{AttribError, Result};

/// Attributes an answer to documents by sentence-embedding similarity.
///
/// The embedder is loaded once at construction and only read afterwards,
/// so one instance can serve many requests.
pub struct DocumentSimilarityAttribution {
    /// Sentence embedding model.
    // TRAIT_OBJECT: embedders of different architectures share one attributor type
    embedder: Box<dyn SentenceEmbedder>,
    /// Captured from [`AttributionConfig::include_query`](crate::AttributionConfig::include_query) at construction.
    include_query: bool,
}

impl DocumentSimilarityAttribution {
    /// Load the configured embedding model.
    ///
    /// The device is chosen by [`select_device`](crate::select_device)
    /// from `config.force_cpu`; the model comes from
    /// `config.embedding_model_name` (Hub id or local directory).
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Download`] if the model cannot be fetched and
    /// propagates model loading errors.
    #[cfg(feature = "embeddings")]
    pub fn new(config: &crate::config::AttributionConfig) -> Result<Self> {
        let device = crate::device::select_device(config.force_cpu)?;
        let embedder =
            crate::embedding::BertEmbedder::from_pretrained(&config.embedding_model_name, &device)?;
        tracing::info!(%config, "similarity attributor ready");
        Ok(Self::with_embedder(Box::new(embedder), config.include_query))
    }

    /// Build an attributor around an already-loaded embedder.
    // TRAIT_OBJECT: embedders of different architectures share one attributor type
    #[must_use]
    pub fn with_embedder(embedder: Box<dyn SentenceEmbedder>, include_query: bool) -> Self {
        Self {
            embedder,
            include_query,
        }
    }

    /// Whether query similarity is averaged into each raw score.
    #[must_use]
    pub const fn include_query(&self) -> bool {
        self.include_query
    }

    /// The underlying embedder.
    // TRAIT_OBJECT: caller may inspect the embedder's dimension
    #[must_use]
    pub fn embedder(&self) -> &dyn SentenceEmbedder {
        &*self.embedder
    }

    /// Score each document of `context` by its similarity to `answer`.
    ///
    /// The raw score of a document is `cos(answer, doc)`, or the mean of
    /// `cos(answer, doc)` and `cos(query, doc)` when the query is included.
    /// Raw scores are divided by their sum; if that sum is not positive the
    /// raw scores are returned unchanged. Scores come back in `context`
    /// order, and an empty `context` yields empty scores.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Embedding`] if the embedder returns the wrong
    /// number of vectors or vectors of mismatched dimension, and propagates
    /// embedder failures unchanged.
    pub fn compute_similarity<S: AsRef<str>>(
        &self,
        query: &str,
        context: &[S],
        answer: &str,
    ) -> Result<AttributionScores> {
        let answer_embedding = embed_one(&*self.embedder, answer)?;

        let documents: Vec<&str> = context.iter().map(AsRef::as_ref).collect();
        let doc_embeddings = self.embedder.embed(&documents)?;
        if doc_embeddings.len() != documents.len() {
            return Err(AttribError::Embedding(format!(
                "embedder returned {} vectors for {} documents",
                doc_embeddings.len(),
                documents.len()
            )));
        }

        let query_embedding = if self.include_query {
            Some(embed_one(&*self.embedder, query)?)
        } else {
            None
        };

        let mut raw = Vec::with_capacity(doc_embeddings.len());
        for doc in &doc_embeddings {
            let answer_sim = cosine_similarity(&answer_embedding, doc)?;
            let score = match &query_embedding {
                Some(query) => (answer_sim + cosine_similarity(query, doc)?) / 2.0,
                None => answer_sim,
            };
            raw.push(score);
        }
        tracing::debug!(include_query = self.include_query, ?raw, "raw similarity scores");

        Ok(AttributionScores::normalized_by_sum(raw))
    }
}

impl std::fmt::Debug for DocumentSimilarityAttribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSimilarityAttribution")
            .field("dimension", &self.embedder.dimension())
            .field("include_query", &self.include_query)
            .finish_non_exhaustive()
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
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Embedder serving fixed vectors per text and recording every batch.
    struct TableEmbedder {
        table: HashMap<&'static str, Vec<f32>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl TableEmbedder {
        fn new(entries: &[(&'static str, Vec<f32>)]) -> Self {
            Self {
                table: entries.iter().cloned().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl SentenceEmbedder for TableEmbedder {
        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.calls
                .lock()
                .unwrap()
                .push(texts.iter().map(ToString::to_string).collect());
            texts
                .iter()
                .map(|text| {
                    self.table
                        .get(text)
                        .cloned()
                        .ok_or_else(|| AttribError::Embedding(format!("unknown text {text:?}")))
                })
                .collect()
        }

        fn dimension(&self) -> Option<usize> {
            Some(2)
        }
    }

    /// Unit vector at `cos` from the x axis, so `cos(x, v) == cos`.
    fn at(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    fn assert_close(got: &[f64], want: &[f64]) {
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-3, "{got:?} != {want:?}");
        }
    }

    #[test]
    fn answer_only_scores_sum_to_one() {
        let embedder = TableEmbedder::new(&[
            ("answer", vec![1.0, 0.0]),
            ("d1", at(0.8)),
            ("d2", at(0.2)),
            ("d3", at(0.5)),
        ]);
        let attr = DocumentSimilarityAttribution::with_embedder(Box::new(embedder), false);

        let scores = attr.compute_similarity("unused", &["d1", "d2", "d3"], "answer").unwrap();
        assert_close(&scores, &[0.533, 0.133, 0.333]);
        assert!((scores.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn query_is_averaged_in() {
        // Answer on the x axis, query on the y axis: each raw score is the
        // mean of a document's two cosines.
        let embedder = TableEmbedder::new(&[
            ("answer", vec![1.0, 0.0]),
            ("query", vec![0.0, 1.0]),
            ("d1", vec![0.9, 0.7]),
            ("d2", vec![0.1, 0.3]),
            ("d3", vec![0.5, 0.5]),
        ]);
        let attr = DocumentSimilarityAttribution::with_embedder(Box::new(embedder), true);
        let scores = attr.compute_similarity("query", &["d1", "d2", "d3"], "answer").unwrap();

        let cos = |a: [f64; 2], b: [f64; 2]| {
            (a[0] * b[0] + a[1] * b[1]) / ((a[0].hypot(a[1])) * (b[0].hypot(b[1])))
        };
        let docs = [[0.9, 0.7], [0.1, 0.3], [0.5, 0.5]];
        let raw: Vec<f64> = docs
            .iter()
            .map(|&d| (cos([1.0, 0.0], d) + cos([0.0, 1.0], d)) / 2.0)
            .collect();
        let total: f64 = raw.iter().sum();
        let want: Vec<f64> = raw.iter().map(|r| r / total).collect();
        assert_close(&scores, &want);
    }

    #[test]
    fn query_not_embedded_when_excluded() {
        let embedder = TableEmbedder::new(&[("answer", vec![1.0, 0.0]), ("d", vec![1.0, 1.0])]);
        let attr = DocumentSimilarityAttribution::with_embedder(Box::new(embedder), false);
        // "missing" has no table entry: embedding it would fail.
        let scores = attr.compute_similarity("missing", &["d"], "answer").unwrap();
        assert_close(&scores, &[1.0]);
    }

    #[test]
    fn documents_embedded_in_one_batch_in_order() {
        let embedder = std::sync::Arc::new(TableEmbedder::new(&[
            ("answer", vec![1.0, 0.0]),
            ("query", vec![1.0, 0.0]),
            ("b", at(0.3)),
            ("a", at(0.6)),
        ]));

        struct Shared(std::sync::Arc<TableEmbedder>);
        impl SentenceEmbedder for Shared {
            fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
                self.0.embed(texts)
            }
        }

        let attr = DocumentSimilarityAttribution::with_embedder(
            Box::new(Shared(std::sync::Arc::clone(&embedder))),
            true,
        );
        let scores = attr.compute_similarity("query", &["b", "a"], "answer").unwrap();
        assert_close(&scores, &[0.3 / 0.9, 0.6 / 0.9]);

        let calls = embedder.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn non_positive_sum_returns_raw() {
        let embedder = TableEmbedder::new(&[
            ("answer", vec![1.0, 0.0]),
            ("opposite", vec![-1.0, 0.0]),
            ("orthogonal", vec![0.0, 1.0]),
        ]);
        let attr = DocumentSimilarityAttribution::with_embedder(Box::new(embedder), false);
        let scores = attr
            .compute_similarity("q", &["opposite", "orthogonal"], "answer")
            .unwrap();
        assert_close(&scores, &[-1.0, 0.0]);
    }

    #[test]
    fn empty_context_is_empty() {
        let embedder = TableEmbedder::new(&[("answer", vec![1.0, 0.0])]);
        let attr = DocumentSimilarityAttribution::with_embedder(Box::new(embedder), false);
        let scores = attr.compute_similarity::<&str>("q", &[], "answer").unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn short_batch_is_an_error() {
        struct Short;
        impl SentenceEmbedder for Short {
            fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![1.0, 0.0]; texts.len().min(1)])
            }
        }
        let attr = DocumentSimilarityAttribution::with_embedder(Box::new(Short), false);
        let err = attr.compute_similarity("q", &["a", "b"], "answer").unwrap_err();
        assert!(matches!(err, AttribError::Embedding(_)));
    }

    #[test]
    fn debug_reports_dimension() {
        let embedder = TableEmbedder::new(&[]);
        let attr = DocumentSimilarityAttribution::with_embedder(Box::new(embedder), true);
        let text = format!("{attr:?}");
        assert!(text.contains("Some(2)"));
        assert!(attr.include_query());
        assert_eq!(attr.embedder().dimension(), Some(2));
    }
}
