// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests: load a real sentence-transformers model from the
//! HuggingFace cache and check similarity attribution end to end.
//!
//! These tests require `sentence-transformers/all-MiniLM-L6-v2` in the local
//! HF cache and skip otherwise.
//!
//! Run: `cargo test --test validate_embeddings`

#![cfg(feature = "embeddings")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    missing_docs
)]

use candle_attrib::{BertEmbedder, DocumentSimilarityAttribution, SentenceEmbedder, cosine_similarity};
use candle_core::Device;

const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Find the HuggingFace cache directory.
fn hf_cache_dir() -> Option<std::path::PathBuf> {
    if let Ok(cache) = std::env::var("HF_HOME") {
        return Some(std::path::PathBuf::from(cache).join("hub"));
    }
    ["USERPROFILE", "HOME"].iter().find_map(|var| {
        std::env::var(var).ok().map(|home| {
            std::path::PathBuf::from(home)
                .join(".cache")
                .join("huggingface")
                .join("hub")
        })
    })
}

/// Find the snapshot directory for a given model ID.
fn find_snapshot(model_id: &str) -> Option<std::path::PathBuf> {
    let model_dir_name = format!("models--{}", model_id.replace('/', "--"));
    let snapshots_dir = hf_cache_dir()?.join(model_dir_name).join("snapshots");
    let entry = std::fs::read_dir(snapshots_dir).ok()?.next()?.ok()?;
    let path = entry.path();
    path.join("model.safetensors").exists().then_some(path)
}

fn load_embedder() -> Option<BertEmbedder> {
    let Some(snapshot) = find_snapshot(MODEL_ID) else {
        eprintln!("SKIP: {MODEL_ID} not in cache");
        return None;
    };
    Some(BertEmbedder::from_dir(snapshot, &Device::Cpu).unwrap())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn minilm_dimension_and_batch_shape() {
    let Some(embedder) = load_embedder() else {
        return;
    };
    assert_eq!(embedder.dimension(), Some(384));

    let vectors = embedder
        .embed(&["short", "a noticeably longer sentence that forces padding"])
        .unwrap();
    assert_eq!(vectors.len(), 2);
    assert!(vectors.iter().all(|v| v.len() == 384));
}

#[test]
fn minilm_padding_does_not_change_embeddings() {
    let Some(embedder) = load_embedder() else {
        return;
    };
    let alone = embedder.embed(&["The cat sat on the mat."]).unwrap();
    let batched = embedder
        .embed(&[
            "The cat sat on the mat.",
            "A much longer companion sentence so the first one gets padded in the batch.",
        ])
        .unwrap();
    let sim = cosine_similarity(&alone[0], &batched[0]).unwrap();
    assert!(sim > 0.999, "padding changed the embedding: cos = {sim}");
}

#[test]
fn minilm_attributes_to_the_supporting_document() {
    let Some(embedder) = load_embedder() else {
        return;
    };
    let attr = DocumentSimilarityAttribution::with_embedder(Box::new(embedder), true);

    let documents = [
        "The Eiffel Tower is located in Paris and was completed in 1889.",
        "Photosynthesis converts light energy into chemical energy in plants.",
        "The Rust programming language emphasizes memory safety.",
    ];
    let scores = attr
        .compute_similarity(
            "When was the Eiffel Tower finished?",
            &documents,
            "The Eiffel Tower was completed in 1889.",
        )
        .unwrap();

    assert_eq!(scores.len(), 3);
    assert_eq!(scores.argmax(), Some(0));
    assert!((scores.total() - 1.0).abs() < 1e-6);
}
