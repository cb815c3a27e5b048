// SPDX-License-Identifier: MIT OR Apache-2.0

//! Score retrieved documents against an answer by embedding similarity.
//!
//! ```bash
//! cargo run --release --example attribute_documents
//! RUST_LOG=candle_attrib=debug attribute_include_query=False \
//!     cargo run --release --example attribute_documents
//! ```
//!
//! On first run, downloads `all-MiniLM-L6-v2` (~90 MB) from `HuggingFace`
//! Hub. Subsequent runs use the local cache. Set `attribute_llm` to use a
//! different sentence-transformers model and `force_cpu=True` to stay off
//! the GPU.

use candle_attrib::{AttributionConfig, ChatThread, DocumentSimilarityAttribution};
use tracing_subscriber::EnvFilter;

fn main() -> candle_attrib::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Configuration from the environment
    let config = AttributionConfig::from_env();
    println!("Config: {config}");

    // 2. A retrieval-augmented exchange
    let thread = ChatThread::new(
        "How tall is Mount Everest?",
        "Mount Everest is 8,849 metres tall.",
    )
    .with_documents([
        "Mount Everest, Earth's highest mountain, has an elevation of 8,849 metres.",
        "K2 is the second-highest mountain on Earth at 8,611 metres.",
        "The Great Barrier Reef is the world's largest coral reef system.",
    ]);

    // 3. Load the embedding model and score the documents
    let attributor = DocumentSimilarityAttribution::new(&config)?;
    let scores =
        attributor.compute_similarity(thread.query(), thread.documents(), thread.answer())?;

    // 4. Report
    println!("\nQuery:  {}", thread.query());
    println!("Answer: {}\n", thread.answer());
    for (doc, score) in thread.documents().iter().zip(&scores) {
        println!("  {score:.3}  {doc}");
    }
    if let Some(best) = scores.argmax() {
        println!("\nMost supporting document: #{best}");
    }

    Ok(())
}
