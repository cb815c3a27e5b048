// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attention attribution on a real chat template with a toy attention model.
//!
//! ```bash
//! cargo run --release --example span_attention
//! cargo run --release --example span_attention -- Qwen/Qwen2.5-0.5B-Instruct
//! ```
//!
//! Tokenizes a `ChatML` thread with a real `HuggingFace` tokenizer, locates
//! every document, the query and the answer in it, and scores documents with
//! a recency-biased causal attention pattern standing in for a language
//! model. Plug a real model in by implementing `AttentionBackend`.

use candle_attrib::{
    AttentionAttributor, AttentionBackend, AttentionCache, AttribTokenizer, AttributionConfig,
    AttributionModel, ChatThread, LayerSelection,
};
use candle_core::{Device, Tensor};
use tracing_subscriber::EnvFilter;

/// Causal attention decaying geometrically with distance, rows normalized.
struct RecencyAttention {
    device: Device,
    heads: usize,
    decay: f32,
}

impl AttentionBackend for RecencyAttention {
    fn num_layers(&self) -> usize {
        1
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
    ) -> candle_attrib::Result<AttentionCache> {
        let (batch, seq) = input_ids.dims2()?;
        let mut cells = vec![0.0_f32; seq * seq];
        for (q, row) in cells.chunks_mut(seq).enumerate() {
            let mut weight = 1.0_f32;
            for k in (0..=q).rev() {
                if let Some(cell) = row.get_mut(k) {
                    *cell = weight;
                }
                weight *= self.decay;
            }
            let total: f32 = row.iter().sum();
            row.iter_mut().for_each(|cell| *cell /= total);
        }
        let pattern = Tensor::from_vec(cells, (1, 1, seq, seq), &self.device)?
            .broadcast_as((batch, self.heads, seq, seq))?
            .contiguous()?;

        let mut cache = AttentionCache::with_capacity(1);
        if layers.includes(0, 1) {
            cache.push(pattern);
        }
        Ok(cache)
    }
}

fn main() -> candle_attrib::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Tokenizer of the model that produced the answer
    let model_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Qwen/Qwen2.5-0.5B-Instruct".to_owned());
    let tokenizer = AttribTokenizer::from_pretrained(&model_id)?;
    println!("Tokenizer: {model_id} ({} tokens)", tokenizer.vocab_size());

    // 2. Thread exactly as the model saw it
    let thread = ChatThread::new(
        "Which planet is known as the Red Planet?",
        "Mars is known as the Red Planet.",
    )
    .with_system("Answer the question using the documents.")
    .with_documents([
        "Jupiter is the largest planet in the Solar System.",
        "Mars is often called the Red Planet because of iron oxide on its surface.",
        "Venus is the hottest planet in the Solar System.",
    ]);
    let text = thread.render();

    // 3. Attention attributor over the toy model
    let model = AttributionModel::new(Box::new(RecencyAttention {
        device: Device::Cpu,
        heads: 4,
        decay: 0.97,
    }));
    let attributor = AttentionAttributor::new(model, tokenizer, &AttributionConfig::from_env());

    let breakdown =
        attributor.breakdown(&text, thread.query(), thread.documents(), thread.answer())?;
    println!(
        "Thread: {} tokens, query at {:?}, answer at {:?}",
        breakdown.thread_len, breakdown.query_span, breakdown.answer_span
    );

    // 4. Report
    let scores = breakdown.scores(attributor.include_query());
    println!("\ninclude_query = {}", attributor.include_query());
    for ((doc, detail), score) in thread
        .documents()
        .iter()
        .zip(&breakdown.documents)
        .zip(&scores)
    {
        println!(
            "  {score:.4}  tokens {:>3}..={:<3}  answer->doc {:.3}  {doc}",
            detail.span.start, detail.span.end, detail.answer_to_doc
        );
    }

    Ok(())
}
