// SPDX-License-Identifier: MIT OR Apache-2.0

//! BERT-family sentence embedder (`sentence-transformers` style).
//!
//! Loads `config.json`, `tokenizer.json` and `model.safetensors`, runs
//! [`BertModel`] over a padded batch and mean-pools the last hidden state
//! over non-padding tokens.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::SentenceEmbedder;
use crate::error::{AttribError, Result};

/// Files a sentence embedding checkpoint must provide.
const REQUIRED_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

/// Longest input (in tokens) fed to the encoder; longer texts are truncated.
const MAX_SEQ_LEN: usize = 512;

/// Sentence embedder backed by a BERT encoder and mean pooling.
///
/// # Example
///
/// ```no_run
/// use candle_attrib::embedding::{BertEmbedder, SentenceEmbedder};
///
/// # fn main() -> candle_attrib::Result<()> {
/// let embedder = BertEmbedder::from_pretrained(
///     "sentence-transformers/all-MiniLM-L6-v2",
///     &candle_core::Device::Cpu,
/// )?;
/// let vectors = embedder.embed(&["Paris is the capital of France."])?;
/// assert_eq!(vectors[0].len(), 384);
/// # Ok(())
/// # }
/// ```
pub struct BertEmbedder {
    /// Encoder weights.
    model: BertModel,
    /// Tokenizer configured to pad to the longest sequence in a batch.
    tokenizer: Tokenizer,
    /// Device the encoder lives on.
    device: Device,
    /// Output dimension (`hidden_size`).
    hidden_size: usize,
}

impl BertEmbedder {
    /// Load an embedder from a `HuggingFace` model id or a local directory.
    ///
    /// A path to an existing directory is loaded directly; anything else is
    /// resolved through the `HuggingFace` Hub cache, downloading if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Download`] if the files cannot be resolved,
    /// and the errors of [`from_dir`](Self::from_dir) otherwise.
    pub fn from_pretrained(model_id: &str, device: &Device) -> Result<Self> {
        if Path::new(model_id).is_dir() {
            return Self::from_dir(model_id, device);
        }

        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| AttribError::Download(format!("HF Hub API: {e}")))?;
        let repo = api.model(model_id.to_owned());

        let mut paths: Vec<PathBuf> = Vec::with_capacity(REQUIRED_FILES.len());
        for file in REQUIRED_FILES {
            let path = repo
                .get(file)
                .map_err(|e| AttribError::Download(format!("{model_id}/{file}: {e}")))?;
            paths.push(path);
        }
        tracing::info!(model_id, "embedding model files resolved");

        match paths.as_slice() {
            [config, tokenizer, weights] => Self::load(config, tokenizer, weights, device),
            _ => Err(AttribError::Download(format!(
                "{model_id}: expected {} files",
                REQUIRED_FILES.len()
            ))),
        }
    }

    /// Load an embedder from a directory holding the checkpoint files.
    ///
    /// # Errors
    ///
    /// Returns [`AttribError::Io`] if `config.json` or the weights cannot be
    /// read, [`AttribError::Config`] if `config.json` is invalid,
    /// [`AttribError::Tokenizer`] if `tokenizer.json` is invalid, and
    /// [`AttribError::Model`] if the weights cannot be loaded.
    pub fn from_dir(dir: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        Self::load(
            &dir.join("config.json"),
            &dir.join("tokenizer.json"),
            &dir.join("model.safetensors"),
            device,
        )
    }

    /// Load from explicit file paths.
    fn load(config: &Path, tokenizer: &Path, weights: &Path, device: &Device) -> Result<Self> {
        // --- Config ---
        let config_str = std::fs::read_to_string(config)?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| AttribError::Config(format!("parse {}: {e}", config.display())))?;

        // --- Tokenizer: pad to the batch's longest, truncate to the model limit ---
        let mut tokenizer = Tokenizer::from_file(tokenizer).map_err(|e| {
            AttribError::Tokenizer(format!("failed to load {}: {e}", tokenizer.display()))
        })?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..TruncationParams::default()
            }))
            .map_err(|e| AttribError::Tokenizer(format!("truncation: {e}")))?;

        // --- Weights ---
        let vb = create_var_builder(weights, DType::F32, device)?;
        let model = BertModel::load(vb, &config)?;

        tracing::info!(
            hidden_size = config.hidden_size,
            cuda = device.is_cuda(),
            "embedding model loaded"
        );

        Ok(Self {
            model,
            tokenizer,
            device: device.clone(),
            hidden_size: config.hidden_size,
        })
    }

    /// The device the encoder lives on.
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Mean of `hidden` over positions where `mask` is 1.
    ///
    /// # Shapes
    /// - `hidden`: `[batch, seq, hidden_size]`
    /// - `mask`: `[batch, seq]`
    /// - returns: `[batch, hidden_size]`
    fn mean_pool(hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let mask = mask.to_dtype(DType::F32)?.unsqueeze(2)?; // [batch, seq, 1]
        let summed = hidden.to_dtype(DType::F32)?.broadcast_mul(&mask)?.sum(1)?; // [batch, hidden]
        let counts = mask.sum(1)?.maximum(1e-9)?; // [batch, 1]
        Ok(summed.broadcast_div(&counts)?)
    }
}

impl SentenceEmbedder for BertEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AttribError::Tokenizer(format!("HF batch encode failed: {e}")))?;
        let seq_len = encodings.first().map_or(0, |enc| enc.get_ids().len());

        let mut ids = Vec::with_capacity(texts.len() * seq_len);
        let mut type_ids = Vec::with_capacity(texts.len() * seq_len);
        let mut mask = Vec::with_capacity(texts.len() * seq_len);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let shape = (texts.len(), seq_len);
        let input_ids = Tensor::from_vec(ids, shape, &self.device)?;
        let token_type_ids = Tensor::from_vec(type_ids, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(mask, shape, &self.device)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = Self::mean_pool(&hidden, &attention_mask)?;
        Ok(pooled.to_vec2::<f32>()?)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.hidden_size)
    }
}

impl std::fmt::Debug for BertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbedder")
            .field("hidden_size", &self.hidden_size)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Weight loading
// ---------------------------------------------------------------------------

/// Create a `VarBuilder` from a safetensors file.
///
/// Uses buffered (safe) loading by default. With the `mmap` feature,
/// uses memory-mapped loading for reduced memory overhead.
fn create_var_builder(path: &Path, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    #[cfg(feature = "mmap")]
    {
        mmap_var_builder(path, dtype, device)
    }
    #[cfg(not(feature = "mmap"))]
    {
        buffered_var_builder(path, dtype, device)
    }
}

/// Load weights via buffered (safe) reading. Reads all data into RAM.
#[cfg(not(feature = "mmap"))]
fn buffered_var_builder(path: &Path, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    let data = std::fs::read(path)?;
    Ok(VarBuilder::from_buffered_safetensors(data, dtype, device)?)
}

/// Load weights via memory-mapped files.
///
/// # Safety
///
/// The safetensors file must not be modified while the model is loaded.
#[cfg(feature = "mmap")]
#[allow(unsafe_code)]
fn mmap_var_builder(path: &Path, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    // SAFETY: safetensors files must not be modified while loaded.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], dtype, device)? };
    Ok(vb)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
