// ABOUTME: Text embedding inference for semantic exercise retrieval
// ABOUTME: Loads a local BERT-family model with candle; inference is synchronous and CPU-bound
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # Query Embedding
//!
//! The corpus index represents every exercise as a fixed-length vector and
//! ranks them by cosine similarity against the query embedding. Exercises come
//! with precomputed vectors; only the query is embedded at request time.
//!
//! Inference here is a fully synchronous, CPU-bound computation. Callers on the
//! async runtime must dispatch it through `tokio::task::spawn_blocking`; the
//! index does this, the embedder itself never touches the scheduler.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use lru::LruCache;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use crate::errors::{AppError, AppResult};

/// Maximum token sequence length fed to the model
const MAX_SEQ_LENGTH: usize = 256;

/// Bounded memoization of query embeddings
const CACHE_CAPACITY: usize = 1024;

/// Synchronous text embedding model
///
/// Implementations must be deterministic: the same text always produces the
/// same vector, which makes search ordering reproducible.
pub trait TextEmbedder: Send + Sync {
    /// Embedding vector dimensions
    fn dimensions(&self) -> usize;

    /// Embed a single text into an L2-normalized vector
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or the forward pass fails.
    fn embed(&self, text: &str) -> AppResult<Vec<f32>>;

    /// Model identifier for logging
    fn model_id(&self) -> &str;
}

/// BERT-family embedder running locally through candle on CPU
///
/// Expects `model.safetensors`, `config.json`, and `tokenizer.json` in the
/// model directory. Output is attention-weighted mean pooling over the last
/// hidden states, L2-normalized.
pub struct CandleEmbedder {
    model: Mutex<BertModel>,
    tokenizer: Tokenizer,
    device: Device,
    dimensions: usize,
    model_id: String,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CandleEmbedder {
    /// Load the model from a directory
    ///
    /// # Errors
    ///
    /// Returns a fatal error if any model file is missing or malformed. The
    /// caller treats this as a load failure that blocks the index.
    pub fn load(model_dir: &Path, model_id: &str) -> AppResult<Self> {
        let model_path = model_dir.join("model.safetensors");
        let config_path = model_dir.join("config.json");
        let tokenizer_path = model_dir.join("tokenizer.json");

        let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
            AppError::config(format!(
                "failed to read embedding model config {}: {e}",
                config_path.display()
            ))
        })?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| AppError::config(format!("failed to parse embedding model config: {e}")))?;
        let dimensions = config.hidden_size;

        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(&model_path, &device).map_err(|e| {
            AppError::config(format!(
                "failed to load embedding weights {}: {e}",
                model_path.display()
            ))
        })?;

        // HF checkpoints may or may not carry the "bert." prefix
        let vb = VarBuilder::from_tensors(tensors.clone(), DType::F32, &device);
        let model = BertModel::load(vb.pp("bert"), &config).or_else(|_| {
            let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
            BertModel::load(vb, &config)
        });
        let model = model
            .map_err(|e| AppError::config(format!("failed to build embedding model: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| AppError::config(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| AppError::config(format!("failed to configure tokenizer: {e}")))?;

        info!(
            "Embedding model {model_id} loaded from {} ({dimensions} dimensions)",
            model_dir.display()
        );

        let capacity = NonZeroUsize::new(CACHE_CAPACITY)
            .ok_or_else(|| AppError::internal("embedding cache capacity must be nonzero"))?;

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device,
            dimensions,
            model_id: model_id.to_owned(),
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn embed_uncached(&self, text: &str) -> AppResult<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| AppError::internal(format!("tokenization failed: {e}")))?;

        let input_ids: Vec<u32> = encoding.get_ids().to_vec();
        let attention_mask: Vec<u32> = encoding.get_attention_mask().to_vec();

        let embed_err = |e: candle_core::Error| AppError::internal(format!("embedding failed: {e}"));

        let input_ids = Tensor::new(&input_ids[..], &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(embed_err)?;
        let token_type_ids = input_ids.zeros_like().map_err(embed_err)?;
        let attention_mask = Tensor::new(&attention_mask[..], &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(embed_err)?;

        // Forward pass -> [1, seq_len, hidden_size]
        let model = self
            .model
            .lock()
            .map_err(|_| AppError::internal("embedding model lock poisoned"))?;
        let hidden_states = model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(embed_err)?;
        drop(model);

        // Mean pooling weighted by the attention mask
        let mask = attention_mask
            .to_dtype(DType::F32)
            .and_then(|t| t.unsqueeze(2))
            .map_err(embed_err)?;
        let sum_mask = mask.sum(1).map_err(embed_err)?;
        let pooled = hidden_states
            .broadcast_mul(&mask)
            .and_then(|t| t.sum(1))
            .and_then(|t| t.broadcast_div(&sum_mask))
            .map_err(embed_err)?;

        // L2 normalize
        let normalized = pooled
            .sqr()
            .and_then(|t| t.sum_keepdim(1))
            .and_then(|t| t.sqrt())
            .and_then(|norm| pooled.broadcast_div(&norm))
            .map_err(embed_err)?;

        normalized
            .squeeze(0)
            .and_then(|t| t.to_vec1())
            .map_err(embed_err)
    }
}

impl TextEmbedder for CandleEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get(text) {
                return Ok(cached.clone());
            }
        }

        let embedding = self.embed_uncached(text)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(text.to_owned(), embedding.clone());
        }

        Ok(embedding)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Cosine similarity `dot / (|a| * |b|)` between two vectors
///
/// Returns 0.0 when either vector has zero magnitude or the lengths differ,
/// so degenerate rows rank last rather than poisoning the sort.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
