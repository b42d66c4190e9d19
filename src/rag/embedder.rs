//! # Query Embedder
//!
//! Turns a query string into a vector comparable with the passage index.
//!
//! The production implementation runs a BERT-family sentence-transformer with
//! candle: tokenize, run the encoder, mean-pool the token states over the
//! attention mask and optionally L2-normalise. Model files come either from a
//! local directory or from the Hugging Face hub (cached after the first download).
//!
//! ## Hub environment variables:
//! - `HF_TOKEN`: access token for gated or private repositories
//! - `HF_HUB_CACHE` / `HF_HOME`: where downloaded files are cached

use crate::rag::error::RagError;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

/// Sentence-transformers truncate this model family at 128 word pieces.
pub const MAX_SEQ_LEN: usize = 128;

/// Anything that maps text to a fixed-length vector.
///
/// `embed` must be a pure function of its input: the same text always yields the
/// same vector. Empty text is valid input.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    fn dimension(&self) -> usize;

    fn model_id(&self) -> &str;
}

/// Candle BERT encoder with mean pooling.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dimension: usize,
    normalize: bool,
}

/// Paths of the three files a sentence-transformer checkpoint needs.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    fn in_dir(dir: &Path) -> Self {
        Self {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
        }
    }
}

impl BertEmbedder {
    /// Resolve and load `model_id`.
    ///
    /// If `model_id` names an existing directory the files are read from it,
    /// otherwise it is treated as a hub repository id and downloaded.
    pub async fn load(model_id: &str, device: Device, normalize: bool) -> Result<Self, RagError> {
        let local = Path::new(model_id);
        let files = if local.is_dir() {
            info!("Loading embedding model from local directory {}", local.display());
            ModelFiles::in_dir(local)
        } else {
            fetch_from_hub(model_id).await?
        };

        Self::from_files(model_id, &files, device, normalize)
    }

    pub fn from_files(model_id: &str, files: &ModelFiles, device: Device, normalize: bool) -> Result<Self, RagError> {
        let start_time = std::time::Instant::now();

        let config_data = std::fs::read_to_string(&files.config)
            .map_err(|e| RagError::Embedding(format!("cannot read {}: {}", files.config.display(), e)))?;
        let bert_config: BertConfig = serde_json::from_str(&config_data)
            .map_err(|e| RagError::Embedding(format!("invalid BERT config: {}", e)))?;
        let dimension = serde_json::from_str::<serde_json::Value>(&config_data)
            .ok()
            .and_then(|value| value.get("hidden_size").and_then(|v| v.as_u64()))
            .map(|size| size as usize)
            .ok_or_else(|| RagError::Embedding("BERT config has no hidden_size".to_string()))?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| RagError::Embedding(format!("failed to load tokenizer: {}", e)))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| RagError::Embedding(format!("failed to configure truncation: {}", e)))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights.as_path()], DTYPE, &device)
                .map_err(|e| RagError::Embedding(format!("failed to load weights: {}", e)))?
        };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| RagError::Embedding(format!("failed to build BERT model: {}", e)))?;

        info!(
            model = model_id,
            dimension,
            normalize,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Embedding model loaded"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            model_id: model_id.to_string(),
            dimension,
            normalize,
        })
    }
}

impl Embedder for BertEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| RagError::Embedding(format!("tokenization failed: {}", e)))?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = mean_pool(&hidden, &attention_mask)?;

        let mut vector = pooled.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        if self.normalize {
            l2_normalize(&mut vector);
        }

        debug!(tokens = encoding.get_ids().len(), "Query embedded");
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

async fn fetch_from_hub(model_id: &str) -> Result<ModelFiles, RagError> {
    use hf_hub::api::tokio::ApiBuilder;

    let mut builder = ApiBuilder::new().with_progress(false);
    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }
    if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        builder = builder.with_cache_dir(cache_dir.into());
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
    }

    let api = builder
        .build()
        .map_err(|e| RagError::Embedding(format!("cannot create hub client: {}", e)))?;
    let repo = api.model(model_id.to_string());

    info!("Fetching embedding model {} from the hub", model_id);
    Ok(ModelFiles {
        config: download(&repo, model_id, "config.json").await?,
        tokenizer: download(&repo, model_id, "tokenizer.json").await?,
        weights: download(&repo, model_id, "model.safetensors").await?,
    })
}

async fn download(repo: &hf_hub::api::tokio::ApiRepo, model_id: &str, file: &str) -> Result<PathBuf, RagError> {
    let path = repo
        .get(file)
        .await
        .map_err(|e| RagError::Embedding(format!("failed to download {} from {}: {}", file, model_id, e)))?;
    debug!("Resolved {} to {}", file, path.display());
    Ok(path)
}

/// Average the token states of `hidden` (`[batch, tokens, dim]`) over the positions
/// where `attention_mask` (`[batch, tokens]`) is 1.
pub fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask.unsqueeze(D::Minus1)?.to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9f32, f32::MAX)?;
    summed.broadcast_div(&counts)
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_ignores_masked_tokens() {
        let hidden = Tensor::new(&[[[1f32, 2.0], [3.0, 4.0], [100.0, 100.0]]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();
        let pooled = mean_pool(&hidden, &mask).unwrap();
        let values = pooled.squeeze(0).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_l2_normalize() {
        let mut vector = vec![3.0f32, 4.0];
        l2_normalize(&mut vector);
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[1] - 0.8).abs() < 1e-6);

        let mut zeros = vec![0.0f32; 3];
        l2_normalize(&mut zeros);
        assert_eq!(zeros, vec![0.0; 3]);
    }

    #[test]
    fn test_model_files_layout() {
        let files = ModelFiles::in_dir(Path::new("/models/minilm"));
        assert_eq!(files.config, PathBuf::from("/models/minilm/config.json"));
        assert_eq!(files.tokenizer, PathBuf::from("/models/minilm/tokenizer.json"));
        assert_eq!(files.weights, PathBuf::from("/models/minilm/model.safetensors"));
    }
}
