//! # Generation Backends
//!
//! A [`GenerationBackend`] turns a prompt into completion text. The production
//! backend talks to an Ollama-compatible `/api/generate` endpoint with streaming
//! disabled. Every call carries an explicit timeout; no retries happen here.
//!
//! Which path the answer composer uses is fixed when it is built, through
//! [`GenerationMode`]: a remote backend, or extractive answers only.

use crate::config::GenerationConfig;
use crate::rag::error::GenerationError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tag reported for answers produced by the Ollama backend.
pub const LLAMA_TAG: &str = "llama";

/// Tag reported when the composer runs without a model.
pub const EXTRACTIVE_TAG: &str = "extractive";

/// Sampling parameters sent with every generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short identifier reported in answers (e.g. `"llama"`).
    fn tag(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, GenerationError>;
}

/// How the answer composer produces text, chosen once at construction.
#[derive(Clone)]
pub enum GenerationMode {
    Remote(Arc<dyn GenerationBackend>),
    Extractive,
}

impl GenerationMode {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        match config.backend.as_str() {
            LLAMA_TAG => {
                let backend = OllamaBackend::new(
                    &config.endpoint,
                    &config.model_id,
                    Duration::from_secs(config.timeout_seconds),
                )?;
                Ok(GenerationMode::Remote(Arc::new(backend)))
            }
            EXTRACTIVE_TAG => Ok(GenerationMode::Extractive),
            other => Err(anyhow!("Unknown generation backend: {}", other)),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            GenerationMode::Remote(backend) => backend.tag(),
            GenerationMode::Extractive => EXTRACTIVE_TAG,
        }
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

/// Non-streaming client for Ollama's `/api/generate`.
pub struct OllamaBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn tag(&self) -> &str {
        LLAMA_TAG
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, GenerationError> {
        let start_time = Instant::now();
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                num_predict: params.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.model, "Generation backend returned an error status");
            return Err(GenerationError::Backend(format!("status {}: {}", status, body)));
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(format!("invalid response body: {}", e)))?;

        debug!(
            model = %self.model,
            done = body.done,
            chars = body.response.chars().count(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Generation finished"
        );

        if body.response.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }
        Ok(body.response)
    }
}

fn classify_send_error(err: reqwest::Error) -> GenerationError {
    if err.is_connect() {
        GenerationError::Unreachable(err.to_string())
    } else if err.is_timeout() {
        GenerationError::Backend(format!("request timed out: {}", err))
    } else {
        GenerationError::Backend(err.to_string())
    }
}
