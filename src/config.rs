//! # Configuration Management
//!
//! This module loads the application configuration from layered sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables (with APP_ prefix, sections separated by `__`)
//! - Platform variables: HOST, PORT, AZURE_KEY, AZURE_REGION
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML / environment data
//! - **derive macros**: Generate Debug, Clone, Serialize, Deserialize
//! - **Result<T, E>**: Loading and validation can fail and must be handled
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, AZURE_KEY, AZURE_REGION)
//! 2. Environment variables (APP_SERVER__PORT, APP_RAG__TOP_K_DEFAULT, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Generation backends the answer composer knows how to build.
pub const GENERATION_BACKENDS: &[&str] = &["llama", "extractive"];

/// Speech recognizers the voice session knows how to build.
pub const SPEECH_PROVIDERS: &[&str] = &["azure", "disabled"];

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - **server**: where the HTTP / WebSocket listener binds
/// - **rag**: knowledge base files, embedding model and retrieval defaults
/// - **generation**: the completion backend and its sampling parameters
/// - **speech**: the speech recognizer and utterance segmentation
/// - **performance**: session limits and audio queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rag: RagConfig,
    pub generation: GenerationConfig,
    pub speech: SpeechConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Knowledge base and retrieval settings.
///
/// ## Fields:
/// - `index_path`: flat vector index (`.safetensors` or `.npy`, one row per passage)
/// - `metadata_path`: JSON array of passage records, aligned with the index rows
/// - `embed_model_id`: hub repository id or a local directory holding the model files
/// - `top_k_default`: how many passages a spoken question retrieves
/// - `max_ctx_chars`: character budget for passage text inside the prompt
/// - `normalize_embeddings`: L2-normalise query vectors (must match how the index was built)
/// - `device`: compute device preference for the embedder ("auto", "cpu", "cuda", "metal")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub index_path: String,
    pub metadata_path: String,
    pub embed_model_id: String,
    pub top_k_default: usize,
    pub max_ctx_chars: usize,
    pub normalize_embeddings: bool,
    pub device: String,
}

/// Generation backend settings.
///
/// `backend = "llama"` talks to an Ollama-compatible `/api/generate` endpoint;
/// `backend = "extractive"` never calls a model and answers with the retrieved text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub backend: String,
    pub endpoint: String,
    pub model_id: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

/// Speech recognition and utterance segmentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub provider: String,
    pub azure_key: String,
    pub azure_region: String,
    pub language: String,
    pub timeout_seconds: u64,
    /// RMS level (on the i16 scale) above which a 30 ms frame counts as speech
    pub energy_threshold: f32,
    pub min_speech_ms: u32,
    pub trailing_silence_ms: u32,
    pub max_utterance_ms: u32,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_sessions`: voice sessions allowed at the same time
/// - `pcm_queue_frames`: audio frames buffered per session before the oldest is dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub pcm_queue_frames: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
            },
            rag: RagConfig {
                index_path: "data/ksa_laws_index.safetensors".to_string(),
                metadata_path: "data/ksa_laws_metadata.json".to_string(),
                embed_model_id: "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string(),
                top_k_default: 6,
                max_ctx_chars: 7000,
                normalize_embeddings: false,
                device: "cpu".to_string(),
            },
            generation: GenerationConfig {
                backend: "llama".to_string(),
                endpoint: "http://localhost:11434/api/generate".to_string(),
                model_id: "llama3.1:8b".to_string(),
                timeout_seconds: 120,
                temperature: 0.2,
                top_p: 0.9,
                max_tokens: 512,
            },
            speech: SpeechConfig {
                provider: "disabled".to_string(),
                azure_key: String::new(),
                azure_region: String::new(),
                language: "ar-SA".to_string(),
                timeout_seconds: 15,
                energy_threshold: 500.0,
                min_speech_ms: 300,
                trailing_silence_ms: 700,
                max_utterance_ms: 15_000,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                pcm_queue_frames: 100,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: Override server port
    /// - `APP_RAG__INDEX_PATH=/data/index.safetensors`: Override the index file
    /// - `APP_GENERATION__BACKEND=extractive`: Answer without a language model
    /// - `AZURE_KEY` / `AZURE_REGION`: Speech service credentials
    ///
    /// Nested keys use `__` because several field names contain a single underscore.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms and the speech service use unprefixed names
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(key) = env::var("AZURE_KEY") {
            settings = settings.set_override("speech.azure_key", key)?;
        }
        if let Ok(region) = env::var("AZURE_REGION") {
            settings = settings.set_override("speech.azure_region", region)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors here stops the process before the
    /// knowledge base is loaded or the listener binds.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.rag.top_k_default == 0 {
            return Err(anyhow!("rag.top_k_default must be at least 1"));
        }

        if self.rag.max_ctx_chars == 0 {
            return Err(anyhow!("rag.max_ctx_chars must be greater than 0"));
        }

        if !GENERATION_BACKENDS.contains(&self.generation.backend.as_str()) {
            return Err(anyhow!(
                "Unknown generation backend '{}' (expected one of {:?})",
                self.generation.backend,
                GENERATION_BACKENDS
            ));
        }

        if self.generation.timeout_seconds == 0 {
            return Err(anyhow!("generation.timeout_seconds must be greater than 0"));
        }

        if !SPEECH_PROVIDERS.contains(&self.speech.provider.as_str()) {
            return Err(anyhow!(
                "Unknown speech provider '{}' (expected one of {:?})",
                self.speech.provider,
                SPEECH_PROVIDERS
            ));
        }

        if self.speech.provider == "azure"
            && (self.speech.azure_key.trim().is_empty() || self.speech.azure_region.trim().is_empty())
        {
            return Err(anyhow!("AZURE_KEY and AZURE_REGION must be set when speech.provider = \"azure\""));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.pcm_queue_frames == 0 {
            return Err(anyhow!("performance.pcm_queue_frames must be greater than 0"));
        }

        Ok(())
    }

    /// Copy of the configuration that is safe to return over HTTP.
    pub fn redacted(&self) -> AppConfig {
        let mut config = self.clone();
        if !config.speech.azure_key.is_empty() {
            config.speech.azure_key = "***".to_string();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.rag.top_k_default, 6);
        assert_eq!(config.rag.max_ctx_chars, 7000);
        assert_eq!(config.performance.pcm_queue_frames, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rag.top_k_default = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.generation.backend = "gpt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_azure_requires_credentials() {
        let mut config = AppConfig::default();
        config.speech.provider = "azure".to_string();
        assert!(config.validate().is_err());

        config.speech.azure_key = "secret".to_string();
        config.speech.azure_region = "westeurope".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_hides_key() {
        let mut config = AppConfig::default();
        config.speech.azure_key = "secret".to_string();
        let redacted = config.redacted();
        assert_eq!(redacted.speech.azure_key, "***");
        assert_eq!(config.speech.azure_key, "secret");
    }
}
