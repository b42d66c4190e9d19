//! # Speech Recognition
//!
//! Turns one utterance of 16 kHz mono PCM into text. The recognizer is a black
//! box behind [`SpeechRecognizer`]; the voice session only cares whether a
//! non-empty line came back.
//!
//! ## Providers:
//! - **azure**: Azure Speech short-audio REST API
//! - **disabled**: never recognises anything; typed questions still work

pub mod azure;

use crate::config::SpeechConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use azure::AzureSpeechRecognizer;

#[derive(Debug)]
pub enum SpeechError {
    /// The samples could not be packaged for the service
    Encoding(String),
    /// The service could not be reached or timed out
    Request(String),
    /// The service answered with an error
    Service(String),
}

impl fmt::Display for SpeechError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechError::Encoding(msg) => write!(f, "Audio encoding error: {}", msg),
            SpeechError::Request(msg) => write!(f, "Speech request failed: {}", msg),
            SpeechError::Service(msg) => write!(f, "Speech service error: {}", msg),
        }
    }
}

impl std::error::Error for SpeechError {}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Recognise one utterance. `Ok(None)` means nothing intelligible was said.
    async fn recognize(&self, samples: &[i16]) -> Result<Option<String>, SpeechError>;
}

/// Recognizer used when no speech provider is configured.
pub struct DisabledRecognizer;

#[async_trait]
impl SpeechRecognizer for DisabledRecognizer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn recognize(&self, _samples: &[i16]) -> Result<Option<String>, SpeechError> {
        Ok(None)
    }
}

/// Build the recognizer named by `speech.provider`.
pub fn from_config(config: &SpeechConfig) -> Result<Arc<dyn SpeechRecognizer>> {
    match config.provider.as_str() {
        "azure" => Ok(Arc::new(AzureSpeechRecognizer::from_config(config)?)),
        "disabled" => Ok(Arc::new(DisabledRecognizer)),
        other => Err(anyhow!("Unknown speech provider: {}", other)),
    }
}
