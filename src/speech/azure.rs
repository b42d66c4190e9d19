//! # Azure Speech Recognizer
//!
//! Sends each utterance to the Azure Speech short-audio REST endpoint as a WAV
//! file and reads back the simple-format result:
//!
//! ```json
//! { "RecognitionStatus": "Success", "DisplayText": "...", "Offset": 0, "Duration": 0 }
//! ```
//!
//! `Success` yields the display text; `NoMatch`, `InitialSilenceTimeout` and
//! `BabbleTimeout` mean nothing was said. Any other status is a service error.

use crate::audio::pcm::SAMPLE_RATE;
use crate::config::SpeechConfig;
use crate::speech::{SpeechError, SpeechRecognizer};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const WAV_CONTENT_TYPE: &str = "audio/wav; codecs=audio/pcm; samplerate=16000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: Option<String>,
}

pub struct AzureSpeechRecognizer {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    language: String,
}

impl AzureSpeechRecognizer {
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        if config.azure_key.is_empty() || config.azure_region.is_empty() {
            return Err(anyhow!("Azure speech requires AZURE_KEY and AZURE_REGION"));
        }
        let endpoint = format!(
            "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
            config.azure_region
        );
        Self::with_endpoint(
            &endpoint,
            &config.azure_key,
            &config.language,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn with_endpoint(endpoint: &str, key: &str, language: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            key: key.to_string(),
            language: language.to_string(),
        })
    }
}

#[async_trait]
impl SpeechRecognizer for AzureSpeechRecognizer {
    fn name(&self) -> &str {
        "azure"
    }

    async fn recognize(&self, samples: &[i16]) -> Result<Option<String>, SpeechError> {
        let start_time = Instant::now();
        let body = encode_wav(samples)?;

        let response = self
            .client
            .post(format!("{}?language={}&format=simple", self.endpoint, self.language))
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header(reqwest::header::CONTENT_TYPE, WAV_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Speech service returned an error status");
            return Err(SpeechError::Service(format!("status {}", status)));
        }

        let result: RecognitionResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::Service(format!("invalid response body: {}", e)))?;

        debug!(
            status = %result.recognition_status,
            samples = samples.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Recognition finished"
        );

        match result.recognition_status.as_str() {
            "Success" => Ok(result
                .display_text
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())),
            "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Ok(None),
            other => Err(SpeechError::Service(format!("recognition status {}", other))),
        }
    }
}

/// Wrap mono 16-bit samples in a WAV container.
pub fn encode_wav(samples: &[i16]) -> Result<Vec<u8>, SpeechError> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, SAMPLE_RATE, 16);
    let track = wav::BitDepth::Sixteen(samples.to_vec());
    let mut cursor = Cursor::new(Vec::new());
    wav::write(header, &track, &mut cursor).map_err(|e| SpeechError::Encoding(e.to_string()))?;
    Ok(cursor.into_inner())
}
