//! # Utterance Segmentation
//!
//! Cuts a continuous PCM stream into utterances that can be sent to a
//! short-audio speech recognizer. Voice activity is detected per 30 ms frame with
//! a plain RMS energy threshold.
//!
//! ## State machine:
//! - **Idle**: silent frames are discarded; the first voiced frame starts an utterance
//! - **Speaking**: every frame is kept; a run of `trailing_silence_ms` of silence ends
//!   the utterance, and so does reaching `max_utterance_ms`
//!
//! An utterance with less than `min_speech_ms` of voiced audio is dropped as noise.

use crate::audio::pcm::{frame_rms, samples_for_ms, PcmDecoder};
use crate::config::SpeechConfig;

/// Length of one voice-activity frame.
pub const FRAME_MS: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// RMS level on the `i16` scale above which a frame is voiced
    pub energy_threshold: f32,
    pub min_speech_ms: u32,
    pub trailing_silence_ms: u32,
    pub max_utterance_ms: u32,
}

impl From<&SpeechConfig> for SegmenterConfig {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            min_speech_ms: config.min_speech_ms,
            trailing_silence_ms: config.trailing_silence_ms,
            max_utterance_ms: config.max_utterance_ms,
        }
    }
}

pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    decoder: PcmDecoder,
    frame_len: usize,
    /// Samples not yet forming a whole frame
    pending: Vec<i16>,
    utterance: Vec<i16>,
    in_speech: bool,
    voiced_ms: u32,
    silence_ms: u32,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let frame_len = samples_for_ms(FRAME_MS);
        Self {
            config,
            decoder: PcmDecoder::new(),
            frame_len,
            pending: Vec::with_capacity(frame_len),
            utterance: Vec::new(),
            in_speech: false,
            voiced_ms: 0,
            silence_ms: 0,
        }
    }

    /// Feed raw PCM bytes; returns every utterance completed by them, oldest first.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<i16>> {
        let samples = self.decoder.decode(bytes);
        self.pending.extend_from_slice(&samples);

        let mut completed = Vec::new();
        let whole = self.pending.len() - self.pending.len() % self.frame_len;
        let frames: Vec<i16> = self.pending.drain(..whole).collect();

        for frame in frames.chunks(self.frame_len) {
            if let Some(utterance) = self.process_frame(frame) {
                completed.push(utterance);
            }
        }
        completed
    }

    /// End of stream: return the utterance in progress if it holds enough speech.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.in_speech {
            let rest = std::mem::take(&mut self.pending);
            self.utterance.extend_from_slice(&rest);
        }
        self.pending.clear();
        self.finish()
    }

    fn process_frame(&mut self, frame: &[i16]) -> Option<Vec<i16>> {
        let voiced = frame_rms(frame) >= self.config.energy_threshold;

        if !self.in_speech {
            if !voiced {
                return None;
            }
            self.in_speech = true;
        }

        self.utterance.extend_from_slice(frame);
        if voiced {
            self.voiced_ms += FRAME_MS;
            self.silence_ms = 0;
        } else {
            self.silence_ms += FRAME_MS;
        }

        let utterance_ms = (self.utterance.len() / self.frame_len) as u32 * FRAME_MS;
        if self.silence_ms >= self.config.trailing_silence_ms || utterance_ms >= self.config.max_utterance_ms {
            return self.finish();
        }
        None
    }

    fn finish(&mut self) -> Option<Vec<i16>> {
        let utterance = std::mem::take(&mut self.utterance);
        let enough = self.in_speech && self.voiced_ms >= self.config.min_speech_ms;
        self.in_speech = false;
        self.voiced_ms = 0;
        self.silence_ms = 0;
        if enough {
            Some(utterance)
        } else {
            None
        }
    }
}
