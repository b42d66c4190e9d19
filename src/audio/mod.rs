//! # Audio Processing Module
//!
//! The voice side of a session, from raw WebSocket frames to recognised lines.
//!
//! ## Key Components:
//! - **pcm**: little-endian PCM decoding with odd-byte carry
//! - **queue**: bounded, drop-oldest frame queue between the socket and the worker
//! - **segmenter**: energy-based utterance segmentation
//! - **recognition**: the per-session worker driving the speech recognizer
//! - **session**: session state and the concurrent session limit
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod pcm;
pub mod queue;
pub mod recognition;
pub mod segmenter;
pub mod session;
