//! # PCM Decoding
//!
//! Browsers send raw 16-bit little-endian mono PCM at 16 kHz in arbitrarily sized
//! binary frames. A frame may end in the middle of a sample, so the decoder keeps
//! the odd trailing byte and prepends it to the next frame.
//!
//! ## Key Rust Concepts:
//! - **Cursor + ReadBytesExt**: read typed integers out of a byte slice
//! - **Option<u8>**: the carried byte is either there or not, never a sentinel value

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Sample rate of the audio the client streams.
pub const SAMPLE_RATE: u32 = 16_000;

/// Streaming decoder from little-endian bytes to `i16` samples.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every complete sample in `carry + bytes`; keep a trailing odd byte.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<i16> {
        let joined;
        let data: &[u8] = match self.carry.take() {
            Some(byte) => {
                let mut buf = Vec::with_capacity(bytes.len() + 1);
                buf.push(byte);
                buf.extend_from_slice(bytes);
                joined = buf;
                &joined
            }
            None => bytes,
        };

        let whole = data.len() - data.len() % 2;
        if whole < data.len() {
            self.carry = Some(data[whole]);
        }

        let mut cursor = Cursor::new(&data[..whole]);
        let mut samples = Vec::with_capacity(whole / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }
        samples
    }
}

/// Root-mean-square level of a frame on the `i16` scale.
pub fn frame_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Number of samples covering `ms` milliseconds of audio.
pub fn samples_for_ms(ms: u32) -> usize {
    (SAMPLE_RATE as usize * ms as usize) / 1000
}
