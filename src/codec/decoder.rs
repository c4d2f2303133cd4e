//! Opus decoder wrapper

use opus::{Channels, Decoder};

use crate::codec::{AudioDecoder, CodecState};
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Option<Decoder>,
    channels: u16,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<f32>,
    frames_decoded: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::DecoderInit(format!(
                    "Unsupported channel count: {}",
                    channels
                )))
            }
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        // 120 ms is the longest Opus packet
        let decode_buffer = vec![0.0f32; sample_rate as usize * channels as usize * 120 / 1000];

        Ok(Self {
            decoder: Some(decoder),
            channels,
            decode_buffer,
            frames_decoded: 0,
        })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl AudioDecoder for OpusDecoder {
    fn state(&self) -> CodecState {
        if self.decoder.is_some() {
            CodecState::Configured
        } else {
            CodecState::Closed
        }
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError> {
        let decoder = self.decoder.as_mut().ok_or(CodecError::Closed)?;
        let samples = decoder
            .decode_float(data, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total_samples = samples * self.channels as usize;
        self.frames_decoded += 1;

        Ok(self.decode_buffer[..total_samples].to_vec())
    }

    fn close(&mut self) {
        self.decoder = None;
    }
}
