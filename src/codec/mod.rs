//! Codec abstractions
//!
//! Audio uses Opus (wrapped in [`encoder`] / [`decoder`] when the `platform`
//! feature is on). Video codecs are whatever the [`MediaProvider`] can build;
//! the pipelines drive them through the send/receive style traits below.
//!
//! [`MediaProvider`]: crate::provider::MediaProvider

#[cfg(feature = "platform")]
pub mod decoder;
#[cfg(feature = "platform")]
pub mod encoder;
pub mod h264;

#[cfg(feature = "platform")]
pub use decoder::OpusDecoder;
#[cfg(feature = "platform")]
pub use encoder::OpusEncoder;

use bytes::Bytes;

use crate::error::CodecError;
use crate::video::frame::{DecodedVideoFrame, VideoFrame};

/// Lifecycle of a codec instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Unconfigured,
    Configured,
    Closed,
}

/// Compressed audio as handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudioPacket {
    pub data: Bytes,
    /// Monotonic capture timestamp in microseconds
    pub timestamp_us: u64,
}

/// Encodes fixed-size blocks of f32 samples
pub trait AudioEncoder: Send {
    /// Encode exactly one frame of interleaved samples
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError>;

    /// Samples (all channels) the encoder expects per call
    fn samples_per_frame(&self) -> usize;
}

/// Decodes compressed audio packets into f32 samples
pub trait AudioDecoder: Send {
    fn state(&self) -> CodecState;

    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError>;

    fn close(&mut self);
}

/// Video codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Vp8,
}

/// A concrete codec string tried during negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecProfile {
    pub codec: VideoCodec,
    pub codec_string: &'static str,
}

/// Negotiation order: constrained baseline H.264 at level 3.1 then 3.0,
/// then royalty-free VP8.
pub const VIDEO_CODEC_PRIORITY: [CodecProfile; 3] = [
    CodecProfile {
        codec: VideoCodec::H264,
        codec_string: "avc1.42E01F",
    },
    CodecProfile {
        codec: VideoCodec::H264,
        codec_string: "avc1.42E01E",
    },
    CodecProfile {
        codec: VideoCodec::Vp8,
        codec_string: "vp8",
    },
];

/// Hardware acceleration preference passed to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareAcceleration {
    PreferHardware,
    PreferSoftware,
    NoPreference,
}

/// Active encoding profile of a video capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub profile: CodecProfile,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub acceleration: HardwareAcceleration,
}

impl EncoderConfig {
    pub fn is_hardware(&self) -> bool {
        self.acceleration == HardwareAcceleration::PreferHardware
    }
}

/// Decoder configuration; the platform picks hardware or software itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub profile: CodecProfile,
    pub low_latency: bool,
}

/// A compressed video unit, outbound from an encoder or inbound from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVideoChunk {
    pub data: Bytes,
    pub timestamp_us: u64,
    /// Key flag as declared by whoever produced the chunk
    pub declared_key: bool,
}

/// Send/receive style video encoder
///
/// Output and failures are collected with [`VideoEncoder::receive`]; an
/// `Err` from `receive` means the encoder has crashed and must be replaced.
pub trait VideoEncoder: Send {
    fn encode(&mut self, frame: &VideoFrame, keyframe: bool) -> Result<(), CodecError>;

    /// Push all queued frames through so the next submission is not stuck behind them
    fn flush(&mut self) -> Result<(), CodecError>;

    /// Frames submitted but not yet emitted
    fn pending(&self) -> usize;

    fn receive(&mut self) -> Option<Result<EncodedVideoChunk, CodecError>>;

    fn close(&mut self);
}

/// Send/receive style video decoder
pub trait VideoDecoder: Send {
    fn state(&self) -> CodecState;

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), CodecError>;

    fn decode(&mut self, chunk: &EncodedVideoChunk) -> Result<(), CodecError>;

    /// Chunks submitted but not yet decoded
    fn pending(&self) -> usize;

    fn receive(&mut self) -> Option<Result<DecodedVideoFrame, CodecError>>;

    fn close(&mut self);
}
