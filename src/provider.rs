//! Capability provider interface
//!
//! Pipelines reach devices and codecs only through [`MediaProvider`]. The
//! `platform` feature supplies a cpal + libopus implementation; tests use
//! fakes.

use crossbeam_channel::Receiver;
use std::sync::Arc;

use crate::audio::buffer::{AudioFrame, SharedSampleRing};
use crate::codec::{AudioDecoder, AudioEncoder, DecoderConfig, EncoderConfig, VideoDecoder, VideoEncoder};
use crate::config::OpusConfig;
use crate::error::{CodecError, SetupError};
use crate::video::frame::{VideoFrame, VideoSource};

/// Live microphone stream
///
/// Frames arrive on [`AudioInput::frames`] at the device cadence, already
/// cut to the encoder frame size. The channel disconnects when the device
/// goes away.
pub trait AudioInput: Send {
    fn frames(&self) -> Receiver<AudioFrame>;

    /// Release the device; no frames are produced afterwards
    fn stop(&mut self);
}

/// Running output stream draining a sample ring
pub trait AudioOutput: Send {
    fn stop(&mut self);
}

/// Limits requested from a video source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub max_width: u32,
    pub max_height: u32,
    pub max_framerate: u32,
}

/// What a video source actually delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTrackSettings {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

/// Live camera or screen stream
pub trait VideoInput: Send {
    /// Raw frames; disconnects when the source ends (e.g. screen share stopped)
    fn frames(&self) -> Receiver<VideoFrame>;

    fn settings(&self) -> VideoTrackSettings;

    fn stop(&mut self);
}

/// Factory for every platform multimedia object the pipelines use
pub trait MediaProvider: Send + Sync {
    fn open_audio_input(&self, device_id: Option<&str>) -> Result<Box<dyn AudioInput>, SetupError>;

    fn open_audio_output(&self, ring: SharedSampleRing) -> Result<Box<dyn AudioOutput>, SetupError>;

    fn create_audio_encoder(&self, config: &OpusConfig) -> Result<Box<dyn AudioEncoder>, CodecError>;

    fn create_audio_decoder(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioDecoder>, CodecError>;

    fn open_video_input(
        &self,
        source: VideoSource,
        device_id: Option<&str>,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn VideoInput>, SetupError>;

    /// Whether `config` (including its acceleration preference) can be built
    fn probe_encoder_support(&self, config: &EncoderConfig) -> bool;

    fn create_video_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, CodecError>;

    fn probe_decoder_support(&self, config: &DecoderConfig) -> bool;

    /// A fresh, unconfigured decoder
    fn create_video_decoder(&self) -> Result<Box<dyn VideoDecoder>, CodecError>;
}

/// Shared handle to a provider
pub type SharedProvider = Arc<dyn MediaProvider>;
