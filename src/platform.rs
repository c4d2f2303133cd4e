//! cpal + libopus capability provider
//!
//! Audio devices and the Opus codec come from the host stack. There is no
//! native video stack behind this provider: video probes answer "unsupported"
//! and opening a camera or screen reports a missing capability, which the
//! video pipelines surface as a setup error.

use std::sync::Arc;

use crate::audio::buffer::SharedSampleRing;
use crate::audio::device::{CpalAudioInput, CpalAudioOutput};
use crate::codec::{
    AudioDecoder, AudioEncoder, DecoderConfig, EncoderConfig, OpusDecoder, OpusEncoder, VideoDecoder,
    VideoEncoder,
};
use crate::config::OpusConfig;
use crate::error::{CodecError, SetupError};
use crate::provider::{AudioInput, AudioOutput, MediaProvider, SharedProvider, VideoConstraints, VideoInput};
use crate::video::frame::VideoSource;

#[derive(Debug, Default)]
pub struct PlatformProvider;

impl PlatformProvider {
    pub fn shared() -> SharedProvider {
        Arc::new(Self)
    }
}

impl MediaProvider for PlatformProvider {
    fn open_audio_input(&self, device_id: Option<&str>) -> Result<Box<dyn AudioInput>, SetupError> {
        Ok(Box::new(CpalAudioInput::open(device_id)?))
    }

    fn open_audio_output(&self, ring: SharedSampleRing) -> Result<Box<dyn AudioOutput>, SetupError> {
        Ok(Box::new(CpalAudioOutput::open(ring)?))
    }

    fn create_audio_encoder(&self, config: &OpusConfig) -> Result<Box<dyn AudioEncoder>, CodecError> {
        Ok(Box::new(OpusEncoder::new(config.clone())?))
    }

    fn create_audio_decoder(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioDecoder>, CodecError> {
        Ok(Box::new(OpusDecoder::new(sample_rate, channels)?))
    }

    fn open_video_input(
        &self,
        source: VideoSource,
        _device_id: Option<&str>,
        _constraints: &VideoConstraints,
    ) -> Result<Box<dyn VideoInput>, SetupError> {
        Err(SetupError::CapabilityMissing(format!("{:?} capture", source)))
    }

    fn probe_encoder_support(&self, _config: &EncoderConfig) -> bool {
        false
    }

    fn create_video_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, CodecError> {
        Err(CodecError::EncoderInit(format!("{} not available", config.profile.codec_string)))
    }

    fn probe_decoder_support(&self, _config: &DecoderConfig) -> bool {
        false
    }

    fn create_video_decoder(&self) -> Result<Box<dyn VideoDecoder>, CodecError> {
        Err(CodecError::DecoderInit("no video decoder available".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::negotiate::EncoderNegotiator;

    #[test]
    fn test_opus_round_trip_through_provider() {
        let provider = PlatformProvider;
        let mut encoder = provider.create_audio_encoder(&OpusConfig::voice()).unwrap();
        let mut decoder = provider.create_audio_decoder(48_000, 1).unwrap();

        let packet = encoder.encode(&vec![0.0; encoder.samples_per_frame()]).unwrap();
        assert_eq!(decoder.decode(&packet).unwrap().len(), 960);
    }

    #[test]
    fn test_video_is_a_missing_capability() {
        let provider = PlatformProvider;
        let constraints = VideoConstraints {
            max_width: 1280,
            max_height: 720,
            max_framerate: 30,
        };
        assert!(matches!(
            provider.open_video_input(VideoSource::Camera, None, &constraints),
            Err(SetupError::CapabilityMissing(_))
        ));
        assert_eq!(
            EncoderNegotiator::new(&provider).probe(1280, 720, 30, false),
            Err(SetupError::NoSupportedCodec)
        );
    }
}
