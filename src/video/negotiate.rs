//! Video encoder capability negotiation
//!
//! Walks [`VIDEO_CODEC_PRIORITY`] asking the provider first for a
//! hardware-accelerated configuration and then for any configuration at
//! all. The first profile that answers yes becomes the session's encoder
//! config. Runs once per capture session start and again, software-only,
//! when a hardware encoder dies.

use crate::codec::{DecoderConfig, EncoderConfig, HardwareAcceleration, VIDEO_CODEC_PRIORITY};
use crate::error::SetupError;
use crate::provider::MediaProvider;

const CAMERA_BITS_PER_PIXEL: f64 = 0.1;
const CAMERA_MIN_BITRATE: u32 = 300_000;
const CAMERA_MAX_BITRATE: u32 = 2_500_000;

const SCREEN_BITS_PER_PIXEL: f64 = 0.15;
const SCREEN_MIN_BITRATE: u32 = 500_000;
const SCREEN_MAX_BITRATE: u32 = 2_000_000;

/// `clamp(width * height * framerate * bits_per_pixel, min, max)`
pub fn target_bitrate(width: u32, height: u32, framerate: u32, is_screen_share: bool) -> u32 {
    let (bpp, min, max) = if is_screen_share {
        (SCREEN_BITS_PER_PIXEL, SCREEN_MIN_BITRATE, SCREEN_MAX_BITRATE)
    } else {
        (CAMERA_BITS_PER_PIXEL, CAMERA_MIN_BITRATE, CAMERA_MAX_BITRATE)
    };
    let raw = width as f64 * height as f64 * framerate as f64 * bpp;
    (raw.round() as u64).clamp(min as u64, max as u64) as u32
}

pub struct EncoderNegotiator<'a> {
    provider: &'a dyn MediaProvider,
}

impl<'a> EncoderNegotiator<'a> {
    pub fn new(provider: &'a dyn MediaProvider) -> Self {
        Self { provider }
    }

    /// Best supported encoder config, hardware-backed where possible
    pub fn probe(
        &self,
        width: u32,
        height: u32,
        framerate: u32,
        is_screen_share: bool,
    ) -> Result<EncoderConfig, SetupError> {
        self.first_supported(
            width,
            height,
            framerate,
            is_screen_share,
            &[HardwareAcceleration::PreferHardware, HardwareAcceleration::NoPreference],
        )
    }

    /// Best supported software-only encoder config
    pub fn probe_software(
        &self,
        width: u32,
        height: u32,
        framerate: u32,
        is_screen_share: bool,
    ) -> Result<EncoderConfig, SetupError> {
        self.first_supported(
            width,
            height,
            framerate,
            is_screen_share,
            &[HardwareAcceleration::PreferSoftware],
        )
    }

    fn first_supported(
        &self,
        width: u32,
        height: u32,
        framerate: u32,
        is_screen_share: bool,
        preferences: &[HardwareAcceleration],
    ) -> Result<EncoderConfig, SetupError> {
        let bitrate = target_bitrate(width, height, framerate, is_screen_share);
        for profile in VIDEO_CODEC_PRIORITY {
            for &acceleration in preferences {
                let config = EncoderConfig {
                    profile,
                    width,
                    height,
                    framerate,
                    bitrate,
                    acceleration,
                };
                if self.provider.probe_encoder_support(&config) {
                    tracing::info!(
                        "Selected {} encoder ({}), {}x{}@{} {} kbps",
                        profile.codec_string,
                        if config.is_hardware() { "hardware" } else { "software" },
                        width,
                        height,
                        framerate,
                        bitrate / 1000
                    );
                    return Ok(config);
                }
                tracing::trace!("{} {:?} unsupported", profile.codec_string, acceleration);
            }
        }
        Err(SetupError::NoSupportedCodec)
    }

    /// First decodable profile, configured for low latency
    pub fn decoder_config(&self) -> Option<DecoderConfig> {
        VIDEO_CODEC_PRIORITY
            .into_iter()
            .map(|profile| DecoderConfig {
                profile,
                low_latency: true,
            })
            .find(|config| self.provider.probe_decoder_support(config))
    }
}
