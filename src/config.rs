//! Pipeline configuration
//!
//! Everything here is a tunable with a sensible default; fixed media
//! parameters live in [`crate::constants`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub playback: PlaybackConfig,
}

impl MediaConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self, Error> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/peer-media/media.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "peer-media")
            .map(|dirs| dirs.config_dir().join("media.toml"))
    }
}

/// Microphone, VAD and Opus encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// RMS threshold at sensitivity 0
    pub base_threshold: f32,
    /// Initial sensitivity, 0..=100
    pub sensitivity: u8,
    /// Multiplier from RMS to the 0..=100 level meter
    pub level_gain: f32,
    pub bitrate: u32,
    pub fec: bool,
    pub packet_loss_perc: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.02,
            sensitivity: 50,
            level_gain: 500.0,
            bitrate: AUDIO_BITRATE,
            fec: true,
            packet_loss_perc: 10,
        }
    }
}

impl AudioConfig {
    pub fn opus(&self) -> OpusConfig {
        OpusConfig {
            bitrate: self.bitrate,
            fec: self.fec,
            packet_loss_perc: self.packet_loss_perc,
            ..OpusConfig::voice()
        }
    }
}

/// Opus encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpusConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per frame
    pub frame_size: usize,
    pub bitrate: u32,
    pub vbr: bool,
    pub fec: bool,
    pub packet_loss_perc: u8,
}

impl OpusConfig {
    /// 48 kHz mono, 20 ms frames, 64 kbps, FEC on
    pub fn voice() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: SAMPLES_PER_FRAME,
            bitrate: AUDIO_BITRATE,
            vbr: true,
            fec: true,
            packet_loss_perc: 10,
        }
    }

    pub fn frame_size_from_ms(sample_rate: u32, ms: f32) -> usize {
        (sample_rate as f32 * ms / 1000.0) as usize
    }

    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }
}

/// Camera / screen capture and encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub camera_max_fps: u32,
    pub screen_max_fps: u32,
    pub encode_queue_limit: usize,
    pub camera_keyframe_interval_ms: u64,
    pub screen_keyframe_interval_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_width: MAX_VIDEO_WIDTH,
            max_height: MAX_VIDEO_HEIGHT,
            camera_max_fps: CAMERA_MAX_FPS,
            screen_max_fps: SCREEN_MAX_FPS,
            encode_queue_limit: ENCODE_QUEUE_LIMIT,
            camera_keyframe_interval_ms: CAMERA_KEYFRAME_INTERVAL.as_millis() as u64,
            screen_keyframe_interval_ms: SCREEN_KEYFRAME_INTERVAL.as_millis() as u64,
        }
    }
}

/// Remote stream playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub decode_queue_limit: usize,
    pub stream_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub ring_seconds: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            decode_queue_limit: DECODE_QUEUE_LIMIT,
            stream_timeout_ms: STREAM_TIMEOUT.as_millis() as u64,
            sweep_interval_ms: SWEEP_INTERVAL.as_millis() as u64,
            ring_seconds: PLAYBACK_RING_SECONDS,
        }
    }
}

impl PlaybackConfig {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring_seconds * SAMPLE_RATE as usize * CHANNELS as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = MediaConfig::from_toml(
            r#"
            [audio]
            sensitivity = 80

            [playback]
            stream_timeout_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.sensitivity, 80);
        assert_eq!(config.audio.bitrate, AUDIO_BITRATE);
        assert_eq!(config.playback.stream_timeout(), Duration::from_secs(5));
        assert_eq!(config.video, VideoConfig::default());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = MediaConfig::from_toml("audio = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn voice_profile_matches_frame_constants() {
        let opus = OpusConfig::voice();
        assert_eq!(opus.frame_size, 960);
        assert!((opus.frame_duration_ms() - 20.0).abs() < 0.01);
        assert_eq!(OpusConfig::frame_size_from_ms(48_000, 20.0), 960);
    }

    #[test]
    fn ring_holds_four_seconds() {
        assert_eq!(PlaybackConfig::default().ring_capacity(), 192_000);
    }
}
