//! # Peer Media
//!
//! Real-time media pipeline for group voice/video chat: microphone and
//! camera/screen capture, voice activity detection, Opus / H.264 / VP8
//! encoding towards a transport, and per-participant decode and playback
//! of whatever the transport hands back.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── OUTBOUND ────────────────────────────────────┐
//! │                                                                             │
//! │  ┌────────────┐  20 ms frames  ┌───────┐   ┌──────────────┐                 │
//! │  │ Microphone │ ─────────────► │  VAD  │──►│ Opus Encoder │──┐              │
//! │  └────────────┘   (channel)    └───┬───┘   └──────────────┘  │              │
//! │                                    │ speaking (≤1 / 50 ms)   │ audio        │
//! │                                    ▼                         ▼              │
//! │                              ┌──────────────────────────────────────┐       │
//! │  ┌──────────────┐  frames    │                                      │       │
//! │  │Camera/Screen │ ─────────► │      Transport (external boundary)   │       │
//! │  └──────┬───────┘            │                                      │       │
//! │         │  ┌──────────────┐  └──────────────────────────────────────┘       │
//! │         └─►│Video Encoder │──── chunks (isKeyframe, source) ──▲             │
//! │            │ hw ─► sw on  │                                                 │
//! │            │   failure    │◄── Capability Negotiator (probe once/session)   │
//! │            └──────────────┘                                                 │
//! └─────────────────────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────── INBOUND ─────────────────────────────────────┐
//! │                                                                             │
//! │   Transport ── (sourceId, packet) ──┬──► Audio decoder per source ──┐        │
//! │                                     │                              ▼        │
//! │                                     │                   ┌──────────────────┐│
//! │                                     │                   │ Sample ring (4 s)││
//! │                                     │                   └────────┬─────────┘│
//! │                                     │                            ▼          │
//! │                                     │                     output clock      │
//! │                                     │                                       │
//! │                                     └──► Video decoder per source ──► surface│
//! │                                          (wait-for-keyframe, queue ≤ 5,     │
//! │                                           10 s stale eviction)              │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Platform multimedia objects (devices, codecs) are reached only through
//! [`provider::MediaProvider`], so every pipeline can be driven by fakes.

pub mod audio;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
#[cfg(feature = "platform")]
pub mod platform;
pub mod provider;
pub mod transport;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Fixed media parameters
pub mod constants {
    use std::time::Duration;

    /// Sample rate for all audio processing
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Channel count (mono)
    pub const CHANNELS: u16 = 1;

    /// Audio frame duration in milliseconds
    pub const FRAME_DURATION_MS: u32 = 20;

    /// Samples per audio frame (20 ms @ 48 kHz)
    pub const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE / 1000 * FRAME_DURATION_MS) as usize;

    /// Default Opus bitrate in bits per second
    pub const AUDIO_BITRATE: u32 = 64_000;

    /// Capture backlog above which the encoder is considered congested
    pub const AUDIO_ENCODE_BACKLOG_WARN: usize = 10;

    /// Consecutive loud frames needed to enter "speaking"
    pub const SPEECH_FRAMES_TO_START: u32 = 3;

    /// Consecutive quiet frames needed to leave "speaking"
    pub const SILENCE_FRAMES_TO_STOP: u32 = 15;

    /// Minimum spacing between speaking notifications
    pub const SPEAKING_NOTIFY_INTERVAL: Duration = Duration::from_millis(50);

    /// Playback ring length in seconds
    pub const PLAYBACK_RING_SECONDS: usize = 4;

    /// Capture resolution cap
    pub const MAX_VIDEO_WIDTH: u32 = 1280;
    pub const MAX_VIDEO_HEIGHT: u32 = 720;

    /// Frame rate caps
    pub const CAMERA_MAX_FPS: u32 = 30;
    pub const SCREEN_MAX_FPS: u32 = 10;

    /// Encoder pending queue length at or below which a new frame is submitted
    pub const ENCODE_QUEUE_LIMIT: usize = 2;

    /// Decoder pending queue length at or above which a new frame is dropped
    pub const DECODE_QUEUE_LIMIT: usize = 5;

    /// Forced keyframe cadence
    pub const CAMERA_KEYFRAME_INTERVAL: Duration = Duration::from_millis(2000);
    pub const SCREEN_KEYFRAME_INTERVAL: Duration = Duration::from_millis(1500);

    /// Inactivity after which a remote stream is evicted
    pub const STREAM_TIMEOUT: Duration = Duration::from_secs(10);

    /// Period of the stale-stream sweep
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

    /// Capacity of each pipeline's event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}
