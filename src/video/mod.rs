//! Video subsystem module

pub mod capture;
pub mod frame;
pub mod negotiate;
pub mod playback;

pub use capture::{CaptureState, VideoCapture, VideoCaptureStats};
pub use frame::{DecodedVideoFrame, SharedSurface, Surface, VideoFrame, VideoSource};
pub use negotiate::{target_bitrate, EncoderNegotiator};
pub use playback::{VideoPlayback, VideoPlaybackStats};
