//! Audio subsystem module

pub mod buffer;
pub mod capture;
#[cfg(feature = "platform")]
pub mod device;
pub mod playback;
pub mod vad;

pub use buffer::{AudioFrame, SampleRing, SharedSampleRing};
pub use capture::AudioCapture;
#[cfg(feature = "platform")]
pub use device::{get_device_by_id, list_devices, AudioDevice, AudioDeviceInfo};
pub use playback::AudioPlayback;
pub use vad::{SpeakingNotifier, VoiceActivityDetector};
