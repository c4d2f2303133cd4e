//! Energy-based voice activity detection with hysteresis
//!
//! Each 20 ms frame is classified by comparing its RMS against a threshold
//! derived from the live sensitivity setting:
//!
//! ```text
//! threshold = base_threshold * (1 - sensitivity / 100)
//! ```
//!
//! Entering "speaking" takes [`SPEECH_FRAMES_TO_START`] consecutive loud
//! frames; leaving it takes [`SILENCE_FRAMES_TO_STOP`] consecutive quiet ones.
//! The asymmetry keeps sentence starts from being clipped while riding over
//! short pauses.

use std::time::Duration;

use crate::constants::{SILENCE_FRAMES_TO_STOP, SPEAKING_NOTIFY_INTERVAL, SPEECH_FRAMES_TO_START};

/// Hysteresis state machine over per-frame energy
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    base_threshold: f32,
    speech_frames: u32,
    silence_frames: u32,
    speaking: bool,
}

impl VoiceActivityDetector {
    pub fn new(base_threshold: f32) -> Self {
        Self {
            base_threshold,
            speech_frames: 0,
            silence_frames: 0,
            speaking: false,
        }
    }

    /// Effective RMS threshold for a sensitivity in 0..=100
    pub fn threshold(&self, sensitivity: u8) -> f32 {
        let sensitivity = sensitivity.min(100) as f32;
        self.base_threshold * (1.0 - sensitivity / 100.0)
    }

    /// Feed one frame's RMS. Returns the new state on a transition.
    pub fn process(&mut self, rms: f32, sensitivity: u8) -> Option<bool> {
        if rms > self.threshold(sensitivity) {
            self.speech_frames = self.speech_frames.saturating_add(1);
            self.silence_frames = 0;
            if !self.speaking && self.speech_frames >= SPEECH_FRAMES_TO_START {
                self.speaking = true;
                return Some(true);
            }
        } else {
            self.silence_frames = self.silence_frames.saturating_add(1);
            self.speech_frames = 0;
            if self.speaking && self.silence_frames >= SILENCE_FRAMES_TO_STOP {
                self.speaking = false;
                return Some(false);
            }
        }
        None
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn reset(&mut self) {
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.speaking = false;
    }
}

/// Rate limiter for speaking notifications
///
/// At most one notification goes out per interval. Transitions that land
/// inside the window are held back and only the trailing state is sent once
/// the window has passed, and only if it differs from what was last sent.
#[derive(Debug, Clone)]
pub struct SpeakingNotifier {
    interval: Duration,
    last_sent_at: Option<Duration>,
    last_sent: bool,
    pending: Option<bool>,
}

impl SpeakingNotifier {
    pub fn new() -> Self {
        Self::with_interval(SPEAKING_NOTIFY_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_sent_at: None,
            last_sent: false,
            pending: None,
        }
    }

    fn window_open(&self, now: Duration) -> bool {
        self.last_sent_at
            .map_or(true, |at| now.saturating_sub(at) >= self.interval)
    }

    fn send(&mut self, speaking: bool, now: Duration) -> Option<bool> {
        self.pending = None;
        if speaking == self.last_sent {
            return None;
        }
        self.last_sent = speaking;
        self.last_sent_at = Some(now);
        Some(speaking)
    }

    /// Record a detector transition; returns the state to notify now, if any
    pub fn on_transition(&mut self, speaking: bool, now: Duration) -> Option<bool> {
        if self.window_open(now) {
            self.send(speaking, now)
        } else {
            self.pending = Some(speaking);
            None
        }
    }

    /// Release a held-back trailing state once the window has passed
    pub fn poll(&mut self, now: Duration) -> Option<bool> {
        match self.pending {
            Some(speaking) if self.window_open(now) => self.send(speaking, now),
            _ => None,
        }
    }

    /// Final notification on shutdown: "stopped" if the far side thinks we're speaking
    pub fn finish(&mut self) -> Option<bool> {
        self.pending = None;
        if self.last_sent {
            self.last_sent = false;
            Some(false)
        } else {
            None
        }
    }

    /// State the transport was last told
    pub fn last_sent(&self) -> bool {
        self.last_sent
    }
}

impl Default for SpeakingNotifier {
    fn default() -> Self {
        Self::new()
    }
}
