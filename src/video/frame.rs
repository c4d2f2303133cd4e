//! Video frame types and the per-source drawing surface

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;

/// Which local source a video stream comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoSource {
    Camera,
    Screen,
}

impl VideoSource {
    pub fn is_screen(self) -> bool {
        self == VideoSource::Screen
    }
}

/// Raw captured image
///
/// Owned by the frame pump for the duration of one loop iteration and
/// dropped right after it has been submitted (or rejected).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Monotonic capture timestamp in microseconds
    pub timestamp_us: u64,
    pub data: Bytes,
}

/// Decoder output in RGBA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedVideoFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_us: u64,
    pub pixels: Vec<u8>,
}

/// Off-screen RGBA canvas that always shows the newest decoded frame
#[derive(Debug, Default, Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    timestamp_us: u64,
    frames_drawn: u64,
}

/// Surface shared with the UI layer
pub type SharedSurface = Arc<RwLock<Surface>>;

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with `frame`, resizing to its dimensions
    pub fn draw(&mut self, frame: &DecodedVideoFrame) {
        if frame.width != self.width || frame.height != self.height {
            tracing::trace!(
                "Resizing surface {}x{} -> {}x{}",
                self.width,
                self.height,
                frame.width,
                frame.height
            );
            self.width = frame.width;
            self.height = frame.height;
        }
        self.pixels.clear();
        self.pixels.extend_from_slice(&frame.pixels);
        self.timestamp_us = frame.timestamp_us;
        self.frames_drawn += 1;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}
