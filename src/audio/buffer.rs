//! Audio frames and the lock-free playback sample ring
//!
//! The ring is the one structure shared between a producer (decode output)
//! and a real-time consumer (the output device clock). Both sides only touch
//! a `crossbeam` `ArrayQueue`, so neither ever blocks.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One block of captured samples
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in microseconds
    pub timestamp: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            timestamp,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / sample_rate as u64
    }

    /// Root-mean-square energy of the frame
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Root-mean-square of a sample block; zero for an empty block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

/// Fixed-capacity sample ring
///
/// Writes never fail: under sustained overrun the oldest unread samples are
/// overwritten. Reads never block: missing samples come out as silence.
pub struct SampleRing {
    queue: ArrayQueue<f32>,
    overwritten: AtomicU64,
    underrun_samples: AtomicU64,
}

impl SampleRing {
    /// Create a new ring holding `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overwritten: AtomicU64::new(0),
            underrun_samples: AtomicU64::new(0),
        }
    }

    /// Append samples, wrapping over unread data when full
    pub fn write(&self, samples: &[f32]) {
        let mut lost = 0u64;
        for &sample in samples {
            if self.queue.force_push(sample).is_some() {
                lost += 1;
            }
        }
        if lost > 0 {
            self.overwritten.fetch_add(lost, Ordering::Relaxed);
        }
    }

    /// Fill `out` completely, padding with silence once the ring runs dry
    pub fn read(&self, out: &mut [f32]) -> usize {
        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.queue.pop() {
                Some(sample) => {
                    *slot = sample;
                    filled += 1;
                }
                None => *slot = 0.0,
            }
        }
        let missing = (out.len() - filled) as u64;
        if missing > 0 {
            self.underrun_samples.fetch_add(missing, Ordering::Relaxed);
        }
        filled
    }

    /// Drop all buffered samples
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Samples lost to overrun
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Silence samples emitted because the ring was empty
    pub fn underrun_samples(&self) -> u64 {
        self.underrun_samples.load(Ordering::Relaxed)
    }

    /// Get fill level as percentage
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;

/// Create a new shared sample ring
pub fn create_shared_ring(capacity: usize) -> SharedSampleRing {
    Arc::new(SampleRing::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5; 960]) - 0.5).abs() < 1e-6);
        assert!((rms(&[1.0, -1.0]) - 1.0).abs() < 1e-6);

        let frame = AudioFrame::new(vec![0.25; 960], 1, 0, 0);
        assert!((frame.rms() - 0.25).abs() < 1e-6);
        assert_eq!(frame.duration_us(48_000), 20_000);
    }

    #[test]
    fn test_ring_read_pads_with_silence() {
        let ring = SampleRing::new(8);
        ring.write(&[0.1, 0.2, 0.3]);

        let mut out = [1.0f32; 5];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0, 0.0]);
        assert_eq!(ring.underrun_samples(), 2);
    }

    #[test]
    fn test_ring_overwrites_oldest_on_overrun() {
        let ring = SampleRing::new(4);
        ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert_eq!(ring.len(), 4);
        assert_eq!(ring.overwritten(), 2);

        let mut out = [0.0f32; 4];
        ring.read(&mut out);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_ring_clear() {
        let ring = create_shared_ring(16);
        ring.write(&[0.5; 10]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.fill_level(), 0.0);
    }
}
