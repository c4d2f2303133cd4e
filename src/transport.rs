//! Outbound transport boundary
//!
//! Packetisation, congestion control and encryption live on the other side
//! of this trait. Capture pipelines only ever hand over finished units.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;

use crate::codec::EncodedAudioPacket;
use crate::video::frame::VideoSource;

/// Sink for everything the local pipelines produce
pub trait Transport: Send + Sync {
    fn send_encoded_audio(&self, packet: EncodedAudioPacket);

    fn send_encoded_video(&self, data: Bytes, timestamp_us: u64, is_keyframe: bool, source: VideoSource);

    fn notify_speaking(&self, speaking: bool);
}

/// Shared handle to a transport
pub type SharedTransport = Arc<dyn Transport>;

/// Everything a [`Transport`] can be told, as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Audio(EncodedAudioPacket),
    Video {
        data: Bytes,
        timestamp_us: u64,
        is_keyframe: bool,
        source: VideoSource,
    },
    Speaking(bool),
}

/// Transport that forwards events into a bounded channel
///
/// When the consumer falls behind, events are dropped rather than blocking
/// the real-time producer.
pub struct ChannelTransport {
    tx: Sender<TransportEvent>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, Receiver<TransportEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    fn forward(&self, event: TransportEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("Transport channel full, dropping event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Transport for ChannelTransport {
    fn send_encoded_audio(&self, packet: EncodedAudioPacket) {
        self.forward(TransportEvent::Audio(packet));
    }

    fn send_encoded_video(&self, data: Bytes, timestamp_us: u64, is_keyframe: bool, source: VideoSource) {
        self.forward(TransportEvent::Video {
            data,
            timestamp_us,
            is_keyframe,
            source,
        });
    }

    fn notify_speaking(&self, speaking: bool) {
        self.forward(TransportEvent::Speaking(speaking));
    }
}
