//! Remote video playback
//!
//! Frames from the transport are queued to a driver thread that owns every
//! decoder. Each remote source gets one decoder and one drawing surface;
//! decoders stay closed to everything but keyframes until they have been
//! configured, and again after any decode error.

use bytes::Bytes;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::SharedClock;
use crate::codec::{CodecState, EncodedVideoChunk, VideoDecoder};
use crate::config::PlaybackConfig;
use crate::error::SetupError;
use crate::provider::SharedProvider;
use crate::video::frame::{SharedSurface, Surface};
use crate::video::negotiate::EncoderNegotiator;

const COMMAND_CHANNEL_CAPACITY: usize = 256;
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Playback counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPlaybackStats {
    pub frames_received: u64,
    pub frames_decoded: u64,
    /// Non-keyframes dropped while a decoder waited for a keyframe
    pub pre_keyframe_drops: u64,
    /// Dropped because the decode queue was full
    pub backpressure_drops: u64,
    pub decode_errors: u64,
    pub decoders_created: u64,
    pub decoders_closed: u64,
    pub streams_evicted: u64,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_decoded: AtomicU64,
    pre_keyframe_drops: AtomicU64,
    backpressure_drops: AtomicU64,
    decode_errors: AtomicU64,
    decoders_created: AtomicU64,
    decoders_closed: AtomicU64,
    streams_evicted: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> VideoPlaybackStats {
        VideoPlaybackStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            pre_keyframe_drops: self.pre_keyframe_drops.load(Ordering::Relaxed),
            backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            decoders_created: self.decoders_created.load(Ordering::Relaxed),
            decoders_closed: self.decoders_closed.load(Ordering::Relaxed),
            streams_evicted: self.streams_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Decoder state for one remote source
struct RemoteVideoStream {
    decoder: Option<Box<dyn VideoDecoder>>,
    configured: bool,
    awaiting_keyframe: bool,
    last_active: Duration,
    frames_decoded: u64,
    surface: SharedSurface,
}

impl RemoteVideoStream {
    /// Close the decoder; the next keyframe recreates it
    fn release_decoder(&mut self) -> bool {
        self.configured = false;
        self.awaiting_keyframe = true;
        match self.decoder.take() {
            Some(mut decoder) => {
                decoder.close();
                true
            }
            None => false,
        }
    }
}

/// All remote video streams, driven from a single thread
pub(crate) struct VideoStreamSet {
    provider: SharedProvider,
    clock: SharedClock,
    config: PlaybackConfig,
    streams: HashMap<u32, RemoteVideoStream>,
    surfaces: Arc<DashMap<u32, SharedSurface>>,
    counters: Arc<Counters>,
}

impl VideoStreamSet {
    fn new(
        provider: SharedProvider,
        clock: SharedClock,
        config: PlaybackConfig,
        surfaces: Arc<DashMap<u32, SharedSurface>>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            provider,
            clock,
            config,
            streams: HashMap::new(),
            surfaces,
            counters,
        }
    }

    /// Route one inbound frame to its source's decoder
    pub(crate) fn on_frame(&mut self, source_id: u32, timestamp_us: u64, is_keyframe: bool, data: Bytes) {
        let now = self.clock.now();
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        if !self.streams.contains_key(&source_id) {
            let Some(decoder) = self.create_decoder(source_id) else {
                return;
            };
            let surface: SharedSurface = Arc::new(RwLock::new(Surface::new()));
            self.surfaces.insert(source_id, surface.clone());
            self.streams.insert(
                source_id,
                RemoteVideoStream {
                    decoder: Some(decoder),
                    configured: false,
                    awaiting_keyframe: true,
                    last_active: now,
                    frames_decoded: 0,
                    surface,
                },
            );
        }

        let closed = self.streams.get(&source_id).map_or(false, |s| {
            s.decoder
                .as_ref()
                .map_or(false, |d| d.state() == CodecState::Closed)
        });
        if closed {
            // closed behind our back counts as never configured
            tracing::debug!("Video decoder for source {} was closed, waiting for keyframe", source_id);
            self.release_decoder_of(source_id);
        }

        let needs_keyframe = self
            .streams
            .get(&source_id)
            .map_or(true, |s| !s.configured || s.awaiting_keyframe);
        if needs_keyframe && !is_keyframe {
            self.counters.pre_keyframe_drops.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Source {} waiting for keyframe, dropping frame", source_id);
            return;
        }

        let missing = self.streams.get(&source_id).map_or(false, |s| s.decoder.is_none());
        if missing {
            let Some(decoder) = self.create_decoder(source_id) else {
                return;
            };
            if let Some(stream) = self.streams.get_mut(&source_id) {
                stream.decoder = Some(decoder);
            }
        }

        let Some(stream) = self.streams.get_mut(&source_id) else {
            return;
        };
        let Some(decoder) = stream.decoder.as_mut() else {
            return;
        };

        if !stream.configured {
            let Some(config) = EncoderNegotiator::new(&*self.provider).decoder_config() else {
                tracing::warn!("No decodable video profile for source {}", source_id);
                return;
            };
            if let Err(e) = decoder.configure(&config) {
                tracing::warn!("Failed to configure video decoder for source {}: {}", source_id, e);
                return;
            }
            tracing::debug!(
                "Configured {} decoder for source {}",
                config.profile.codec_string,
                source_id
            );
            stream.configured = true;
        }

        if decoder.pending() >= self.config.decode_queue_limit {
            self.counters.backpressure_drops.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Decode queue at {} for source {}, dropping frame",
                decoder.pending(),
                source_id
            );
            return;
        }
        stream.awaiting_keyframe = false;

        let chunk = EncodedVideoChunk {
            data,
            timestamp_us,
            declared_key: is_keyframe,
        };
        if let Err(e) = decoder.decode(&chunk) {
            self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Video decode failed for source {}: {}", source_id, e);
            self.release_decoder_of(source_id);
            return;
        }
        self.drain(source_id, now);
    }

    /// Draw whatever every decoder has finished
    pub(crate) fn drain_all(&mut self) {
        let now = self.clock.now();
        let ids: Vec<u32> = self.streams.keys().copied().collect();
        for id in ids {
            self.drain(id, now);
        }
    }

    fn drain(&mut self, source_id: u32, now: Duration) {
        let Some(stream) = self.streams.get_mut(&source_id) else {
            return;
        };
        let mut failed = false;
        while let Some(decoder) = stream.decoder.as_mut() {
            match decoder.receive() {
                None => break,
                Some(Ok(frame)) => {
                    stream.surface.write().draw(&frame);
                    stream.last_active = now;
                    stream.frames_decoded += 1;
                    self.counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
                }
                Some(Err(e)) => {
                    self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Video decode failed for source {}: {}", source_id, e);
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            self.release_decoder_of(source_id);
        }
    }

    fn create_decoder(&self, source_id: u32) -> Option<Box<dyn VideoDecoder>> {
        match self.provider.create_video_decoder() {
            Ok(decoder) => {
                self.counters.decoders_created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Created video decoder for source {}", source_id);
                Some(decoder)
            }
            Err(e) => {
                tracing::warn!("Failed to create video decoder for source {}: {}", source_id, e);
                None
            }
        }
    }

    fn release_decoder_of(&mut self, source_id: u32) {
        if let Some(stream) = self.streams.get_mut(&source_id) {
            if stream.release_decoder() {
                self.counters.decoders_closed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn discard(&mut self, source_id: u32) -> bool {
        let Some(mut stream) = self.streams.remove(&source_id) else {
            return false;
        };
        if stream.release_decoder() {
            self.counters.decoders_closed.fetch_add(1, Ordering::Relaxed);
        }
        self.surfaces.remove(&source_id);
        tracing::debug!(
            "Closed video stream {} after {} frames",
            source_id,
            stream.frames_decoded
        );
        true
    }

    /// Close the given sources; unknown ids are ignored
    pub(crate) fn remove(&mut self, source_ids: &[u32]) {
        for &id in source_ids {
            self.discard(id);
        }
    }

    /// Evict sources with no decoded output for longer than the stream timeout
    pub(crate) fn sweep(&mut self, now: Duration) -> Vec<u32> {
        let timeout = self.config.stream_timeout();
        let stale: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| now.saturating_sub(s.last_active) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for &id in &stale {
            if self.discard(id) {
                self.counters.streams_evicted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Evicted stale video source {}", id);
            }
        }
        stale
    }

    pub(crate) fn close_all(&mut self) {
        let ids: Vec<u32> = self.streams.keys().copied().collect();
        self.remove(&ids);
    }

    pub(crate) fn active_sources(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

enum Command {
    Frame {
        source_id: u32,
        timestamp_us: u64,
        is_keyframe: bool,
        data: Bytes,
    },
    Left(Vec<u32>),
    Sources(Sender<Vec<u32>>),
    Stop,
}

struct Driver {
    tx: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Per-source video decode onto drawing surfaces
pub struct VideoPlayback {
    provider: SharedProvider,
    clock: SharedClock,
    config: PlaybackConfig,
    surfaces: Arc<DashMap<u32, SharedSurface>>,
    counters: Arc<Counters>,
    driver: Mutex<Option<Driver>>,
}

impl VideoPlayback {
    /// Create a disabled playback pipeline
    pub fn new(provider: SharedProvider, clock: SharedClock, config: PlaybackConfig) -> Self {
        Self {
            provider,
            clock,
            config,
            surfaces: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            driver: Mutex::new(None),
        }
    }

    /// Start or stop the decode thread
    ///
    /// Disabling closes every decoder and drops every surface before returning.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), SetupError> {
        let mut driver = self.driver.lock();
        match (driver.is_some(), enabled) {
            (false, true) => {
                *driver = Some(self.spawn_driver()?);
                tracing::info!("Video playback enabled");
            }
            (true, false) => {
                if let Some(d) = driver.take() {
                    Self::shutdown(d);
                }
                tracing::info!("Video playback disabled");
            }
            _ => {}
        }
        Ok(())
    }

    fn spawn_driver(&self) -> Result<Driver, SetupError> {
        let (tx, rx) = bounded::<Command>(COMMAND_CHANNEL_CAPACITY);
        let mut streams = VideoStreamSet::new(
            self.provider.clone(),
            self.clock.clone(),
            self.config.clone(),
            self.surfaces.clone(),
            self.counters.clone(),
        );
        let clock = self.clock.clone();
        let sweep_interval = self.config.sweep_interval();

        let handle = thread::Builder::new()
            .name("video-playback".into())
            .spawn(move || {
                run_driver(&mut streams, &rx, &clock, sweep_interval);
                streams.close_all();
            })
            .map_err(|e| SetupError::CapabilityMissing(e.to_string()))?;
        Ok(Driver { tx, handle })
    }

    fn shutdown(driver: Driver) {
        let _ = driver.tx.send(Command::Stop);
        let _ = driver.handle.join();
    }

    /// Inbound frame from the transport; dropped if playback is off or the queue is full
    pub fn deliver_video_frame(&self, source_id: u32, timestamp_us: u64, is_keyframe: bool, data: Bytes) {
        let driver = self.driver.lock();
        let Some(driver) = driver.as_ref() else {
            return;
        };
        let command = Command::Frame {
            source_id,
            timestamp_us,
            is_keyframe,
            data,
        };
        match driver.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.backpressure_drops.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Video command queue full, dropping frame for source {}", source_id);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Close decoders for sources that left; unknown ids are ignored
    pub fn participant_left(&self, source_ids: &[u32]) {
        if let Some(driver) = self.driver.lock().as_ref() {
            let _ = driver.tx.send(Command::Left(source_ids.to_vec()));
        }
    }

    /// Drawing surface of a source, once it has one
    pub fn surface(&self, source_id: u32) -> Option<SharedSurface> {
        self.surfaces.get(&source_id).map(|s| s.value().clone())
    }

    /// Sources with a live stream, in ascending order
    pub fn active_sources(&self) -> Vec<u32> {
        let driver = self.driver.lock();
        let Some(driver) = driver.as_ref() else {
            return Vec::new();
        };
        let (reply_tx, reply_rx) = bounded(1);
        if driver.tx.send(Command::Sources(reply_tx)).is_err() {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.driver.lock().is_some()
    }

    pub fn stats(&self) -> VideoPlaybackStats {
        self.counters.snapshot()
    }
}

impl Drop for VideoPlayback {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            Self::shutdown(driver);
        }
    }
}

fn run_driver(
    streams: &mut VideoStreamSet,
    rx: &Receiver<Command>,
    clock: &SharedClock,
    sweep_interval: Duration,
) {
    let ticker = tick(OUTPUT_POLL_INTERVAL);
    let mut last_sweep = clock.now();
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(Command::Frame { source_id, timestamp_us, is_keyframe, data }) => {
                    streams.on_frame(source_id, timestamp_us, is_keyframe, data);
                }
                Ok(Command::Left(ids)) => streams.remove(&ids),
                Ok(Command::Sources(reply)) => {
                    let _ = reply.send(streams.active_sources());
                }
                Ok(Command::Stop) | Err(_) => break,
            },
            recv(ticker) -> _ => streams.drain_all(),
        }

        let now = clock.now();
        if now.saturating_sub(last_sweep) >= sweep_interval {
            last_sweep = now;
            streams.sweep(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, SystemClock};
    use crate::testing::{wait_until, FakeProvider, DELTA_CHUNK, IDR_CHUNK};

    fn key() -> Bytes {
        Bytes::from_static(IDR_CHUNK)
    }

    fn delta() -> Bytes {
        Bytes::from_static(DELTA_CHUNK)
    }

    fn stream_set(provider: &Arc<FakeProvider>, clock: &Arc<ManualClock>) -> VideoStreamSet {
        VideoStreamSet::new(
            provider.clone(),
            clock.clone(),
            PlaybackConfig::default(),
            Arc::new(DashMap::new()),
            Arc::new(Counters::default()),
        )
    }

    #[test]
    fn test_first_frame_must_be_keyframe() {
        let provider = FakeProvider::new();
        let clock = Arc::new(ManualClock::new());
        let mut set = stream_set(&provider, &clock);

        set.on_frame(3, 0, false, delta());
        let decoder = provider.decoder(0);
        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 0);
        assert_eq!(decoder.configures.load(Ordering::SeqCst), 0);
        assert!(!decoder.configured.load(Ordering::SeqCst));

        set.on_frame(3, 33_000, true, key());
        set.on_frame(3, 66_000, false, delta());
        assert_eq!(decoder.configures.load(Ordering::SeqCst), 1);
        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 2);

        let surface = set.surfaces.get(&3).map(|s| s.value().clone()).unwrap();
        let surface = surface.read();
        assert_eq!(surface.frames_drawn(), 2);
        // delta output is smaller than the keyframe's
        assert_eq!((surface.width(), surface.height()), (2, 2));
        assert_eq!(set.counters.snapshot().pre_keyframe_drops, 1);
    }

    #[test]
    fn test_decode_error_waits_for_next_keyframe() {
        let provider = FakeProvider::new();
        let clock = Arc::new(ManualClock::new());
        let mut set = stream_set(&provider, &clock);

        set.on_frame(1, 0, true, key());
        provider.decoder(0).fail_next.store(true, Ordering::SeqCst);
        set.on_frame(1, 1, false, delta());
        assert!(provider.decoder(0).closed.load(Ordering::SeqCst));

        set.on_frame(1, 2, false, delta());
        set.on_frame(1, 3, false, delta());
        assert_eq!(provider.decoder_count(), 1);
        assert_eq!(provider.decoder(0).decode_calls.load(Ordering::SeqCst), 2);

        set.on_frame(1, 4, true, key());
        assert_eq!(provider.decoder_count(), 2);
        assert_eq!(provider.decoder(1).decode_calls.load(Ordering::SeqCst), 1);

        let stats = set.counters.snapshot();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.pre_keyframe_drops, 2);
        assert_eq!(stats.decoders_created, 2);
    }

    #[test]
    fn test_full_decode_queue_drops_frame() {
        let provider = FakeProvider::new();
        let clock = Arc::new(ManualClock::new());
        let mut set = stream_set(&provider, &clock);

        set.on_frame(1, 0, true, key());
        let decoder = provider.decoder(0);
        decoder.pending.store(5, Ordering::SeqCst);
        set.on_frame(1, 1, false, delta());
        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 1);

        decoder.pending.store(4, Ordering::SeqCst);
        set.on_frame(1, 2, false, delta());
        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 2);
        assert_eq!(set.counters.snapshot().backpressure_drops, 1);
    }

    #[test]
    fn test_idle_source_is_evicted() {
        let provider = FakeProvider::new();
        let clock = Arc::new(ManualClock::new());
        let mut set = stream_set(&provider, &clock);

        set.on_frame(1, 0, true, key());
        set.on_frame(2, 0, true, key());
        clock.set(Duration::from_secs(5));
        set.on_frame(2, 1, false, delta());

        clock.set(Duration::from_secs(10));
        assert!(set.sweep(clock.now()).is_empty());

        clock.set(Duration::from_millis(10_001));
        assert_eq!(set.sweep(clock.now()), vec![1]);
        assert_eq!(set.active_sources(), vec![2]);
        assert!(provider.decoder(0).closed.load(Ordering::SeqCst));
        assert!(!set.surfaces.contains_key(&1));
        assert_eq!(set.counters.snapshot().streams_evicted, 1);
    }

    #[test]
    fn test_removal_is_idempotent() {
        let provider = FakeProvider::new();
        let clock = Arc::new(ManualClock::new());
        let mut set = stream_set(&provider, &clock);

        set.on_frame(1, 0, true, key());
        set.remove(&[1, 99]);
        set.remove(&[1]);
        clock.set(Duration::from_secs(60));
        assert!(set.sweep(clock.now()).is_empty());

        assert!(set.active_sources().is_empty());
        assert_eq!(set.counters.snapshot().decoders_closed, 1);
    }

    #[test]
    fn test_decoder_closed_out_of_band_is_recreated() {
        let provider = FakeProvider::new();
        let clock = Arc::new(ManualClock::new());
        let mut set = stream_set(&provider, &clock);

        set.on_frame(1, 0, true, key());
        provider.decoder(0).closed.store(true, Ordering::SeqCst);

        set.on_frame(1, 1, false, delta());
        assert_eq!(provider.decoder_count(), 1);

        set.on_frame(1, 2, true, key());
        assert_eq!(provider.decoder_count(), 2);
        assert_eq!(provider.decoder(1).decode_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_decodable_profile_never_decodes() {
        let provider = FakeProvider::new();
        provider.decoder_support.lock().clear();
        let clock = Arc::new(ManualClock::new());
        let mut set = stream_set(&provider, &clock);

        set.on_frame(1, 0, true, key());
        set.on_frame(1, 1, true, key());
        assert_eq!(provider.decoder(0).decode_calls.load(Ordering::SeqCst), 0);
        assert!(!provider.decoder(0).configured.load(Ordering::SeqCst));
    }

    #[test]
    fn test_playback_draws_and_disable_releases() {
        let provider = FakeProvider::new();
        let playback = VideoPlayback::new(provider.clone(), SystemClock::shared(), PlaybackConfig::default());

        playback.deliver_video_frame(1, 0, true, key());
        assert!(playback.surface(1).is_none());

        playback.set_enabled(true).unwrap();
        playback.deliver_video_frame(1, 0, true, key());
        playback.deliver_video_frame(2, 0, true, key());
        assert!(wait_until(
            || playback.surface(1).map_or(false, |s| s.read().frames_drawn() == 1),
            Duration::from_secs(2)
        ));
        assert_eq!(playback.active_sources(), vec![1, 2]);

        playback.participant_left(&[2, 7]);
        assert_eq!(playback.active_sources(), vec![1]);
        assert!(provider.decoder(1).closed.load(Ordering::SeqCst));

        playback.set_enabled(false).unwrap();
        assert!(!playback.is_enabled());
        assert!(provider.decoder(0).closed.load(Ordering::SeqCst));
        assert!(playback.surface(1).is_none());

        playback.deliver_video_frame(1, 1, true, key());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(provider.decoder_count(), 2);
        assert_eq!(playback.stats().frames_received, 2);
    }
}
