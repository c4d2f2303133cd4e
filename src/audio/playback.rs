//! Remote audio playback
//!
//! One Opus decoder per remote source, created lazily on the first packet.
//! Decoded samples land in a shared lock-free ring that the output device
//! drains at its own pace; an empty ring plays silence.

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;

use crate::audio::buffer::{create_shared_ring, SharedSampleRing};
use crate::clock::SharedClock;
use crate::codec::{AudioDecoder, CodecState};
use crate::config::PlaybackConfig;
use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::SetupError;
use crate::provider::{AudioOutput, SharedProvider};

/// Decoder state for one remote source
struct RemoteAudioStream {
    decoder: Box<dyn AudioDecoder>,
    last_active: Duration,
    packets_decoded: u64,
}

impl RemoteAudioStream {
    fn close(&mut self) {
        self.decoder.close();
    }
}

struct PlaybackState {
    enabled: bool,
    deafened: bool,
    streams: HashMap<u32, RemoteAudioStream>,
    output: Option<Box<dyn AudioOutput>>,
    last_sweep: Duration,
}

impl PlaybackState {
    fn active(&self) -> bool {
        self.enabled && !self.deafened
    }
}

/// Playback counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioPlaybackStats {
    pub packets_received: u64,
    pub packets_decoded: u64,
    pub packets_ignored: u64,
    pub decode_errors: u64,
    pub decoders_created: u64,
    pub decoders_closed: u64,
    pub streams_evicted: u64,
}

#[derive(Default)]
struct Counters {
    packets_received: AtomicU64,
    packets_decoded: AtomicU64,
    packets_ignored: AtomicU64,
    decode_errors: AtomicU64,
    decoders_created: AtomicU64,
    decoders_closed: AtomicU64,
    streams_evicted: AtomicU64,
}

struct Inner {
    provider: SharedProvider,
    clock: SharedClock,
    config: PlaybackConfig,
    ring: SharedSampleRing,
    state: Mutex<PlaybackState>,
    counters: Counters,
}

impl Inner {
    fn new(provider: SharedProvider, clock: SharedClock, config: PlaybackConfig) -> Self {
        let ring = create_shared_ring(config.ring_capacity());
        let now = clock.now();
        Self {
            provider,
            clock,
            config,
            ring,
            state: Mutex::new(PlaybackState {
                enabled: false,
                deafened: false,
                streams: HashMap::new(),
                output: None,
                last_sweep: now,
            }),
            counters: Counters::default(),
        }
    }

    fn set_enabled(&self, enabled: bool, deafened: bool) -> Result<(), SetupError> {
        let mut state = self.state.lock();
        let was_active = state.active();
        state.enabled = enabled;
        state.deafened = deafened;

        match (was_active, state.active()) {
            (false, true) => {
                match self.provider.open_audio_output(self.ring.clone()) {
                    Ok(output) => state.output = Some(output),
                    Err(e) => {
                        state.enabled = false;
                        return Err(e);
                    }
                }
                tracing::info!("Audio playback enabled");
            }
            (true, false) => {
                self.close_all(&mut state);
                tracing::info!(
                    "Audio playback {}",
                    if deafened { "deafened" } else { "disabled" }
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn close_all(&self, state: &mut PlaybackState) {
        for (_, mut stream) in state.streams.drain() {
            stream.close();
            self.counters.decoders_closed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(mut output) = state.output.take() {
            output.stop();
        }
        self.ring.clear();
    }

    fn deliver_packet(&self, source_id: u32, timestamp_us: u64, data: Bytes) {
        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut state = self.state.lock();
        if !state.active() {
            self.counters.packets_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if now.saturating_sub(state.last_sweep) >= self.config.sweep_interval() {
            self.sweep_locked(&mut state, now);
        }

        let stale = state
            .streams
            .get(&source_id)
            .map_or(false, |s| s.decoder.state() == CodecState::Closed);
        if stale {
            // closed behind our back counts as never configured
            tracing::debug!("Audio decoder for source {} was closed, recreating", source_id);
            state.streams.remove(&source_id);
        }

        if !state.streams.contains_key(&source_id) {
            match self.provider.create_audio_decoder(SAMPLE_RATE, CHANNELS) {
                Ok(decoder) => {
                    tracing::debug!("Created audio decoder for source {}", source_id);
                    self.counters.decoders_created.fetch_add(1, Ordering::Relaxed);
                    state.streams.insert(
                        source_id,
                        RemoteAudioStream {
                            decoder,
                            last_active: now,
                            packets_decoded: 0,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to create audio decoder for source {}: {}", source_id, e);
                    return;
                }
            }
        }

        let Some(stream) = state.streams.get_mut(&source_id) else {
            return;
        };
        if stream.decoder.state() != CodecState::Configured {
            self.counters.packets_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match stream.decoder.decode(&data) {
            Ok(samples) => {
                self.ring.write(&samples);
                stream.last_active = now;
                stream.packets_decoded += 1;
                self.counters.packets_decoded.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    "Decoded {} samples from source {} at {}us",
                    samples.len(),
                    source_id,
                    timestamp_us
                );
            }
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Audio decode failed for source {}: {}", source_id, e);
            }
        }
    }

    fn participant_left(&self, source_ids: &[u32]) {
        let mut state = self.state.lock();
        for id in source_ids {
            if let Some(mut stream) = state.streams.remove(id) {
                stream.close();
                self.counters.decoders_closed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Closed audio decoder for departed source {} after {} packets",
                    id,
                    stream.packets_decoded
                );
            }
        }
    }

    fn sweep(&self) -> Vec<u32> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.sweep_locked(&mut state, now)
    }

    fn sweep_locked(&self, state: &mut PlaybackState, now: Duration) -> Vec<u32> {
        state.last_sweep = now;
        let timeout = self.config.stream_timeout();
        let stale: Vec<u32> = state
            .streams
            .iter()
            .filter(|(_, s)| now.saturating_sub(s.last_active) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(mut stream) = state.streams.remove(id) {
                stream.close();
                self.counters.decoders_closed.fetch_add(1, Ordering::Relaxed);
                self.counters.streams_evicted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Evicted stale audio source {}", id);
            }
        }
        stale
    }

    fn is_active(&self) -> bool {
        self.state.lock().active()
    }

    fn active_sources(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.state.lock().streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn stats(&self) -> AudioPlaybackStats {
        let c = &self.counters;
        AudioPlaybackStats {
            packets_received: c.packets_received.load(Ordering::Relaxed),
            packets_decoded: c.packets_decoded.load(Ordering::Relaxed),
            packets_ignored: c.packets_ignored.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            decoders_created: c.decoders_created.load(Ordering::Relaxed),
            decoders_closed: c.decoders_closed.load(Ordering::Relaxed),
            streams_evicted: c.streams_evicted.load(Ordering::Relaxed),
        }
    }
}

struct Sweeper {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Per-source audio decode into a shared output ring
///
/// While active, a sweeper thread evicts idle sources every sweep interval
/// even when no packets arrive.
pub struct AudioPlayback {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl AudioPlayback {
    /// Create a disabled playback pipeline
    pub fn new(provider: SharedProvider, clock: SharedClock, config: PlaybackConfig) -> Self {
        Self {
            inner: Arc::new(Inner::new(provider, clock, config)),
            sweeper: Mutex::new(None),
        }
    }

    /// Apply the enabled / deafened flags
    ///
    /// Going inactive closes every decoder, clears the ring and releases the
    /// output stream before returning.
    pub fn set_enabled(&self, enabled: bool, deafened: bool) -> Result<(), SetupError> {
        let mut sweeper = self.sweeper.lock();
        let result = self.inner.set_enabled(enabled, deafened);
        match (self.inner.is_active(), sweeper.is_some()) {
            (true, false) => *sweeper = Some(self.spawn_sweeper()?),
            (false, true) => {
                if let Some(s) = sweeper.take() {
                    Self::stop_sweeper(s);
                }
            }
            _ => {}
        }
        result
    }

    pub fn enable(&self) -> Result<(), SetupError> {
        let deafened = self.inner.state.lock().deafened;
        self.set_enabled(true, deafened)
    }

    pub fn disable(&self) {
        let deafened = self.inner.state.lock().deafened;
        // disabling never opens anything
        let _ = self.set_enabled(false, deafened);
    }

    fn spawn_sweeper(&self) -> Result<Sweeper, SetupError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let inner = self.inner.clone();
        let ticker = tick(self.inner.config.sweep_interval());
        let handle = thread::Builder::new()
            .name("audio-sweeper".into())
            .spawn(move || loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let evicted = inner.sweep();
                        if !evicted.is_empty() {
                            tracing::debug!("Swept {} idle audio sources", evicted.len());
                        }
                    }
                }
            })
            .map_err(|e| SetupError::CapabilityMissing(e.to_string()))?;
        Ok(Sweeper { stop_tx, handle })
    }

    fn stop_sweeper(sweeper: Sweeper) {
        let _ = sweeper.stop_tx.send(());
        let _ = sweeper.handle.join();
    }

    /// Inbound packet from the transport
    pub fn deliver_packet(&self, source_id: u32, timestamp_us: u64, data: Bytes) {
        self.inner.deliver_packet(source_id, timestamp_us, data);
    }

    /// Close decoders for sources that left; unknown ids are ignored
    pub fn participant_left(&self, source_ids: &[u32]) {
        self.inner.participant_left(source_ids);
    }

    /// Evict sources idle for longer than the stream timeout
    pub fn sweep(&self) -> Vec<u32> {
        self.inner.sweep()
    }

    /// Drain into `out` for the output clock; pads with silence
    pub fn read(&self, out: &mut [f32]) -> usize {
        self.inner.ring.read(out)
    }

    pub fn ring(&self) -> SharedSampleRing {
        self.inner.ring.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn active_sources(&self) -> Vec<u32> {
        self.inner.active_sources()
    }

    pub fn stats(&self) -> AudioPlaybackStats {
        self.inner.stats()
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            Self::stop_sweeper(sweeper);
        }
        let mut state = self.inner.state.lock();
        self.inner.close_all(&mut state);
    }
}
