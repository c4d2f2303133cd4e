//! Camera / screen capture pipeline
//!
//! A capture thread pulls raw frames from the source and pushes them into
//! the encoder, preferring freshness over completeness: when the encoder is
//! backed up the new frame is dropped. Keyframes are forced on the first
//! frame and then on a fixed cadence. A crashed encoder is replaced by a
//! software one against the same live source without the caller noticing.

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::SharedClock;
use crate::codec::{h264, EncodedVideoChunk, EncoderConfig, VideoCodec, VideoEncoder};
use crate::config::VideoConfig;
use crate::error::{CodecError, Error, RuntimeError, SetupError};
use crate::provider::{SharedProvider, VideoConstraints};
use crate::transport::SharedTransport;
use crate::video::frame::{VideoFrame, VideoSource};
use crate::video::negotiate::EncoderNegotiator;

/// How often the capture thread collects encoder output between frames
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of a capture session as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Running,
    Stopped,
    Failed,
}

/// Capture counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoCaptureStats {
    pub frames_captured: u64,
    pub frames_submitted: u64,
    /// Dropped because the encoder queue was full
    pub frames_dropped: u64,
    pub keyframes_forced: u64,
    pub chunks_sent: u64,
    pub fallbacks: u64,
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    frames_submitted: AtomicU64,
    frames_dropped: AtomicU64,
    keyframes_forced: AtomicU64,
    chunks_sent: AtomicU64,
    fallbacks: AtomicU64,
}

struct Shared {
    counters: Counters,
    state: Mutex<CaptureState>,
    active_config: Mutex<EncoderConfig>,
}

/// Encoder ownership, keyframe policy and recovery for one capture session
pub(crate) struct EncodeSession {
    source: VideoSource,
    provider: SharedProvider,
    transport: SharedTransport,
    clock: SharedClock,
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
    config: EncoderConfig,
    encoder: Option<Box<dyn VideoEncoder>>,
    queue_limit: usize,
    keyframe_interval: Duration,
    last_keyframe_at: Option<Duration>,
    failures_since_output: u32,
}

impl EncodeSession {
    fn new(
        source: VideoSource,
        config: EncoderConfig,
        video: &VideoConfig,
        provider: SharedProvider,
        transport: SharedTransport,
        clock: SharedClock,
        alive: Arc<AtomicBool>,
    ) -> Result<Self, SetupError> {
        let encoder = provider
            .create_video_encoder(&config)
            .map_err(|e| SetupError::EncoderUnsupported(e.to_string()))?;
        let keyframe_interval = Duration::from_millis(match source {
            VideoSource::Camera => video.camera_keyframe_interval_ms,
            VideoSource::Screen => video.screen_keyframe_interval_ms,
        });
        let shared = Arc::new(Shared {
            counters: Counters::default(),
            state: Mutex::new(CaptureState::Running),
            active_config: Mutex::new(config.clone()),
        });
        Ok(Self {
            source,
            provider,
            transport,
            clock,
            alive,
            shared,
            config,
            encoder: Some(encoder),
            queue_limit: video.encode_queue_limit,
            keyframe_interval,
            last_keyframe_at: None,
            failures_since_output: 0,
        })
    }

    /// Submit or drop one raw frame, then forward whatever the encoder produced
    pub(crate) fn handle_frame(&mut self, frame: VideoFrame) -> Result<(), RuntimeError> {
        let now = self.clock.now();
        self.shared.counters.frames_captured.fetch_add(1, Ordering::Relaxed);

        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };

        if encoder.pending() > self.queue_limit {
            self.shared.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Encoder queue at {}, dropping {:?} frame",
                encoder.pending(),
                self.source
            );
            drop(frame);
            return self.drain();
        }

        let force_keyframe = match self.last_keyframe_at {
            None => true,
            Some(at) => now.saturating_sub(at) > self.keyframe_interval,
        };

        if force_keyframe && self.last_keyframe_at.is_some() {
            // queued frames must not delay the forced keyframe
            if let Err(e) = encoder.flush() {
                drop(frame);
                return self.recover(e);
            }
        }

        let result = encoder.encode(&frame, force_keyframe);
        drop(frame);

        match result {
            Ok(()) => {
                self.shared.counters.frames_submitted.fetch_add(1, Ordering::Relaxed);
                if force_keyframe {
                    self.last_keyframe_at = Some(now);
                    self.shared.counters.keyframes_forced.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => return self.recover(e),
        }

        self.drain()
    }

    /// Forward all available encoder output to the transport
    pub(crate) fn drain(&mut self) -> Result<(), RuntimeError> {
        loop {
            let Some(encoder) = self.encoder.as_mut() else {
                return Ok(());
            };
            match encoder.receive() {
                None => return Ok(()),
                Some(Ok(chunk)) => self.emit(chunk),
                Some(Err(e)) => self.recover(e)?,
            }
        }
    }

    fn emit(&mut self, chunk: EncodedVideoChunk) {
        self.failures_since_output = 0;
        let is_keyframe = chunk.declared_key
            || (self.config.profile.codec == VideoCodec::H264 && h264::contains_keyframe(&chunk.data));
        if is_keyframe {
            // any keyframe restarts the cadence, forced or not
            self.last_keyframe_at = Some(self.clock.now());
        }
        self.shared.counters.chunks_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            "{:?} chunk {} bytes key={} ts={}",
            self.source,
            chunk.data.len(),
            is_keyframe,
            chunk.timestamp_us
        );
        self.transport
            .send_encoded_video(chunk.data, chunk.timestamp_us, is_keyframe, self.source);
    }

    /// Replace a crashed encoder with a software one
    ///
    /// A second failure before the replacement has produced anything is fatal.
    fn recover(&mut self, err: CodecError) -> Result<(), RuntimeError> {
        self.failures_since_output += 1;
        if let Some(mut encoder) = self.encoder.take() {
            encoder.close();
        }

        if self.failures_since_output >= 2 {
            tracing::error!("{:?} encoder failed again during recovery: {}", self.source, err);
            return Err(RuntimeError::RecoveryFailed(err.to_string()));
        }
        tracing::warn!(
            "{:?} encoder ({}) failed: {}, falling back to software",
            self.source,
            self.config.profile.codec_string,
            err
        );

        let software = EncoderNegotiator::new(&*self.provider)
            .probe_software(
                self.config.width,
                self.config.height,
                self.config.framerate,
                self.source.is_screen(),
            )
            .map_err(|e| RuntimeError::RecoveryFailed(e.to_string()))?;
        let mut encoder = self
            .provider
            .create_video_encoder(&software)
            .map_err(|e| RuntimeError::RecoveryFailed(e.to_string()))?;

        if !self.alive.load(Ordering::SeqCst) {
            // stopped while we were rebuilding
            encoder.close();
            return Ok(());
        }

        *self.shared.active_config.lock() = software.clone();
        self.config = software;
        self.encoder = Some(encoder);
        self.last_keyframe_at = None;
        self.shared.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.close();
        }
    }
}

enum Control {
    Stop,
}

/// Running camera or screen capture
pub struct VideoCapture {
    source: VideoSource,
    running: Arc<AtomicBool>,
    shared: Arc<Shared>,
    control_tx: Option<Sender<Control>>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<Error>,
}

impl VideoCapture {
    /// Open the source, negotiate an encoder and start the frame pump
    ///
    /// Fails with no capture running if the source cannot be opened or no
    /// codec profile is supported.
    pub fn start(
        provider: SharedProvider,
        transport: SharedTransport,
        clock: SharedClock,
        video: &VideoConfig,
        source: VideoSource,
        device_id: Option<&str>,
    ) -> Result<Self, SetupError> {
        let constraints = VideoConstraints {
            max_width: video.max_width,
            max_height: video.max_height,
            max_framerate: match source {
                VideoSource::Camera => video.camera_max_fps,
                VideoSource::Screen => video.screen_max_fps,
            },
        };
        let mut input = provider.open_video_input(source, device_id, &constraints)?;
        let settings = input.settings();
        let width = settings.width.min(constraints.max_width);
        let height = settings.height.min(constraints.max_height);
        let framerate = settings.framerate.clamp(1, constraints.max_framerate);

        let running = Arc::new(AtomicBool::new(true));
        let session = EncoderNegotiator::new(&*provider)
            .probe(width, height, framerate, source.is_screen())
            .and_then(|config| {
                EncodeSession::new(
                    source,
                    config,
                    video,
                    provider.clone(),
                    transport,
                    clock,
                    running.clone(),
                )
            });
        let mut session = match session {
            Ok(session) => session,
            Err(e) => {
                input.stop();
                return Err(e);
            }
        };

        let shared = session.shared.clone();
        let (control_tx, control_rx) = bounded::<Control>(1);
        let (error_tx, error_rx) = bounded::<Error>(16);
        let frames = input.frames();
        let running_for_loop = running.clone();
        let shared_for_loop = shared.clone();

        let handle = thread::Builder::new()
            .name(format!("video-capture-{:?}", source).to_lowercase())
            .spawn(move || {
                let ticker = tick(OUTPUT_POLL_INTERVAL);
                let mut failure = None;
                loop {
                    let result = select! {
                        recv(control_rx) -> _ => break,
                        recv(frames) -> msg => match msg {
                            Ok(frame) => {
                                if !running_for_loop.load(Ordering::Relaxed) {
                                    break;
                                }
                                session.handle_frame(frame)
                            }
                            Err(_) => {
                                tracing::info!("{:?} source ended", source);
                                break;
                            }
                        },
                        recv(ticker) -> _ => session.drain(),
                    };
                    if let Err(e) = result {
                        failure = Some(e);
                        break;
                    }
                }

                session.close();
                input.stop();
                *shared_for_loop.state.lock() = if failure.is_some() {
                    CaptureState::Failed
                } else {
                    CaptureState::Stopped
                };
                if let Some(e) = failure {
                    let _ = error_tx.try_send(e.into());
                }
                running_for_loop.store(false, Ordering::SeqCst);
            })
            .map_err(|e| SetupError::CapabilityMissing(e.to_string()))?;

        tracing::info!("{:?} capture started at {}x{}@{}", source, width, height, framerate);
        Ok(Self {
            source,
            running,
            shared,
            control_tx: Some(control_tx),
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Tear down encoder, frame pump and source. No transport call happens after this returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.try_send(Control::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("{:?} capture stopped", self.source);
        }
    }

    pub fn source(&self) -> VideoSource {
        self.source
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Encoder profile currently in use (changes after a fallback)
    pub fn active_config(&self) -> EncoderConfig {
        self.shared.active_config.lock().clone()
    }

    /// Check for errors reported by the capture thread
    pub fn check_errors(&self) -> Option<Error> {
        self.error_rx.try_recv().ok()
    }

    pub fn stats(&self) -> VideoCaptureStats {
        let c = &self.shared.counters;
        VideoCaptureStats {
            frames_captured: c.frames_captured.load(Ordering::Relaxed),
            frames_submitted: c.frames_submitted.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            keyframes_forced: c.keyframes_forced.load(Ordering::Relaxed),
            chunks_sent: c.chunks_sent.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl Drop for VideoCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
