//! Microphone capture pipeline
//!
//! A dedicated thread pulls 20 ms frames from the input device, measures
//! their energy, runs voice activity detection and hands every frame to the
//! Opus encoder. Encoded packets and speaking transitions go straight to the
//! transport in the order they are produced.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::AudioFrame;
use crate::audio::vad::{SpeakingNotifier, VoiceActivityDetector};
use crate::clock::SharedClock;
use crate::codec::{AudioEncoder, EncodedAudioPacket};
use crate::config::AudioConfig;
use crate::constants::AUDIO_ENCODE_BACKLOG_WARN;
use crate::error::{Error, RuntimeError, SetupError};
use crate::provider::{AudioInput, SharedProvider};
use crate::transport::SharedTransport;

/// State readable from outside the capture thread
#[derive(Default)]
pub struct CaptureShared {
    speaking: AtomicBool,
    level: AtomicU8,
    sensitivity: AtomicU8,
    frames_captured: AtomicU64,
    frames_encoded: AtomicU64,
    encode_errors: AtomicU64,
    backlog_events: AtomicU64,
}

/// Capture counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioCaptureStats {
    pub frames_captured: u64,
    pub frames_encoded: u64,
    pub encode_errors: u64,
    /// Frames processed while more than the warning backlog was queued
    pub backlog_events: u64,
}

enum Control {
    Stop,
}

/// Per-frame processing; owned by the capture thread
pub(crate) struct CaptureSession {
    vad: VoiceActivityDetector,
    notifier: SpeakingNotifier,
    encoder: Box<dyn AudioEncoder>,
    transport: SharedTransport,
    clock: SharedClock,
    shared: Arc<CaptureShared>,
    level_gain: f32,
}

impl CaptureSession {
    pub(crate) fn new(
        config: &AudioConfig,
        encoder: Box<dyn AudioEncoder>,
        transport: SharedTransport,
        clock: SharedClock,
        shared: Arc<CaptureShared>,
    ) -> Self {
        Self {
            vad: VoiceActivityDetector::new(config.base_threshold),
            notifier: SpeakingNotifier::new(),
            encoder,
            transport,
            clock,
            shared,
            level_gain: config.level_gain,
        }
    }

    /// VAD + encode one frame. `backlog` is how many frames are still queued behind it.
    pub(crate) fn handle_frame(&mut self, frame: AudioFrame, backlog: usize) {
        let now = self.clock.now();
        self.shared.frames_captured.fetch_add(1, Ordering::Relaxed);

        if let Some(speaking) = self.notifier.poll(now) {
            self.transport.notify_speaking(speaking);
        }

        let rms = frame.rms();
        let level = (rms * self.level_gain).clamp(0.0, 100.0) as u8;
        self.shared.level.store(level, Ordering::Relaxed);

        let sensitivity = self.shared.sensitivity.load(Ordering::Relaxed);
        if let Some(speaking) = self.vad.process(rms, sensitivity) {
            self.shared.speaking.store(speaking, Ordering::Relaxed);
            tracing::debug!("Speaking state -> {}", speaking);
            if let Some(notify) = self.notifier.on_transition(speaking, now) {
                self.transport.notify_speaking(notify);
            }
        }

        if backlog > AUDIO_ENCODE_BACKLOG_WARN {
            // Still encoded; the encoder applies its own backpressure
            self.shared.backlog_events.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Audio encode backlog at {} frames", backlog);
        }

        match self.encoder.encode(&frame.samples) {
            Ok(data) => {
                self.shared.frames_encoded.fetch_add(1, Ordering::Relaxed);
                self.transport.send_encoded_audio(EncodedAudioPacket {
                    data,
                    timestamp_us: frame.timestamp,
                });
            }
            Err(e) => {
                self.shared.encode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Audio encoding failed: {}", e);
            }
        }
    }

    /// Final speaking notification and meter reset
    pub(crate) fn finish(&mut self) {
        if let Some(speaking) = self.notifier.finish() {
            self.transport.notify_speaking(speaking);
        }
        self.vad.reset();
        self.shared.speaking.store(false, Ordering::Relaxed);
        self.shared.level.store(0, Ordering::Relaxed);
    }
}

/// Running microphone capture
pub struct AudioCapture {
    device_id: Option<String>,
    provider: SharedProvider,
    transport: SharedTransport,
    clock: SharedClock,
    config: AudioConfig,
    running: Arc<AtomicBool>,
    shared: Arc<CaptureShared>,
    control_tx: Option<Sender<Control>>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<Error>,
}

impl AudioCapture {
    /// Open the device and encoder and start the capture thread
    ///
    /// Fails without leaving anything running if the device is unavailable,
    /// permission is denied, or the encoder configuration is unsupported.
    pub fn start(
        provider: SharedProvider,
        transport: SharedTransport,
        clock: SharedClock,
        config: AudioConfig,
        device_id: Option<&str>,
    ) -> Result<Self, SetupError> {
        let shared = Arc::new(CaptureShared::default());
        shared.sensitivity.store(config.sensitivity.min(100), Ordering::Relaxed);

        let (_, error_rx) = bounded(1);
        let mut capture = Self {
            device_id: device_id.map(str::to_string),
            provider,
            transport,
            clock,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shared,
            control_tx: None,
            thread_handle: None,
            error_rx,
        };
        capture.spawn()?;
        Ok(capture)
    }

    fn spawn(&mut self) -> Result<(), SetupError> {
        let encoder = self
            .provider
            .create_audio_encoder(&self.config.opus())
            .map_err(|e| SetupError::EncoderUnsupported(e.to_string()))?;
        let mut input = self.provider.open_audio_input(self.device_id.as_deref())?;

        let (control_tx, control_rx) = bounded::<Control>(1);
        let (error_tx, error_rx) = bounded::<Error>(16);
        self.error_rx = error_rx;

        let mut session = CaptureSession::new(
            &self.config,
            encoder,
            self.transport.clone(),
            self.clock.clone(),
            self.shared.clone(),
        );
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let frames = input.frames();
        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(control_rx) -> _ => break,
                        recv(frames) -> msg => match msg {
                            Ok(frame) => {
                                if !running.load(Ordering::Relaxed) {
                                    break;
                                }
                                session.handle_frame(frame, frames.len());
                            }
                            Err(_) => {
                                tracing::error!("Audio input closed unexpectedly");
                                let _ = error_tx.try_send(
                                    RuntimeError::DeviceLost("audio input closed".into()).into(),
                                );
                                break;
                            }
                        },
                    }
                }
                session.finish();
                input.stop();
                running.store(false, Ordering::SeqCst);
            });

        match handle {
            Ok(handle) => {
                self.control_tx = Some(control_tx);
                self.thread_handle = Some(handle);
                tracing::info!(
                    "Audio capture started on {}",
                    self.device_id.as_deref().unwrap_or("default device")
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(SetupError::CapabilityMissing(e.to_string()))
            }
        }
    }

    /// Stop capturing. No transport call happens after this returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.try_send(Control::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Audio capture stopped");
        }
    }

    /// Restart on a different input device; sensitivity carries over
    pub fn switch_device(&mut self, device_id: Option<&str>) -> Result<(), SetupError> {
        self.stop();
        self.device_id = device_id.map(str::to_string);
        self.spawn()
    }

    /// Takes effect on the next frame
    pub fn set_sensitivity(&self, sensitivity: u8) {
        self.shared.sensitivity.store(sensitivity.min(100), Ordering::Relaxed);
    }

    pub fn sensitivity(&self) -> u8 {
        self.shared.sensitivity.load(Ordering::Relaxed)
    }

    pub fn speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::Relaxed)
    }

    /// Input level meter, 0..=100
    pub fn audio_level(&self) -> u8 {
        self.shared.level.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Check for errors reported by the capture thread
    pub fn check_errors(&self) -> Option<Error> {
        self.error_rx.try_recv().ok()
    }

    pub fn stats(&self) -> AudioCaptureStats {
        AudioCaptureStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            frames_encoded: self.shared.frames_encoded.load(Ordering::Relaxed),
            encode_errors: self.shared.encode_errors.load(Ordering::Relaxed),
            backlog_events: self.shared.backlog_events.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
