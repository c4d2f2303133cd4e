//! Fakes for driving the pipelines without devices or native codecs

#![allow(dead_code)]

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::buffer::{AudioFrame, SharedSampleRing};
use crate::codec::{
    AudioDecoder, AudioEncoder, CodecState, DecoderConfig, EncodedAudioPacket, EncodedVideoChunk,
    EncoderConfig, HardwareAcceleration, VideoCodec, VideoDecoder, VideoEncoder,
};
use crate::config::OpusConfig;
use crate::constants::SAMPLES_PER_FRAME;
use crate::error::{CodecError, SetupError};
use crate::provider::{
    AudioInput, AudioOutput, MediaProvider, VideoConstraints, VideoInput, VideoTrackSettings,
};
use crate::transport::{Transport, TransportEvent};
use crate::video::frame::{DecodedVideoFrame, VideoFrame, VideoSource};

pub const IDR_CHUNK: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x65, 0x88];
pub const DELTA_CHUNK: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a];

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn silent_frame(seq: u32) -> AudioFrame {
    AudioFrame::new(vec![0.0; SAMPLES_PER_FRAME], 1, seq as u64 * 20_000, seq)
}

pub fn loud_frame(seq: u32) -> AudioFrame {
    AudioFrame::new(vec![0.5; SAMPLES_PER_FRAME], 1, seq as u64 * 20_000, seq)
}

pub fn video_frame(ts: u64) -> VideoFrame {
    VideoFrame {
        width: 640,
        height: 360,
        timestamp_us: ts,
        data: Bytes::from_static(&[0u8; 16]),
    }
}

/// Transport that records everything it is handed
#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<TransportEvent>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    pub fn speaking(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Speaking(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn audio_count(&self) -> usize {
        self.events.lock().iter().filter(|e| matches!(e, TransportEvent::Audio(_))).count()
    }

    /// (is_keyframe, source) of every video chunk sent
    pub fn video(&self) -> Vec<(bool, VideoSource)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Video { is_keyframe, source, .. } => Some((*is_keyframe, *source)),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl Transport for RecordingTransport {
    fn send_encoded_audio(&self, packet: EncodedAudioPacket) {
        self.events.lock().push(TransportEvent::Audio(packet));
    }

    fn send_encoded_video(&self, data: Bytes, timestamp_us: u64, is_keyframe: bool, source: VideoSource) {
        self.events.lock().push(TransportEvent::Video {
            data,
            timestamp_us,
            is_keyframe,
            source,
        });
    }

    fn notify_speaking(&self, speaking: bool) {
        self.events.lock().push(TransportEvent::Speaking(speaking));
    }
}

struct FakeAudioInput {
    rx: Receiver<AudioFrame>,
    stopped: Arc<AtomicBool>,
}

impl AudioInput for FakeAudioInput {
    fn frames(&self) -> Receiver<AudioFrame> {
        self.rx.clone()
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct FakeAudioOutput {
    stopped: Arc<AtomicBool>,
}

impl AudioOutput for FakeAudioOutput {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct FakeAudioEncoder {
    encoded: u32,
}

impl AudioEncoder for FakeAudioEncoder {
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != SAMPLES_PER_FRAME {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }
        self.encoded += 1;
        Ok(Bytes::copy_from_slice(&self.encoded.to_be_bytes()))
    }

    fn samples_per_frame(&self) -> usize {
        SAMPLES_PER_FRAME
    }
}

/// Shared view onto one fake audio decoder
#[derive(Default)]
pub struct AudioDecoderProbe {
    pub decode_calls: AtomicUsize,
    pub closed: AtomicBool,
}

struct FakeAudioDecoder {
    probe: Arc<AudioDecoderProbe>,
}

impl AudioDecoder for FakeAudioDecoder {
    fn state(&self) -> CodecState {
        if self.probe.closed.load(Ordering::SeqCst) {
            CodecState::Closed
        } else {
            CodecState::Configured
        }
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError> {
        if self.state() == CodecState::Closed {
            return Err(CodecError::Closed);
        }
        self.probe.decode_calls.fetch_add(1, Ordering::SeqCst);
        let level = data.first().copied().unwrap_or(0) as f32 / 100.0;
        Ok(vec![level; SAMPLES_PER_FRAME])
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeVideoInput {
    rx: Receiver<VideoFrame>,
    settings: VideoTrackSettings,
    stopped: Arc<AtomicBool>,
}

impl VideoInput for FakeVideoInput {
    fn frames(&self) -> Receiver<VideoFrame> {
        self.rx.clone()
    }

    fn settings(&self) -> VideoTrackSettings {
        self.settings
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Knobs and counters for one fake video encoder
pub struct EncoderProbe {
    pub config: EncoderConfig,
    /// Reported by `pending()`
    pub pending: AtomicUsize,
    /// Next `receive()` reports a crash
    pub crash: AtomicBool,
    /// Set the declared key flag on key output
    pub declare_keys: AtomicBool,
    /// Next frame comes out as a keyframe without being asked for one
    pub spontaneous_key: AtomicBool,
    pub encode_calls: AtomicUsize,
    pub keyframe_requests: AtomicUsize,
    pub flushes: AtomicUsize,
    pub closed: AtomicBool,
}

struct FakeVideoEncoder {
    probe: Arc<EncoderProbe>,
    output: VecDeque<EncodedVideoChunk>,
}

impl VideoEncoder for FakeVideoEncoder {
    fn encode(&mut self, frame: &VideoFrame, keyframe: bool) -> Result<(), CodecError> {
        if self.probe.closed.load(Ordering::SeqCst) {
            return Err(CodecError::Closed);
        }
        self.probe.encode_calls.fetch_add(1, Ordering::SeqCst);
        if keyframe {
            self.probe.keyframe_requests.fetch_add(1, Ordering::SeqCst);
        }
        let h264 = self.probe.config.profile.codec == VideoCodec::H264;
        let keyframe = keyframe || self.probe.spontaneous_key.swap(false, Ordering::SeqCst);
        let data = match (keyframe, h264) {
            (true, true) => Bytes::from_static(IDR_CHUNK),
            (false, true) => Bytes::from_static(DELTA_CHUNK),
            (true, false) => Bytes::from_static(b"vp8-key"),
            (false, false) => Bytes::from_static(b"vp8-delta"),
        };
        self.output.push_back(EncodedVideoChunk {
            data,
            timestamp_us: frame.timestamp_us,
            declared_key: keyframe && self.probe.declare_keys.load(Ordering::SeqCst),
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.probe.pending.load(Ordering::SeqCst)
    }

    fn receive(&mut self) -> Option<Result<EncodedVideoChunk, CodecError>> {
        if self.probe.crash.swap(false, Ordering::SeqCst) {
            return Some(Err(CodecError::EncodingFailed("hardware encoder crashed".into())));
        }
        self.output.pop_front().map(Ok)
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Knobs and counters for one fake video decoder
#[derive(Default)]
pub struct DecoderProbe {
    pub pending: AtomicUsize,
    /// Next decode is reported as failed through `receive()`
    pub fail_next: AtomicBool,
    pub decode_calls: AtomicUsize,
    pub configures: AtomicUsize,
    pub configured: AtomicBool,
    pub closed: AtomicBool,
}

struct FakeVideoDecoder {
    probe: Arc<DecoderProbe>,
    output: VecDeque<Result<DecodedVideoFrame, CodecError>>,
}

impl VideoDecoder for FakeVideoDecoder {
    fn state(&self) -> CodecState {
        if self.probe.closed.load(Ordering::SeqCst) {
            CodecState::Closed
        } else if self.probe.configured.load(Ordering::SeqCst) {
            CodecState::Configured
        } else {
            CodecState::Unconfigured
        }
    }

    fn configure(&mut self, _config: &DecoderConfig) -> Result<(), CodecError> {
        self.probe.configures.fetch_add(1, Ordering::SeqCst);
        self.probe.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn decode(&mut self, chunk: &EncodedVideoChunk) -> Result<(), CodecError> {
        if self.state() != CodecState::Configured {
            return Err(CodecError::Closed);
        }
        self.probe.decode_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_next.swap(false, Ordering::SeqCst) {
            self.output.push_back(Err(CodecError::DecodingFailed("corrupt slice".into())));
        } else {
            let side = if chunk.data.len() > 8 { 4 } else { 2 };
            self.output.push_back(Ok(DecodedVideoFrame {
                width: side,
                height: side,
                timestamp_us: chunk.timestamp_us,
                pixels: vec![0xff; (side * side * 4) as usize],
            }));
        }
        Ok(())
    }

    fn pending(&self) -> usize {
        self.probe.pending.load(Ordering::SeqCst)
    }

    fn receive(&mut self) -> Option<Result<DecodedVideoFrame, CodecError>> {
        self.output.pop_front()
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Provider whose every device and codec is a scriptable fake
pub struct FakeProvider {
    pub audio_tx: Sender<AudioFrame>,
    audio_rx: Receiver<AudioFrame>,
    pub video_tx: Sender<VideoFrame>,
    video_rx: Receiver<VideoFrame>,
    /// Frame source handed to the next opened video input instead of `video_rx`
    pub video_override: Mutex<Option<Receiver<VideoFrame>>>,
    pub video_settings: Mutex<VideoTrackSettings>,
    pub deny_audio: AtomicBool,
    pub fail_audio_encoder: AtomicBool,
    pub audio_inputs_stopped: Arc<AtomicBool>,
    pub audio_outputs_stopped: Arc<AtomicBool>,
    pub video_inputs_stopped: Arc<AtomicBool>,
    pub audio_decoders: Mutex<Vec<Arc<AudioDecoderProbe>>>,
    pub encoder_support: Mutex<HashSet<(&'static str, HardwareAcceleration)>>,
    pub decoder_support: Mutex<HashSet<&'static str>>,
    pub encoders: Mutex<Vec<Arc<EncoderProbe>>>,
    pub decoders: Mutex<Vec<Arc<DecoderProbe>>>,
    pub declare_keys: AtomicBool,
    pub probe_calls: AtomicUsize,
}

impl FakeProvider {
    /// Supports hardware and software H.264 level 3.1 and every decoder
    pub fn new() -> Arc<Self> {
        let (audio_tx, audio_rx) = crossbeam_channel::bounded(256);
        let (video_tx, video_rx) = crossbeam_channel::bounded(64);
        let encoder_support = [
            ("avc1.42E01F", HardwareAcceleration::PreferHardware),
            ("avc1.42E01F", HardwareAcceleration::NoPreference),
            ("avc1.42E01F", HardwareAcceleration::PreferSoftware),
        ]
        .into_iter()
        .collect();
        let decoder_support = ["avc1.42E01F", "avc1.42E01E", "vp8"].into_iter().collect();
        Arc::new(Self {
            audio_tx,
            audio_rx,
            video_tx,
            video_rx,
            video_override: Mutex::new(None),
            video_settings: Mutex::new(VideoTrackSettings {
                width: 640,
                height: 360,
                framerate: 30,
            }),
            deny_audio: AtomicBool::new(false),
            fail_audio_encoder: AtomicBool::new(false),
            audio_inputs_stopped: Arc::new(AtomicBool::new(false)),
            audio_outputs_stopped: Arc::new(AtomicBool::new(false)),
            video_inputs_stopped: Arc::new(AtomicBool::new(false)),
            audio_decoders: Mutex::new(Vec::new()),
            encoder_support: Mutex::new(encoder_support),
            decoder_support: Mutex::new(decoder_support),
            encoders: Mutex::new(Vec::new()),
            decoders: Mutex::new(Vec::new()),
            declare_keys: AtomicBool::new(true),
            probe_calls: AtomicUsize::new(0),
        })
    }

    pub fn encoder(&self, index: usize) -> Arc<EncoderProbe> {
        self.encoders.lock()[index].clone()
    }

    pub fn encoder_count(&self) -> usize {
        self.encoders.lock().len()
    }

    pub fn decoder(&self, index: usize) -> Arc<DecoderProbe> {
        self.decoders.lock()[index].clone()
    }

    pub fn decoder_count(&self) -> usize {
        self.decoders.lock().len()
    }
}

impl MediaProvider for FakeProvider {
    fn open_audio_input(&self, device_id: Option<&str>) -> Result<Box<dyn AudioInput>, SetupError> {
        if self.deny_audio.load(Ordering::SeqCst) {
            return Err(SetupError::PermissionDenied(device_id.unwrap_or("default").to_string()));
        }
        self.audio_inputs_stopped.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeAudioInput {
            rx: self.audio_rx.clone(),
            stopped: self.audio_inputs_stopped.clone(),
        }))
    }

    fn open_audio_output(&self, _ring: SharedSampleRing) -> Result<Box<dyn AudioOutput>, SetupError> {
        self.audio_outputs_stopped.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeAudioOutput {
            stopped: self.audio_outputs_stopped.clone(),
        }))
    }

    fn create_audio_encoder(&self, _config: &OpusConfig) -> Result<Box<dyn AudioEncoder>, CodecError> {
        if self.fail_audio_encoder.load(Ordering::SeqCst) {
            return Err(CodecError::EncoderInit("unsupported configuration".into()));
        }
        Ok(Box::new(FakeAudioEncoder { encoded: 0 }))
    }

    fn create_audio_decoder(&self, _sample_rate: u32, _channels: u16) -> Result<Box<dyn AudioDecoder>, CodecError> {
        let probe = Arc::new(AudioDecoderProbe::default());
        self.audio_decoders.lock().push(probe.clone());
        Ok(Box::new(FakeAudioDecoder { probe }))
    }

    fn open_video_input(
        &self,
        _source: VideoSource,
        _device_id: Option<&str>,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn VideoInput>, SetupError> {
        let wanted = *self.video_settings.lock();
        self.video_inputs_stopped.store(false, Ordering::SeqCst);
        let rx = self.video_override.lock().take().unwrap_or_else(|| self.video_rx.clone());
        Ok(Box::new(FakeVideoInput {
            rx,
            settings: VideoTrackSettings {
                width: wanted.width.min(constraints.max_width),
                height: wanted.height.min(constraints.max_height),
                framerate: wanted.framerate.min(constraints.max_framerate),
            },
            stopped: self.video_inputs_stopped.clone(),
        }))
    }

    fn probe_encoder_support(&self, config: &EncoderConfig) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.encoder_support
            .lock()
            .contains(&(config.profile.codec_string, config.acceleration))
    }

    fn create_video_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>, CodecError> {
        if !self.probe_encoder_support(config) {
            return Err(CodecError::EncoderInit(config.profile.codec_string.into()));
        }
        let probe = Arc::new(EncoderProbe {
            config: config.clone(),
            pending: AtomicUsize::new(0),
            crash: AtomicBool::new(false),
            declare_keys: AtomicBool::new(self.declare_keys.load(Ordering::SeqCst)),
            spontaneous_key: AtomicBool::new(false),
            encode_calls: AtomicUsize::new(0),
            keyframe_requests: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.encoders.lock().push(probe.clone());
        Ok(Box::new(FakeVideoEncoder {
            probe,
            output: VecDeque::new(),
        }))
    }

    fn probe_decoder_support(&self, config: &DecoderConfig) -> bool {
        self.decoder_support.lock().contains(config.profile.codec_string)
    }

    fn create_video_decoder(&self) -> Result<Box<dyn VideoDecoder>, CodecError> {
        let probe = Arc::new(DecoderProbe::default());
        self.decoders.lock().push(probe.clone());
        Ok(Box::new(FakeVideoDecoder {
            probe,
            output: VecDeque::new(),
        }))
    }
}
