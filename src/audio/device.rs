//! Audio device enumeration and cpal-backed streams

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{AudioFrame, SharedSampleRing};
use crate::constants::{SAMPLES_PER_FRAME, SAMPLE_RATE};
use crate::error::AudioError;
use crate::provider::{AudioInput, AudioOutput};

/// Frames buffered between the device callback and the capture thread
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Device description for selection UIs
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool, is_output: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
            is_output,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Channel count to open at 48 kHz, if the device can do 48 kHz at all
    fn channels_at_48k(&self) -> Result<u16, AudioError> {
        let configs: Vec<cpal::SupportedStreamConfigRange> = if self.is_input {
            self.inner
                .supported_input_configs()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
                .collect()
        } else {
            self.inner
                .supported_output_configs()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
                .collect()
        };
        let rate = cpal::SampleRate(SAMPLE_RATE);
        configs
            .iter()
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .filter(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
            .map(|c| c.channels())
            .min()
            .ok_or_else(|| AudioError::UnsupportedFormat(format!("{} cannot run f32 at 48 kHz", self.name)))
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    let (sample_rates, channels) = get_device_capabilities(&device, false);
                    devices.push(AudioDeviceInfo {
                        id: format!("output:{}", name),
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                        sample_rates,
                        channels,
                    });
                }
            }
        }
    }

    devices
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in [16000u32, 24000, 44100, 48000, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate() && rate <= config.max_sample_rate() && !sample_rates.contains(&rate_val) {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }
    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Get a device by its ID (`input:<name>` / `output:<name>`; bare names are inputs)
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (true, id)
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, is_input, !is_input));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get default input device
pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true, false))
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false, true))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::DeviceNotFound(err.to_string()),
        cpal::BuildStreamError::StreamConfigNotSupported => AudioError::UnsupportedFormat(err.to_string()),
        other => AudioError::StreamError(other.to_string()),
    }
}

/// Cuts the device callback's interleaved buffers into mono 20 ms frames
struct FrameAssembler {
    channels: usize,
    pending: Vec<f32>,
    sequence: u32,
    start: Instant,
    tx: Sender<AudioFrame>,
}

impl FrameAssembler {
    fn push(&mut self, data: &[f32]) {
        for chunk in data.chunks(self.channels) {
            let mono = chunk.iter().sum::<f32>() / chunk.len() as f32;
            self.pending.push(mono);
            if self.pending.len() == SAMPLES_PER_FRAME {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(SAMPLES_PER_FRAME));
                let frame = AudioFrame::new(samples, 1, self.start.elapsed().as_micros() as u64, self.sequence);
                self.sequence = self.sequence.wrapping_add(1);
                if let Err(TrySendError::Full(_)) = self.tx.try_send(frame) {
                    tracing::debug!("Capture channel full, dropping microphone frame");
                }
            }
        }
    }
}

/// Microphone stream kept alive on its own thread
///
/// cpal streams are not `Send` on every backend, so the stream is built and
/// dropped on a dedicated thread, like the capture threads elsewhere.
pub struct CpalAudioInput {
    frames: Receiver<AudioFrame>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalAudioInput {
    pub fn open(device_id: Option<&str>) -> Result<Self, AudioError> {
        let device = match device_id {
            Some(id) => get_device_by_id(id)?,
            None => get_default_input_device()?,
        };
        let channels = device.channels_at_48k()?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let (frame_tx, frame_rx) = bounded::<AudioFrame>(INPUT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let name = device.name.clone();

        let handle = thread::Builder::new()
            .name("audio-input".to_string())
            .spawn(move || {
                let mut assembler = FrameAssembler {
                    channels: channels as usize,
                    pending: Vec::with_capacity(SAMPLES_PER_FRAME),
                    sequence: 0,
                    start: Instant::now(),
                    tx: frame_tx,
                };
                let stream = device.into_inner().build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| assembler.push(data),
                    move |err| tracing::error!("Input stream error: {}", err),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_build_error(e)));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("Opened input device {} ({} ch @ 48 kHz)", name, channels);
                Ok(Self {
                    frames: frame_rx,
                    running,
                    thread_handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError("input thread exited".into()))
            }
        }
    }
}

impl AudioInput for CpalAudioInput {
    fn frames(&self) -> Receiver<AudioFrame> {
        self.frames.clone()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalAudioInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Output stream that drains a sample ring, duplicating mono to every channel
pub struct CpalAudioOutput {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalAudioOutput {
    pub fn open(ring: SharedSampleRing) -> Result<Self, AudioError> {
        let device = get_default_output_device()?;
        let channels = device.channels_at_48k()?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let mut mono: Vec<f32> = Vec::with_capacity(4096);
                let stream = device.into_inner().build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let frames = data.len() / channels as usize;
                        mono.resize(frames, 0.0);
                        ring.read(&mut mono);
                        for (out, sample) in data.chunks_mut(channels as usize).zip(mono.iter()) {
                            out.fill(*sample);
                        }
                    },
                    move |err| tracing::error!("Output stream error: {}", err),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_build_error(e)));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                thread_handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError("output thread exited".into()))
            }
        }
    }
}

impl AudioOutput for CpalAudioOutput {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalAudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
