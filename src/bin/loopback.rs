//! Microphone loopback
//!
//! Captures the default (or given) input device, runs voice activity
//! detection and Opus encoding, then feeds every packet straight back
//! through the playback pipeline to the default output device.

use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peer_media::{
    audio::{list_devices, AudioCapture, AudioPlayback},
    clock::SystemClock,
    config::MediaConfig,
    constants::EVENT_CHANNEL_CAPACITY,
    platform::PlatformProvider,
    transport::{ChannelTransport, TransportEvent},
};

/// Source id the looped-back packets are played under
const LOOPBACK_SOURCE: u32 = 0;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting peer-media loopback");

    let config = MediaConfig::load_or_default()?;
    if let Some(path) = MediaConfig::default_path() {
        tracing::info!("Config path: {}", path.display());
    }

    println!("\n=== Input Devices ===");
    for device in list_devices().iter().filter(|d| d.is_input) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    ID: {}", device.id);
    }
    println!();

    let device_id = std::env::args().nth(1);
    let provider = PlatformProvider::shared();
    let clock = SystemClock::shared();

    let playback = AudioPlayback::new(provider.clone(), clock.clone(), config.playback.clone());
    playback.set_enabled(true, false)?;

    let (transport, events) = ChannelTransport::new(EVENT_CHANNEL_CAPACITY);
    let mut capture = AudioCapture::start(
        provider,
        std::sync::Arc::new(transport),
        clock,
        config.audio.clone(),
        device_id.as_deref(),
    )?;

    tracing::info!(
        "Capturing from {} at sensitivity {} - press Ctrl+C to stop",
        device_id.as_deref().unwrap_or("default input"),
        capture.sensitivity()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut pump = tokio::time::interval(Duration::from_millis(5));
    let mut report = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = pump.tick() => {
                while let Ok(event) = events.try_recv() {
                    match event {
                        TransportEvent::Audio(packet) => {
                            playback.deliver_packet(LOOPBACK_SOURCE, packet.timestamp_us, packet.data);
                        }
                        TransportEvent::Speaking(speaking) => {
                            println!("{}", if speaking { "speaking" } else { "silent" });
                        }
                        TransportEvent::Video { .. } => {}
                    }
                }
                if let Some(e) = capture.check_errors() {
                    tracing::error!("Capture failed: {}", e);
                    break;
                }
            }
            _ = report.tick() => {
                let capture_stats = capture.stats();
                let playback_stats = playback.stats();
                tracing::info!(
                    "level {:>3} | {} frames encoded, {} decoded, {} ring overruns",
                    capture.audio_level(),
                    capture_stats.frames_encoded,
                    playback_stats.packets_decoded,
                    playback.ring().overwritten()
                );
            }
        }
    }

    capture.stop();
    playback.disable();
    tracing::info!("Loopback stopped");
    Ok(())
}
