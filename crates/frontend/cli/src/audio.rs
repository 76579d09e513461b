//! rodio playback of the console's sample bridge.

use std::time::Duration;

use anyhow::Context;
use nestor_core::audio::SampleSource;
use rodio::cpal::traits::HostTrait;
use rodio::{cpal, DeviceTrait, OutputStream, OutputStreamHandle, Source};

/// Pulls from the bridge on rodio's thread. Never ends; an empty queue
/// plays silence.
struct BridgeSource {
    source: SampleSource,
    sample_rate: u32,
}

impl Iterator for BridgeSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(self.source.next_sample())
    }
}

impl Source for BridgeSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.source.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// The default output device, opened at its own rate and channel layout so
/// rodio does not resample. Dropping it stops playback.
pub struct AudioDevice {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sample_rate: u32,
    channels: u16,
}

impl AudioDevice {
    pub fn open() -> anyhow::Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .context("no default audio output device")?;
        let config = device
            .default_output_config()
            .context("audio device has no default output config")?;
        let (stream, handle) =
            OutputStream::try_from_device(&device).context("failed to open audio device")?;
        log::info!(
            "audio device {}: {} Hz, {} channel(s)",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string()),
            config.sample_rate().0,
            config.channels()
        );
        Ok(Self {
            _stream: stream,
            handle,
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Play `source`, duplicating each mono sample across the device channels.
    pub fn play(&self, source: SampleSource) -> anyhow::Result<()> {
        self.handle
            .play_raw(bridge_source(source, self.sample_rate, self.channels).convert_samples())
            .context("failed to start audio playback")
    }
}

fn bridge_source(source: SampleSource, sample_rate: u32, channels: u16) -> BridgeSource {
    BridgeSource {
        source: source.with_channels(channels),
        sample_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestor_core::audio::sample_bridge;

    #[test]
    fn bridge_source_plays_queue_then_silence() {
        let (sink, source) = sample_bridge(4);
        sink.push(0.5);
        let mut bridge = BridgeSource {
            source,
            sample_rate: 44_100,
        };
        assert_eq!(bridge.next(), Some(0.5));
        assert_eq!(bridge.next(), Some(0.0));
        assert_eq!(bridge.channels(), 1);
        assert_eq!(bridge.total_duration(), None);
    }

    #[test]
    fn bridge_source_follows_device_layout() {
        let (sink, source) = sample_bridge(4);
        sink.push(0.25);
        sink.push(-0.5);
        let mut bridge = bridge_source(source, 48_000, 2);
        assert_eq!(bridge.sample_rate(), 48_000);
        assert_eq!(bridge.channels(), 2);
        let played: Vec<f32> = bridge.by_ref().take(6).collect();
        assert_eq!(played, vec![0.25, 0.25, -0.5, -0.5, 0.0, 0.0]);
    }
}
