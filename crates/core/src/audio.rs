//! Audio hand-off between the emulation thread and a host audio device.
//!
//! The emulator produces one sample every `clock_hz / sample_rate` ticks of
//! its audio clock; the host device pulls samples whenever its callback
//! runs. The two sides meet in a bounded channel: the producer never blocks
//! (a full queue drops the newest sample) and the consumer never blocks (an
//! empty queue plays silence).

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use crate::logging::{log, LogCategory, LogLevel};
use crate::state::{StateError, StateReader, StateWriter};
use crate::Snapshot;

/// Default queue depth: one second of audio at 44.1 kHz.
pub const DEFAULT_QUEUE_CAPACITY: usize = 44_100;

/// Create a connected producer/consumer pair holding at most `capacity` samples.
pub fn sample_bridge(capacity: usize) -> (SampleSink, SampleSource) {
    let (tx, rx) = sync_channel::<f32>(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        SampleSink {
            tx,
            dropped: Arc::clone(&dropped),
        },
        SampleSource {
            rx,
            channels: 1,
            channel_index: 0,
            current: 0.0,
            dropped,
        },
    )
}

/// Producer end, owned by the emulation side.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: SyncSender<f32>,
    dropped: Arc<AtomicU64>,
}

impl SampleSink {
    /// Enqueue a sample without blocking. Returns `false` when the queue is
    /// full (or the consumer is gone) and the sample was discarded.
    pub fn push(&self, sample: f32) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Samples discarded so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer end, driven by the host audio callback.
///
/// Each output frame consumes one queued sample, repeated across all
/// channels of the frame.
#[derive(Debug)]
pub struct SampleSource {
    rx: Receiver<f32>,
    channels: u16,
    channel_index: u16,
    current: f32,
    dropped: Arc<AtomicU64>,
}

impl SampleSource {
    /// Number of interleaved output channels per frame.
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels.max(1);
        self.channel_index = 0;
        self
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Next interleaved output value; silence when the queue is empty.
    pub fn next_sample(&mut self) -> f32 {
        if self.channel_index == 0 {
            self.current = self.rx.try_recv().unwrap_or(0.0);
        }
        self.channel_index = (self.channel_index + 1) % self.channels;
        self.current
    }

    /// Fill an interleaved output buffer.
    pub fn fill(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample();
        }
    }

    /// Discard everything currently queued.
    pub fn flush(&mut self) -> usize {
        let mut n = 0;
        while self.rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    /// Samples the producer has dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Iterator for SampleSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(self.next_sample())
    }
}

/// First-order IIR section: `y = b0*x + b1*x[n-1] - a1*y[n-1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstOrderFilter {
    b0: f32,
    b1: f32,
    a1: f32,
    prev_x: f32,
    prev_y: f32,
}

impl FirstOrderFilter {
    pub fn low_pass(sample_rate: f32, cutoff: f32) -> Self {
        let c = sample_rate / PI / cutoff;
        let a0i = 1.0 / (1.0 + c);
        Self {
            b0: a0i,
            b1: a0i,
            a1: (1.0 - c) * a0i,
            prev_x: 0.0,
            prev_y: 0.0,
        }
    }

    pub fn high_pass(sample_rate: f32, cutoff: f32) -> Self {
        let c = sample_rate / PI / cutoff;
        let a0i = 1.0 / (1.0 + c);
        Self {
            b0: c * a0i,
            b1: -c * a0i,
            a1: (1.0 - c) * a0i,
            prev_x: 0.0,
            prev_y: 0.0,
        }
    }

    /// Previous input and output.
    pub fn history(&self) -> (f32, f32) {
        (self.prev_x, self.prev_y)
    }

    pub fn set_history(&mut self, (prev_x, prev_y): (f32, f32)) {
        self.prev_x = prev_x;
        self.prev_y = prev_y;
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.prev_x - self.a1 * self.prev_y;
        self.prev_x = x;
        self.prev_y = y;
        y
    }
}

/// Filters applied in order.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<FirstOrderFilter>,
}

impl FilterChain {
    pub fn new(filters: Vec<FirstOrderFilter>) -> Self {
        Self { filters }
    }

    /// The console output stage: high-pass 90 Hz, high-pass 440 Hz, low-pass 14 kHz.
    pub fn console_output(sample_rate: f32) -> Self {
        Self::new(vec![
            FirstOrderFilter::high_pass(sample_rate, 90.0),
            FirstOrderFilter::high_pass(sample_rate, 440.0),
            FirstOrderFilter::low_pass(sample_rate, 14_000.0),
        ])
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        self.filters.iter_mut().fold(sample, |s, f| f.process(s))
    }

    pub fn history(&self) -> Vec<(f32, f32)> {
        self.filters.iter().map(FirstOrderFilter::history).collect()
    }

    /// Stages beyond the shorter of the two lists are left untouched.
    pub fn set_history(&mut self, history: &[(f32, f32)]) {
        for (filter, &h) in self.filters.iter_mut().zip(history) {
            filter.set_history(h);
        }
    }
}

/// Where an [`AudioOutput`] stands between two samples: the tick
/// accumulator and the memory of each filter stage. Carrying it through a
/// save state lets a restored machine emit the exact same samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioPhase {
    pub accumulator: f64,
    pub history: Vec<(f32, f32)>,
}

impl Snapshot for AudioPhase {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_f64(self.accumulator);
        out.write_u8(self.history.len() as u8);
        for &(x, y) in &self.history {
            out.write_u32(x.to_bits());
            out.write_u32(y.to_bits());
        }
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        let accumulator = input.read_f64()?;
        if !accumulator.is_finite() || accumulator < 0.0 {
            return Err(StateError::Invalid("audio accumulator"));
        }
        self.accumulator = accumulator;
        let stages = input.read_u8()?;
        self.history.clear();
        for _ in 0..stages {
            let x = f32::from_bits(input.read_u32()?);
            let y = f32::from_bits(input.read_u32()?);
            self.history.push((x, y));
        }
        Ok(())
    }
}

/// Decimates a fast audio clock down to the host sample rate and feeds the
/// bridge.
#[derive(Debug)]
pub struct AudioOutput {
    sink: SampleSink,
    sample_rate: u32,
    steps_per_sample: f64,
    accumulator: f64,
    filters: FilterChain,
}

impl AudioOutput {
    /// `clock_hz` is the rate at which [`AudioOutput::tick`] will be called.
    /// Returns `None` for a zero sample rate.
    pub fn new(sink: SampleSink, clock_hz: f64, sample_rate: u32) -> Option<Self> {
        Self::with_filters(
            sink,
            clock_hz,
            sample_rate,
            FilterChain::console_output(sample_rate as f32),
        )
    }

    pub fn with_filters(
        sink: SampleSink,
        clock_hz: f64,
        sample_rate: u32,
        filters: FilterChain,
    ) -> Option<Self> {
        if sample_rate == 0 || clock_hz <= 0.0 {
            log(LogCategory::APU, LogLevel::Warn, || {
                format!("refusing audio output at {} Hz", sample_rate)
            });
            return None;
        }
        Some(Self {
            sink,
            sample_rate,
            steps_per_sample: clock_hz / sample_rate as f64,
            accumulator: 0.0,
            filters,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn steps_per_sample(&self) -> f64 {
        self.steps_per_sample
    }

    pub fn sink(&self) -> &SampleSink {
        &self.sink
    }

    pub fn phase(&self) -> AudioPhase {
        AudioPhase {
            accumulator: self.accumulator,
            history: self.filters.history(),
        }
    }

    pub fn set_phase(&mut self, phase: &AudioPhase) {
        self.accumulator = phase.accumulator;
        self.filters.set_history(&phase.history);
    }

    /// Advance one clock tick. `sample` is only evaluated on ticks that emit.
    /// Returns `true` when a sample was produced (whether or not the queue
    /// accepted it).
    pub fn tick<F: FnOnce() -> f32>(&mut self, sample: F) -> bool {
        self.accumulator += 1.0;
        if self.accumulator < self.steps_per_sample {
            return false;
        }
        self.accumulator -= self.steps_per_sample;
        let filtered = self.filters.process(sample());
        self.sink.push(filtered);
        true
    }
}
