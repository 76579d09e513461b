//! NES APU (Audio Processing Unit) implementation.
//!
//! Five channels clocked from the CPU clock:
//!
//! - **Pulse 1/2** ($4000-$4007): square waves with envelope and sweep
//! - **Triangle** ($4008-$400B): 32-step ramp gated by a linear counter
//! - **Noise** ($400C-$400F): LFSR noise with envelope
//! - **DMC** ($4010-$4013): 1-bit delta samples read from cartridge space
//!
//! `$4015` enables channels and reports their status, `$4017` selects the
//! 4-step or 5-step frame sequence. Channel outputs are combined with the
//! standard non-linear mixer lookup tables and, when an [`AudioOutput`] is
//! attached, decimated to the host sample rate and pushed into the sample
//! bridge.

mod dmc;
mod noise;
mod pulse;
mod triangle;
mod units;

pub use dmc::DMC_FETCH_STALL;

use nestor_core::audio::{AudioOutput, AudioPhase};
use nestor_core::logging::{log, LogCategory, LogLevel};
use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::{Snapshot, Subsystem};

use crate::cartridge::Cartridge;
use crate::console::CPU_FREQUENCY;
use crate::mappers::Mapper;

use dmc::Dmc;
use noise::Noise;
use pulse::Pulse;
use triangle::Triangle;

/// Quarter-frame rate of the frame sequencer, in CPU cycles.
const FRAME_COUNTER_RATE: f64 = CPU_FREQUENCY / 240.0;

/// What the DMC may read while the APU steps.
pub struct ApuBus<'a> {
    pub mapper: &'a Mapper,
    pub cart: &'a Cartridge,
}

/// Signals raised by one APU step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApuTick {
    /// CPU cycles lost to DMC sample fetches
    pub stall: u32,
    pub irq: bool,
}

struct MixTables {
    pulse: [f32; 31],
    tnd: [f32; 203],
}

impl MixTables {
    fn new() -> Self {
        let mut pulse = [0.0; 31];
        for (i, v) in pulse.iter_mut().enumerate().skip(1) {
            *v = 95.52 / (8128.0 / i as f32 + 100.0);
        }
        let mut tnd = [0.0; 203];
        for (i, v) in tnd.iter_mut().enumerate().skip(1) {
            *v = 163.67 / (24329.0 / i as f32 + 100.0);
        }
        Self { pulse, tnd }
    }
}

fn mix(tables: &MixTables, p1: u8, p2: u8, t: u8, n: u8, d: u8) -> f32 {
    let pulse = tables.pulse[(p1 + p2) as usize];
    let tnd = tables.tnd[3 * t as usize + 2 * n as usize + d as usize];
    pulse + tnd
}

/// NES APU
pub struct Apu {
    pulse1: Pulse,
    pulse2: Pulse,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,
    cycle: u64,
    frame_period: u8,
    frame_value: u8,
    frame_irq_enabled: bool,
    frame_irq_flag: bool,
    tables: MixTables,
    audio: Option<AudioOutput>,
    /// Output phase read from a save state while no output was attached,
    /// with the cycle it belongs to
    restored_phase: Option<(u64, AudioPhase)>,
}

impl std::fmt::Debug for Apu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Apu")
            .field("cycle", &self.cycle)
            .field("frame_period", &self.frame_period)
            .field("frame_value", &self.frame_value)
            .field("audio", &self.audio.is_some())
            .finish()
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu {
    pub fn new() -> Self {
        Self {
            pulse1: Pulse::new(1),
            pulse2: Pulse::new(2),
            triangle: Triangle::default(),
            noise: Noise::default(),
            dmc: Dmc::default(),
            cycle: 0,
            frame_period: 4,
            frame_value: 0,
            frame_irq_enabled: true,
            frame_irq_flag: false,
            tables: MixTables::new(),
            audio: None,
            restored_phase: None,
        }
    }

    /// Silence every channel, as a console reset does.
    pub fn reset(&mut self) {
        self.write_register(0x4015, 0);
        self.frame_irq_flag = false;
        self.dmc.clear_irq();
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Route samples into a sample bridge. Replaces any previous output.
    /// Attaching right after restoring a state that carried an output phase
    /// resumes that phase.
    pub fn attach_audio(&mut self, mut output: AudioOutput) {
        if let Some((cycle, phase)) = self.restored_phase.take() {
            if cycle == self.cycle {
                output.set_phase(&phase);
            }
        }
        log(LogCategory::APU, LogLevel::Info, || {
            format!(
                "audio attached at {} Hz ({:.2} steps per sample)",
                output.sample_rate(),
                output.steps_per_sample()
            )
        });
        self.audio = Some(output);
    }

    pub fn detach_audio(&mut self) -> Option<AudioOutput> {
        self.audio.take()
    }

    pub fn audio(&self) -> Option<&AudioOutput> {
        self.audio.as_ref()
    }

    /// Instantaneous mixer output in `0.0..=1.0`.
    pub fn output(&self) -> f32 {
        mix(
            &self.tables,
            self.pulse1.output(),
            self.pulse2.output(),
            self.triangle.output(),
            self.noise.output(),
            self.dmc.output(),
        )
    }

    /// `$4015` read. Clears the frame interrupt flag.
    pub fn read_status(&mut self) -> u8 {
        let mut result = 0;
        if self.pulse1.length.active() {
            result |= 0x01;
        }
        if self.pulse2.length.active() {
            result |= 0x02;
        }
        if self.triangle.length.active() {
            result |= 0x04;
        }
        if self.noise.length.active() {
            result |= 0x08;
        }
        if self.dmc.bytes_remaining() > 0 {
            result |= 0x10;
        }
        if self.frame_irq_flag {
            result |= 0x40;
        }
        if self.dmc.irq_flag() {
            result |= 0x80;
        }
        self.frame_irq_flag = false;
        result
    }

    /// Writes to `$4000-$4013`, `$4015` and `$4017`.
    pub fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0x4000 => self.pulse1.write_control(val),
            0x4001 => self.pulse1.write_sweep(val),
            0x4002 => self.pulse1.write_timer_low(val),
            0x4003 => self.pulse1.write_timer_high(val),
            0x4004 => self.pulse2.write_control(val),
            0x4005 => self.pulse2.write_sweep(val),
            0x4006 => self.pulse2.write_timer_low(val),
            0x4007 => self.pulse2.write_timer_high(val),
            0x4008 => self.triangle.write_control(val),
            0x400A => self.triangle.write_timer_low(val),
            0x400B => self.triangle.write_timer_high(val),
            0x400C => self.noise.write_control(val),
            0x400E => self.noise.write_period(val),
            0x400F => self.noise.write_length(val),
            0x4010 => self.dmc.write_control(val),
            0x4011 => self.dmc.write_value(val),
            0x4012 => self.dmc.write_address(val),
            0x4013 => self.dmc.write_length(val),
            0x4015 => self.write_control(val),
            0x4017 => self.write_frame_counter(val),
            _ => {}
        }
    }

    fn write_control(&mut self, val: u8) {
        self.pulse1.enabled = val & 0x01 != 0;
        self.pulse2.enabled = val & 0x02 != 0;
        self.triangle.enabled = val & 0x04 != 0;
        self.noise.enabled = val & 0x08 != 0;
        self.dmc.enabled = val & 0x10 != 0;
        if !self.pulse1.enabled {
            self.pulse1.length.value = 0;
        }
        if !self.pulse2.enabled {
            self.pulse2.length.value = 0;
        }
        if !self.triangle.enabled {
            self.triangle.length.value = 0;
        }
        if !self.noise.enabled {
            self.noise.length.value = 0;
        }
        if !self.dmc.enabled {
            self.dmc.stop();
        } else if self.dmc.bytes_remaining() == 0 {
            self.dmc.restart();
        }
        self.dmc.clear_irq();
    }

    fn write_frame_counter(&mut self, val: u8) {
        self.frame_period = 4 + ((val >> 7) & 1);
        self.frame_irq_enabled = (val >> 6) & 1 == 0;
        if !self.frame_irq_enabled {
            self.frame_irq_flag = false;
        }
        if self.frame_period == 5 {
            self.step_envelope();
            self.step_sweep();
            self.step_length();
        }
    }

    fn step_timer(&mut self, bus: &ApuBus<'_>) -> ApuTick {
        let mut tick = ApuTick::default();
        if self.cycle % 2 == 0 {
            self.pulse1.step_timer();
            self.pulse2.step_timer();
            self.noise.step_timer();
            let (stall, irq) = self.dmc.step_timer(|addr| bus.mapper.read(bus.cart, addr));
            tick.stall = stall;
            tick.irq = irq;
        }
        self.triangle.step_timer();
        tick
    }

    fn step_envelope(&mut self) {
        self.pulse1.step_envelope();
        self.pulse2.step_envelope();
        self.triangle.step_counter();
        self.noise.step_envelope();
    }

    fn step_sweep(&mut self) {
        self.pulse1.step_sweep();
        self.pulse2.step_sweep();
    }

    fn step_length(&mut self) {
        self.pulse1.length.clock();
        self.pulse2.length.clock();
        self.triangle.length.clock();
        self.noise.length.clock();
    }

    /// Returns `true` when the frame interrupt fires.
    fn step_frame_counter(&mut self) -> bool {
        match self.frame_period {
            4 => {
                self.frame_value = (self.frame_value + 1) % 4;
                match self.frame_value {
                    0 | 2 => self.step_envelope(),
                    1 => {
                        self.step_envelope();
                        self.step_sweep();
                        self.step_length();
                    }
                    _ => {
                        self.step_envelope();
                        self.step_sweep();
                        self.step_length();
                        if self.frame_irq_enabled {
                            self.frame_irq_flag = true;
                            log(LogCategory::Interrupts, LogLevel::Trace, || {
                                "APU frame IRQ".to_string()
                            });
                            return true;
                        }
                    }
                }
            }
            _ => {
                self.frame_value = (self.frame_value + 1) % 5;
                match self.frame_value {
                    0 | 2 => self.step_envelope(),
                    1 | 3 => {
                        self.step_envelope();
                        self.step_sweep();
                        self.step_length();
                    }
                    _ => {}
                }
            }
        }
        false
    }
}

impl Snapshot for Apu {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u64(self.cycle);
        out.write_u8(self.frame_period);
        out.write_u8(self.frame_value);
        out.write_bool(self.frame_irq_enabled);
        out.write_bool(self.frame_irq_flag);
        self.pulse1.snapshot(out);
        self.pulse2.snapshot(out);
        self.triangle.snapshot(out);
        self.noise.snapshot(out);
        self.dmc.snapshot(out);
        match &self.audio {
            Some(audio) => {
                out.write_bool(true);
                audio.phase().snapshot(out);
            }
            None => out.write_bool(false),
        }
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.cycle = input.read_u64()?;
        self.frame_period = input.read_u8()?;
        if !(4..=5).contains(&self.frame_period) {
            return Err(StateError::Invalid("apu frame period"));
        }
        self.frame_value = input.read_u8()? % self.frame_period;
        self.frame_irq_enabled = input.read_bool()?;
        self.frame_irq_flag = input.read_bool()?;
        self.pulse1.restore(input)?;
        self.pulse2.restore(input)?;
        self.triangle.restore(input)?;
        self.noise.restore(input)?;
        self.dmc.restore(input)?;
        self.restored_phase = None;
        if input.read_bool()? {
            let mut phase = AudioPhase::default();
            phase.restore(input)?;
            match self.audio.as_mut() {
                Some(audio) => audio.set_phase(&phase),
                None => self.restored_phase = Some((self.cycle, phase)),
            }
        }
        Ok(())
    }
}

impl Subsystem for Apu {
    type Bus<'a> = ApuBus<'a>;
    type Output = ApuTick;

    /// One CPU cycle of APU time.
    fn step(&mut self, bus: ApuBus<'_>) -> ApuTick {
        let cycle1 = self.cycle;
        self.cycle += 1;
        let cycle2 = self.cycle;

        let mut tick = self.step_timer(&bus);

        let f1 = (cycle1 as f64 / FRAME_COUNTER_RATE) as u64;
        let f2 = (cycle2 as f64 / FRAME_COUNTER_RATE) as u64;
        if f1 != f2 && self.step_frame_counter() {
            tick.irq = true;
        }

        if let Some(audio) = self.audio.as_mut() {
            let (p1, p2, t, n, d) = (
                &self.pulse1,
                &self.pulse2,
                &self.triangle,
                &self.noise,
                &self.dmc,
            );
            let tables = &self.tables;
            audio.tick(|| {
                mix(tables, p1.output(), p2.output(), t.output(), n.output(), d.output())
            });
        }
        tick
    }
}
