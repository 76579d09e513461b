use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::units::{Envelope, LengthCounter};

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

/// Square wave channel (`$4000-$4007`).
#[derive(Debug, Clone)]
pub struct Pulse {
    /// 1 or 2; pulse 1 negates its sweep with one's complement.
    channel: u8,
    pub enabled: bool,
    pub length: LengthCounter,
    envelope: Envelope,
    timer_period: u16,
    timer_value: u16,
    duty_mode: u8,
    duty_value: u8,
    sweep_reload: bool,
    sweep_enabled: bool,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_period: u8,
    sweep_value: u8,
}

impl Pulse {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            enabled: false,
            length: LengthCounter::default(),
            envelope: Envelope::default(),
            timer_period: 0,
            timer_value: 0,
            duty_mode: 0,
            duty_value: 0,
            sweep_reload: false,
            sweep_enabled: false,
            sweep_negate: false,
            sweep_shift: 0,
            sweep_period: 0,
            sweep_value: 0,
        }
    }

    pub fn write_control(&mut self, val: u8) {
        self.duty_mode = (val >> 6) & 3;
        self.length.enabled = (val >> 5) & 1 == 0;
        self.envelope.write_control(val);
    }

    pub fn write_sweep(&mut self, val: u8) {
        self.sweep_enabled = (val >> 7) & 1 == 1;
        self.sweep_period = ((val >> 4) & 7) + 1;
        self.sweep_negate = (val >> 3) & 1 == 1;
        self.sweep_shift = val & 7;
        self.sweep_reload = true;
    }

    pub fn write_timer_low(&mut self, val: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | val as u16;
    }

    pub fn write_timer_high(&mut self, val: u8) {
        if self.enabled {
            self.length.load(val >> 3);
        }
        self.timer_period = (self.timer_period & 0x00FF) | ((val as u16 & 7) << 8);
        self.envelope.restart();
        self.duty_value = 0;
    }

    pub fn step_timer(&mut self) {
        if self.timer_value == 0 {
            self.timer_value = self.timer_period;
            self.duty_value = (self.duty_value + 1) % 8;
        } else {
            self.timer_value -= 1;
        }
    }

    pub fn step_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn step_sweep(&mut self) {
        if self.sweep_reload {
            if self.sweep_enabled && self.sweep_value == 0 {
                self.sweep();
            }
            self.sweep_value = self.sweep_period;
            self.sweep_reload = false;
        } else if self.sweep_value > 0 {
            self.sweep_value -= 1;
        } else {
            if self.sweep_enabled {
                self.sweep();
            }
            self.sweep_value = self.sweep_period;
        }
    }

    fn sweep(&mut self) {
        let delta = self.timer_period >> self.sweep_shift;
        if self.sweep_negate {
            self.timer_period = self.timer_period.wrapping_sub(delta);
            if self.channel == 1 {
                self.timer_period = self.timer_period.wrapping_sub(1);
            }
        } else {
            self.timer_period = self.timer_period.wrapping_add(delta);
        }
    }

    pub fn output(&self) -> u8 {
        if !self.enabled || !self.length.active() {
            return 0;
        }
        if DUTY_TABLE[self.duty_mode as usize][self.duty_value as usize] == 0 {
            return 0;
        }
        if self.timer_period < 8 || self.timer_period > 0x7FF {
            return 0;
        }
        self.envelope.output()
    }
}

impl Snapshot for Pulse {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_bool(self.enabled);
        self.length.snapshot(out);
        self.envelope.snapshot(out);
        out.write_u16(self.timer_period);
        out.write_u16(self.timer_value);
        out.write_u8(self.duty_mode);
        out.write_u8(self.duty_value);
        out.write_bool(self.sweep_reload);
        out.write_bool(self.sweep_enabled);
        out.write_bool(self.sweep_negate);
        out.write_u8(self.sweep_shift);
        out.write_u8(self.sweep_period);
        out.write_u8(self.sweep_value);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = input.read_bool()?;
        self.length.restore(input)?;
        self.envelope.restore(input)?;
        self.timer_period = input.read_u16()?;
        self.timer_value = input.read_u16()?;
        self.duty_mode = input.read_u8()? & 3;
        self.duty_value = input.read_u8()? & 7;
        self.sweep_reload = input.read_bool()?;
        self.sweep_enabled = input.read_bool()?;
        self.sweep_negate = input.read_bool()?;
        self.sweep_shift = input.read_u8()? & 7;
        self.sweep_period = input.read_u8()?;
        self.sweep_value = input.read_u8()?;
        Ok(())
    }
}
