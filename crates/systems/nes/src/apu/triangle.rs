use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::units::LengthCounter;

const TRIANGLE_TABLE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11,
    12, 13, 14, 15,
];

/// Triangle channel (`$4008-$400B`). Clocked every CPU cycle, gated by both
/// the length counter and the linear counter.
#[derive(Debug, Clone, Default)]
pub struct Triangle {
    pub enabled: bool,
    pub length: LengthCounter,
    timer_period: u16,
    timer_value: u16,
    duty_value: u8,
    counter_period: u8,
    counter_value: u8,
    counter_reload: bool,
}

impl Triangle {
    pub fn write_control(&mut self, val: u8) {
        self.length.enabled = (val >> 7) & 1 == 0;
        self.counter_period = val & 0x7F;
    }

    pub fn write_timer_low(&mut self, val: u8) {
        self.timer_period = (self.timer_period & 0xFF00) | val as u16;
    }

    pub fn write_timer_high(&mut self, val: u8) {
        if self.enabled {
            self.length.load(val >> 3);
        }
        self.timer_period = (self.timer_period & 0x00FF) | ((val as u16 & 7) << 8);
        self.timer_value = self.timer_period;
        self.counter_reload = true;
    }

    pub fn step_timer(&mut self) {
        if self.timer_value == 0 {
            self.timer_value = self.timer_period;
            if self.length.active() && self.counter_value > 0 {
                self.duty_value = (self.duty_value + 1) % 32;
            }
        } else {
            self.timer_value -= 1;
        }
    }

    /// Linear counter, clocked on quarter frames.
    pub fn step_counter(&mut self) {
        if self.counter_reload {
            self.counter_value = self.counter_period;
        } else if self.counter_value > 0 {
            self.counter_value -= 1;
        }
        if self.length.enabled {
            self.counter_reload = false;
        }
    }

    pub fn output(&self) -> u8 {
        if !self.enabled || !self.length.active() || self.counter_value == 0 {
            return 0;
        }
        TRIANGLE_TABLE[self.duty_value as usize]
    }
}

impl Snapshot for Triangle {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_bool(self.enabled);
        self.length.snapshot(out);
        out.write_u16(self.timer_period);
        out.write_u16(self.timer_value);
        out.write_u8(self.duty_value);
        out.write_u8(self.counter_period);
        out.write_u8(self.counter_value);
        out.write_bool(self.counter_reload);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = input.read_bool()?;
        self.length.restore(input)?;
        self.timer_period = input.read_u16()?;
        self.timer_value = input.read_u16()?;
        self.duty_value = input.read_u8()? % 32;
        self.counter_period = input.read_u8()? & 0x7F;
        self.counter_value = input.read_u8()? & 0x7F;
        self.counter_reload = input.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_until_linear_counter_loads() {
        let mut t = Triangle {
            enabled: true,
            ..Default::default()
        };
        t.write_control(0x7F);
        t.write_timer_low(0x10);
        t.write_timer_high(0x08);
        assert_eq!(t.output(), 0);
        t.step_counter();
        assert_eq!(t.output(), 15);
    }

    #[test]
    fn sequencer_walks_down_the_ramp() {
        let mut t = Triangle {
            enabled: true,
            ..Default::default()
        };
        t.write_control(0xFF); // halt: linear counter keeps reloading
        t.write_timer_high(0x08);
        t.step_counter();
        // period 0: the sequencer advances on every clock
        t.step_timer();
        t.step_timer();
        assert_eq!(t.output(), 13);
    }
}
