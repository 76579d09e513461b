//! Envelope and length counter shared by the tone channels.

use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

/// Length counter load values, indexed by the top five bits of the
/// `$4003/$4007/$400B/$400F` write.
pub const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

/// Note duration counter, clocked on half frames.
#[derive(Debug, Clone, Default)]
pub struct LengthCounter {
    /// Cleared by the halt bit of the channel's control register
    pub enabled: bool,
    pub value: u8,
}

impl LengthCounter {
    pub fn load(&mut self, index: u8) {
        self.value = LENGTH_TABLE[(index & 0x1F) as usize];
    }

    pub fn clock(&mut self) {
        if self.enabled && self.value > 0 {
            self.value -= 1;
        }
    }

    pub fn active(&self) -> bool {
        self.value > 0
    }
}

impl Snapshot for LengthCounter {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_bool(self.enabled);
        out.write_u8(self.value);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = input.read_bool()?;
        self.value = input.read_u8()?;
        Ok(())
    }
}

/// Volume envelope: either a constant volume or a 15-to-0 decay, clocked on
/// quarter frames.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub enabled: bool,
    pub looping: bool,
    start: bool,
    period: u8,
    divider: u8,
    volume: u8,
    constant_volume: u8,
}

impl Envelope {
    /// Low six bits of `$4000/$4004/$400C`.
    pub fn write_control(&mut self, val: u8) {
        self.looping = (val >> 5) & 1 == 1;
        self.enabled = (val >> 4) & 1 == 0;
        self.period = val & 0x0F;
        self.constant_volume = val & 0x0F;
        self.start = true;
    }

    pub fn restart(&mut self) {
        self.start = true;
    }

    pub fn clock(&mut self) {
        if self.start {
            self.volume = 15;
            self.divider = self.period;
            self.start = false;
        } else if self.divider > 0 {
            self.divider -= 1;
        } else {
            if self.volume > 0 {
                self.volume -= 1;
            } else if self.looping {
                self.volume = 15;
            }
            self.divider = self.period;
        }
    }

    pub fn output(&self) -> u8 {
        if self.enabled {
            self.volume
        } else {
            self.constant_volume
        }
    }
}

impl Snapshot for Envelope {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_bool(self.enabled);
        out.write_bool(self.looping);
        out.write_bool(self.start);
        out.write_u8(self.period);
        out.write_u8(self.divider);
        out.write_u8(self.volume);
        out.write_u8(self.constant_volume);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = input.read_bool()?;
        self.looping = input.read_bool()?;
        self.start = input.read_bool()?;
        self.period = input.read_u8()? & 0x0F;
        self.divider = input.read_u8()? & 0x0F;
        self.volume = input.read_u8()? & 0x0F;
        self.constant_volume = input.read_u8()? & 0x0F;
        Ok(())
    }
}
