//! Delta modulation channel (`$4010-$4013`).
//!
//! Sample bytes are fetched from CPU space (`$C000-$FFFF`, wrapping to
//! `$8000`) through the mapper; every fetch stalls the CPU for four cycles.

use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

/// NTSC rate table, in CPU cycles per output bit divided by two.
const DMC_TABLE: [u8; 16] = [
    214, 190, 170, 160, 143, 127, 113, 107, 95, 80, 71, 64, 53, 42, 36, 27,
];

pub const DMC_FETCH_STALL: u32 = 4;

#[derive(Debug, Clone, Default)]
pub struct Dmc {
    pub enabled: bool,
    value: u8,
    sample_address: u16,
    sample_length: u16,
    current_address: u16,
    current_length: u16,
    shift_register: u8,
    bit_count: u8,
    tick_period: u8,
    tick_value: u8,
    looping: bool,
    irq_enabled: bool,
    irq_flag: bool,
}

impl Dmc {
    pub fn write_control(&mut self, val: u8) {
        self.irq_enabled = val & 0x80 == 0x80;
        if !self.irq_enabled {
            self.irq_flag = false;
        }
        self.looping = val & 0x40 == 0x40;
        self.tick_period = DMC_TABLE[(val & 0x0F) as usize];
    }

    pub fn write_value(&mut self, val: u8) {
        self.value = val & 0x7F;
    }

    pub fn write_address(&mut self, val: u8) {
        self.sample_address = 0xC000 | ((val as u16) << 6);
    }

    pub fn write_length(&mut self, val: u8) {
        self.sample_length = ((val as u16) << 4) | 1;
    }

    pub fn restart(&mut self) {
        self.current_address = self.sample_address;
        self.current_length = self.sample_length;
    }

    pub fn bytes_remaining(&self) -> u16 {
        self.current_length
    }

    pub fn stop(&mut self) {
        self.current_length = 0;
    }

    pub fn irq_flag(&self) -> bool {
        self.irq_flag
    }

    pub fn clear_irq(&mut self) {
        self.irq_flag = false;
    }

    /// Clocked every other CPU cycle. `fetch` reads one byte of CPU space.
    /// Returns the CPU stall incurred and whether the sample-end IRQ fired.
    pub fn step_timer<F: FnMut(u16) -> u8>(&mut self, fetch: F) -> (u32, bool) {
        if !self.enabled {
            return (0, false);
        }
        let result = self.step_reader(fetch);
        if self.tick_value == 0 {
            self.tick_value = self.tick_period;
            self.step_shifter();
        } else {
            self.tick_value -= 1;
        }
        result
    }

    fn step_reader<F: FnMut(u16) -> u8>(&mut self, mut fetch: F) -> (u32, bool) {
        if self.current_length == 0 || self.bit_count != 0 {
            return (0, false);
        }
        self.shift_register = fetch(self.current_address);
        self.bit_count = 8;
        self.current_address = self.current_address.wrapping_add(1);
        if self.current_address == 0 {
            self.current_address = 0x8000;
        }
        self.current_length -= 1;
        let mut irq = false;
        if self.current_length == 0 {
            if self.looping {
                self.restart();
            } else if self.irq_enabled {
                self.irq_flag = true;
                irq = true;
            }
        }
        (DMC_FETCH_STALL, irq)
    }

    fn step_shifter(&mut self) {
        if self.bit_count == 0 {
            return;
        }
        if self.shift_register & 1 == 1 {
            if self.value <= 125 {
                self.value += 2;
            }
        } else if self.value >= 2 {
            self.value -= 2;
        }
        self.shift_register >>= 1;
        self.bit_count -= 1;
    }

    pub fn output(&self) -> u8 {
        self.value
    }
}

impl Snapshot for Dmc {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_bool(self.enabled);
        out.write_u8(self.value);
        out.write_u16(self.sample_address);
        out.write_u16(self.sample_length);
        out.write_u16(self.current_address);
        out.write_u16(self.current_length);
        out.write_u8(self.shift_register);
        out.write_u8(self.bit_count);
        out.write_u8(self.tick_period);
        out.write_u8(self.tick_value);
        out.write_bool(self.looping);
        out.write_bool(self.irq_enabled);
        out.write_bool(self.irq_flag);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = input.read_bool()?;
        self.value = input.read_u8()? & 0x7F;
        self.sample_address = input.read_u16()?;
        self.sample_length = input.read_u16()?;
        self.current_address = input.read_u16()?;
        self.current_length = input.read_u16()?;
        self.shift_register = input.read_u8()?;
        self.bit_count = input.read_u8()?;
        if self.bit_count > 8 {
            return Err(StateError::Invalid("dmc bit count"));
        }
        self.tick_period = input.read_u8()?;
        self.tick_value = input.read_u8()?;
        self.looping = input.read_bool()?;
        self.irq_enabled = input.read_bool()?;
        self.irq_flag = input.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_sample_fetches_then_raises_irq() {
        let mut dmc = Dmc::default();
        dmc.enabled = true;
        dmc.write_control(0x80);
        dmc.write_address(0x00);
        dmc.write_length(0x00); // 1 byte
        dmc.restart();

        let mut fetched = Vec::new();
        let (stall, irq) = dmc.step_timer(|addr| {
            fetched.push(addr);
            0xFF
        });
        assert_eq!(fetched, vec![0xC000]);
        assert_eq!(stall, DMC_FETCH_STALL);
        assert!(irq);
        assert!(dmc.irq_flag());
        assert_eq!(dmc.bytes_remaining(), 0);

        let (stall, irq) = dmc.step_timer(|_| unreachable!());
        assert_eq!((stall, irq), (0, false));
    }

    #[test]
    fn looping_sample_restarts() {
        let mut dmc = Dmc::default();
        dmc.enabled = true;
        dmc.write_control(0xC0);
        dmc.write_length(0x00);
        dmc.restart();
        let (_, irq) = dmc.step_timer(|_| 0);
        assert!(!irq);
        assert_eq!(dmc.bytes_remaining(), 1);
    }

    #[test]
    fn ones_raise_the_output_level() {
        let mut dmc = Dmc::default();
        dmc.enabled = true;
        dmc.write_control(0x0F);
        dmc.write_value(0x40);
        dmc.write_length(0x00);
        dmc.restart();
        dmc.step_timer(|_| 0xFF);
        assert_eq!(dmc.output(), 0x42);
    }

    #[test]
    fn disabling_irq_clears_flag() {
        let mut dmc = Dmc::default();
        dmc.irq_flag = true;
        dmc.write_control(0x00);
        assert!(!dmc.irq_flag());
    }
}
