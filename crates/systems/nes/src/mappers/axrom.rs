use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::{sram_read, sram_write, Board};
use crate::cartridge::{bank_offset, Cartridge, Mirroring};

const AXROM_BANK_SIZE: usize = 0x8000;

/// AxROM (Mapper 7) - 32KB PRG switching with one-screen mirroring
#[derive(Debug, Clone, Default)]
pub struct Axrom {
    bank: u8,
}

impl Axrom {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Board for Axrom {
    fn read(&self, cart: &Cartridge, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => cart.read_chr(addr as usize),
            0x8000..=0xFFFF => {
                let base = bank_offset(cart.prg.len(), AXROM_BANK_SIZE, self.bank as i32);
                cart.read_prg(base + (addr - 0x8000) as usize)
            }
            _ => sram_read(cart, addr).unwrap_or(0),
        }
    }

    fn write(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => cart.write_chr(addr as usize, val),
            0x8000..=0xFFFF => {
                self.bank = val & 0x07;
                cart.mirroring = if val & 0x10 != 0 {
                    Mirroring::SingleScreenUpper
                } else {
                    Mirroring::SingleScreenLower
                };
            }
            _ => {
                sram_write(cart, addr, val);
            }
        }
    }
}

impl Snapshot for Axrom {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u8(self.bank);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.bank = input.read_u8()? & 0x07;
        Ok(())
    }
}
