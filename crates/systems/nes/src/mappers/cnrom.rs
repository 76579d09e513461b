use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::{sram_read, sram_write, Board};
use crate::cartridge::{bank_offset, Cartridge, CHR_BANK_SIZE};

/// CNROM (Mapper 3) - Simple CHR bank switching
///
/// The entire CHR address space ($0000-$1FFF) is swapped at once.
/// PRG-ROM uses NROM-style addressing (16KB or 32KB, mirrored as needed).
#[derive(Debug, Clone, Default)]
pub struct Cnrom {
    chr_bank: u8,
}

impl Cnrom {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Board for Cnrom {
    fn read(&self, cart: &Cartridge, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => {
                let base = bank_offset(cart.chr.len(), CHR_BANK_SIZE, self.chr_bank as i32);
                cart.read_chr(base + addr as usize)
            }
            0x8000..=0xFFFF => cart.read_prg((addr - 0x8000) as usize),
            _ => sram_read(cart, addr).unwrap_or(0),
        }
    }

    fn write(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => {
                let base = bank_offset(cart.chr.len(), CHR_BANK_SIZE, self.chr_bank as i32);
                cart.write_chr(base + addr as usize, val);
            }
            0x8000..=0xFFFF => self.chr_bank = val & 0x03,
            _ => {
                sram_write(cart, addr, val);
            }
        }
    }
}

impl Snapshot for Cnrom {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u8(self.chr_bank);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.chr_bank = input.read_u8()? & 0x03;
        Ok(())
    }
}
