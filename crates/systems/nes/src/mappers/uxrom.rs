use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::{sram_read, sram_write, Board};
use crate::cartridge::{bank_offset, Cartridge, PRG_BANK_SIZE};

/// UxROM (Mapper 2) - Switchable 16KB PRG bank at $8000, last bank fixed at $C000
#[derive(Debug, Clone)]
pub struct Uxrom {
    bank: u8,
    last_bank: usize,
}

impl Uxrom {
    pub fn new(cart: &Cartridge) -> Self {
        Self {
            bank: 0,
            last_bank: bank_offset(cart.prg.len(), PRG_BANK_SIZE, -1),
        }
    }
}

impl Board for Uxrom {
    fn read(&self, cart: &Cartridge, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => cart.read_chr(addr as usize),
            0x8000..=0xBFFF => {
                let base = bank_offset(cart.prg.len(), PRG_BANK_SIZE, self.bank as i32);
                cart.read_prg(base + (addr - 0x8000) as usize)
            }
            0xC000..=0xFFFF => cart.read_prg(self.last_bank + (addr - 0xC000) as usize),
            _ => sram_read(cart, addr).unwrap_or(0),
        }
    }

    fn write(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => cart.write_chr(addr as usize, val),
            0x8000..=0xFFFF => self.bank = val,
            _ => {
                sram_write(cart, addr, val);
            }
        }
    }
}

impl Snapshot for Uxrom {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u8(self.bank);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.bank = input.read_u8()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Mirroring;

    fn cart() -> Cartridge {
        // 4 banks, each filled with its index
        let prg: Vec<u8> = (0..4u8).flat_map(|b| vec![b; PRG_BANK_SIZE]).collect();
        Cartridge::from_parts(prg, Vec::new(), 2, Mirroring::Vertical)
    }

    #[test]
    fn uxrom_switches_low_bank_and_fixes_last() {
        let mut cart = cart();
        let mut m = Uxrom::new(&cart);
        assert_eq!(m.read(&cart, 0x8000), 0);
        assert_eq!(m.read(&cart, 0xC000), 3);
        m.write(&mut cart, 0x8000, 2);
        assert_eq!(m.read(&cart, 0x8000), 2);
        assert_eq!(m.read(&cart, 0xFFFF), 3);
        // bank numbers wrap to the ROM size
        m.write(&mut cart, 0xFFFF, 5);
        assert_eq!(m.read(&cart, 0xBFFF), 1);
    }

    #[test]
    fn uxrom_chr_ram_is_writable() {
        let mut cart = cart();
        let mut m = Uxrom::new(&cart);
        m.write(&mut cart, 0x0100, 0x3C);
        assert_eq!(m.read(&cart, 0x0100), 0x3C);
    }
}
