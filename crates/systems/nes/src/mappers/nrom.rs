use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::{sram_read, sram_write, Board};
use crate::cartridge::Cartridge;

/// NROM (Mapper 0) - No banking
///
/// 16 KiB images are mirrored into `$C000`; CHR is a flat 8 KiB.
#[derive(Debug, Clone, Default)]
pub struct Nrom;

impl Nrom {
    pub fn new() -> Self {
        Self
    }
}

impl Board for Nrom {
    fn read(&self, cart: &Cartridge, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => cart.read_chr(addr as usize),
            0x8000..=0xFFFF => cart.read_prg((addr - 0x8000) as usize),
            _ => sram_read(cart, addr).unwrap_or(0),
        }
    }

    fn write(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        if addr < 0x2000 {
            cart.write_chr(addr as usize, val);
        } else {
            sram_write(cart, addr, val);
        }
    }
}

impl Snapshot for Nrom {
    fn snapshot(&self, _out: &mut StateWriter) {}

    fn restore(&mut self, _input: &mut StateReader<'_>) -> Result<(), StateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Mirroring;

    #[test]
    fn nrom_mirrors_16k_prg() {
        let mut prg = vec![0u8; 0x4000];
        prg[0] = 0xAA;
        prg[0x3FFF] = 0xBB;
        let cart = Cartridge::from_parts(prg, vec![0; 0x2000], 0, Mirroring::Horizontal);
        let n = Nrom::new();
        assert_eq!(n.read(&cart, 0x8000), 0xAA);
        assert_eq!(n.read(&cart, 0xC000), 0xAA);
        assert_eq!(n.read(&cart, 0xFFFF), 0xBB);
    }

    #[test]
    fn nrom_32k_is_linear() {
        let mut prg = vec![0u8; 0x8000];
        prg[0x4000] = 0x77;
        let cart = Cartridge::from_parts(prg, vec![0; 0x2000], 0, Mirroring::Horizontal);
        assert_eq!(Nrom::new().read(&cart, 0xC000), 0x77);
    }

    #[test]
    fn sram_window_is_read_write() {
        let mut cart = Cartridge::from_parts(vec![0; 0x4000], vec![0; 0x2000], 0, Mirroring::Horizontal);
        let mut n = Nrom::new();
        n.write(&mut cart, 0x6123, 0x5C);
        assert_eq!(n.read(&cart, 0x6123), 0x5C);
        assert_eq!(cart.sram[0x123], 0x5C);
    }
}
