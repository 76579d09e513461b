use nestor_core::logging::{log, LogCategory, LogLevel};
use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::{sram_read, sram_write, Board};
use crate::cartridge::{bank_offset, Cartridge, Mirroring};

const MMC1_PRG_BANK: usize = 0x4000;
const MMC1_CHR_BANK: usize = 0x1000;

/// MMC1 (Mapper 1/SxROM) - Switchable PRG and CHR banks with configurable mirroring
///
/// Registers are loaded one bit at a time through a 5-bit serial port; the
/// fifth write's address picks the destination register.
#[derive(Debug, Clone)]
pub struct Mmc1 {
    shift_reg: u8,
    control: u8,
    prg_bank: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_offsets: [usize; 2], // two 16KB windows at $8000 and $C000
    chr_offsets: [usize; 2], // two 4KB windows at $0000 and $1000
}

impl Mmc1 {
    pub fn new(cart: &Cartridge) -> Self {
        let mut m = Self {
            shift_reg: 0x10,
            control: 0x0C, // 16KB PRG switching at $8000, last bank fixed
            prg_bank: 0,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_offsets: [0, 0],
            chr_offsets: [0, 0],
        };
        // Header mirroring stays in effect until the game writes control.
        m.update_offsets(cart);
        m
    }

    fn load_register(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        if val & 0x80 != 0 {
            self.shift_reg = 0x10;
            self.write_control(cart, self.control | 0x0C);
            return;
        }
        // The marker bit reaching bit 0 means this is the fifth write.
        let complete = self.shift_reg & 1 == 1;
        self.shift_reg = (self.shift_reg >> 1) | ((val & 1) << 4);
        if complete {
            let data = self.shift_reg;
            match addr {
                0x8000..=0x9FFF => self.write_control(cart, data),
                0xA000..=0xBFFF => self.chr_bank0 = data,
                0xC000..=0xDFFF => self.chr_bank1 = data,
                _ => self.prg_bank = data & 0x0F,
            }
            self.shift_reg = 0x10;
            self.update_offsets(cart);
        }
    }

    fn write_control(&mut self, cart: &mut Cartridge, val: u8) {
        self.control = val;
        cart.mirroring = match val & 0x03 {
            0 => Mirroring::SingleScreenLower,
            1 => Mirroring::SingleScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        };
        self.update_offsets(cart);
    }

    fn update_offsets(&mut self, cart: &Cartridge) {
        let prg_len = cart.prg.len();
        let chr_len = cart.chr.len();
        let prg = |i: i32| bank_offset(prg_len, MMC1_PRG_BANK, i);
        let chr = |i: i32| bank_offset(chr_len, MMC1_CHR_BANK, i);
        let prg_bank = self.prg_bank as i32;

        self.prg_offsets = match (self.control >> 2) & 0x03 {
            // 32KB mode ignores the low bit
            0 | 1 => [prg(prg_bank & 0x0E), prg(prg_bank | 0x01)],
            2 => [0, prg(prg_bank)],
            _ => [prg(prg_bank), prg(-1)],
        };

        self.chr_offsets = if (self.control >> 4) & 1 == 0 {
            let bank = self.chr_bank0 as i32;
            [chr(bank & 0x1E), chr(bank | 0x01)]
        } else {
            [chr(self.chr_bank0 as i32), chr(self.chr_bank1 as i32)]
        };

        log(LogCategory::Mapper, LogLevel::Trace, || {
            format!(
                "MMC1 control={:02X} prg={:?} chr={:?}",
                self.control, self.prg_offsets, self.chr_offsets
            )
        });
    }

    fn chr_index(&self, addr: u16) -> usize {
        let window = (addr as usize / MMC1_CHR_BANK) & 1;
        self.chr_offsets[window] + addr as usize % MMC1_CHR_BANK
    }
}

impl Board for Mmc1 {
    fn read(&self, cart: &Cartridge, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => cart.read_chr(self.chr_index(addr)),
            0x8000..=0xFFFF => {
                let rel = (addr - 0x8000) as usize;
                let window = rel / MMC1_PRG_BANK;
                cart.read_prg(self.prg_offsets[window] + rel % MMC1_PRG_BANK)
            }
            _ => sram_read(cart, addr).unwrap_or(0),
        }
    }

    fn write(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => {
                let index = self.chr_index(addr);
                cart.write_chr(index, val);
            }
            0x8000..=0xFFFF => self.load_register(cart, addr, val),
            _ => {
                sram_write(cart, addr, val);
            }
        }
    }
}

impl Snapshot for Mmc1 {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u8(self.shift_reg);
        out.write_u8(self.control);
        out.write_u8(self.prg_bank);
        out.write_u8(self.chr_bank0);
        out.write_u8(self.chr_bank1);
        for offset in self.prg_offsets.iter().chain(self.chr_offsets.iter()) {
            out.write_u32(*offset as u32);
        }
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.shift_reg = input.read_u8()?;
        self.control = input.read_u8()?;
        self.prg_bank = input.read_u8()?;
        self.chr_bank0 = input.read_u8()?;
        self.chr_bank1 = input.read_u8()?;
        for offset in self.prg_offsets.iter_mut() {
            *offset = input.read_u32()? as usize;
        }
        for offset in self.chr_offsets.iter_mut() {
            *offset = input.read_u32()? as usize;
        }
        Ok(())
    }
}
