use nestor_core::logging::{log, LogCategory, LogLevel};
use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;

use super::{sram_read, sram_write, Board};
use crate::cartridge::{bank_offset, Cartridge, Mirroring};
use crate::ppu::Ppu;

const MMC3_PRG_BANK: usize = 0x2000;
const MMC3_CHR_BANK: usize = 0x0400;

/// PPU dot at which the scanline counter is clocked.
const IRQ_CLOCK_DOT: u16 = 280;

/// MMC3 (Mapper 4/TxROM) - 8KB PRG / 1KB CHR banking with a scanline IRQ counter
#[derive(Debug, Clone)]
pub struct Mmc3 {
    register: u8,
    registers: [u8; 8],
    prg_mode: u8,
    chr_mode: u8,
    prg_offsets: [usize; 4],
    chr_offsets: [usize; 8],
    reload: u8,
    counter: u8,
    irq_enable: bool,
}

impl Mmc3 {
    pub fn new(cart: &Cartridge) -> Self {
        let prg = |i: i32| bank_offset(cart.prg.len(), MMC3_PRG_BANK, i);
        Self {
            register: 0,
            registers: [0; 8],
            prg_mode: 0,
            chr_mode: 0,
            prg_offsets: [prg(0), prg(1), prg(-2), prg(-1)],
            chr_offsets: [0; 8],
            reload: 0,
            counter: 0,
            irq_enable: false,
        }
    }

    /// Clock the scanline counter. Returns `true` when the IRQ fires.
    fn clock_scanline(&mut self) -> bool {
        if self.counter == 0 {
            self.counter = self.reload;
            false
        } else {
            self.counter -= 1;
            self.counter == 0 && self.irq_enable
        }
    }

    fn write_register(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        let even = addr % 2 == 0;
        match (addr, even) {
            (0x8000..=0x9FFF, true) => {
                self.prg_mode = (val >> 6) & 1;
                self.chr_mode = (val >> 7) & 1;
                self.register = val & 0x07;
                self.update_offsets(cart);
            }
            (0x8000..=0x9FFF, false) => {
                self.registers[self.register as usize] = val;
                self.update_offsets(cart);
            }
            (0xA000..=0xBFFF, true) => {
                cart.mirroring = if val & 1 == 0 {
                    Mirroring::Vertical
                } else {
                    Mirroring::Horizontal
                };
            }
            // PRG RAM protect is not modelled
            (0xA000..=0xBFFF, false) => {}
            (0xC000..=0xDFFF, true) => self.reload = val,
            (0xC000..=0xDFFF, false) => self.counter = 0,
            (_, true) => self.irq_enable = false,
            (_, false) => self.irq_enable = true,
        }
    }

    fn update_offsets(&mut self, cart: &Cartridge) {
        let prg_len = cart.prg.len();
        let chr_len = cart.chr.len();
        let prg = |i: i32| bank_offset(prg_len, MMC3_PRG_BANK, i);
        let chr = |i: i32| bank_offset(chr_len, MMC3_CHR_BANK, i);
        let r = self.registers.map(|v| v as i32);

        self.prg_offsets = if self.prg_mode == 0 {
            [prg(r[6]), prg(r[7]), prg(-2), prg(-1)]
        } else {
            [prg(-2), prg(r[7]), prg(r[6]), prg(-1)]
        };

        let two_k = [chr(r[0] & 0xFE), chr(r[0] | 0x01), chr(r[1] & 0xFE), chr(r[1] | 0x01)];
        let one_k = [chr(r[2]), chr(r[3]), chr(r[4]), chr(r[5])];
        let (low, high) = if self.chr_mode == 0 {
            (two_k, one_k)
        } else {
            (one_k, two_k)
        };
        self.chr_offsets[..4].copy_from_slice(&low);
        self.chr_offsets[4..].copy_from_slice(&high);
    }

    fn chr_index(&self, addr: u16) -> usize {
        let window = (addr as usize / MMC3_CHR_BANK) & 7;
        self.chr_offsets[window] + addr as usize % MMC3_CHR_BANK
    }
}

impl Board for Mmc3 {
    fn read(&self, cart: &Cartridge, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => cart.read_chr(self.chr_index(addr)),
            0x8000..=0xFFFF => {
                let rel = (addr - 0x8000) as usize;
                cart.read_prg(self.prg_offsets[rel / MMC3_PRG_BANK] + rel % MMC3_PRG_BANK)
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
            0x8000..=0xFFFF => self.write_register(cart, addr, val),
            _ => {
                sram_write(cart, addr, val);
            }
        }
    }

    fn step(&mut self, ppu: &Ppu) -> bool {
        if ppu.cycle() != IRQ_CLOCK_DOT {
            return false;
        }
        let line = ppu.scanline();
        if line > 239 && line < 261 {
            return false;
        }
        if !ppu.rendering_enabled() {
            return false;
        }
        let irq = self.clock_scanline();
        if irq {
            log(LogCategory::Mapper, LogLevel::Trace, || {
                format!("MMC3 IRQ on scanline {}", line)
            });
        }
        irq
    }
}

impl Snapshot for Mmc3 {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u8(self.register);
        out.write_bytes(&self.registers);
        out.write_u8(self.prg_mode);
        out.write_u8(self.chr_mode);
        for offset in self.prg_offsets.iter().chain(self.chr_offsets.iter()) {
            out.write_u32(*offset as u32);
        }
        out.write_u8(self.reload);
        out.write_u8(self.counter);
        out.write_bool(self.irq_enable);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.register = input.read_u8()? & 0x07;
        input.read_into(&mut self.registers)?;
        self.prg_mode = input.read_u8()?;
        self.chr_mode = input.read_u8()?;
        for offset in self.prg_offsets.iter_mut().chain(self.chr_offsets.iter_mut()) {
            *offset = input.read_u32()? as usize;
        }
        self.reload = input.read_u8()?;
        self.counter = input.read_u8()?;
        self.irq_enable = input.read_bool()?;
        Ok(())
    }
}
