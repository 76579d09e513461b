use std::fs;
use std::path::Path;

use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::Snapshot;
use thiserror::Error;

use crate::mappers::Mapper;

pub const PRG_BANK_SIZE: usize = 0x4000;
pub const CHR_BANK_SIZE: usize = 0x2000;
pub const SRAM_SIZE: usize = 0x2000;
const TRAINER_SIZE: usize = 512;
const HEADER_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("not an iNES image")]
    BadMagic,
    #[error("iNES image truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("iNES image has no PRG ROM")]
    NoPrgRom,
    #[error("unsupported mapper {0}")]
    UnsupportedMapper(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    SingleScreenLower,
    SingleScreenUpper,
    FourScreen,
}

impl Mirroring {
    /// Physical nametable index (0..4) for each of the four logical tables.
    pub fn table_map(self) -> [u16; 4] {
        match self {
            Mirroring::Horizontal => [0, 0, 1, 1],
            Mirroring::Vertical => [0, 1, 0, 1],
            Mirroring::SingleScreenLower => [0, 0, 0, 0],
            Mirroring::SingleScreenUpper => [1, 1, 1, 1],
            Mirroring::FourScreen => [0, 1, 2, 3],
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Mirroring::Horizontal => 0,
            Mirroring::Vertical => 1,
            Mirroring::SingleScreenLower => 2,
            Mirroring::SingleScreenUpper => 3,
            Mirroring::FourScreen => 4,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Mirroring::Horizontal,
            1 => Mirroring::Vertical,
            2 => Mirroring::SingleScreenLower,
            3 => Mirroring::SingleScreenUpper,
            4 => Mirroring::FourScreen,
            _ => return None,
        })
    }
}

/// A loaded game image plus the cartridge-side RAM it carries.
///
/// PRG ROM never changes after load. CHR is writable only when the board
/// uses CHR RAM. `sram` backs the `$6000-$7FFF` window: 8 KiB at power-on,
/// or exactly the bytes of a loaded battery file. Addresses past its end
/// read 0 and ignore writes. It is only persisted to disk when `battery`
/// is set.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub prg: Vec<u8>,
    pub chr: Vec<u8>,
    pub sram: Vec<u8>,
    pub mapper_id: u8,
    /// Current nametable arrangement; mappers may change it.
    pub mirroring: Mirroring,
    pub battery: bool,
    header_mirroring: Mirroring,
    chr_is_ram: bool,
}

impl Cartridge {
    /// Parse an iNES image.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CartridgeError> {
        if data.len() < HEADER_SIZE || &data[0..4] != b"NES\x1A" {
            return Err(CartridgeError::BadMagic);
        }
        let prg_size = data[4] as usize * PRG_BANK_SIZE;
        let chr_size = data[5] as usize * CHR_BANK_SIZE;
        let flags6 = data[6];
        let flags7 = data[7];
        let mapper_id = (flags6 >> 4) | (flags7 & 0xF0);

        // flags 6: bit 0 vertical, bit 1 battery, bit 2 trainer, bit 3 four-screen
        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let battery = flags6 & 0x02 != 0;

        let mut offset = HEADER_SIZE;
        if flags6 & 0x04 != 0 {
            offset += TRAINER_SIZE;
        }

        if prg_size == 0 {
            return Err(CartridgeError::NoPrgRom);
        }
        let expected = offset + prg_size + chr_size;
        if data.len() < expected {
            return Err(CartridgeError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let prg = data[offset..offset + prg_size].to_vec();
        offset += prg_size;
        let chr_is_ram = chr_size == 0;
        let chr = if chr_is_ram {
            vec![0u8; CHR_BANK_SIZE]
        } else {
            data[offset..offset + chr_size].to_vec()
        };

        Ok(Self {
            prg,
            chr,
            sram: vec![0u8; SRAM_SIZE],
            mapper_id,
            mirroring,
            battery,
            header_mirroring: mirroring,
            chr_is_ram,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Build a cartridge directly from ROM banks (tests and tools).
    pub fn from_parts(prg: Vec<u8>, chr: Vec<u8>, mapper_id: u8, mirroring: Mirroring) -> Self {
        let chr_is_ram = chr.is_empty();
        Self {
            prg,
            chr: if chr_is_ram { vec![0; CHR_BANK_SIZE] } else { chr },
            sram: vec![0; SRAM_SIZE],
            mapper_id,
            mirroring,
            battery: false,
            header_mirroring: mirroring,
            chr_is_ram,
        }
    }

    pub fn chr_is_ram(&self) -> bool {
        self.chr_is_ram
    }

    pub fn header_mirroring(&self) -> Mirroring {
        self.header_mirroring
    }

    /// Fail early when no mapper implementation exists for this board.
    pub fn check_supported(&self) -> Result<(), CartridgeError> {
        if Mapper::is_supported(self.mapper_id) {
            Ok(())
        } else {
            Err(CartridgeError::UnsupportedMapper(self.mapper_id))
        }
    }

    #[inline]
    pub fn read_chr(&self, index: usize) -> u8 {
        self.chr[index % self.chr.len()]
    }

    /// Writes are ignored on CHR ROM.
    #[inline]
    pub fn write_chr(&mut self, index: usize, val: u8) {
        if self.chr_is_ram {
            let len = self.chr.len();
            self.chr[index % len] = val;
        }
    }

    #[inline]
    pub fn read_prg(&self, index: usize) -> u8 {
        self.prg[index % self.prg.len()]
    }

    #[inline]
    pub fn read_sram(&self, addr: u16) -> u8 {
        let index = addr.wrapping_sub(0x6000) as usize;
        self.sram.get(index).copied().unwrap_or(0)
    }

    #[inline]
    pub fn write_sram(&mut self, addr: u16, val: u8) {
        let index = addr.wrapping_sub(0x6000) as usize;
        if let Some(byte) = self.sram.get_mut(index) {
            *byte = val;
        }
    }

    /// Put the mutable parts back to their power-on state.
    pub fn power_on(&mut self) {
        self.mirroring = self.header_mirroring;
        self.sram = vec![0; SRAM_SIZE];
        if self.chr_is_ram {
            self.chr.iter_mut().for_each(|b| *b = 0);
        }
    }

    /// Replace battery RAM with the bytes of a battery file, whatever
    /// their length.
    pub fn load_sram(&mut self, bytes: &[u8]) {
        self.sram = bytes.to_vec();
    }
}

/// Offset of an `index`-th bank of `size` bytes inside a `len`-byte ROM.
/// Negative indices count back from the last bank.
pub(crate) fn bank_offset(len: usize, size: usize, index: i32) -> usize {
    let banks = (len / size).max(1) as i32;
    (index.rem_euclid(banks) as usize) * size
}

impl Snapshot for Cartridge {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_block(&self.sram);
        out.write_u8(self.mirroring.to_u8());
        if self.chr_is_ram {
            out.write_block(&self.chr);
        }
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.sram = input.read_block()?;
        self.mirroring = Mirroring::from_u8(input.read_u8()?)
            .ok_or(StateError::Invalid("cartridge mirroring"))?;
        if self.chr_is_ram {
            input.read_block_into(&mut self.chr)?;
        }
        Ok(())
    }
}
