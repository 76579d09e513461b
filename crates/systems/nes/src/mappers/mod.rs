//! NES Mapper implementations
//!
//! A mapper is the banking circuit on the cartridge board. It decides which
//! slice of PRG/CHR the CPU and PPU see, may redirect nametable mirroring,
//! and on some boards counts scanlines to raise IRQs. Mapper state is only
//! the registers; the ROM and RAM contents belong to [`Cartridge`], which is
//! lent to every call.

mod axrom;
mod cnrom;
mod mmc1;
mod mmc3;
mod nrom;
mod uxrom;

pub use axrom::Axrom;
pub use cnrom::Cnrom;
pub use mmc1::Mmc1;
pub use mmc3::Mmc3;
pub use nrom::Nrom;
pub use uxrom::Uxrom;

use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::{Snapshot, Subsystem};

use crate::cartridge::{Cartridge, CartridgeError};
use crate::ppu::Ppu;

/// Behaviour every banking circuit provides.
pub trait Board: Snapshot {
    /// CPU (`$6000-$FFFF`) or PPU pattern-table (`$0000-$1FFF`) read.
    fn read(&self, cart: &Cartridge, addr: u16) -> u8;

    /// CPU register write or PPU pattern-table write.
    fn write(&mut self, cart: &mut Cartridge, addr: u16, val: u8);

    /// Clocked once per PPU dot. Returns `true` to assert the CPU IRQ line.
    fn step(&mut self, _ppu: &Ppu) -> bool {
        false
    }
}

/// Shared `$6000-$7FFF` battery/work RAM window.
pub(crate) fn sram_read(cart: &Cartridge, addr: u16) -> Option<u8> {
    (0x6000..0x8000).contains(&addr).then(|| cart.read_sram(addr))
}

pub(crate) fn sram_write(cart: &mut Cartridge, addr: u16, val: u8) -> bool {
    if (0x6000..0x8000).contains(&addr) {
        cart.write_sram(addr, val);
        true
    } else {
        false
    }
}

/// Unified mapper enum that dispatches to specific implementations
#[derive(Debug, Clone)]
pub enum Mapper {
    Nrom(Nrom),
    Mmc1(Mmc1),
    Uxrom(Uxrom),
    Cnrom(Cnrom),
    Mmc3(Mmc3),
    Axrom(Axrom),
}

macro_rules! dispatch {
    ($mapper:expr, $m:ident => $body:expr) => {
        match $mapper {
            Mapper::Nrom($m) => $body,
            Mapper::Mmc1($m) => $body,
            Mapper::Uxrom($m) => $body,
            Mapper::Cnrom($m) => $body,
            Mapper::Mmc3($m) => $body,
            Mapper::Axrom($m) => $body,
        }
    };
}

impl Mapper {
    pub const SUPPORTED: [u8; 6] = [0, 1, 2, 3, 4, 7];

    pub fn is_supported(id: u8) -> bool {
        Self::SUPPORTED.contains(&id)
    }

    /// Select and build the mapper for a cartridge in its power-on state.
    pub fn for_cartridge(cart: &Cartridge) -> Result<Self, CartridgeError> {
        Ok(match cart.mapper_id {
            0 => Mapper::Nrom(Nrom::new()),
            1 => Mapper::Mmc1(Mmc1::new(cart)),
            2 => Mapper::Uxrom(Uxrom::new(cart)),
            3 => Mapper::Cnrom(Cnrom::new()),
            4 => Mapper::Mmc3(Mmc3::new(cart)),
            7 => Mapper::Axrom(Axrom::new()),
            id => return Err(CartridgeError::UnsupportedMapper(id)),
        })
    }

    pub fn id(&self) -> u8 {
        match self {
            Mapper::Nrom(_) => 0,
            Mapper::Mmc1(_) => 1,
            Mapper::Uxrom(_) => 2,
            Mapper::Cnrom(_) => 3,
            Mapper::Mmc3(_) => 4,
            Mapper::Axrom(_) => 7,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mapper::Nrom(_) => "NROM",
            Mapper::Mmc1(_) => "MMC1",
            Mapper::Uxrom(_) => "UxROM",
            Mapper::Cnrom(_) => "CNROM",
            Mapper::Mmc3(_) => "MMC3",
            Mapper::Axrom(_) => "AxROM",
        }
    }

    #[inline]
    pub fn read(&self, cart: &Cartridge, addr: u16) -> u8 {
        dispatch!(self, m => m.read(cart, addr))
    }

    #[inline]
    pub fn write(&mut self, cart: &mut Cartridge, addr: u16, val: u8) {
        dispatch!(self, m => m.write(cart, addr, val))
    }
}

impl Snapshot for Mapper {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u8(self.id());
        dispatch!(self, m => m.snapshot(out))
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        if input.read_u8()? != self.id() {
            return Err(StateError::Invalid("save state is for a different mapper"));
        }
        dispatch!(self, m => m.restore(input))
    }
}

impl Subsystem for Mapper {
    type Bus<'a> = &'a Ppu;
    type Output = bool;

    #[inline]
    fn step(&mut self, ppu: &Ppu) -> bool {
        dispatch!(self, m => Board::step(m, ppu))
    }
}
