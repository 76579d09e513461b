//! NES console core.
//!
//! [`Console`] steps a 6502 CPU, a dot-based PPU, the cartridge mapper and
//! the APU in lockstep at the hardware clock ratios, serializes the whole
//! machine into versioned save states and feeds audio into a sample bridge
//! that a real-time output device drains on its own thread. [`Session`]
//! wraps a console with save-state and battery RAM persistence.

pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod console;
pub mod controller;
pub mod cpu;
pub mod mappers;
pub mod ppu;
pub mod session;

pub use cartridge::{Cartridge, CartridgeError, Mirroring};
pub use console::{Console, APU_TICKS_PER_CPU_CYCLE, CPU_FREQUENCY, PPU_TICKS_PER_CPU_CYCLE};
pub use controller::Button;
pub use mappers::Mapper;
pub use session::{rom_hash, Session, SessionPaths, StartKind};

use nestor_core::state::StateError;

#[derive(thiserror::Error, Debug)]
pub enum NesError {
    #[error("cartridge: {0}")]
    Cartridge(#[from] CartridgeError),
    #[error("save state: {0}")]
    State(#[from] StateError),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
