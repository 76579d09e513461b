//! Synthetic iNES images for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use nestor_nes::{Cartridge, Console};

const PRG_SIZE: usize = 0x4000;
const CHR_SIZE: usize = 0x2000;

/// A small NROM program:
///
/// - enables pulse 1 and NMI, turns on background and sprite rendering
/// - main loop: `INC $00` and write it to the pulse 1 timer (audible, changes
///   every iteration)
/// - NMI: `INC $01`, store it as the backdrop colour, reset scroll; A is
///   preserved so an NMI between a load and a store cannot corrupt it
fn program() -> (Vec<u8>, u16, u16) {
    let mut p: Vec<u8> = vec![
        0x78, // SEI
        0xD8, // CLD
        0xA2, 0xFF, // LDX #$FF
        0x9A, // TXS
        0xA9, 0x01, 0x8D, 0x15, 0x40, // enable pulse 1
        0xA9, 0xBF, 0x8D, 0x00, 0x40, // 50% duty, halt, volume 15
        0xA9, 0x40, 0x8D, 0x02, 0x40, // timer low
        0xA9, 0x00, 0x8D, 0x03, 0x40, // timer high, length
        0xA9, 0x80, 0x8D, 0x00, 0x20, // NMI on
        0xA9, 0x1E, 0x8D, 0x01, 0x20, // rendering on
    ];
    let main_loop = 0x8000 + p.len() as u16;
    p.extend_from_slice(&[
        0xE6, 0x00, // INC $00
        0xA5, 0x00, // LDA $00
        0x8D, 0x02, 0x40, // STA $4002
        0x4C, main_loop as u8, (main_loop >> 8) as u8, // JMP loop
    ]);
    let nmi = 0x8000 + p.len() as u16;
    p.extend_from_slice(&[
        0x48, // PHA
        0xE6, 0x01, // INC $01
        0xA9, 0x3F, 0x8D, 0x06, 0x20, // PPUADDR = $3F00
        0xA9, 0x00, 0x8D, 0x06, 0x20,
        0xA5, 0x01, 0x8D, 0x07, 0x20, // backdrop = $01
        0xA9, 0x00, 0x8D, 0x05, 0x20, 0x8D, 0x05, 0x20, // scroll 0,0
        0xA9, 0x80, 0x8D, 0x00, 0x20, // nametable 0, NMI on
        0x68, // PLA
        0x40, // RTI
    ]);
    let irq = 0x8000 + p.len() as u16;
    p.push(0x40);
    (p, nmi, irq)
}

/// iNES image with the test program, for any mapper id.
pub fn rom(mapper_id: u8, battery: bool) -> Vec<u8> {
    let flags6 = (mapper_id << 4) | if battery { 0x02 } else { 0x00 };
    let flags7 = mapper_id & 0xF0;
    let mut data = vec![b'N', b'E', b'S', 0x1A, 1, 1, flags6, flags7];
    data.resize(16, 0);

    let (program, nmi, irq) = program();
    let mut prg = vec![0xEA; PRG_SIZE];
    prg[..program.len()].copy_from_slice(&program);
    for (offset, vector) in [(0x3FFA, nmi), (0x3FFC, 0x8000), (0x3FFE, irq)] {
        prg[offset] = vector as u8;
        prg[offset + 1] = (vector >> 8) as u8;
    }
    data.extend_from_slice(&prg);
    data.extend((0..CHR_SIZE).map(|i| (i * 7 + i / 16) as u8));
    data
}

pub fn nrom_rom() -> Vec<u8> {
    rom(0, false)
}

pub fn cartridge(bytes: &[u8]) -> Cartridge {
    Cartridge::from_bytes(bytes).expect("test ROM parses")
}

/// Console built from the test ROM and reset, ready to step.
pub fn booted_console() -> Console {
    let mut console = Console::new(cartridge(&nrom_rom())).expect("NROM is supported");
    console.reset();
    console
}

/// A fresh per-test scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nestor-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}
