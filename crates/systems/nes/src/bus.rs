//! CPU address space of the console.
//!
//! | Range         | Target                                  |
//! |---------------|-----------------------------------------|
//! | `$0000-$1FFF` | 2KB internal RAM, mirrored              |
//! | `$2000-$3FFF` | PPU registers, mirrored every 8 bytes   |
//! | `$4000-$4013` | APU channels                            |
//! | `$4014`       | OAM DMA                                 |
//! | `$4015`       | APU status / enable                     |
//! | `$4016-$4017` | Controllers (write `$4017`: APU frame)  |
//! | `$6000-$FFFF` | Cartridge, through the mapper           |

use nestor_core::cpu_6502::Memory6502;
use nestor_core::logging::{log, LogCategory, LogLevel};

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::controller::Controller;
use crate::mappers::Mapper;
use crate::ppu::{Ppu, PpuBus};

pub const RAM_SIZE: usize = 0x800;

/// CPU cycles the CPU is halted for a sprite DMA, before the odd-cycle
/// alignment cycle.
pub const OAM_DMA_STALL: u32 = 513;

/// Borrowed view of everything the CPU can address, built for one
/// instruction.
pub struct CpuBus<'a> {
    pub ram: &'a mut [u8; RAM_SIZE],
    pub ppu: &'a mut Ppu,
    pub apu: &'a mut Apu,
    pub mapper: &'a mut Mapper,
    pub cart: &'a mut Cartridge,
    pub controllers: &'a mut [Controller; 2],
    dma_stall: u32,
}

impl<'a> CpuBus<'a> {
    pub fn new(
        ram: &'a mut [u8; RAM_SIZE],
        ppu: &'a mut Ppu,
        apu: &'a mut Apu,
        mapper: &'a mut Mapper,
        cart: &'a mut Cartridge,
        controllers: &'a mut [Controller; 2],
    ) -> Self {
        Self {
            ram,
            ppu,
            apu,
            mapper,
            cart,
            controllers,
            dma_stall: 0,
        }
    }

    /// Stall cycles requested by OAM DMA during this view's lifetime.
    pub fn dma_stall(&self) -> u32 {
        self.dma_stall
    }

    fn ppu_bus(&mut self) -> (&mut Ppu, PpuBus<'_>) {
        (
            &mut *self.ppu,
            PpuBus {
                mapper: &mut *self.mapper,
                cart: &mut *self.cart,
            },
        )
    }

    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        for i in 0..256u16 {
            let val = self.read(base.wrapping_add(i));
            self.ppu.write_oam_data(val);
        }
        self.dma_stall += OAM_DMA_STALL;
        log(LogCategory::Bus, LogLevel::Trace, || {
            format!("OAM DMA from page {:02X}", page)
        });
    }
}

impl Memory6502 for CpuBus<'_> {
    fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize % RAM_SIZE],
            0x2000..=0x3FFF => {
                let reg = 0x2000 + addr % 8;
                let (ppu, mut bus) = self.ppu_bus();
                ppu.read_register(&mut bus, reg)
            }
            0x4015 => self.apu.read_status(),
            0x4016 => self.controllers[0].read(),
            0x4017 => self.controllers[1].read(),
            0x6000..=0xFFFF => self.mapper.read(self.cart, addr),
            _ => {
                log(LogCategory::Bus, LogLevel::Trace, || {
                    format!("unmapped read at {:04X}", addr)
                });
                0
            }
        }
    }

    fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize % RAM_SIZE] = val,
            0x2000..=0x3FFF => {
                let reg = 0x2000 + addr % 8;
                let (ppu, mut bus) = self.ppu_bus();
                ppu.write_register(&mut bus, reg, val);
            }
            0x4014 => self.oam_dma(val),
            0x4016 => {
                self.controllers[0].write(val);
                self.controllers[1].write(val);
            }
            0x4000..=0x4017 => self.apu.write_register(addr, val),
            0x6000..=0xFFFF => self.mapper.write(self.cart, addr, val),
            _ => {
                log(LogCategory::Bus, LogLevel::Trace, || {
                    format!("unmapped write {:02X} at {:04X}", val, addr)
                });
            }
        }
    }
}
