//! NES CPU wrapper around the reusable 6502 core

use nestor_core::cpu_6502::{Cpu6502, Interrupt};
use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::{Snapshot, Subsystem};

use crate::bus::CpuBus;

/// The 2A03's CPU half: a 6502 whose DMA stalls come from the bus.
#[derive(Debug, Clone, Default)]
pub struct NesCpu {
    cpu: Cpu6502,
}

impl NesCpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, bus: &mut CpuBus<'_>) {
        self.cpu.reset(bus);
    }

    pub fn trigger_nmi(&mut self) {
        self.cpu.trigger_nmi();
    }

    pub fn trigger_irq(&mut self) {
        self.cpu.trigger_irq();
    }

    pub fn pending_interrupt(&self) -> Interrupt {
        self.cpu.pending_interrupt()
    }

    pub fn add_stall(&mut self, cycles: u32) {
        self.cpu.add_stall(cycles);
    }

    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    pub fn registers(&self) -> &Cpu6502 {
        &self.cpu
    }
}

impl Snapshot for NesCpu {
    fn snapshot(&self, out: &mut StateWriter) {
        self.cpu.snapshot(out);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.cpu.restore(input)
    }
}

impl Subsystem for NesCpu {
    type Bus<'a> = CpuBus<'a>;
    /// CPU cycles consumed
    type Output = u32;

    fn step(&mut self, mut bus: CpuBus<'_>) -> u32 {
        let cycles = self.cpu.step(&mut bus);
        let stall = bus.dma_stall();
        if stall > 0 {
            // DMA starting on an odd cycle waits one extra cycle to align
            let align = (self.cpu.cycles % 2 == 1) as u32;
            self.cpu.add_stall(stall + align);
        }
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::Apu;
    use crate::bus::RAM_SIZE;
    use crate::cartridge::{Cartridge, Mirroring};
    use crate::controller::Controller;
    use crate::mappers::Mapper;
    use crate::ppu::Ppu;

    fn run_program(program: &[u8], steps: usize) -> (NesCpu, [u8; RAM_SIZE], Ppu) {
        let mut prg = vec![0xEA; 0x4000];
        prg[..program.len()].copy_from_slice(program);
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        let mut cart = Cartridge::from_parts(prg, Vec::new(), 0, Mirroring::Horizontal);
        let mut mapper = Mapper::for_cartridge(&cart).unwrap();
        let mut ram = [0; RAM_SIZE];
        let mut ppu = Ppu::new();
        let mut apu = Apu::new();
        let mut pads: [Controller; 2] = Default::default();
        let mut cpu = NesCpu::new();
        cpu.reset(&mut CpuBus::new(
            &mut ram, &mut ppu, &mut apu, &mut mapper, &mut cart, &mut pads,
        ));
        for _ in 0..steps {
            cpu.step(CpuBus::new(
                &mut ram, &mut ppu, &mut apu, &mut mapper, &mut cart, &mut pads,
            ));
        }
        (cpu, ram, ppu)
    }

    #[test]
    fn resets_through_cartridge_vector() {
        let (cpu, _, _) = run_program(&[], 0);
        assert_eq!(cpu.registers().pc, 0x8000);
    }

    #[test]
    fn executes_from_prg_rom() {
        // LDA #$42; STA $10
        let (cpu, ram, _) = run_program(&[0xA9, 0x42, 0x85, 0x10], 2);
        assert_eq!(ram[0x10], 0x42);
        assert_eq!(cpu.cycles(), 5);
    }

    #[test]
    fn oam_dma_stalls_the_cpu() {
        // LDA #$02; STA $4014 ends on cycle 6
        let (cpu, _, _) = run_program(&[0xA9, 0x02, 0x8D, 0x14, 0x40], 2);
        assert_eq!(cpu.registers().stall, 513);
        // LDA $00; STA $4014 ends on cycle 7
        let (cpu, _, _) = run_program(&[0xA5, 0x00, 0x8D, 0x14, 0x40], 2);
        assert_eq!(cpu.registers().stall, 514);
    }
}
