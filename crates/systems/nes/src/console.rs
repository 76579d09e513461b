//! The console orchestrator.
//!
//! [`Console`] owns every subsystem and is the only thing that clocks them.
//! One [`Console::step`] runs one CPU instruction, then advances the PPU and
//! the mapper together for three dots per CPU cycle, then the APU once per
//! CPU cycle. Interrupt lines raised along the way are latched into the CPU
//! for the next instruction.

use std::fs;
use std::path::Path;

use nestor_core::audio::{AudioOutput, SampleSink};
use nestor_core::logging::{log, LogCategory, LogLevel};
use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::types::Frame;
use nestor_core::{Snapshot, Subsystem};

use crate::apu::{Apu, ApuBus};
use crate::bus::{CpuBus, RAM_SIZE};
use crate::cartridge::Cartridge;
use crate::controller::Controller;
use crate::cpu::NesCpu;
use crate::mappers::Mapper;
use crate::ppu::{Ppu, PpuBus};
use crate::NesError;

/// NTSC CPU clock in Hz.
pub const CPU_FREQUENCY: f64 = 1_789_773.0;

pub const PPU_TICKS_PER_CPU_CYCLE: u32 = 3;
pub const APU_TICKS_PER_CPU_CYCLE: u32 = 1;

#[derive(Debug)]
pub struct Console {
    cpu: NesCpu,
    ppu: Ppu,
    apu: Apu,
    mapper: Mapper,
    cartridge: Cartridge,
    ram: [u8; RAM_SIZE],
    controllers: [Controller; 2],
}

impl Console {
    /// Build a console around a loaded cartridge. Fails before any subsystem
    /// exists when the board is unknown. The CPU is not reset; call
    /// [`Console::reset`] or restore a save state before stepping.
    pub fn new(cartridge: Cartridge) -> Result<Self, NesError> {
        cartridge.check_supported()?;
        let mapper = Mapper::for_cartridge(&cartridge)?;
        log(LogCategory::Mapper, LogLevel::Info, || {
            format!(
                "{} board, {} KiB PRG, {} KiB CHR{}, battery: {}",
                mapper.name(),
                cartridge.prg.len() / 1024,
                cartridge.chr.len() / 1024,
                if cartridge.chr_is_ram() { " RAM" } else { "" },
                cartridge.battery
            )
        });
        Ok(Self {
            cpu: NesCpu::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            mapper,
            cartridge,
            ram: [0; RAM_SIZE],
            controllers: Default::default(),
        })
    }

    /// Processor reset: reload PC from the reset vector. Other subsystems
    /// keep their state.
    pub fn reset(&mut self) {
        let mut bus = CpuBus::new(
            &mut self.ram,
            &mut self.ppu,
            &mut self.apu,
            &mut self.mapper,
            &mut self.cartridge,
            &mut self.controllers,
        );
        self.cpu.reset(&mut bus);
        log(LogCategory::CPU, LogLevel::Info, || {
            format!("reset, PC={:04X}", self.cpu.registers().pc)
        });
    }

    /// Power cycle: every subsystem and the cartridge's mutable state go back
    /// to power-on defaults, then the CPU is reset. An attached audio output
    /// stays attached.
    pub fn cold_reset(&mut self) {
        let audio = self.apu.detach_audio();
        self.ram = [0; RAM_SIZE];
        self.cpu = NesCpu::new();
        self.ppu = Ppu::new();
        self.apu = Apu::new();
        if let Some(output) = audio {
            self.apu.attach_audio(output);
        }
        self.cartridge.power_on();
        // the id was validated in new()
        if let Ok(mapper) = Mapper::for_cartridge(&self.cartridge) {
            self.mapper = mapper;
        }
        self.controllers = Default::default();
        self.reset();
    }

    /// Run one CPU instruction and the matching PPU, mapper and APU time.
    /// Returns the CPU cycles consumed.
    pub fn step(&mut self) -> u32 {
        let bus = CpuBus::new(
            &mut self.ram,
            &mut self.ppu,
            &mut self.apu,
            &mut self.mapper,
            &mut self.cartridge,
            &mut self.controllers,
        );
        let cpu_cycles = self.cpu.step(bus);

        for _ in 0..cpu_cycles * PPU_TICKS_PER_CPU_CYCLE {
            let nmi = self.ppu.step(PpuBus {
                mapper: &mut self.mapper,
                cart: &mut self.cartridge,
            });
            if nmi {
                self.cpu.trigger_nmi();
            }
            if self.mapper.step(&self.ppu) {
                self.cpu.trigger_irq();
            }
        }

        for _ in 0..cpu_cycles * APU_TICKS_PER_CPU_CYCLE {
            let tick = self.apu.step(ApuBus {
                mapper: &self.mapper,
                cart: &self.cartridge,
            });
            if tick.stall > 0 {
                self.cpu.add_stall(tick.stall);
            }
            if tick.irq {
                self.cpu.trigger_irq();
            }
        }

        cpu_cycles
    }

    /// Step until the PPU completes a frame. Returns the CPU cycles run.
    pub fn step_frame(&mut self) -> u64 {
        let frame = self.ppu.frame_count();
        let mut cpu_cycles = 0u64;
        while self.ppu.frame_count() == frame {
            cpu_cycles += self.step() as u64;
        }
        cpu_cycles
    }

    /// Step for `seconds` of emulated time. The last instruction may
    /// overshoot the budget; the overshoot is not carried to the next call.
    pub fn step_seconds(&mut self, seconds: f64) {
        let mut cycles = (CPU_FREQUENCY * seconds) as i64;
        while cycles > 0 {
            cycles -= self.step() as i64;
        }
    }

    /// Latch the eight buttons of player 0 or 1; bit `n` is [`crate::Button`] `n`.
    pub fn set_controller_buttons(&mut self, player: usize, buttons: u8) {
        match self.controllers.get_mut(player) {
            Some(pad) => pad.set_buttons(buttons),
            None => log(LogCategory::Bus, LogLevel::Warn, || {
                format!("ignoring input for controller {}", player)
            }),
        }
    }

    pub fn controller_buttons(&self, player: usize) -> Option<u8> {
        self.controllers.get(player).map(Controller::buttons)
    }

    /// The last frame the PPU completed.
    pub fn current_frame_buffer(&self) -> &Frame {
        self.ppu.front_buffer()
    }

    /// ARGB of the universal background colour.
    pub fn background_color(&self) -> u32 {
        self.ppu.background_color()
    }

    pub fn frame_count(&self) -> u64 {
        self.ppu.frame_count()
    }

    /// Start feeding samples to `sink` at `sample_rate` Hz. Returns `false`
    /// (and leaves audio detached) for a zero sample rate.
    pub fn attach_audio(&mut self, sink: SampleSink, sample_rate: u32) -> bool {
        match AudioOutput::new(sink, CPU_FREQUENCY, sample_rate) {
            Some(output) => {
                self.apu.attach_audio(output);
                true
            }
            None => false,
        }
    }

    pub fn detach_audio(&mut self) -> Option<AudioOutput> {
        self.apu.detach_audio()
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn cartridge_mut(&mut self) -> &mut Cartridge {
        &mut self.cartridge
    }

    /// Internal 2KB work RAM.
    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }

    pub fn cpu(&self) -> &NesCpu {
        &self.cpu
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn apu(&self) -> &Apu {
        &self.apu
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    /// Serialize the whole machine into a save-state blob.
    pub fn save_state(&self) -> Vec<u8> {
        let mut out = StateWriter::new();
        self.snapshot(&mut out);
        out.into_bytes()
    }

    /// Restore from a save-state blob. On error the console is left partially
    /// restored and should be [`Console::cold_reset`].
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        self.restore(&mut StateReader::new(bytes))
    }

    /// Write a save state, creating parent directories.
    pub fn save_state_file<P: AsRef<Path>>(&self, path: P) -> Result<(), NesError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = self.save_state();
        fs::write(path, &bytes)?;
        log(LogCategory::State, LogLevel::Info, || {
            format!("saved {} bytes to {}", bytes.len(), path.display())
        });
        Ok(())
    }

    /// Load a save state. A missing file surfaces as
    /// `NesError::Io` with `ErrorKind::NotFound`.
    pub fn load_state_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), NesError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        self.load_state(&bytes)?;
        log(LogCategory::State, LogLevel::Info, || {
            format!("restored {}", path.display())
        });
        Ok(())
    }

    /// Return debug information useful for inspecting execution state.
    pub fn debug_state(&self) -> serde_json::Value {
        let regs = self.cpu.registers();
        let vector = |addr: u16| {
            let lo = self.mapper.read(&self.cartridge, addr) as u16;
            let hi = self.mapper.read(&self.cartridge, addr.wrapping_add(1)) as u16;
            (hi << 8) | lo
        };
        serde_json::json!({
            "pc": regs.pc,
            "a": regs.a,
            "x": regs.x,
            "y": regs.y,
            "sp": regs.sp,
            "status": regs.status,
            "cycles": regs.cycles,
            "ppu": {
                "ctrl": self.ppu.ctrl(),
                "mask": self.ppu.mask(),
                "scanline": self.ppu.scanline(),
                "cycle": self.ppu.cycle(),
                "frame": self.ppu.frame_count(),
                "nmi_enabled": (self.ppu.ctrl() & 0x80) != 0,
                "bg_enabled": self.ppu.show_background(),
                "sprites_enabled": self.ppu.show_sprites()
            },
            "apu_cycle": self.apu.cycle(),
            "mapper": {
                "id": self.mapper.id(),
                "name": self.mapper.name(),
                "mirroring": format!("{:?}", self.cartridge.mirroring)
            },
            "vectors": {
                "nmi": vector(0xFFFA),
                "reset": vector(0xFFFC),
                "irq": vector(0xFFFE)
            }
        })
    }
}

impl Snapshot for Console {
    /// Header, RAM, CPU, APU, PPU, cartridge, mapper, then the sentinel.
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_header();
        out.write_block(&self.ram);
        self.cpu.snapshot(out);
        self.apu.snapshot(out);
        self.ppu.snapshot(out);
        self.cartridge.snapshot(out);
        self.mapper.snapshot(out);
        out.write_sentinel();
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        input.read_header()?;
        input.read_block_into(&mut self.ram)?;
        self.cpu.restore(input)?;
        self.apu.restore(input)?;
        self.ppu.restore(input)?;
        self.cartridge.restore(input)?;
        self.mapper.restore(input)?;
        input.read_sentinel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Mirroring;

    fn console() -> Console {
        // JMP $8000 forever
        let mut prg = vec![0xEA; 0x4000];
        prg[..3].copy_from_slice(&[0x4C, 0x00, 0x80]);
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        let cart = Cartridge::from_parts(prg, Vec::new(), 0, Mirroring::Horizontal);
        let mut console = Console::new(cart).unwrap();
        console.reset();
        console
    }

    #[test]
    fn new_rejects_unknown_board() {
        let cart = Cartridge::from_parts(vec![0; 0x4000], Vec::new(), 99, Mirroring::Vertical);
        assert!(matches!(
            Console::new(cart),
            Err(NesError::Cartridge(crate::CartridgeError::UnsupportedMapper(99)))
        ));
    }

    #[test]
    fn reset_loads_vector() {
        let c = console();
        assert_eq!(c.cpu().registers().pc, 0x8000);
    }

    #[test]
    fn step_keeps_clock_ratios() {
        let mut c = console();
        let dots = c.ppu().dots();
        let apu = c.apu().cycle();
        let cycles = c.step();
        assert_eq!(cycles, 3); // JMP abs
        assert_eq!(c.ppu().dots() - dots, 3 * cycles as u64);
        assert_eq!(c.apu().cycle() - apu, cycles as u64);
    }

    #[test]
    fn out_of_range_player_is_ignored() {
        let mut c = console();
        c.set_controller_buttons(1, 0x81);
        c.set_controller_buttons(2, 0xFF);
        assert_eq!(c.controller_buttons(1), Some(0x81));
        assert_eq!(c.controller_buttons(0), Some(0));
        assert_eq!(c.controller_buttons(2), None);
    }

    #[test]
    fn attach_audio_rejects_zero_rate() {
        let mut c = console();
        let (sink, _source) = nestor_core::audio::sample_bridge(16);
        assert!(!c.attach_audio(sink, 0));
        assert!(c.detach_audio().is_none());
    }

    #[test]
    fn cold_reset_clears_ram_and_keeps_audio() {
        let mut c = console();
        c.ram[0x10] = 0x55;
        let (sink, _source) = nestor_core::audio::sample_bridge(16);
        assert!(c.attach_audio(sink, 44_100));
        c.cold_reset();
        assert_eq!(c.ram[0x10], 0);
        assert_eq!(c.cpu().registers().pc, 0x8000);
        assert!(c.apu().audio().is_some());
    }

    #[test]
    fn debug_state_reports_vectors_and_mapper() {
        let c = console();
        let state = c.debug_state();
        assert_eq!(state["vectors"]["reset"], 0x8000);
        assert_eq!(state["mapper"]["name"], "NROM");
        assert_eq!(state["pc"], 0x8000);
    }

    #[test]
    fn save_state_has_header_and_sentinel() {
        let c = console();
        let bytes = c.save_state();
        assert_eq!(&bytes[..4], b"NSTS");
        assert_eq!(bytes.last(), Some(&1));
    }
}
