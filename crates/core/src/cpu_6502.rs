//! MOS 6502 CPU core implementation
//!
//! A register-only 6502: memory is not owned by the CPU but lent to it for
//! each [`Cpu6502::step`] through the [`Memory6502`] trait, so a system can
//! build a short-lived bus view over its other components.
//!
//! Binary-mode only (the 2A03 has no decimal unit). Unofficial opcodes are
//! executed as NOPs of the correct length.

use crate::logging::{log, LogCategory, LogLevel};
use crate::state::{StateError, StateReader, StateWriter};
use crate::Snapshot;

/// Memory interface trait for the 6502 CPU
///
/// Reads take `&mut self` because many mapped registers change state when
/// read (status latches, FIFOs, controller shift registers).
pub trait Memory6502 {
    /// Read a byte from memory at the given address
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to memory at the given address
    fn write(&mut self, addr: u16, val: u8);
}

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_IRQ_DISABLE: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Interrupt latched for service before the next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    None,
    Nmi,
    Irq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

impl Mode {
    fn size(self) -> u16 {
        match self {
            Mode::Implied | Mode::Accumulator => 1,
            Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect => 3,
            _ => 2,
        }
    }
}

#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

impl Op {
    /// Instructions that pay one extra cycle when indexing crosses a page.
    fn page_penalty(self) -> bool {
        matches!(
            self,
            Op::Adc | Op::And | Op::Cmp | Op::Eor | Op::Lda | Op::Ldx | Op::Ldy | Op::Ora | Op::Sbc | Op::Nop
        )
    }
}

/// Decoded opcode: operation, addressing mode, base cycle count.
#[derive(Debug, Clone, Copy)]
struct Decoded {
    op: Op,
    mode: Mode,
    cycles: u8,
    official: bool,
}

fn decode(opcode: u8) -> Decoded {
    use Mode::*;
    use Op::*;

    // The cc=01 column is fully regular: aaa picks the ALU op, bbb the mode.
    if opcode & 0x03 == 0x01 {
        let op = [Ora, And, Eor, Adc, Sta, Lda, Cmp, Sbc][(opcode >> 5) as usize];
        let (mode, cycles) = match (opcode >> 2) & 0x07 {
            0 => (IndirectX, 6),
            1 => (ZeroPage, 3),
            2 => (Immediate, 2),
            3 => (Absolute, 4),
            4 => (IndirectY, if op == Sta { 6 } else { 5 }),
            5 => (ZeroPageX, 4),
            6 => (AbsoluteY, if op == Sta { 5 } else { 4 }),
            _ => (AbsoluteX, if op == Sta { 5 } else { 4 }),
        };
        if opcode == 0x89 {
            // STA #imm does not exist
            return unofficial(opcode);
        }
        return Decoded { op, mode, cycles, official: true };
    }

    let (op, mode, cycles) = match opcode {
        0x00 => (Brk, Implied, 7),
        0x08 => (Php, Implied, 3),
        0x0A => (Asl, Accumulator, 2),
        0x06 => (Asl, ZeroPage, 5),
        0x16 => (Asl, ZeroPageX, 6),
        0x0E => (Asl, Absolute, 6),
        0x1E => (Asl, AbsoluteX, 7),
        0x10 => (Bpl, Relative, 2),
        0x18 => (Clc, Implied, 2),
        0x20 => (Jsr, Absolute, 6),
        0x24 => (Bit, ZeroPage, 3),
        0x2C => (Bit, Absolute, 4),
        0x28 => (Plp, Implied, 4),
        0x2A => (Rol, Accumulator, 2),
        0x26 => (Rol, ZeroPage, 5),
        0x36 => (Rol, ZeroPageX, 6),
        0x2E => (Rol, Absolute, 6),
        0x3E => (Rol, AbsoluteX, 7),
        0x30 => (Bmi, Relative, 2),
        0x38 => (Sec, Implied, 2),
        0x40 => (Rti, Implied, 6),
        0x48 => (Pha, Implied, 3),
        0x4A => (Lsr, Accumulator, 2),
        0x46 => (Lsr, ZeroPage, 5),
        0x56 => (Lsr, ZeroPageX, 6),
        0x4E => (Lsr, Absolute, 6),
        0x5E => (Lsr, AbsoluteX, 7),
        0x4C => (Jmp, Absolute, 3),
        0x6C => (Jmp, Indirect, 5),
        0x50 => (Bvc, Relative, 2),
        0x58 => (Cli, Implied, 2),
        0x60 => (Rts, Implied, 6),
        0x68 => (Pla, Implied, 4),
        0x6A => (Ror, Accumulator, 2),
        0x66 => (Ror, ZeroPage, 5),
        0x76 => (Ror, ZeroPageX, 6),
        0x6E => (Ror, Absolute, 6),
        0x7E => (Ror, AbsoluteX, 7),
        0x70 => (Bvs, Relative, 2),
        0x78 => (Sei, Implied, 2),
        0x84 => (Sty, ZeroPage, 3),
        0x94 => (Sty, ZeroPageX, 4),
        0x8C => (Sty, Absolute, 4),
        0x86 => (Stx, ZeroPage, 3),
        0x96 => (Stx, ZeroPageY, 4),
        0x8E => (Stx, Absolute, 4),
        0x88 => (Dey, Implied, 2),
        0x8A => (Txa, Implied, 2),
        0x90 => (Bcc, Relative, 2),
        0x98 => (Tya, Implied, 2),
        0x9A => (Txs, Implied, 2),
        0xA0 => (Ldy, Immediate, 2),
        0xA4 => (Ldy, ZeroPage, 3),
        0xB4 => (Ldy, ZeroPageX, 4),
        0xAC => (Ldy, Absolute, 4),
        0xBC => (Ldy, AbsoluteX, 4),
        0xA2 => (Ldx, Immediate, 2),
        0xA6 => (Ldx, ZeroPage, 3),
        0xB6 => (Ldx, ZeroPageY, 4),
        0xAE => (Ldx, Absolute, 4),
        0xBE => (Ldx, AbsoluteY, 4),
        0xA8 => (Tay, Implied, 2),
        0xAA => (Tax, Implied, 2),
        0xB0 => (Bcs, Relative, 2),
        0xB8 => (Clv, Implied, 2),
        0xBA => (Tsx, Implied, 2),
        0xC0 => (Cpy, Immediate, 2),
        0xC4 => (Cpy, ZeroPage, 3),
        0xCC => (Cpy, Absolute, 4),
        0xC6 => (Dec, ZeroPage, 5),
        0xD6 => (Dec, ZeroPageX, 6),
        0xCE => (Dec, Absolute, 6),
        0xDE => (Dec, AbsoluteX, 7),
        0xC8 => (Iny, Implied, 2),
        0xCA => (Dex, Implied, 2),
        0xD0 => (Bne, Relative, 2),
        0xD8 => (Cld, Implied, 2),
        0xE0 => (Cpx, Immediate, 2),
        0xE4 => (Cpx, ZeroPage, 3),
        0xEC => (Cpx, Absolute, 4),
        0xE6 => (Inc, ZeroPage, 5),
        0xF6 => (Inc, ZeroPageX, 6),
        0xEE => (Inc, Absolute, 6),
        0xFE => (Inc, AbsoluteX, 7),
        0xE8 => (Inx, Implied, 2),
        0xEA => (Nop, Implied, 2),
        0xF0 => (Beq, Relative, 2),
        0xF8 => (Sed, Implied, 2),
        _ => return unofficial(opcode),
    };
    Decoded { op, mode, cycles, official: true }
}

/// Unofficial opcodes run as NOPs; only their length and base timing matter.
fn unofficial(opcode: u8) -> Decoded {
    use Mode::*;
    let bbb = ((opcode >> 2) & 0x07) as usize;
    let mode = if opcode & 0x9F == 0x02 {
        // KIL
        Implied
    } else if opcode & 0x01 == 0x01 {
        [IndirectX, ZeroPage, Immediate, Absolute, IndirectY, ZeroPageX, AbsoluteY, AbsoluteX][bbb]
    } else {
        [Immediate, ZeroPage, Implied, Absolute, Implied, ZeroPageX, Implied, AbsoluteX][bbb]
    };
    let cycles = match mode {
        ZeroPage => 3,
        ZeroPageX | Absolute | AbsoluteX | AbsoluteY => 4,
        IndirectX => 6,
        IndirectY => 5,
        _ => 2,
    };
    Decoded {
        op: Op::Nop,
        mode,
        cycles,
        official: false,
    }
}

/// MOS 6502 CPU state and execution engine
#[derive(Debug, Clone)]
pub struct Cpu6502 {
    /// Accumulator register
    pub a: u8,
    /// X index register
    pub x: u8,
    /// Y index register
    pub y: u8,
    /// Stack pointer (points to 0x0100 + sp)
    pub sp: u8,
    /// Status register (NV-BDIZC)
    pub status: u8,
    /// Program counter
    pub pc: u16,
    /// Total cycles executed
    pub cycles: u64,
    /// Cycles to idle before the next instruction (DMA)
    pub stall: u32,
    interrupt: Interrupt,
}

impl Default for Cpu6502 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu6502 {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,
            status: FLAG_UNUSED | FLAG_IRQ_DISABLE,
            pc: 0,
            cycles: 0,
            stall: 0,
            interrupt: Interrupt::None,
        }
    }

    /// Reset registers and load PC from the reset vector.
    pub fn reset<M: Memory6502>(&mut self, mem: &mut M) {
        self.pc = read_u16(mem, RESET_VECTOR);
        self.sp = 0xFD;
        self.status = FLAG_UNUSED | FLAG_IRQ_DISABLE;
        self.stall = 0;
        self.interrupt = Interrupt::None;
    }

    /// Latch an NMI; it is serviced before the next instruction.
    pub fn trigger_nmi(&mut self) {
        self.interrupt = Interrupt::Nmi;
    }

    /// Latch an IRQ unless interrupts are masked.
    pub fn trigger_irq(&mut self) {
        if self.status & FLAG_IRQ_DISABLE == 0 && self.interrupt == Interrupt::None {
            self.interrupt = Interrupt::Irq;
        }
    }

    pub fn pending_interrupt(&self) -> Interrupt {
        self.interrupt
    }

    pub fn add_stall(&mut self, cycles: u32) {
        self.stall += cycles;
    }

    #[inline]
    fn flag(&self, mask: u8) -> bool {
        self.status & mask != 0
    }

    #[inline]
    fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.status |= mask;
        } else {
            self.status &= !mask;
        }
    }

    fn set_zero_and_negative(&mut self, v: u8) {
        self.set_flag(FLAG_ZERO, v == 0);
        self.set_flag(FLAG_NEGATIVE, v & 0x80 != 0);
    }

    fn push_u8<M: Memory6502>(&mut self, mem: &mut M, v: u8) {
        mem.write(0x0100 | self.sp as u16, v);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop_u8<M: Memory6502>(&mut self, mem: &mut M) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        mem.read(0x0100 | self.sp as u16)
    }

    fn push_u16<M: Memory6502>(&mut self, mem: &mut M, v: u16) {
        self.push_u8(mem, (v >> 8) as u8);
        self.push_u8(mem, v as u8);
    }

    fn pop_u16<M: Memory6502>(&mut self, mem: &mut M) -> u16 {
        let lo = self.pop_u8(mem) as u16;
        let hi = self.pop_u8(mem) as u16;
        (hi << 8) | lo
    }

    fn service_interrupt<M: Memory6502>(&mut self, mem: &mut M, vector: u16) {
        self.push_u16(mem, self.pc);
        let pushed = (self.status & !FLAG_BREAK) | FLAG_UNUSED;
        self.push_u8(mem, pushed);
        self.status |= FLAG_IRQ_DISABLE;
        self.pc = read_u16(mem, vector);
    }

    /// Resolve the effective address for `mode`; the operand starts at `pc + 1`.
    fn operand_address<M: Memory6502>(&self, mem: &mut M, mode: Mode) -> (u16, bool) {
        let arg = self.pc.wrapping_add(1);
        match mode {
            Mode::Implied | Mode::Accumulator => (0, false),
            Mode::Immediate => (arg, false),
            Mode::ZeroPage => (mem.read(arg) as u16, false),
            Mode::ZeroPageX => (mem.read(arg).wrapping_add(self.x) as u16, false),
            Mode::ZeroPageY => (mem.read(arg).wrapping_add(self.y) as u16, false),
            Mode::Absolute => (read_u16(mem, arg), false),
            Mode::AbsoluteX => {
                let base = read_u16(mem, arg);
                let addr = base.wrapping_add(self.x as u16);
                (addr, pages_differ(base, addr))
            }
            Mode::AbsoluteY => {
                let base = read_u16(mem, arg);
                let addr = base.wrapping_add(self.y as u16);
                (addr, pages_differ(base, addr))
            }
            Mode::Indirect => {
                let ptr = read_u16(mem, arg);
                (read_u16_page_wrap(mem, ptr), false)
            }
            Mode::IndirectX => {
                let zp = mem.read(arg).wrapping_add(self.x);
                (read_u16_page_wrap(mem, zp as u16), false)
            }
            Mode::IndirectY => {
                let zp = mem.read(arg);
                let base = read_u16_page_wrap(mem, zp as u16);
                let addr = base.wrapping_add(self.y as u16);
                (addr, pages_differ(base, addr))
            }
            Mode::Relative => {
                let offset = mem.read(arg) as i8;
                let next = self.pc.wrapping_add(2);
                (next.wrapping_add(offset as u16), false)
            }
        }
    }

    /// Execute one instruction (or one stall cycle) and return cycles used,
    /// including any interrupt serviced first.
    pub fn step<M: Memory6502>(&mut self, mem: &mut M) -> u32 {
        if self.stall > 0 {
            self.stall -= 1;
            self.cycles += 1;
            return 1;
        }

        let start = self.cycles;

        match self.interrupt {
            Interrupt::Nmi => {
                log(LogCategory::Interrupts, LogLevel::Trace, || {
                    format!("NMI at PC={:04X}", self.pc)
                });
                self.service_interrupt(mem, NMI_VECTOR);
                self.cycles += 7;
            }
            Interrupt::Irq => {
                log(LogCategory::Interrupts, LogLevel::Trace, || {
                    format!("IRQ at PC={:04X}", self.pc)
                });
                self.service_interrupt(mem, IRQ_VECTOR);
                self.cycles += 7;
            }
            Interrupt::None => {}
        }
        self.interrupt = Interrupt::None;

        let opcode = mem.read(self.pc);
        let d = decode(opcode);
        if !d.official {
            log(LogCategory::CPU, LogLevel::Trace, || {
                format!("unofficial opcode {:02X} at PC={:04X}", opcode, self.pc)
            });
        }

        let (addr, page_crossed) = self.operand_address(mem, d.mode);
        self.pc = self.pc.wrapping_add(d.mode.size());
        self.cycles += d.cycles as u64;
        if page_crossed && d.op.page_penalty() {
            self.cycles += 1;
        }

        self.execute(mem, d.op, d.mode, addr);

        (self.cycles - start) as u32
    }

    fn branch(&mut self, taken: bool, target: u16) {
        if taken {
            self.cycles += if pages_differ(self.pc, target) { 2 } else { 1 };
            self.pc = target;
        }
    }

    fn compare(&mut self, reg: u8, val: u8) {
        self.set_zero_and_negative(reg.wrapping_sub(val));
        self.set_flag(FLAG_CARRY, reg >= val);
    }

    fn add_with_carry(&mut self, val: u8) {
        let sum = self.a as u16 + val as u16 + (self.status & FLAG_CARRY) as u16;
        let result = sum as u8;
        self.set_flag(FLAG_CARRY, sum > 0xFF);
        self.set_flag(
            FLAG_OVERFLOW,
            (!(self.a ^ val) & (self.a ^ result)) & 0x80 != 0,
        );
        self.a = result;
        self.set_zero_and_negative(result);
    }

    /// Shared read-modify-write path for shifts and rotates.
    fn modify<M: Memory6502, F>(&mut self, mem: &mut M, mode: Mode, addr: u16, f: F)
    where
        F: FnOnce(&mut Self, u8) -> u8,
    {
        if mode == Mode::Accumulator {
            let v = f(self, self.a);
            self.a = v;
            self.set_zero_and_negative(v);
        } else {
            let old = mem.read(addr);
            let v = f(self, old);
            mem.write(addr, v);
            self.set_zero_and_negative(v);
        }
    }

    fn execute<M: Memory6502>(&mut self, mem: &mut M, op: Op, mode: Mode, addr: u16) {
        match op {
            Op::Adc => {
                let v = mem.read(addr);
                self.add_with_carry(v);
            }
            Op::Sbc => {
                let v = mem.read(addr);
                self.add_with_carry(!v);
            }
            Op::And => {
                self.a &= mem.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Op::Ora => {
                self.a |= mem.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Op::Eor => {
                self.a ^= mem.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Op::Asl => self.modify(mem, mode, addr, |cpu, v| {
                cpu.set_flag(FLAG_CARRY, v & 0x80 != 0);
                v << 1
            }),
            Op::Lsr => self.modify(mem, mode, addr, |cpu, v| {
                cpu.set_flag(FLAG_CARRY, v & 0x01 != 0);
                v >> 1
            }),
            Op::Rol => self.modify(mem, mode, addr, |cpu, v| {
                let carry_in = cpu.status & FLAG_CARRY;
                cpu.set_flag(FLAG_CARRY, v & 0x80 != 0);
                (v << 1) | carry_in
            }),
            Op::Ror => self.modify(mem, mode, addr, |cpu, v| {
                let carry_in = (cpu.status & FLAG_CARRY) << 7;
                cpu.set_flag(FLAG_CARRY, v & 0x01 != 0);
                (v >> 1) | carry_in
            }),
            Op::Bcc => self.branch(!self.flag(FLAG_CARRY), addr),
            Op::Bcs => self.branch(self.flag(FLAG_CARRY), addr),
            Op::Beq => self.branch(self.flag(FLAG_ZERO), addr),
            Op::Bne => self.branch(!self.flag(FLAG_ZERO), addr),
            Op::Bmi => self.branch(self.flag(FLAG_NEGATIVE), addr),
            Op::Bpl => self.branch(!self.flag(FLAG_NEGATIVE), addr),
            Op::Bvs => self.branch(self.flag(FLAG_OVERFLOW), addr),
            Op::Bvc => self.branch(!self.flag(FLAG_OVERFLOW), addr),
            Op::Bit => {
                let v = mem.read(addr);
                self.set_flag(FLAG_ZERO, self.a & v == 0);
                self.set_flag(FLAG_OVERFLOW, v & 0x40 != 0);
                self.set_flag(FLAG_NEGATIVE, v & 0x80 != 0);
            }
            Op::Brk => {
                // BRK skips a padding byte
                let ret = self.pc.wrapping_add(1);
                self.push_u16(mem, ret);
                self.push_u8(mem, self.status | FLAG_BREAK | FLAG_UNUSED);
                self.status |= FLAG_IRQ_DISABLE;
                self.pc = read_u16(mem, IRQ_VECTOR);
            }
            Op::Clc => self.set_flag(FLAG_CARRY, false),
            Op::Cld => self.set_flag(FLAG_DECIMAL, false),
            Op::Cli => self.set_flag(FLAG_IRQ_DISABLE, false),
            Op::Clv => self.set_flag(FLAG_OVERFLOW, false),
            Op::Sec => self.set_flag(FLAG_CARRY, true),
            Op::Sed => self.set_flag(FLAG_DECIMAL, true),
            Op::Sei => self.set_flag(FLAG_IRQ_DISABLE, true),
            Op::Cmp => {
                let v = mem.read(addr);
                self.compare(self.a, v);
            }
            Op::Cpx => {
                let v = mem.read(addr);
                self.compare(self.x, v);
            }
            Op::Cpy => {
                let v = mem.read(addr);
                self.compare(self.y, v);
            }
            Op::Dec => {
                let v = mem.read(addr).wrapping_sub(1);
                mem.write(addr, v);
                self.set_zero_and_negative(v);
            }
            Op::Inc => {
                let v = mem.read(addr).wrapping_add(1);
                mem.write(addr, v);
                self.set_zero_and_negative(v);
            }
            Op::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.set_zero_and_negative(self.x);
            }
            Op::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.set_zero_and_negative(self.y);
            }
            Op::Inx => {
                self.x = self.x.wrapping_add(1);
                self.set_zero_and_negative(self.x);
            }
            Op::Iny => {
                self.y = self.y.wrapping_add(1);
                self.set_zero_and_negative(self.y);
            }
            Op::Jmp => self.pc = addr,
            Op::Jsr => {
                let ret = self.pc.wrapping_sub(1);
                self.push_u16(mem, ret);
                self.pc = addr;
            }
            Op::Rts => self.pc = self.pop_u16(mem).wrapping_add(1),
            Op::Rti => {
                self.status = (self.pop_u8(mem) & !FLAG_BREAK) | FLAG_UNUSED;
                self.pc = self.pop_u16(mem);
            }
            Op::Lda => {
                self.a = mem.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Op::Ldx => {
                self.x = mem.read(addr);
                self.set_zero_and_negative(self.x);
            }
            Op::Ldy => {
                self.y = mem.read(addr);
                self.set_zero_and_negative(self.y);
            }
            Op::Nop => {}
            Op::Pha => self.push_u8(mem, self.a),
            Op::Php => self.push_u8(mem, self.status | FLAG_BREAK | FLAG_UNUSED),
            Op::Pla => {
                self.a = self.pop_u8(mem);
                self.set_zero_and_negative(self.a);
            }
            Op::Plp => self.status = (self.pop_u8(mem) & !FLAG_BREAK) | FLAG_UNUSED,
            Op::Sta => mem.write(addr, self.a),
            Op::Stx => mem.write(addr, self.x),
            Op::Sty => mem.write(addr, self.y),
            Op::Tax => {
                self.x = self.a;
                self.set_zero_and_negative(self.x);
            }
            Op::Tay => {
                self.y = self.a;
                self.set_zero_and_negative(self.y);
            }
            Op::Tsx => {
                self.x = self.sp;
                self.set_zero_and_negative(self.x);
            }
            Op::Txa => {
                self.a = self.x;
                self.set_zero_and_negative(self.a);
            }
            Op::Txs => self.sp = self.x,
            Op::Tya => {
                self.a = self.y;
                self.set_zero_and_negative(self.a);
            }
        }
    }
}

impl Snapshot for Cpu6502 {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u16(self.pc);
        out.write_u8(self.sp);
        out.write_u8(self.a);
        out.write_u8(self.x);
        out.write_u8(self.y);
        out.write_u8(self.status);
        out.write_u64(self.cycles);
        out.write_u32(self.stall);
        out.write_u8(match self.interrupt {
            Interrupt::None => 0,
            Interrupt::Nmi => 1,
            Interrupt::Irq => 2,
        });
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.pc = input.read_u16()?;
        self.sp = input.read_u8()?;
        self.a = input.read_u8()?;
        self.x = input.read_u8()?;
        self.y = input.read_u8()?;
        self.status = input.read_u8()?;
        self.cycles = input.read_u64()?;
        self.stall = input.read_u32()?;
        self.interrupt = match input.read_u8()? {
            0 => Interrupt::None,
            1 => Interrupt::Nmi,
            2 => Interrupt::Irq,
            _ => return Err(StateError::Invalid("cpu interrupt kind")),
        };
        Ok(())
    }
}

#[inline]
fn pages_differ(a: u16, b: u16) -> bool {
    a & 0xFF00 != b & 0xFF00
}

fn read_u16<M: Memory6502>(mem: &mut M, addr: u16) -> u16 {
    let lo = mem.read(addr) as u16;
    let hi = mem.read(addr.wrapping_add(1)) as u16;
    (hi << 8) | lo
}

/// 16-bit read whose high byte wraps within the page (JMP ($xxFF) bug,
/// zero-page pointers).
fn read_u16_page_wrap<M: Memory6502>(mem: &mut M, addr: u16) -> u16 {
    let lo = mem.read(addr) as u16;
    let hi_addr = (addr & 0xFF00) | (addr.wrapping_add(1) & 0x00FF);
    let hi = mem.read(hi_addr) as u16;
    (hi << 8) | lo
}

/// Simple array-based memory implementation for testing
#[derive(Debug)]
pub struct ArrayMemory {
    pub data: Box<[u8; 0x10000]>,
}

impl ArrayMemory {
    pub fn new() -> Self {
        Self {
            data: Box::new([0; 0x10000]),
        }
    }

    /// Load a program into memory and set reset vector
    pub fn load_program(&mut self, offset: u16, data: &[u8]) {
        let off = offset as usize;
        self.data[off..off + data.len()].copy_from_slice(data);
        self.data[0xFFFC] = offset as u8;
        self.data[0xFFFD] = (offset >> 8) as u8;
    }
}

impl Default for ArrayMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory6502 for ArrayMemory {
    fn read(&mut self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.data[addr as usize] = val;
    }
}
