//! NES PPU (Picture Processing Unit) implementation.
//!
//! Dot-stepped model of the 2C02: one [`Ppu::step`] advances one PPU cycle.
//! Background tiles are fetched into a 64-bit shift register on the real
//! fetch schedule, sprites are evaluated at dot 257 of each visible line,
//! and pixels are written into a back buffer that becomes the front buffer
//! at the start of vertical blank.
//!
//! ## Memory Map
//!
//! - **$0000-$1FFF**: CHR ROM/RAM through the mapper
//! - **$2000-$2FFF**: Nametables (2KB internal VRAM, cartridge-selected mirroring)
//! - **$3F00-$3FFF**: Palette RAM (32 bytes, mirrored)
//!
//! ## Timing
//!
//! 341 dots per scanline, 262 scanlines per frame. Lines 0-239 are visible,
//! 241 raises vblank, 261 is the pre-render line. With rendering enabled the
//! pre-render line of odd frames is one dot shorter.

use nestor_core::logging::{log, LogCategory, LogLevel};
use nestor_core::state::{StateError, StateReader, StateWriter};
use nestor_core::types::Frame;
use nestor_core::{Snapshot, Subsystem};

use crate::cartridge::{Cartridge, Mirroring};
use crate::mappers::Mapper;

pub const SCREEN_WIDTH: u32 = 256;
pub const SCREEN_HEIGHT: u32 = 240;

/// Dots between the NMI condition rising and the CPU seeing it.
const NMI_DELAY: u8 = 15;

// 2C02 NES master palette (RGB), packed as 0xFFRRGGBB.
// This is a commonly used approximation; exact values vary by decoder.
const NES_MASTER_PALETTE: [u32; 64] = [
    0xFF545454, 0xFF001E74, 0xFF081090, 0xFF300088, 0xFF440064, 0xFF5C0030, 0xFF540400, 0xFF3C1800,
    0xFF202A00, 0xFF083A00, 0xFF004000, 0xFF003C00, 0xFF00323C, 0xFF000000, 0xFF000000, 0xFF000000,
    0xFF989698, 0xFF084CC4, 0xFF3032EC, 0xFF5C1EE4, 0xFF8814B0, 0xFFA01464, 0xFF982220, 0xFF783C00,
    0xFF545A00, 0xFF287200, 0xFF087C00, 0xFF007628, 0xFF006678, 0xFF000000, 0xFF000000, 0xFF000000,
    0xFFECEEEC, 0xFF4C9AEC, 0xFF787CEC, 0xFFB062EC, 0xFFE454EC, 0xFFEC58B4, 0xFFEC6A64, 0xFFD48820,
    0xFFA0AA00, 0xFF74C400, 0xFF4CD020, 0xFF38CC6C, 0xFF38B4CC, 0xFF3C3C3C, 0xFF000000, 0xFF000000,
    0xFFECEEEC, 0xFFA8CCEC, 0xFFBCBCEC, 0xFFD4B2EC, 0xFFECAEEC, 0xFFECAED4, 0xFFECC4B0, 0xFFE4D4A0,
    0xFFCCDCA0, 0xFFB4E4A0, 0xFFA8E4B4, 0xFFA0E4CC, 0xFFA0D4E4, 0xFFA0A2A0, 0xFF000000, 0xFF000000,
];

pub fn nes_palette_rgb(index: u8) -> u32 {
    NES_MASTER_PALETTE[(index & 0x3F) as usize]
}

fn palette_mirror_index(i: u16) -> usize {
    // $3F10/$3F14/$3F18/$3F1C mirror $3F00/$3F04/$3F08/$3F0C
    let i = (i & 0x1F) as usize;
    if i >= 0x10 && i % 4 == 0 {
        i - 0x10
    } else {
        i
    }
}

fn nametable_index(mirroring: Mirroring, addr: u16) -> usize {
    let addr = (addr - 0x2000) % 0x1000;
    let table = (addr / 0x0400) as usize;
    let offset = addr % 0x0400;
    ((mirroring.table_map()[table] * 0x0400 + offset) % 0x0800) as usize
}

/// What the PPU may touch while stepping or servicing a register access:
/// pattern tables go through the mapper, nametable mirroring comes from the
/// cartridge.
pub struct PpuBus<'a> {
    pub mapper: &'a mut Mapper,
    pub cart: &'a mut Cartridge,
}

impl PpuBus<'_> {
    fn read_pattern(&self, addr: u16) -> u8 {
        self.mapper.read(self.cart, addr)
    }
}

/// NES PPU (Picture Processing Unit).
#[derive(Debug, Clone)]
pub struct Ppu {
    cycle: u16,    // 0-340
    scanline: u16, // 0-261
    frame: u64,
    dots: u64,

    palette: [u8; 32],
    nametables: [u8; 0x800],
    oam: [u8; 256],
    front: Frame,
    back: Frame,

    // loopy registers
    v: u16,
    t: u16,
    x: u8,
    w: bool,
    odd_frame: bool,

    /// Last value written to any register (open-bus bits of $2002)
    register: u8,

    nmi_occurred: bool,
    nmi_output: bool,
    nmi_previous: bool,
    nmi_delay: u8,

    // background fetch latches
    name_table_byte: u8,
    attribute_table_byte: u8,
    low_tile_byte: u8,
    high_tile_byte: u8,
    tile_data: u64,

    // sprites for the current line
    sprite_count: usize,
    sprite_patterns: [u32; 8],
    sprite_positions: [u8; 8],
    sprite_priorities: [u8; 8],
    sprite_indexes: [u8; 8],

    ctrl: u8,
    mask: u8,
    sprite_zero_hit: bool,
    sprite_overflow: bool,
    oam_address: u8,
    buffered_data: u8,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl Ppu {
    pub fn new() -> Self {
        let mut ppu = Self {
            cycle: 0,
            scanline: 0,
            frame: 0,
            dots: 0,
            palette: [0; 32],
            nametables: [0; 0x800],
            oam: [0; 256],
            front: Frame::new(SCREEN_WIDTH, SCREEN_HEIGHT),
            back: Frame::new(SCREEN_WIDTH, SCREEN_HEIGHT),
            v: 0,
            t: 0,
            x: 0,
            w: false,
            odd_frame: false,
            register: 0,
            nmi_occurred: false,
            nmi_output: false,
            nmi_previous: false,
            nmi_delay: 0,
            name_table_byte: 0,
            attribute_table_byte: 0,
            low_tile_byte: 0,
            high_tile_byte: 0,
            tile_data: 0,
            sprite_count: 0,
            sprite_patterns: [0; 8],
            sprite_positions: [0; 8],
            sprite_priorities: [0; 8],
            sprite_indexes: [0; 8],
            ctrl: 0,
            mask: 0,
            sprite_zero_hit: false,
            sprite_overflow: false,
            oam_address: 0,
            buffered_data: 0,
        };
        ppu.reset();
        ppu
    }

    /// Power-up position: just after the visible area.
    pub fn reset(&mut self) {
        self.cycle = 340;
        self.scanline = 240;
        self.frame = 0;
        self.write_control(0);
        self.mask = 0;
        self.oam_address = 0;
    }

    pub fn cycle(&self) -> u16 {
        self.cycle
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    /// Completed frames since power-on.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Dots stepped since power-on.
    pub fn dots(&self) -> u64 {
        self.dots
    }

    pub fn ctrl(&self) -> u8 {
        self.ctrl
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn show_background(&self) -> bool {
        self.mask & 0x08 != 0
    }

    pub fn show_sprites(&self) -> bool {
        self.mask & 0x10 != 0
    }

    pub fn rendering_enabled(&self) -> bool {
        self.show_background() || self.show_sprites()
    }

    /// The last completed picture.
    pub fn front_buffer(&self) -> &Frame {
        &self.front
    }

    /// ARGB of the universal background colour.
    pub fn background_color(&self) -> u32 {
        nes_palette_rgb(self.read_palette(0))
    }

    fn read_palette(&self, addr: u16) -> u8 {
        self.palette[palette_mirror_index(addr)]
    }

    fn write_palette(&mut self, addr: u16, val: u8) {
        self.palette[palette_mirror_index(addr)] = val;
    }

    fn read(&self, bus: &PpuBus<'_>, addr: u16) -> u8 {
        let addr = addr % 0x4000;
        match addr {
            0x0000..=0x1FFF => bus.read_pattern(addr),
            0x2000..=0x3EFF => self.nametables[nametable_index(bus.cart.mirroring, addr)],
            _ => self.read_palette(addr),
        }
    }

    fn write(&mut self, bus: &mut PpuBus<'_>, addr: u16, val: u8) {
        let addr = addr % 0x4000;
        match addr {
            0x0000..=0x1FFF => bus.mapper.write(bus.cart, addr, val),
            0x2000..=0x3EFF => {
                self.nametables[nametable_index(bus.cart.mirroring, addr)] = val;
            }
            _ => self.write_palette(addr, val),
        }
    }

    /// CPU read of $2000-$2007 (already mirrored down).
    pub fn read_register(&mut self, bus: &mut PpuBus<'_>, reg: u16) -> u8 {
        match reg {
            0x2002 => self.read_status(),
            0x2004 => self.read_oam_data(),
            0x2007 => self.read_data(bus),
            _ => 0,
        }
    }

    /// CPU write of $2000-$2007 (already mirrored down).
    pub fn write_register(&mut self, bus: &mut PpuBus<'_>, reg: u16, val: u8) {
        self.register = val;
        match reg {
            0x2000 => self.write_control(val),
            0x2001 => self.mask = val,
            0x2003 => self.oam_address = val,
            0x2004 => self.write_oam_data(val),
            0x2005 => self.write_scroll(val),
            0x2006 => self.write_address(val),
            0x2007 => self.write_data(bus, val),
            _ => {}
        }
    }

    fn write_control(&mut self, val: u8) {
        self.ctrl = val;
        self.nmi_output = val & 0x80 != 0;
        self.nmi_change();
        // t: ....BA.. ........ = d: ......BA
        self.t = (self.t & 0xF3FF) | ((val as u16 & 0x03) << 10);
    }

    fn read_status(&mut self) -> u8 {
        let mut result = self.register & 0x1F;
        if self.sprite_overflow {
            result |= 0x20;
        }
        if self.sprite_zero_hit {
            result |= 0x40;
        }
        if self.nmi_occurred {
            result |= 0x80;
        }
        self.nmi_occurred = false;
        self.nmi_change();
        self.w = false;
        result
    }

    fn read_oam_data(&self) -> u8 {
        let data = self.oam[self.oam_address as usize];
        // attribute bits 2-4 do not exist
        if self.oam_address & 0x03 == 0x02 {
            data & 0xE3
        } else {
            data
        }
    }

    /// $2004 write, also the sink for $4014 DMA.
    pub fn write_oam_data(&mut self, val: u8) {
        self.oam[self.oam_address as usize] = val;
        self.oam_address = self.oam_address.wrapping_add(1);
    }

    fn write_scroll(&mut self, val: u8) {
        if !self.w {
            // t: ....... ...HGFED = d: HGFED...
            // x:              CBA = d: .....CBA
            self.t = (self.t & 0xFFE0) | (val as u16 >> 3);
            self.x = val & 0x07;
            self.w = true;
        } else {
            // t: .CBA..HG FED..... = d: HGFEDCBA
            self.t = (self.t & 0x8FFF) | ((val as u16 & 0x07) << 12);
            self.t = (self.t & 0xFC1F) | ((val as u16 & 0xF8) << 2);
            self.w = false;
        }
    }

    fn write_address(&mut self, val: u8) {
        if !self.w {
            self.t = (self.t & 0x80FF) | ((val as u16 & 0x3F) << 8);
            self.w = true;
        } else {
            self.t = (self.t & 0xFF00) | val as u16;
            self.v = self.t;
            self.w = false;
        }
    }

    fn increment_address(&mut self) {
        let step = if self.ctrl & 0x04 == 0 { 1 } else { 32 };
        self.v = self.v.wrapping_add(step);
    }

    fn read_data(&mut self, bus: &mut PpuBus<'_>) -> u8 {
        let mut value = self.read(bus, self.v);
        if self.v % 0x4000 < 0x3F00 {
            std::mem::swap(&mut self.buffered_data, &mut value);
        } else {
            // palette reads are immediate; the buffer sees the nametable underneath
            self.buffered_data = self.read(bus, self.v.wrapping_sub(0x1000));
        }
        self.increment_address();
        value
    }

    fn write_data(&mut self, bus: &mut PpuBus<'_>, val: u8) {
        self.write(bus, self.v, val);
        self.increment_address();
    }

    fn nmi_change(&mut self) {
        let nmi = self.nmi_output && self.nmi_occurred;
        if nmi && !self.nmi_previous {
            self.nmi_delay = NMI_DELAY;
        }
        self.nmi_previous = nmi;
    }

    fn set_vertical_blank(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
        self.nmi_occurred = true;
        self.nmi_change();
        log(LogCategory::PPU, LogLevel::Trace, || {
            format!("vblank, frame {}", self.frame)
        });
    }

    fn clear_vertical_blank(&mut self) {
        self.nmi_occurred = false;
        self.nmi_change();
    }

    fn increment_x(&mut self) {
        if self.v & 0x001F == 31 {
            self.v &= 0xFFE0;
            self.v ^= 0x0400;
        } else {
            self.v += 1;
        }
    }

    fn increment_y(&mut self) {
        if self.v & 0x7000 != 0x7000 {
            self.v += 0x1000;
            return;
        }
        self.v &= 0x8FFF;
        let mut y = (self.v & 0x03E0) >> 5;
        if y == 29 {
            y = 0;
            self.v ^= 0x0800;
        } else if y == 31 {
            y = 0;
        } else {
            y += 1;
        }
        self.v = (self.v & 0xFC1F) | (y << 5);
    }

    fn copy_x(&mut self) {
        self.v = (self.v & 0xFBE0) | (self.t & 0x041F);
    }

    fn copy_y(&mut self) {
        self.v = (self.v & 0x841F) | (self.t & 0x7BE0);
    }

    fn fetch_name_table_byte(&mut self, bus: &PpuBus<'_>) {
        let addr = 0x2000 | (self.v & 0x0FFF);
        self.name_table_byte = self.read(bus, addr);
    }

    fn fetch_attribute_table_byte(&mut self, bus: &PpuBus<'_>) {
        let v = self.v;
        let addr = 0x23C0 | (v & 0x0C00) | ((v >> 4) & 0x38) | ((v >> 2) & 0x07);
        let shift = ((v >> 4) & 4) | (v & 2);
        self.attribute_table_byte = ((self.read(bus, addr) >> shift) & 3) << 2;
    }

    fn background_tile_address(&self) -> u16 {
        let fine_y = (self.v >> 12) & 7;
        let table = if self.ctrl & 0x10 != 0 { 0x1000 } else { 0 };
        table + self.name_table_byte as u16 * 16 + fine_y
    }

    fn fetch_low_tile_byte(&mut self, bus: &PpuBus<'_>) {
        self.low_tile_byte = self.read(bus, self.background_tile_address());
    }

    fn fetch_high_tile_byte(&mut self, bus: &PpuBus<'_>) {
        self.high_tile_byte = self.read(bus, self.background_tile_address() + 8);
    }

    fn store_tile_data(&mut self) {
        let mut data: u32 = 0;
        for _ in 0..8 {
            let p1 = (self.low_tile_byte & 0x80) >> 7;
            let p2 = (self.high_tile_byte & 0x80) >> 6;
            self.low_tile_byte <<= 1;
            self.high_tile_byte <<= 1;
            data = (data << 4) | (self.attribute_table_byte | p1 | p2) as u32;
        }
        self.tile_data |= data as u64;
    }

    fn background_pixel(&self) -> u8 {
        if !self.show_background() {
            return 0;
        }
        let data = (self.tile_data >> 32) as u32 >> ((7 - self.x) * 4);
        (data & 0x0F) as u8
    }

    /// (sprite slot, colour) of the first opaque sprite pixel at this dot.
    fn sprite_pixel(&self) -> (usize, u8) {
        if !self.show_sprites() {
            return (0, 0);
        }
        for i in 0..self.sprite_count {
            let offset = (self.cycle as i32 - 1) - self.sprite_positions[i] as i32;
            if !(0..=7).contains(&offset) {
                continue;
            }
            let shift = (7 - offset) * 4;
            let color = ((self.sprite_patterns[i] >> shift) & 0x0F) as u8;
            if color % 4 == 0 {
                continue;
            }
            return (i, color);
        }
        (0, 0)
    }

    fn render_pixel(&mut self) {
        let x = self.cycle as u32 - 1;
        let y = self.scanline as u32;
        let mut background = self.background_pixel();
        let (i, mut sprite) = self.sprite_pixel();
        if x < 8 && self.mask & 0x02 == 0 {
            background = 0;
        }
        if x < 8 && self.mask & 0x04 == 0 {
            sprite = 0;
        }
        let b = background % 4 != 0;
        let s = sprite % 4 != 0;
        let color = match (b, s) {
            (false, false) => 0,
            (false, true) => sprite | 0x10,
            (true, false) => background,
            (true, true) => {
                if self.sprite_indexes[i] == 0 && x < 255 {
                    self.sprite_zero_hit = true;
                }
                if self.sprite_priorities[i] == 0 {
                    sprite | 0x10
                } else {
                    background
                }
            }
        };
        let mut index = self.read_palette(color as u16);
        if self.mask & 0x01 != 0 {
            index &= 0x30;
        }
        self.back.set_pixel(x, y, nes_palette_rgb(index));
    }

    fn fetch_sprite_pattern(&self, bus: &PpuBus<'_>, i: usize, row: i32) -> u32 {
        let tile = self.oam[i * 4 + 1];
        let attributes = self.oam[i * 4 + 2];
        let flip_v = attributes & 0x80 != 0;
        let addr = if self.ctrl & 0x20 == 0 {
            let row = if flip_v { 7 - row } else { row };
            let table = if self.ctrl & 0x08 != 0 { 0x1000 } else { 0 };
            table + tile as u16 * 16 + row as u16
        } else {
            let mut row = if flip_v { 15 - row } else { row };
            let table = (tile as u16 & 1) * 0x1000;
            let mut tile = tile & 0xFE;
            if row > 7 {
                tile += 1;
                row -= 8;
            }
            table + tile as u16 * 16 + row as u16
        };
        let a = (attributes & 3) << 2;
        let mut low = self.read(bus, addr);
        let mut high = self.read(bus, addr + 8);
        let mut data: u32 = 0;
        for _ in 0..8 {
            let (p1, p2);
            if attributes & 0x40 != 0 {
                p1 = low & 1;
                p2 = (high & 1) << 1;
                low >>= 1;
                high >>= 1;
            } else {
                p1 = (low & 0x80) >> 7;
                p2 = (high & 0x80) >> 6;
                low <<= 1;
                high <<= 1;
            }
            data = (data << 4) | (a | p1 | p2) as u32;
        }
        data
    }

    fn evaluate_sprites(&mut self, bus: &PpuBus<'_>) {
        let height = if self.ctrl & 0x20 == 0 { 8 } else { 16 };
        let mut count = 0;
        for i in 0..64 {
            let y = self.oam[i * 4];
            let a = self.oam[i * 4 + 2];
            let x = self.oam[i * 4 + 3];
            let row = self.scanline as i32 - y as i32;
            if !(0..height).contains(&row) {
                continue;
            }
            if count < 8 {
                self.sprite_patterns[count] = self.fetch_sprite_pattern(bus, i, row);
                self.sprite_positions[count] = x;
                self.sprite_priorities[count] = (a >> 5) & 1;
                self.sprite_indexes[count] = i as u8;
            }
            count += 1;
        }
        if count > 8 {
            count = 8;
            self.sprite_overflow = true;
        }
        self.sprite_count = count;
    }

    /// Advance the dot/scanline counters. Returns `true` when a delayed NMI
    /// becomes visible to the CPU.
    fn tick(&mut self) -> bool {
        let mut nmi = false;
        if self.nmi_delay > 0 {
            self.nmi_delay -= 1;
            if self.nmi_delay == 0 && self.nmi_output && self.nmi_occurred {
                nmi = true;
            }
        }

        if self.rendering_enabled() && self.odd_frame && self.scanline == 261 && self.cycle == 339 {
            self.cycle = 0;
            self.scanline = 0;
            self.frame += 1;
            self.odd_frame = !self.odd_frame;
            return nmi;
        }

        self.cycle += 1;
        if self.cycle > 340 {
            self.cycle = 0;
            self.scanline += 1;
            if self.scanline > 261 {
                self.scanline = 0;
                self.frame += 1;
                self.odd_frame = !self.odd_frame;
            }
        }
        nmi
    }
}

impl Snapshot for Ppu {
    fn snapshot(&self, out: &mut StateWriter) {
        out.write_u16(self.cycle);
        out.write_u16(self.scanline);
        out.write_u64(self.frame);
        out.write_u64(self.dots);
        out.write_bytes(&self.palette);
        out.write_bytes(&self.nametables);
        out.write_bytes(&self.oam);
        out.write_u16(self.v);
        out.write_u16(self.t);
        out.write_u8(self.x);
        out.write_bool(self.w);
        out.write_bool(self.odd_frame);
        out.write_u8(self.register);
        out.write_bool(self.nmi_occurred);
        out.write_bool(self.nmi_output);
        out.write_bool(self.nmi_previous);
        out.write_u8(self.nmi_delay);
        out.write_u8(self.name_table_byte);
        out.write_u8(self.attribute_table_byte);
        out.write_u8(self.low_tile_byte);
        out.write_u8(self.high_tile_byte);
        out.write_u64(self.tile_data);
        out.write_u8(self.sprite_count as u8);
        for pattern in self.sprite_patterns {
            out.write_u32(pattern);
        }
        out.write_bytes(&self.sprite_positions);
        out.write_bytes(&self.sprite_priorities);
        out.write_bytes(&self.sprite_indexes);
        out.write_u8(self.ctrl);
        out.write_u8(self.mask);
        out.write_bool(self.sprite_zero_hit);
        out.write_bool(self.sprite_overflow);
        out.write_u8(self.oam_address);
        out.write_u8(self.buffered_data);
        // a frame in progress lives in the back buffer
        write_frame(out, &self.front);
        write_frame(out, &self.back);
    }

    fn restore(&mut self, input: &mut StateReader<'_>) -> Result<(), StateError> {
        self.cycle = input.read_u16()?;
        self.scanline = input.read_u16()?;
        if self.cycle > 340 || self.scanline > 261 {
            return Err(StateError::Invalid("ppu position"));
        }
        self.frame = input.read_u64()?;
        self.dots = input.read_u64()?;
        input.read_into(&mut self.palette)?;
        input.read_into(&mut self.nametables)?;
        input.read_into(&mut self.oam)?;
        self.v = input.read_u16()?;
        self.t = input.read_u16()?;
        self.x = input.read_u8()? & 0x07;
        self.w = input.read_bool()?;
        self.odd_frame = input.read_bool()?;
        self.register = input.read_u8()?;
        self.nmi_occurred = input.read_bool()?;
        self.nmi_output = input.read_bool()?;
        self.nmi_previous = input.read_bool()?;
        self.nmi_delay = input.read_u8()?;
        self.name_table_byte = input.read_u8()?;
        self.attribute_table_byte = input.read_u8()?;
        self.low_tile_byte = input.read_u8()?;
        self.high_tile_byte = input.read_u8()?;
        self.tile_data = input.read_u64()?;
        self.sprite_count = (input.read_u8()? as usize).min(8);
        for pattern in self.sprite_patterns.iter_mut() {
            *pattern = input.read_u32()?;
        }
        input.read_into(&mut self.sprite_positions)?;
        input.read_into(&mut self.sprite_priorities)?;
        input.read_into(&mut self.sprite_indexes)?;
        self.ctrl = input.read_u8()?;
        self.mask = input.read_u8()?;
        self.sprite_zero_hit = input.read_bool()?;
        self.sprite_overflow = input.read_bool()?;
        self.oam_address = input.read_u8()?;
        self.buffered_data = input.read_u8()?;
        read_frame(input, &mut self.front)?;
        read_frame(input, &mut self.back)
    }
}

fn write_frame(out: &mut StateWriter, frame: &Frame) {
    for &pixel in &frame.pixels {
        out.write_u32(pixel);
    }
}

fn read_frame(input: &mut StateReader<'_>, frame: &mut Frame) -> Result<(), StateError> {
    for pixel in frame.pixels.iter_mut() {
        *pixel = input.read_u32()?;
    }
    Ok(())
}

impl Subsystem for Ppu {
    type Bus<'a> = PpuBus<'a>;
    /// NMI raised towards the CPU on this dot
    type Output = bool;

    fn step(&mut self, bus: PpuBus<'_>) -> bool {
        let nmi = self.tick();
        self.dots += 1;

        let rendering = self.rendering_enabled();
        let pre_line = self.scanline == 261;
        let visible_line = self.scanline < 240;
        let render_line = pre_line || visible_line;
        let pre_fetch_cycle = (321..=336).contains(&self.cycle);
        let visible_cycle = (1..=256).contains(&self.cycle);
        let fetch_cycle = pre_fetch_cycle || visible_cycle;

        if rendering {
            if visible_line && visible_cycle {
                self.render_pixel();
            }
            if render_line && fetch_cycle {
                self.tile_data <<= 4;
                match self.cycle % 8 {
                    1 => self.fetch_name_table_byte(&bus),
                    3 => self.fetch_attribute_table_byte(&bus),
                    5 => self.fetch_low_tile_byte(&bus),
                    7 => self.fetch_high_tile_byte(&bus),
                    0 => self.store_tile_data(),
                    _ => {}
                }
            }
            if pre_line && (280..=304).contains(&self.cycle) {
                self.copy_y();
            }
            if render_line {
                if fetch_cycle && self.cycle % 8 == 0 {
                    self.increment_x();
                }
                if self.cycle == 256 {
                    self.increment_y();
                }
                if self.cycle == 257 {
                    self.copy_x();
                }
            }
            if self.cycle == 257 {
                if visible_line {
                    self.evaluate_sprites(&bus);
                } else {
                    self.sprite_count = 0;
                }
            }
        }

        if self.scanline == 241 && self.cycle == 1 {
            self.set_vertical_blank();
        }
        if pre_line && self.cycle == 1 {
            self.clear_vertical_blank();
            self.sprite_zero_hit = false;
            self.sprite_overflow = false;
        }

        nmi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::Nrom;

    const DOTS_PER_FRAME: u64 = 341 * 262;
    /// From the power-on position (240, 340) to the first (0, 0).
    const TO_FIRST_FRAME: u64 = 1 + 21 * 341;

    fn parts() -> (Mapper, Cartridge) {
        let cart = Cartridge::from_parts(vec![0; 0x4000], Vec::new(), 0, Mirroring::Horizontal);
        (Mapper::Nrom(Nrom::new()), cart)
    }

    fn write(ppu: &mut Ppu, mapper: &mut Mapper, cart: &mut Cartridge, reg: u16, val: u8) {
        ppu.write_register(&mut PpuBus { mapper, cart }, reg, val);
    }

    fn read(ppu: &mut Ppu, mapper: &mut Mapper, cart: &mut Cartridge, reg: u16) -> u8 {
        ppu.read_register(&mut PpuBus { mapper, cart }, reg)
    }

    fn run(ppu: &mut Ppu, mapper: &mut Mapper, cart: &mut Cartridge, dots: u64) -> u32 {
        let mut nmis = 0;
        for _ in 0..dots {
            if ppu.step(PpuBus { mapper, cart }) {
                nmis += 1;
            }
        }
        nmis
    }

    fn set_addr(ppu: &mut Ppu, m: &mut Mapper, c: &mut Cartridge, addr: u16) {
        write(ppu, m, c, 0x2006, (addr >> 8) as u8);
        write(ppu, m, c, 0x2006, addr as u8);
    }

    #[test]
    fn test_palette_mirror_index() {
        assert_eq!(palette_mirror_index(0x00), 0x00);
        assert_eq!(palette_mirror_index(0x10), 0x00);
        assert_eq!(palette_mirror_index(0x14), 0x04);
        assert_eq!(palette_mirror_index(0x1C), 0x0C);
        assert_eq!(palette_mirror_index(0x11), 0x11);
        assert_eq!(palette_mirror_index(0x3F), 0x1F);
    }

    #[test]
    fn test_nes_palette_rgb() {
        assert_eq!(nes_palette_rgb(0x0F), 0xFF000000);
        assert_eq!(nes_palette_rgb(0x30), 0xFFECEEEC);
        assert_eq!(nes_palette_rgb(0x40), nes_palette_rgb(0x00));
    }

    #[test]
    fn test_nametable_mirroring() {
        assert_eq!(nametable_index(Mirroring::Horizontal, 0x2400), 0x000);
        assert_eq!(nametable_index(Mirroring::Horizontal, 0x2800), 0x400);
        assert_eq!(nametable_index(Mirroring::Vertical, 0x2400), 0x400);
        assert_eq!(nametable_index(Mirroring::Vertical, 0x2C05), 0x405);
        assert_eq!(nametable_index(Mirroring::SingleScreenUpper, 0x2000), 0x400);
        assert_eq!(nametable_index(Mirroring::SingleScreenLower, 0x2C00), 0x000);
        // $3000-$3EFF mirrors $2000-$2EFF
        assert_eq!(nametable_index(Mirroring::Vertical, 0x3405), 0x405);
    }

    #[test]
    fn test_ppudata_read_is_buffered() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        set_addr(&mut ppu, &mut m, &mut c, 0x2000);
        write(&mut ppu, &mut m, &mut c, 0x2007, 0xAB);
        write(&mut ppu, &mut m, &mut c, 0x2007, 0xCD);
        set_addr(&mut ppu, &mut m, &mut c, 0x2000);
        let _stale = read(&mut ppu, &mut m, &mut c, 0x2007);
        assert_eq!(read(&mut ppu, &mut m, &mut c, 0x2007), 0xAB);
        assert_eq!(read(&mut ppu, &mut m, &mut c, 0x2007), 0xCD);
    }

    #[test]
    fn test_palette_read_is_immediate() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        set_addr(&mut ppu, &mut m, &mut c, 0x3F10);
        write(&mut ppu, &mut m, &mut c, 0x2007, 0x2A);
        set_addr(&mut ppu, &mut m, &mut c, 0x3F00);
        assert_eq!(read(&mut ppu, &mut m, &mut c, 0x2007), 0x2A);
        assert_eq!(ppu.background_color(), nes_palette_rgb(0x2A));
    }

    #[test]
    fn test_vram_increment_mode() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        write(&mut ppu, &mut m, &mut c, 0x2000, 0x04);
        set_addr(&mut ppu, &mut m, &mut c, 0x2000);
        write(&mut ppu, &mut m, &mut c, 0x2007, 1);
        write(&mut ppu, &mut m, &mut c, 0x2007, 2);
        assert_eq!(ppu.nametables[0], 1);
        assert_eq!(ppu.nametables[32], 2);
    }

    #[test]
    fn test_chr_ram_written_through_mapper() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        set_addr(&mut ppu, &mut m, &mut c, 0x0010);
        write(&mut ppu, &mut m, &mut c, 0x2007, 0x77);
        assert_eq!(c.read_chr(0x10), 0x77);
    }

    #[test]
    fn test_ppuscroll_and_ppuaddr_share_latch() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        write(&mut ppu, &mut m, &mut c, 0x2005, 0x7D); // coarse X 15, fine X 5
        assert_eq!(ppu.x, 5);
        assert_eq!(ppu.t & 0x1F, 15);
        assert!(ppu.w);
        read(&mut ppu, &mut m, &mut c, 0x2002);
        assert!(!ppu.w);
        write(&mut ppu, &mut m, &mut c, 0x2006, 0x3F);
        write(&mut ppu, &mut m, &mut c, 0x2006, 0x01);
        assert_eq!(ppu.v, 0x3F01);
    }

    #[test]
    fn test_oam_data_and_address_wrap() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        write(&mut ppu, &mut m, &mut c, 0x2003, 0xFF);
        write(&mut ppu, &mut m, &mut c, 0x2004, 0x11);
        write(&mut ppu, &mut m, &mut c, 0x2004, 0x22);
        assert_eq!(ppu.oam[0xFF], 0x11);
        assert_eq!(ppu.oam[0x00], 0x22);
        write(&mut ppu, &mut m, &mut c, 0x2003, 0x02);
        ppu.oam[2] = 0xFF;
        assert_eq!(read(&mut ppu, &mut m, &mut c, 0x2004), 0xE3);
    }

    #[test]
    fn test_frame_counter_advances_once_per_frame() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        assert_eq!(ppu.frame_count(), 0);
        run(&mut ppu, &mut m, &mut c, TO_FIRST_FRAME);
        assert_eq!(ppu.frame_count(), 1);
        assert_eq!((ppu.scanline(), ppu.cycle()), (0, 0));
        run(&mut ppu, &mut m, &mut c, DOTS_PER_FRAME);
        assert_eq!(ppu.frame_count(), 2);
        assert_eq!(ppu.dots(), TO_FIRST_FRAME + DOTS_PER_FRAME);
    }

    #[test]
    fn test_odd_frames_skip_a_dot_when_rendering() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        write(&mut ppu, &mut m, &mut c, 0x2001, 0x08);
        run(&mut ppu, &mut m, &mut c, TO_FIRST_FRAME);
        assert_eq!(ppu.frame_count(), 1);
        // frame 1 is odd
        run(&mut ppu, &mut m, &mut c, DOTS_PER_FRAME - 1);
        assert_eq!(ppu.frame_count(), 2);
        run(&mut ppu, &mut m, &mut c, DOTS_PER_FRAME);
        assert_eq!(ppu.frame_count(), 3);
    }

    #[test]
    fn test_nmi_delivered_after_vblank_when_enabled() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        run(&mut ppu, &mut m, &mut c, TO_FIRST_FRAME);
        write(&mut ppu, &mut m, &mut c, 0x2000, 0x80);
        // reach line 241 dot 1, then the NMI delay
        assert_eq!(run(&mut ppu, &mut m, &mut c, 241 * 341 + 1), 0);
        assert_eq!(run(&mut ppu, &mut m, &mut c, NMI_DELAY as u64), 1);
        assert_eq!(read(&mut ppu, &mut m, &mut c, 0x2002) & 0x80, 0x80);
        assert_eq!(read(&mut ppu, &mut m, &mut c, 0x2002) & 0x80, 0);
    }

    #[test]
    fn test_no_nmi_when_disabled() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        assert_eq!(run(&mut ppu, &mut m, &mut c, 2 * DOTS_PER_FRAME), 0);
    }

    #[test]
    fn test_status_read_before_delay_suppresses_nmi() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        run(&mut ppu, &mut m, &mut c, TO_FIRST_FRAME);
        write(&mut ppu, &mut m, &mut c, 0x2000, 0x80);
        run(&mut ppu, &mut m, &mut c, 241 * 341 + 1);
        read(&mut ppu, &mut m, &mut c, 0x2002);
        assert_eq!(run(&mut ppu, &mut m, &mut c, NMI_DELAY as u64 * 2), 0);
    }

    #[test]
    fn test_sprite_overflow_flag() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        for i in 0..9 {
            ppu.oam[i * 4] = 10;
        }
        for i in 9..64 {
            ppu.oam[i * 4] = 0xF0;
        }
        ppu.scanline = 12;
        ppu.evaluate_sprites(&PpuBus { mapper: &mut m, cart: &mut c });
        assert!(ppu.sprite_overflow);
        assert_eq!(ppu.sprite_count, 8);
    }

    #[test]
    fn test_sprite_overflow_not_set_with_8_sprites() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        for i in 0..64 {
            ppu.oam[i * 4] = if i < 8 { 10 } else { 0xF0 };
        }
        ppu.scanline = 17;
        ppu.evaluate_sprites(&PpuBus { mapper: &mut m, cart: &mut c });
        assert!(!ppu.sprite_overflow);
        assert_eq!(ppu.sprite_count, 8);
    }

    #[test]
    fn test_16_pixel_sprites_cover_more_lines() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        for i in 0..64 {
            ppu.oam[i * 4] = if i == 0 { 10 } else { 0xF0 };
        }
        ppu.scanline = 22;
        ppu.evaluate_sprites(&PpuBus { mapper: &mut m, cart: &mut c });
        assert_eq!(ppu.sprite_count, 0);
        write(&mut ppu, &mut m, &mut c, 0x2000, 0x20);
        ppu.evaluate_sprites(&PpuBus { mapper: &mut m, cart: &mut c });
        assert_eq!(ppu.sprite_count, 1);
    }

    #[test]
    fn test_rendered_backdrop_reaches_front_buffer() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        set_addr(&mut ppu, &mut m, &mut c, 0x3F00);
        write(&mut ppu, &mut m, &mut c, 0x2007, 0x21);
        write(&mut ppu, &mut m, &mut c, 0x2001, 0x0A);
        run(&mut ppu, &mut m, &mut c, TO_FIRST_FRAME);
        // one full visible frame, up to the buffer swap
        run(&mut ppu, &mut m, &mut c, 241 * 341 + 1);
        let front = ppu.front_buffer();
        assert_eq!(front.width, SCREEN_WIDTH);
        assert!(front.pixels.iter().all(|&p| p == nes_palette_rgb(0x21)));
    }

    #[test]
    fn test_increment_y_wraps_nametable() {
        let mut ppu = Ppu::new();
        ppu.v = 0x7000 | (29 << 5);
        ppu.increment_y();
        assert_eq!(ppu.v, 0x0800);
        ppu.v = 0x001F;
        ppu.increment_x();
        assert_eq!(ppu.v, 0x0400);
    }

    #[test]
    fn test_snapshot_restores_registers_and_both_buffers() {
        let mut ppu = Ppu::new();
        let (mut m, mut c) = parts();
        set_addr(&mut ppu, &mut m, &mut c, 0x3F00);
        write(&mut ppu, &mut m, &mut c, 0x2007, 0x16);
        write(&mut ppu, &mut m, &mut c, 0x2001, 0x0A);
        write(&mut ppu, &mut m, &mut c, 0x2000, 0x90);
        // one completed frame plus the top of the next one
        run(&mut ppu, &mut m, &mut c, TO_FIRST_FRAME + 241 * 341 + 1 + 100 * 341);
        ppu.oam[7] = 0x42;
        let mut w = StateWriter::new();
        ppu.snapshot(&mut w);
        let bytes = w.into_bytes();

        let mut other = Ppu::new();
        other.restore(&mut StateReader::new(&bytes)).unwrap();
        assert_eq!(other.ctrl(), 0x90);
        assert_eq!(other.cycle(), ppu.cycle());
        assert_eq!(other.scanline(), ppu.scanline());
        assert_eq!(other.dots(), ppu.dots());
        assert_eq!(other.oam[7], 0x42);
        assert_eq!(other.front_buffer(), ppu.front_buffer());
        assert_eq!(other.back.pixels[..100 * 256], ppu.back.pixels[..100 * 256]);
        assert!(other.back.pixels[..256].iter().all(|&p| p == nes_palette_rgb(0x16)));

        // finishing the half-drawn frame gives the same picture on both
        run(&mut ppu, &mut m, &mut c, DOTS_PER_FRAME);
        let (mut m2, mut c2) = parts();
        run(&mut other, &mut m2, &mut c2, DOTS_PER_FRAME);
        assert_eq!(other.front_buffer(), ppu.front_buffer());
    }

    #[test]
    fn test_truncated_pixels_are_rejected() {
        let ppu = Ppu::new();
        let mut w = StateWriter::new();
        ppu.snapshot(&mut w);
        let bytes = w.into_bytes();
        let mut other = Ppu::new();
        assert!(other
            .restore(&mut StateReader::new(&bytes[..bytes.len() - 1]))
            .is_err());
    }
}
