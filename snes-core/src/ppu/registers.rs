//! The PPU's memory-mapped register surface ($2100-$213F write, $2134-$213F read), plus the
//! handful of double-write/latch quirks the hardware documents for this window.

use bincode::{Decode, Encode};
use emu_common::num::{GetBit, U16Ext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum BgMode {
    Mode0,
    Mode1,
    Mode2,
    Mode3,
    Mode4,
    Mode5,
    Mode6,
    Mode7,
}

impl BgMode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::Mode0,
            1 => Self::Mode1,
            2 => Self::Mode2,
            3 => Self::Mode3,
            4 => Self::Mode4,
            5 => Self::Mode5,
            6 => Self::Mode6,
            _ => Self::Mode7,
        }
    }

    /// Bits per pixel for each of the four background layers in this mode; `0` means the layer
    /// does not exist in this mode.
    pub fn bg_bpp(self) -> [u8; 4] {
        match self {
            Self::Mode0 => [2, 2, 2, 2],
            Self::Mode1 => [4, 4, 2, 0],
            Self::Mode2 => [4, 4, 0, 0],
            Self::Mode3 => [8, 4, 0, 0],
            Self::Mode4 => [8, 2, 0, 0],
            Self::Mode5 => [4, 2, 0, 0],
            Self::Mode6 => [4, 0, 0, 0],
            Self::Mode7 => [8, 0, 0, 0],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct BgLayerRegs {
    pub tilemap_addr: u16,
    pub tilemap_mirror_h: bool,
    pub tilemap_mirror_v: bool,
    pub chr_addr: u16,
    pub hofs: u16,
    pub vofs: u16,
    pub mosaic_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum VramIncrementMode {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct Mode7Matrix {
    pub a: i16,
    pub b: i16,
    pub c: i16,
    pub d: i16,
    pub center_x: i16,
    pub center_y: i16,
    pub flip_h: bool,
    pub flip_v: bool,
    pub screen_over: u8,
    pub extbg: bool,
}

impl Default for Mode7Matrix {
    fn default() -> Self {
        Self {
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            center_x: 0,
            center_y: 0,
            flip_h: false,
            flip_v: false,
            screen_over: 0,
            extbg: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct WindowRegs {
    pub w1_left: u8,
    pub w1_right: u8,
    pub w2_left: u8,
    pub w2_right: u8,
    /// Per-layer (4 BGs + OBJ + color-math) window-1/window-2 enable and invert bits, packed as
    /// read from `$2123`-`$2125`.
    pub enable_bits: [u8; 6],
    /// Per-layer window combination logic (OR/AND/XOR/XNOR), from `$2126`-`$2129`.
    pub combine_logic: [u8; 6],
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct ColorMathRegs {
    pub add_subtract: bool,
    pub half: bool,
    pub backdrop_enabled: bool,
    pub direct_color: bool,
    /// Per-layer (4 BGs + OBJ + backdrop) color math enable bits from `$2131`.
    pub enable_bits: [bool; 6],
    pub clip_to_black: u8,
    pub prevent_math: u8,
    pub fixed_color: (u8, u8, u8),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    pub forced_blank: bool,
    pub brightness: u8,

    pub obj_size_select: u8,
    pub obj_base_addr: u16,
    pub obj_gap: u16,
    pub oam_addr: u16,
    pub oam_priority_rotation: bool,
    oam_write_latch: Option<u8>,
    pub oam_addr_reload: u16,

    pub bg_mode: BgMode,
    pub bg3_priority: bool,
    pub bg: [BgLayerRegs; 4],
    bg_hofs_latch: u8,
    bg_vofs_latch: u8,

    pub mosaic_size: u8,

    pub vram_increment_mode: VramIncrementMode,
    pub vram_increment_step: u16,
    pub vram_addr_remap: u8,
    pub vram_addr: u16,
    vram_prefetch: u16,

    pub mode7: Mode7Matrix,
    mode7_latch: u8,
    mode7_multiply_result: i32,

    pub cgram_addr: u8,
    cgram_write_latch: Option<u8>,
    cgram_read_buffer: u8,

    pub windows: WindowRegs,
    pub main_screen_enable: u8,
    pub sub_screen_enable: u8,
    pub main_screen_window_enable: u8,
    pub sub_screen_window_enable: u8,

    pub color_math: ColorMathRegs,

    pub interlace: bool,
    pub overscan_enabled: bool,
    pub obj_interlace: bool,
    pub pseudo_hires: bool,

    pub hv_latched_h: u16,
    pub hv_latched_v: u16,
    hv_latch_flipflop: bool,

    pub open_bus: u8,

    pub time_over: bool,
    pub range_over: bool,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            forced_blank: true,
            brightness: 0,
            obj_size_select: 0,
            obj_base_addr: 0,
            obj_gap: 0,
            oam_addr: 0,
            oam_priority_rotation: false,
            oam_write_latch: None,
            oam_addr_reload: 0,
            bg_mode: BgMode::Mode0,
            bg3_priority: false,
            bg: [BgLayerRegs::default(); 4],
            bg_hofs_latch: 0,
            bg_vofs_latch: 0,
            mosaic_size: 0,
            vram_increment_mode: VramIncrementMode::High,
            vram_increment_step: 1,
            vram_addr_remap: 0,
            vram_addr: 0,
            vram_prefetch: 0,
            mode7: Mode7Matrix::default(),
            mode7_latch: 0,
            mode7_multiply_result: 0,
            cgram_addr: 0,
            cgram_write_latch: None,
            cgram_read_buffer: 0,
            windows: WindowRegs::default(),
            main_screen_enable: 0,
            sub_screen_enable: 0,
            main_screen_window_enable: 0,
            sub_screen_window_enable: 0,
            color_math: ColorMathRegs::default(),
            interlace: false,
            overscan_enabled: false,
            obj_interlace: false,
            pseudo_hires: false,
            hv_latched_h: 0,
            hv_latched_v: 0,
            hv_latch_flipflop: false,
            open_bus: 0,
            time_over: false,
            range_over: false,
        }
    }

    /// Write to any of `$2100`-`$2133`.
    pub fn write(&mut self, register: u16, value: u8, vram: &mut [u8], cgram: &mut [u8; 512], oam: &mut [u8; 544]) {
        match register {
            0x00 => {
                self.forced_blank = value.bit(7);
                self.brightness = value & 0x0F;
            }
            0x01 => {
                self.obj_size_select = (value >> 5) & 0x07;
                self.obj_gap = u16::from((value >> 3) & 0x03) * 0x1000;
                self.obj_base_addr = u16::from(value & 0x07) * 0x2000;
            }
            0x02 => {
                self.oam_addr = u16::from_le_bytes([value, self.oam_addr.msb()]) & 0x01FF;
                self.oam_addr_reload = self.oam_addr;
            }
            0x03 => {
                self.oam_priority_rotation = value.bit(7);
                self.oam_addr = u16::from_le_bytes([self.oam_addr.lsb(), value & 0x01]) & 0x01FF;
                self.oam_addr_reload = self.oam_addr;
            }
            0x04 => self.write_oamdata(value, oam),
            0x05 => {
                self.bg_mode = BgMode::from_bits(value);
                self.bg3_priority = value.bit(3);
            }
            0x06 => {
                self.mosaic_size = (value >> 4) & 0x0F;
                for bg in 0..4 {
                    self.bg[bg].mosaic_enabled = value.bit(bg as u8);
                }
            }
            0x07..=0x0A => {
                let bg = (register - 0x07) as usize;
                self.bg[bg].tilemap_addr = u16::from(value >> 2) * 0x0400;
                self.bg[bg].tilemap_mirror_h = value.bit(0);
                self.bg[bg].tilemap_mirror_v = value.bit(1);
            }
            0x0B => {
                self.bg[0].chr_addr = u16::from(value & 0x0F) * 0x1000;
                self.bg[1].chr_addr = u16::from(value >> 4) * 0x1000;
            }
            0x0C => {
                self.bg[2].chr_addr = u16::from(value & 0x0F) * 0x1000;
                self.bg[3].chr_addr = u16::from(value >> 4) * 0x1000;
            }
            0x0D..=0x14 => self.write_bg_scroll(register, value),
            0x15 => {
                self.vram_increment_mode =
                    if value.bit(7) { VramIncrementMode::High } else { VramIncrementMode::Low };
                self.vram_addr_remap = (value >> 2) & 0x03;
                self.vram_increment_step = match value & 0x03 {
                    0 => 1,
                    1 => 32,
                    _ => 128,
                };
            }
            0x16 => {
                self.vram_addr = u16::from_le_bytes([value, self.vram_addr.msb()]);
                self.refresh_vram_prefetch(vram);
            }
            0x17 => {
                self.vram_addr = u16::from_le_bytes([self.vram_addr.lsb(), value]);
                self.refresh_vram_prefetch(vram);
            }
            0x18 => {
                self.write_vram_byte(0, value, vram);
                if matches!(self.vram_increment_mode, VramIncrementMode::Low) {
                    self.increment_vram_addr();
                }
            }
            0x19 => {
                self.write_vram_byte(1, value, vram);
                if matches!(self.vram_increment_mode, VramIncrementMode::High) {
                    self.increment_vram_addr();
                }
            }
            0x1A => self.interlace = value.bit(0),
            0x1B => self.mode7.a = self.latch_mode7_word(value),
            0x1C => self.mode7.b = self.latch_mode7_word(value),
            0x1D => self.mode7.c = self.latch_mode7_word(value),
            0x1E => self.mode7.d = self.latch_mode7_word(value),
            0x1F => {
                let combined = self.latch_mode7_word(value);
                self.mode7.center_x = combined;
            }
            0x20 => {
                let combined = self.latch_mode7_word(value);
                self.mode7.center_y = combined;
            }
            0x21 => self.cgram_addr = value,
            0x22 => self.write_cgdata(value, cgram),
            0x23..=0x25 => self.write_window_mask(register, value),
            0x26 => self.windows.w1_left = value,
            0x27 => self.windows.w1_right = value,
            0x28 => self.windows.w2_left = value,
            0x29 => self.windows.w2_right = value,
            0x2A | 0x2B => self.write_window_logic(register, value),
            0x2C => self.main_screen_enable = value & 0x1F,
            0x2D => self.sub_screen_enable = value & 0x1F,
            0x2E => self.main_screen_window_enable = value & 0x1F,
            0x2F => self.sub_screen_window_enable = value & 0x1F,
            0x30 => {
                self.color_math.direct_color = value.bit(0);
                self.color_math.backdrop_enabled = (value >> 4) & 0x03 != 0;
                self.color_math.prevent_math = (value >> 4) & 0x03;
                self.color_math.clip_to_black = (value >> 6) & 0x03;
            }
            0x31 => {
                self.color_math.add_subtract = value.bit(7);
                self.color_math.half = value.bit(6);
                for i in 0..6 {
                    self.color_math.enable_bits[i] = value.bit(i as u8);
                }
            }
            0x32 => {
                let intensity = value & 0x1F;
                if value.bit(7) {
                    self.color_math.fixed_color.2 = intensity;
                }
                if value.bit(6) {
                    self.color_math.fixed_color.1 = intensity;
                }
                if value.bit(5) {
                    self.color_math.fixed_color.0 = intensity;
                }
            }
            0x33 => {
                self.overscan_enabled = value.bit(0);
                self.obj_interlace = value.bit(1);
                self.pseudo_hires = value.bit(3);
                self.mode7.extbg = value.bit(6);
            }
            _ => {}
        }
    }

    fn latch_mode7_word(&mut self, value: u8) -> i16 {
        let word = u16::from_le_bytes([self.mode7_latch, value]);
        self.mode7_latch = value;
        word as i16
    }

    fn write_bg_scroll(&mut self, register: u16, value: u8) {
        let bg = ((register - 0x0D) / 2) as usize;
        let is_hofs = (register - 0x0D) % 2 == 0;
        if is_hofs {
            self.bg[bg].hofs = ((u16::from(value) << 8) | u16::from(self.bg_hofs_latch)) & 0x03FF;
            self.bg_hofs_latch = value;
        } else {
            self.bg[bg].vofs = ((u16::from(value) << 8) | u16::from(self.bg_vofs_latch)) & 0x03FF;
            self.bg_vofs_latch = value;
        }
    }

    fn write_window_mask(&mut self, register: u16, value: u8) {
        let base = ((register - 0x23) * 2) as usize;
        self.windows.enable_bits[base] = value & 0x0F;
        self.windows.enable_bits[base + 1] = (value >> 4) & 0x0F;
    }

    fn write_window_logic(&mut self, register: u16, value: u8) {
        let base = ((register - 0x2A) * 4) as usize;
        for i in 0..4 {
            if base + i < 6 {
                self.combine_logic_set(base + i, (value >> (i * 2)) & 0x03);
            }
        }
    }

    fn combine_logic_set(&mut self, index: usize, value: u8) {
        self.windows.combine_logic[index] = value;
    }

    fn write_oamdata(&mut self, value: u8, oam: &mut [u8; 544]) {
        let addr = self.oam_addr;
        if addr >= 0x0200 {
            oam[0x0200 + (addr as usize & 0x1F)] = value;
        } else if addr & 1 == 0 {
            self.oam_write_latch = Some(value);
        } else if let Some(low) = self.oam_write_latch.take() {
            let base = addr as usize & 0x1FE;
            oam[base] = low;
            oam[base + 1] = value;
        }
        self.oam_addr = (self.oam_addr + 1) & 0x03FF;
    }

    fn write_cgdata(&mut self, value: u8, cgram: &mut [u8; 512]) {
        let addr = self.cgram_addr as usize;
        if addr & 1 == 0 {
            self.cgram_write_latch = Some(value);
        } else if let Some(low) = self.cgram_write_latch.take() {
            cgram[(addr - 1) * 2 % 512] = low;
            cgram[((addr - 1) * 2 + 1) % 512] = value & 0x7F;
        }
        self.cgram_addr = self.cgram_addr.wrapping_add(1);
    }

    /// Remap mode (`$2115` bits 2-3) reshuffles address bits for certain hi-res tile layouts;
    /// not implemented, so VRAM access always uses the raw word address.
    fn vram_byte_addr(&self) -> u16 {
        self.vram_addr
    }

    fn write_vram_byte(&mut self, half: u8, value: u8, vram: &mut [u8]) {
        let word_addr = self.vram_byte_addr() as usize;
        let byte_addr = (word_addr * 2 + half as usize) & (vram.len() - 1);
        vram[byte_addr] = value;
    }

    fn increment_vram_addr(&mut self) {
        self.vram_addr = self.vram_addr.wrapping_add(self.vram_increment_step);
    }

    fn refresh_vram_prefetch(&mut self, vram: &[u8]) {
        let word_addr = self.vram_byte_addr() as usize & (vram.len() / 2 - 1);
        self.vram_prefetch = u16::from_le_bytes([vram[word_addr * 2], vram[word_addr * 2 + 1]]);
    }

    /// Read from any of `$2134`-`$213F`.
    pub fn read(&mut self, register: u16, vram: &[u8], cgram: &[u8; 512], oam: &[u8; 544]) -> Option<u8> {
        let value = match register {
            0x34 => (self.mode7_multiply_result & 0xFF) as u8,
            0x35 => ((self.mode7_multiply_result >> 8) & 0xFF) as u8,
            0x36 => ((self.mode7_multiply_result >> 16) & 0xFF) as u8,
            0x38 => {
                let addr = self.oam_addr;
                let byte = if addr >= 0x0200 {
                    oam[0x0200 + (addr as usize & 0x1F)]
                } else {
                    oam[addr as usize & 0x1FF]
                };
                self.oam_addr = (self.oam_addr + 1) & 0x03FF;
                byte
            }
            0x39 => {
                let byte = self.vram_prefetch.lsb();
                if matches!(self.vram_increment_mode, VramIncrementMode::Low) {
                    self.increment_vram_addr();
                    self.refresh_vram_prefetch(vram);
                }
                byte
            }
            0x3A => {
                let byte = self.vram_prefetch.msb();
                if matches!(self.vram_increment_mode, VramIncrementMode::High) {
                    self.increment_vram_addr();
                    self.refresh_vram_prefetch(vram);
                }
                byte
            }
            0x3B => {
                let addr = self.cgram_addr as usize;
                let byte = if addr & 1 == 0 {
                    cgram[(addr * 2) % 512]
                } else {
                    let hi = cgram[((addr - 1) * 2 + 1) % 512];
                    self.cgram_read_buffer = hi;
                    hi | 0x80
                };
                self.cgram_addr = self.cgram_addr.wrapping_add(1);
                byte
            }
            0x3C => {
                let flip = self.hv_latch_flipflop;
                self.hv_latch_flipflop = !flip;
                if flip { (self.hv_latched_h >> 8) as u8 & 0x01 } else { self.hv_latched_h as u8 }
            }
            0x3D => {
                let flip = self.hv_latch_flipflop;
                self.hv_latch_flipflop = !flip;
                if flip { (self.hv_latched_v >> 8) as u8 & 0x01 } else { self.hv_latched_v as u8 }
            }
            0x3E => {
                0x01 | (u8::from(self.time_over) << 6) | (u8::from(self.range_over) << 7)
            }
            0x3F => 0x00, // STAT78: PPU2 version; interlace/field bit handled by the caller
            _ => return None,
        };
        Some(value)
    }

    pub fn latch_hv_counters(&mut self, h: u16, v: u16) {
        self.hv_latched_h = h;
        self.hv_latched_v = v;
        self.hv_latch_flipflop = false;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (Registers, Vec<u8>, [u8; 512], [u8; 544]) {
        (Registers::new(), vec![0u8; 0x10000], [0u8; 512], [0u8; 544])
    }

    #[test]
    fn vram_word_write_then_read_roundtrips_low_and_high_bytes() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x16, 0x00, &mut vram, &mut cgram, &mut oam); // VMADDL
        regs.write(0x17, 0x00, &mut vram, &mut cgram, &mut oam); // VMADDH -> addr 0
        regs.write(0x18, 0xAB, &mut vram, &mut cgram, &mut oam); // VMDATAL
        regs.write(0x19, 0xCD, &mut vram, &mut cgram, &mut oam); // VMDATAH

        // Re-point the address back to 0 to force a prefetch refresh, then read it back.
        regs.write(0x16, 0x00, &mut vram, &mut cgram, &mut oam);
        regs.write(0x17, 0x00, &mut vram, &mut cgram, &mut oam);
        assert_eq!(regs.read(0x39, &vram, &cgram, &oam), Some(0xAB));
        assert_eq!(regs.read(0x3A, &vram, &cgram, &oam), Some(0xCD));
    }

    #[test]
    fn vram_increment_step_follows_2115_low_bits() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x15, 0x81, &mut vram, &mut cgram, &mut oam); // step 32, increment on high
        regs.write(0x16, 0x00, &mut vram, &mut cgram, &mut oam);
        regs.write(0x17, 0x00, &mut vram, &mut cgram, &mut oam);
        regs.write(0x19, 0x00, &mut vram, &mut cgram, &mut oam); // VMDATAH write increments
        assert_eq!(regs.vram_addr, 32);
    }

    #[test]
    fn cgdata_write_requires_two_bytes_and_masks_high_byte_to_7_bits() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x21, 0x00, &mut vram, &mut cgram, &mut oam); // CGADD = 0
        regs.write(0x22, 0x34, &mut vram, &mut cgram, &mut oam); // low byte latched only
        assert_eq!(cgram[0], 0);
        regs.write(0x22, 0xFF, &mut vram, &mut cgram, &mut oam); // high byte completes the word
        assert_eq!(cgram[0], 0x34);
        assert_eq!(cgram[1], 0x7F);
    }

    #[test]
    fn oamdata_low_byte_pair_write_requires_two_writes() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x02, 0x00, &mut vram, &mut cgram, &mut oam); // OAMADDL
        regs.write(0x03, 0x00, &mut vram, &mut cgram, &mut oam); // OAMADDH
        regs.write(0x04, 0x11, &mut vram, &mut cgram, &mut oam);
        assert_eq!(oam[0], 0);
        regs.write(0x04, 0x22, &mut vram, &mut cgram, &mut oam);
        assert_eq!(oam[0], 0x11);
        assert_eq!(oam[1], 0x22);
    }

    #[test]
    fn bg_scroll_write_latches_high_byte_across_two_writes() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x0D, 0x34, &mut vram, &mut cgram, &mut oam); // BG1HOFS low latch
        regs.write(0x0D, 0x01, &mut vram, &mut cgram, &mut oam); // high byte completes it
        assert_eq!(regs.bg[0].hofs, 0x0134 & 0x03FF);
    }

    #[test]
    fn hv_counter_latch_flipflop_alternates_low_then_high_byte() {
        let mut regs = Registers::new();
        regs.latch_hv_counters(0x0155, 0x00E1);
        let vram = vec![0u8; 0x10000];
        let cgram = [0u8; 512];
        let oam = [0u8; 544];
        assert_eq!(regs.read(0x3C, &vram, &cgram, &oam), Some(0x55));
        assert_eq!(regs.read(0x3C, &vram, &cgram, &oam), Some(0x01));
    }

    #[test]
    fn forced_blank_and_brightness_decode_from_2100() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x00, 0x8F, &mut vram, &mut cgram, &mut oam);
        assert!(regs.forced_blank);
        assert_eq!(regs.brightness, 0x0F);
    }

    #[test]
    fn mosaic_write_decodes_block_size_and_per_bg_enable_bits() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x06, 0b0011_0101, &mut vram, &mut cgram, &mut oam); // size=3, BG1+BG3 enabled
        assert_eq!(regs.mosaic_size, 3);
        assert!(regs.bg[0].mosaic_enabled);
        assert!(!regs.bg[1].mosaic_enabled);
        assert!(regs.bg[2].mosaic_enabled);
        assert!(!regs.bg[3].mosaic_enabled);
    }

    #[test]
    fn setini_write_decodes_overscan_interlace_and_mode7_extbg() {
        let (mut regs, mut vram, mut cgram, mut oam) = harness();
        regs.write(0x33, 0b0100_1011, &mut vram, &mut cgram, &mut oam);
        assert!(regs.overscan_enabled);
        assert!(regs.obj_interlace);
        assert!(regs.pseudo_hires);
        assert!(regs.mode7.extbg);
    }
}
