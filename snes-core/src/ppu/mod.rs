//! The picture processing unit: VRAM/CGRAM/OAM storage, the register surface (`registers.rs`),
//! sprite evaluation (`sprites.rs`), and the per-scanline compositor.
//!
//! Real hardware renders dot-by-dot across the scanline; this implementation instead composites
//! a whole 256-pixel line at once when the bus calls [`Ppu::render_line`] (at H=512, per the
//! spec), which is sufficient to reproduce the visible frame without modeling intra-line
//! rendering artifacts no mainstream game depends on.

mod registers;
mod sprites;

use crate::TimingMode;
use bincode::{Decode, Encode};
use emu_common::num::GetBit;
use registers::{BgMode, Registers};

const VRAM_LEN: usize = 64 * 1024;
const CGRAM_LEN: usize = 512;
const OAM_LEN: usize = 544;

pub const RENDER_WIDTH: usize = 256;
const FRAME_BUFFER_LEN: usize = crate::SCREEN_WIDTH * crate::SCREEN_HEIGHT * 4;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Ppu {
    vram: Box<[u8]>,
    cgram: Box<[u8; CGRAM_LEN]>,
    oam: Box<[u8; OAM_LEN]>,
    registers: Registers,
    frame_buffer: Box<[u8; FRAME_BUFFER_LEN]>,
    even_frame: bool,
    timing_mode: TimingMode,
}

impl Ppu {
    pub fn new(timing_mode: TimingMode) -> Self {
        Self {
            vram: vec![0; VRAM_LEN].into_boxed_slice(),
            cgram: Box::new([0; CGRAM_LEN]),
            oam: Box::new([0; OAM_LEN]),
            registers: Registers::new(),
            frame_buffer: Box::new([0; FRAME_BUFFER_LEN]),
            even_frame: true,
            timing_mode,
        }
    }

    pub fn reset(&mut self) {
        self.registers = Registers::new();
    }

    pub fn read_port(&mut self, address: u32, h: u16, v: u16) -> Option<u8> {
        let register = (address & 0xFF) as u16;
        if register == 0x37 {
            self.registers.latch_hv_counters(h, v);
            return None;
        }
        self.registers.read(register, &self.vram, &self.cgram, &self.oam)
    }

    pub fn write_port(&mut self, address: u32, value: u8, h: u16, v: u16) {
        let register = (address & 0xFF) as u16;
        if register == 0x37 {
            self.registers.latch_hv_counters(h, v);
            return;
        }
        self.registers.write(register, value, &mut self.vram, &mut self.cgram, &mut self.oam);
    }

    /// Called by the bus when entering VBlank; reloads the OAM address from its latched value.
    pub fn handle_vblank(&mut self) {
        self.registers.oam_addr = self.registers.oam_addr_reload;
    }

    /// Called by the bus at the start of each frame (H=0, V=0).
    pub fn handle_frame_start(&mut self) {
        self.even_frame = !self.even_frame;
        self.registers.time_over = false;
        self.registers.range_over = false;
    }

    /// Whether this frame should end VBlank at line 225 (non-overscan) rather than 240.
    pub fn is_overscan(&self) -> bool {
        self.registers.overscan_enabled
    }

    pub fn frame_buffer(&self) -> &[u8] {
        self.frame_buffer.as_slice()
    }

    /// Raw 5-bit-per-channel color, the native CGRAM precision; color math operates in this
    /// space and `blit_line` expands to 8-bit only at the very end.
    fn cgram_color(&self, index: u8) -> (u8, u8, u8) {
        if index == 0 {
            return (0, 0, 0);
        }
        let lo = self.cgram[index as usize * 2];
        let hi = self.cgram[index as usize * 2 + 1];
        let word = u16::from_le_bytes([lo, hi]);
        ((word & 0x1F) as u8, ((word >> 5) & 0x1F) as u8, ((word >> 10) & 0x1F) as u8)
    }

    fn backdrop_color(&self) -> (u8, u8, u8) {
        self.cgram_color_at_addr(0)
    }

    fn cgram_color_at_addr(&self, index: u8) -> (u8, u8, u8) {
        let lo = self.cgram[index as usize * 2];
        let hi = self.cgram[index as usize * 2 + 1];
        let word = u16::from_le_bytes([lo, hi]);
        ((word & 0x1F) as u8, ((word >> 5) & 0x1F) as u8, ((word >> 10) & 0x1F) as u8)
    }

    /// Direct color mode (`$2130` bit 0) bypasses CGRAM for 8bpp background pixels: the tile's
    /// palette-number bits fill in the low bit of each channel instead of selecting a CGRAM entry.
    fn direct_color(color_index: u8, palette: u8) -> (u8, u8, u8) {
        let p0 = palette & 0x01;
        let p1 = (palette >> 1) & 0x01;
        let p2 = (palette >> 2) & 0x01;
        let r = ((color_index & 0x07) << 2) | (p0 << 1);
        let g = (((color_index >> 3) & 0x07) << 2) | (p1 << 1);
        let b = (((color_index >> 6) & 0x03) << 3) | (p2 << 2);
        (r, g, b)
    }

    /// Returns `(cgram_index, priority, palette)` for the opaque pixel at `(bg_x, bg_y)`, or
    /// `None` when the pixel is transparent (color index 0).
    fn bg_tile_pixel(&self, bg: usize, bpp: u8, bg_x: u16, bg_y: u16) -> Option<(u8, u8, u8)> {
        let regs = &self.registers.bg[bg];
        let tile_col = (bg_x / 8) & 0x1F;
        let tile_row = (bg_y / 8) & 0x1F;
        let mut map_addr = regs.tilemap_addr;
        if regs.tilemap_mirror_h && (bg_x / 8) & 0x20 != 0 {
            map_addr = map_addr.wrapping_add(0x0400);
        }
        if regs.tilemap_mirror_v && (bg_y / 8) & 0x20 != 0 {
            map_addr = map_addr.wrapping_add(if regs.tilemap_mirror_h { 0x0800 } else { 0x0400 });
        }
        let entry_addr = (map_addr.wrapping_add(tile_row * 32 + tile_col) as usize * 2) & (self.vram.len() - 1);
        let entry = u16::from_le_bytes([self.vram[entry_addr], self.vram[entry_addr + 1]]);

        let tile_number = entry & 0x03FF;
        let palette = ((entry >> 10) & 0x07) as u8;
        let priority = if entry.bit(13) { 1 } else { 0 };
        let flip_h = entry.bit(14);
        let flip_v = entry.bit(15);

        let col_in_tile = if flip_h { 7 - (bg_x % 8) } else { bg_x % 8 };
        let row_in_tile = if flip_v { 7 - (bg_y % 8) } else { bg_y % 8 };

        let bytes_per_tile = usize::from(bpp) * 8;
        let tile_base = regs.chr_addr as usize + tile_number as usize * bytes_per_tile;

        let mut color_index = 0u8;
        for plane_pair in 0..(bpp / 2).max(1) {
            let plane_addr = tile_base + usize::from(plane_pair) * 16 + usize::from(row_in_tile) * 2;
            if plane_addr + 1 >= self.vram.len() {
                continue;
            }
            let lo_byte = self.vram[plane_addr];
            let hi_byte = self.vram[plane_addr + 1];
            let bit = 7 - col_in_tile as u8;
            let lo_bit = (lo_byte >> bit) & 1;
            let hi_bit = (hi_byte >> bit) & 1;
            color_index |= (lo_bit | (hi_bit << 1)) << (plane_pair * 2);
        }

        if color_index == 0 {
            return None;
        }

        let palette_base = if bpp == 8 { 0 } else { palette * (1 << bpp) };
        let cgram_index = palette_base.wrapping_add(color_index);
        Some((cgram_index, priority, palette))
    }

    fn obj_tile_pixel(&self, sprite: &sprites::SpriteEntry, row_in_sprite: u8, col_in_sprite: u8) -> Option<u8> {
        let (width, _height) = sprites::sprite_dimensions(sprite, self.registers.obj_size_select);

        let row = if sprite.flip_v { width.saturating_sub(1) - row_in_sprite } else { row_in_sprite };
        let col = if sprite.flip_h {
            u16::from(width).saturating_sub(1) - u16::from(col_in_sprite)
        } else {
            u16::from(col_in_sprite)
        };

        let tile_row_in_tile = row % 8;
        let tile_col_in_tile = (col % 8) as u8;
        let tile_dx = col / 8;
        let tile_dy = u16::from(row / 8);

        let base_addr = if sprite.tile & 0x0100 != 0 {
            self.registers.obj_base_addr.wrapping_add(self.registers.obj_gap)
        } else {
            self.registers.obj_base_addr
        };
        let tile_number = (sprite.tile & 0xFF).wrapping_add(tile_dy * 16 + tile_dx) & 0x01FF;
        let tile_base = base_addr as usize + tile_number as usize * 32;

        let mut color_index = 0u8;
        for plane_pair in 0..2u8 {
            let plane_addr = tile_base + usize::from(plane_pair) * 16 + usize::from(tile_row_in_tile) * 2;
            if plane_addr + 1 >= self.vram.len() {
                continue;
            }
            let lo_byte = self.vram[plane_addr];
            let hi_byte = self.vram[plane_addr + 1];
            let bit = 7 - tile_col_in_tile;
            let lo_bit = (lo_byte >> bit) & 1;
            let hi_bit = (hi_byte >> bit) & 1;
            color_index |= (lo_bit | (hi_bit << 1)) << (plane_pair * 2);
        }

        if color_index == 0 {
            return None;
        }
        Some(128 + sprite.palette * 16 + color_index)
    }

    fn mode7_pixel(&self, screen_x: u16, line: u16) -> Option<u8> {
        let m7 = &self.registers.mode7;
        let x = i32::from(screen_x) - i32::from(m7.center_x);
        let y = i32::from(line) - i32::from(m7.center_y);

        let map_x = (i32::from(m7.a) * x + i32::from(m7.b) * y) >> 8;
        let map_y = (i32::from(m7.c) * x + i32::from(m7.d) * y) >> 8;
        let map_x = map_x.wrapping_add(i32::from(m7.center_x));
        let map_y = map_y.wrapping_add(i32::from(m7.center_y));

        if !(0..1024).contains(&map_x) || !(0..1024).contains(&map_y) {
            if m7.screen_over == 3 {
                return None;
            }
        }
        let tile_x = (map_x as u32 / 8) & 0x7F;
        let tile_y = (map_y as u32 / 8) & 0x7F;
        let map_addr = (tile_y * 128 + tile_x) as usize * 2;
        if map_addr >= self.vram.len() {
            return None;
        }
        let tile_number = self.vram[map_addr];

        let px = map_x as u32 & 7;
        let py = map_y as u32 & 7;
        let pixel_addr = tile_number as usize * 128 + (py * 8 + px) as usize * 2 + 1;
        if pixel_addr >= self.vram.len() {
            return None;
        }
        // Callers decide transparency: in EXTBG mode bit 7 reassigns the pixel to BG2 and only
        // the low 7 bits are the color index, so a full zero byte isn't necessarily transparent.
        Some(self.vram[pixel_addr])
    }

    /// Composites one visible scanline into the frame buffer, duplicated into two output rows
    /// to fill the 512x480 output (the real console's 256x224/239 picture is upscaled 2x here
    /// rather than reproducing true hi-res/interlace sub-pixel addressing).
    pub fn render_line(&mut self, v: u16) {
        if v >= 224 {
            return;
        }

        let mut line = [self.backdrop_color(); RENDER_WIDTH];
        // Which layer (0-3 BG1-4, 4 OBJ, 5 backdrop) currently owns each pixel, consulted by
        // color math to test `$2131`'s per-layer enable bits.
        let mut layer_id = [BACKDROP_LAYER; RENDER_WIDTH];

        if self.registers.forced_blank {
            self.blit_line(v, &line);
            return;
        }

        let mode = self.registers.bg_mode;
        let bpp = mode.bg_bpp();
        let mosaic_block = u16::from(self.registers.mosaic_size) + 1;

        if matches!(mode, BgMode::Mode7) {
            let extbg = self.registers.mode7.extbg;
            for x in 0..RENDER_WIDTH {
                let Some(raw) = self.mode7_pixel(x as u16, v) else { continue };
                if extbg {
                    let color_index = raw & 0x7F;
                    if color_index == 0 {
                        continue;
                    }
                    let bg: usize = if raw.bit(7) { 1 } else { 0 };
                    if self.registers.main_screen_enable & (1 << bg) != 0
                        && !self.layer_hidden_by_window(bg, x as u8)
                    {
                        line[x] = self.cgram_color(color_index);
                        layer_id[x] = bg as u8;
                    }
                } else if raw != 0
                    && self.registers.main_screen_enable & 0x01 != 0
                    && !self.layer_hidden_by_window(0, x as u8)
                {
                    line[x] = self.cgram_color(raw);
                    layer_id[x] = 0;
                }
            }
        } else {
            // Lowest-priority-first composite order: BG4 < BG3 < BG2 < BG1 (simplified fixed
            // priority; real hardware interleaves OBJ/BG priority bits per mode).
            for bg in (0..4).rev() {
                if bpp[bg] == 0 || self.registers.main_screen_enable & (1 << bg) == 0 {
                    continue;
                }
                let regs_hofs = self.registers.bg[bg].hofs;
                let regs_vofs = self.registers.bg[bg].vofs;
                let mosaic = self.registers.bg[bg].mosaic_enabled && mosaic_block > 1;
                let mosaic_v = if mosaic { (v / mosaic_block) * mosaic_block } else { v };
                for x in 0..RENDER_WIDTH {
                    if self.layer_hidden_by_window(bg, x as u8) {
                        continue;
                    }
                    let mosaic_x = if mosaic { (x as u16 / mosaic_block) * mosaic_block } else { x as u16 };
                    let bg_x = mosaic_x.wrapping_add(regs_hofs);
                    let bg_y = mosaic_v.wrapping_add(regs_vofs);
                    if let Some((cgram_index, _priority, palette)) = self.bg_tile_pixel(bg, bpp[bg], bg_x, bg_y) {
                        line[x] = if bpp[bg] == 8 && self.registers.color_math.direct_color {
                            Self::direct_color(cgram_index, palette)
                        } else {
                            self.cgram_color(cgram_index)
                        };
                        layer_id[x] = bg as u8;
                    }
                }
            }
        }

        if self.registers.main_screen_enable & 0x10 != 0 {
            self.render_sprites(v, &mut line, &mut layer_id);
        }

        self.apply_color_math(&mut line, &layer_id);

        self.blit_line(v, &line);
    }

    /// `true` when `$2123`-`$2129`'s windows mask this layer out of the main screen at column
    /// `x`, per the layer's `$2126`/`$2127`-style enable bit in `main_screen_window_enable`.
    fn layer_hidden_by_window(&self, layer: usize, x: u8) -> bool {
        self.registers.main_screen_window_enable & (1 << layer) != 0 && self.window_contains(layer, x)
    }

    /// Evaluates window 1/window 2 membership (with per-window invert) and combines them per
    /// `$212A`/`$212B`'s 2-bit logic (OR/AND/XOR/XNOR) for the given window-layer slot.
    fn window_contains(&self, layer: usize, x: u8) -> bool {
        let w = &self.registers.windows;
        let bits = w.enable_bits[layer];
        let w1_enabled = bits.bit(0);
        let w1_invert = bits.bit(1);
        let w2_enabled = bits.bit(2);
        let w2_invert = bits.bit(3);

        let w1_in = w1_enabled && ((x >= w.w1_left && x <= w.w1_right) ^ w1_invert);
        let w2_in = w2_enabled && ((x >= w.w2_left && x <= w.w2_right) ^ w2_invert);

        match (w1_enabled, w2_enabled) {
            (false, false) => false,
            (true, false) => w1_in,
            (false, true) => w2_in,
            (true, true) => match w.combine_logic[layer] {
                0 => w1_in || w2_in,
                1 => w1_in && w2_in,
                2 => w1_in ^ w2_in,
                _ => !(w1_in ^ w2_in),
            },
        }
    }

    /// Applies `$2130`-`$2132` color math. Real hardware blends the main screen against a second,
    /// independently composited sub-screen; this blends against the fixed color register instead,
    /// which covers the common fade-to-color/fade-from-color use of color math without doubling
    /// the compositor to track two full screens.
    fn apply_color_math(&self, line: &mut [(u8, u8, u8); RENDER_WIDTH], layer_id: &[u8; RENDER_WIDTH]) {
        let math = &self.registers.color_math;
        if math.prevent_math == 3 {
            return;
        }

        for x in 0..RENDER_WIDTH {
            let layer = layer_id[x] as usize;
            if !math.enable_bits[layer] {
                continue;
            }

            let inside_math_window = self.window_contains(MATH_WINDOW_LAYER, x as u8);
            if gate(math.prevent_math, inside_math_window) {
                continue;
            }

            let main = if gate(math.clip_to_black, inside_math_window) { (0, 0, 0) } else { line[x] };
            let (fr, fg, fb) = math.fixed_color;

            let mut result = if math.add_subtract {
                (main.0.saturating_sub(fr), main.1.saturating_sub(fg), main.2.saturating_sub(fb))
            } else {
                ((main.0 + fr).min(31), (main.1 + fg).min(31), (main.2 + fb).min(31))
            };
            if math.half {
                result = (result.0 / 2, result.1 / 2, result.2 / 2);
            }
            line[x] = result;
        }
    }

    fn render_sprites(&mut self, v: u16, line: &mut [(u8, u8, u8); RENDER_WIDTH], layer_id: &mut [u8; RENDER_WIDTH]) {
        let sprites = sprites::parse_oam(&self.oam, self.registers.obj_size_select);
        let evaluation = sprites::evaluate_line(&sprites, self.registers.obj_size_select, v);
        self.registers.time_over |= evaluation.time_over;
        self.registers.range_over |= evaluation.range_over;

        // Back-to-front within the evaluated set so earlier OAM indices (drawn last) win ties.
        for entry in evaluation.sprites.iter().rev() {
            let sprite = &sprites[entry.sprite_index as usize];
            let (width, _height) = sprites::sprite_dimensions(sprite, self.registers.obj_size_select);
            for col in 0..width {
                let screen_x = sprite.x + i32::from(col);
                if !(0..RENDER_WIDTH as i32).contains(&screen_x) {
                    continue;
                }
                if self.layer_hidden_by_window(OBJ_LAYER as usize, screen_x as u8) {
                    continue;
                }
                if let Some(cgram_index) = self.obj_tile_pixel(sprite, entry.row_in_sprite, col) {
                    line[screen_x as usize] = self.cgram_color(cgram_index);
                    layer_id[screen_x as usize] = OBJ_LAYER;
                }
            }
        }
    }

    fn blit_line(&mut self, v: u16, line: &[(u8, u8, u8); RENDER_WIDTH]) {
        for out_row in [v * 2, v * 2 + 1] {
            let row_base = out_row as usize * crate::SCREEN_WIDTH * 4;
            for (x, &(r, g, b)) in line.iter().enumerate() {
                for dup in 0..2 {
                    let px_base = row_base + (x * 2 + dup) * 4;
                    self.frame_buffer[px_base] = expand_5_to_8(r);
                    self.frame_buffer[px_base + 1] = expand_5_to_8(g);
                    self.frame_buffer[px_base + 2] = expand_5_to_8(b);
                    self.frame_buffer[px_base + 3] = 0xFF;
                }
            }
        }
    }
}

/// `$2131` layer-enable-bit and window-layer-slot index for sprites.
const OBJ_LAYER: u8 = 4;
/// `$2131` layer-enable-bit index for the backdrop.
const BACKDROP_LAYER: u8 = 5;
/// `$2125`'s high nibble is the window slot color math consults for `$2130`'s clip/prevent gates.
const MATH_WINDOW_LAYER: usize = 5;

/// `$2130`'s 2-bit clip-to-black/prevent-math fields: 0=never, 1=inside the math window,
/// 2=outside it, 3=always.
fn gate(mode: u8, inside_window: bool) -> bool {
    match mode {
        0 => false,
        1 => inside_window,
        2 => !inside_window,
        _ => true,
    }
}

fn expand_5_to_8(value: u8) -> u8 {
    (value << 3) | (value >> 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_blank_line_renders_as_backdrop_color() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        // CGADD=0, write backdrop color (low then high byte).
        ppu.write_port(0x2121, 0x00, 0, 0);
        ppu.write_port(0x2122, 0x1F, 0, 0); // low byte: R=0x1F
        ppu.write_port(0x2122, 0x00, 0, 0); // high byte: G=B=0
        // forced_blank defaults to true, so render_line should just blit the backdrop.
        ppu.render_line(0);

        let fb = ppu.frame_buffer();
        assert_eq!(&fb[0..4], &[0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn render_line_past_224_is_a_no_op() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        let before = ppu.frame_buffer().to_vec();
        ppu.render_line(224);
        assert_eq!(ppu.frame_buffer(), before.as_slice());
    }

    #[test]
    fn handle_vblank_reloads_oam_address_from_latch() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        ppu.write_port(0x2102, 0x10, 0, 0); // OAMADDL
        ppu.write_port(0x2104, 0xAB, 0, 0); // advances oam_addr away from the reload value
        ppu.handle_vblank();
        assert_eq!(ppu.registers.oam_addr, 0x10);
    }

    #[test]
    fn hv_latch_port_2137_records_h_and_v_without_touching_other_registers() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        ppu.write_port(0x2137, 0x00, 300, 150);
        assert_eq!(ppu.registers.hv_latched_h, 300);
        assert_eq!(ppu.registers.hv_latched_v, 150);
    }

    #[test]
    fn color_math_add_blends_main_pixel_with_fixed_color() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        ppu.write_port(0x2131, 0x01, 0, 0); // BG1 math-enable bit, add mode (bit7 clear)
        ppu.write_port(0x2132, 0x20 | 10, 0, 0); // R = 10
        ppu.write_port(0x2132, 0x40 | 5, 0, 0); // G = 5
        ppu.write_port(0x2132, 0x80 | 3, 0, 0); // B = 3

        let mut line = [(0u8, 0u8, 0u8); RENDER_WIDTH];
        line[0] = (20, 20, 20);
        let mut layer_id = [BACKDROP_LAYER; RENDER_WIDTH];
        layer_id[0] = 0;

        ppu.apply_color_math(&mut line, &layer_id);
        assert_eq!(line[0], (30, 25, 23));
        // Backdrop's math-enable bit was never set, so pixel 1 (still tagged backdrop) is untouched.
        assert_eq!(line[1], (0, 0, 0));
    }

    #[test]
    fn color_math_subtract_saturates_at_zero() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        ppu.write_port(0x2131, 0x81, 0, 0); // BG1 math-enable, subtract mode (bit7 set)
        ppu.write_port(0x2132, 0x20 | 31, 0, 0); // R = 31

        let mut line = [(0u8, 0u8, 0u8); RENDER_WIDTH];
        line[0] = (5, 0, 0);
        let mut layer_id = [BACKDROP_LAYER; RENDER_WIDTH];
        layer_id[0] = 0;

        ppu.apply_color_math(&mut line, &layer_id);
        assert_eq!(line[0], (0, 0, 0));
    }

    #[test]
    fn window_hides_a_main_screen_layer_inside_its_bounds() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        ppu.write_port(0x2126, 16, 0, 0); // W1 left
        ppu.write_port(0x2127, 32, 0, 0); // W1 right
        ppu.write_port(0x2123, 0x01, 0, 0); // BG1 window-1 enable, no invert
        ppu.write_port(0x212E, 0x01, 0, 0); // TMW: window masks BG1 on the main screen

        assert!(ppu.layer_hidden_by_window(0, 20));
        assert!(!ppu.layer_hidden_by_window(0, 5));
    }

    #[test]
    fn window_enable_bit_off_never_hides_the_layer() {
        let mut ppu = Ppu::new(TimingMode::Ntsc);
        ppu.write_port(0x2126, 16, 0, 0);
        ppu.write_port(0x2127, 32, 0, 0);
        ppu.write_port(0x2123, 0x01, 0, 0); // window-1 enabled for BG1...
        // ...but TMW ($212E) never marks BG1 as windowed, so it has no effect on the main screen.
        assert!(!ppu.layer_hidden_by_window(0, 20));
    }

    #[test]
    fn direct_color_mode_derives_rgb_from_index_and_palette_bits() {
        assert_eq!(Ppu::direct_color(0xE5, 0b101), (22, 16, 28));
    }
}
