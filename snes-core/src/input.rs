//! Controller latch/shift registers (spec §4.7) plus the raw per-button live state the host
//! shell updates via `set_button`.

use bincode::{Decode, Encode};
use emu_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct SnesJoypadState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub l: bool,
    pub r: bool,
    pub start: bool,
    pub select: bool,
}

impl SnesJoypadState {
    /// Button order per the standard SNES controller shift register: B, Y, Select, Start, Up,
    /// Down, Left, Right, A, X, L, R, then 4 fixed ID bits (all 1s for a standard pad).
    fn to_shift_bits(self) -> u16 {
        let bits = [
            self.b, self.y, self.select, self.start, self.up, self.down, self.left, self.right,
            self.a, self.x, self.l, self.r,
        ];

        let mut value = 0u16;
        for (i, pressed) in bits.iter().enumerate() {
            if *pressed {
                value |= 1 << (15 - i);
            }
        }
        // Low 4 bits (controller ID / always-1 padding) are already 0 here; a standard
        // controller drives them high.
        value | 0x000F
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum JoypadPort {
    #[default]
    P1,
    P2,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct SnesInputs {
    pub p1: SnesJoypadState,
    pub p2: SnesJoypadState,
}

/// A single controller port's latch-and-shift register (one instance per port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ControllerPort {
    latched_state: u16,
    shift_position: u8,
    latch_line: bool,
}

impl ControllerPort {
    fn new() -> Self {
        Self { latched_state: 0xFFFF, shift_position: 0, latch_line: false }
    }

    /// Writes to `$4016` bit 0 drive the shared latch line for both ports.
    fn latch(&mut self, live_state: SnesJoypadState, value: bool) {
        if self.latch_line && !value {
            self.latched_state = live_state.to_shift_bits();
            self.shift_position = 0;
        }
        self.latch_line = value;
        if value {
            // While the latch line is held high, reads continually re-sample bit 15.
            self.latched_state = live_state.to_shift_bits();
        }
    }

    /// Returns the next serial bit; after 16 reads the register saturates at all 1s.
    fn read(&mut self) -> bool {
        if self.shift_position >= 16 {
            return true;
        }
        let bit = self.latched_state.bit(15);
        self.latched_state <<= 1;
        self.shift_position += 1;
        bit
    }

    fn snapshot_for_autoread(&self, live_state: SnesJoypadState) -> u16 {
        live_state.to_shift_bits()
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct InputState {
    pub inputs: SnesInputs,
    port1: ControllerPort,
    port2: ControllerPort,
}

impl InputState {
    pub fn new() -> Self {
        Self { inputs: SnesInputs::default(), port1: ControllerPort::new(), port2: ControllerPort::new() }
    }

    pub fn latch(&mut self, value: bool) {
        self.port1.latch(self.inputs.p1, value);
        self.port2.latch(self.inputs.p2, value);
    }

    pub fn read_port1(&mut self) -> bool {
        self.port1.read()
    }

    pub fn read_port2(&mut self) -> bool {
        self.port2.read()
    }

    /// Hardware auto-joypad read: latches both ports and returns their 16-bit snapshots,
    /// shortly after VBlank onset (spec §4.1/§4.7).
    pub fn auto_read(&self) -> [u16; 2] {
        [
            self.port1.snapshot_for_autoread(self.inputs.p1),
            self.port2.snapshot_for_autoread(self.inputs.p2),
        ]
    }
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_snapshots_on_falling_edge_and_shifts_msb_first() {
        let mut input = InputState::new();
        input.inputs.p1.b = true;
        input.inputs.p1.r = true;

        input.latch(true);
        input.latch(false);

        // B is shifted out first (bit 15 of the shift register).
        assert!(input.read_port1());
        for _ in 0..10 {
            assert!(!input.read_port1());
        }
        // R is the 12th bit shifted out.
        assert!(input.read_port1());
    }

    #[test]
    fn read_past_16_bits_saturates_high() {
        let mut input = InputState::new();
        input.latch(true);
        input.latch(false);
        for _ in 0..16 {
            input.read_port1();
        }
        assert!(input.read_port1());
        assert!(input.read_port1());
    }

    #[test]
    fn auto_read_sets_bit_11_for_up_on_port1() {
        let mut input = InputState::new();
        input.inputs.p1.up = true;

        let [p1, p2] = input.auto_read();
        assert_eq!(p1 & 0x0800, 0x0800);
        assert_eq!(p2, 0x000F);
    }
}
