//! Public interface consumed by a host shell: ROM loading, the per-frame run loop, input,
//! framebuffer/audio output, and save states/battery saves.

use crate::bus::Bus;
use crate::error::SnesError;
use crate::input::JoypadPort;
use crate::memory::{Cartridge, MapperType, Memory};
use crate::{TimingMode, SCREEN_HEIGHT, SCREEN_WIDTH};
use bincode::config::{Configuration, Fixint, LittleEndian};
use crc::Crc;
use wdc65816_emu::core::Wdc65816;

const CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

const SAVE_STATE_MAGIC: [u8; 4] = *b"LSSF";
const SAVE_STATE_VERSION: u32 = 1;
const SAVE_STATE_HEADER_LEN: usize = 4 + 4 + 4 + 1;

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_little_endian().with_fixed_int_encoding();

fn mapper_tag(mapper: MapperType) -> u8 {
    match mapper {
        MapperType::LoRom => 0,
        MapperType::HiRom => 1,
        MapperType::ExHiRom => 2,
    }
}

/// Top-level console: a running `Bus`/CPU pair once a ROM has been loaded, or nothing yet.
pub struct SnesEmulator {
    main_cpu: Wdc65816,
    bus: Option<Bus>,
    timing_mode: TimingMode,
    last_sram_checksum: u32,
}

impl SnesEmulator {
    /// Allocates an emulator with no cartridge loaded. Every operation besides `load_rom` is a
    /// no-op (or returns a default/empty result) until a ROM is loaded.
    #[must_use]
    pub fn init() -> Self {
        Self {
            main_cpu: Wdc65816::new(),
            bus: None,
            timing_mode: TimingMode::Ntsc,
            last_sram_checksum: 0,
        }
    }

    /// Scores LoROM/HiROM/ExHiROM headers, installs the cartridge, and hard-resets.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM is smaller than one bank or no mapper's header scores
    /// plausibly (see [`crate::memory::cartridge`]).
    pub fn load_rom(
        &mut self,
        rom: Vec<u8>,
        initial_sram: Option<Vec<u8>>,
        timing_mode: TimingMode,
    ) -> Result<(), SnesError> {
        let cartridge = Cartridge::new(rom, initial_sram)?;
        let sram_checksum = CRC.checksum(cartridge.sram());

        let memory = Memory::new(cartridge);
        let mut bus = Bus::new(memory, timing_mode);
        self.main_cpu = Wdc65816::new();
        self.main_cpu.reset(&mut bus);

        self.bus = Some(bus);
        self.timing_mode = timing_mode;
        self.last_sram_checksum = sram_checksum;

        log::info!("Loaded cartridge with timing mode {timing_mode:?}");

        Ok(())
    }

    /// Clears component state. A hard reset also re-zeros WRAM; a soft reset preserves WRAM and
    /// cartridge SRAM.
    pub fn reset(&mut self, hard: bool) {
        let Some(bus) = self.bus.as_mut() else { return };

        bus.reset(hard);
        self.main_cpu.reset(bus);
    }

    /// Runs CPU opcodes until the bus enters VBlank of the next frame. Calling this with no ROM
    /// loaded is a no-op.
    pub fn run_frame(&mut self) {
        let Some(bus) = self.bus.as_mut() else { return };

        loop {
            self.main_cpu.step(bus);
            if bus.frame_complete() {
                break;
            }
        }
    }

    /// Updates the live state of one button on one controller port. `button` follows the shift
    /// register order: 0=B, 1=Y, 2=Select, 3=Start, 4=Up, 5=Down, 6=Left, 7=Right, 8=A, 9=X,
    /// 10=L, 11=R.
    pub fn set_button(&mut self, port: JoypadPort, button: u8, pressed: bool) {
        let Some(bus) = self.bus.as_mut() else { return };

        let state = match port {
            JoypadPort::P1 => &mut bus.input_mut().inputs.p1,
            JoypadPort::P2 => &mut bus.input_mut().inputs.p2,
        };

        let field = match button {
            0 => &mut state.b,
            1 => &mut state.y,
            2 => &mut state.select,
            3 => &mut state.start,
            4 => &mut state.up,
            5 => &mut state.down,
            6 => &mut state.left,
            7 => &mut state.right,
            8 => &mut state.a,
            9 => &mut state.x,
            10 => &mut state.l,
            11 => &mut state.r,
            _ => return,
        };
        *field = pressed;
    }

    /// Copies the latest composited frame into `out` as 512x480 RGBA. No-op (buffer left as-is)
    /// with no ROM loaded.
    pub fn put_pixels(&self, out: &mut [u8; SCREEN_WIDTH * SCREEN_HEIGHT * 4]) {
        let Some(bus) = self.bus.as_ref() else { return };
        out.copy_from_slice(bus.ppu().frame_buffer());
    }

    /// Drains up to `out.len()` stereo samples (interleaved L, R) from the DSP's 32kHz ring,
    /// resampled to `output_frequency`.
    pub fn get_samples(&mut self, out: &mut [i16], output_frequency: f64) {
        let Some(bus) = self.bus.as_mut() else {
            out.fill(0);
            return;
        };

        let pair_count = out.len() / 2;
        let mut pairs = vec![(0i16, 0i16); pair_count];
        bus.apu().get_samples(&mut pairs, output_frequency);

        for (chunk, &(l, r)) in out.chunks_exact_mut(2).zip(pairs.iter()) {
            chunk[0] = l;
            chunk[1] = r;
        }
    }

    /// Serializes engine state behind a `magic(4) version(4) length(4) cart_type(1)` header.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no cartridge loaded or bincode encoding fails.
    pub fn save_state(&self) -> Result<Vec<u8>, SnesError> {
        let bus = self
            .bus
            .as_ref()
            .ok_or(SnesError::IncompatibleState { reason: "no cartridge loaded" })?;

        let payload = bincode::encode_to_vec(bus, BINCODE_CONFIG)
            .map_err(|_| SnesError::IncompatibleState { reason: "failed to encode state" })?;

        let mut buf = Vec::with_capacity(SAVE_STATE_HEADER_LEN + payload.len());
        buf.extend_from_slice(&SAVE_STATE_MAGIC);
        buf.extend_from_slice(&SAVE_STATE_VERSION.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.push(mapper_tag(bus.memory().cartridge().mapper()));
        buf.extend_from_slice(&payload);

        Ok(buf)
    }

    /// Verifies the magic/version/length/cart-type header before deserializing; leaves the
    /// emulator untouched and returns an error on any mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`SnesError::IncompatibleState`] if the header doesn't match this emulator's
    /// current cartridge, or if bincode decoding fails.
    pub fn load_state(&mut self, buf: &[u8]) -> Result<(), SnesError> {
        let bus = self
            .bus
            .as_ref()
            .ok_or(SnesError::IncompatibleState { reason: "no cartridge loaded" })?;

        if buf.len() < SAVE_STATE_HEADER_LEN {
            return Err(SnesError::IncompatibleState { reason: "buffer too short for header" });
        }
        if buf[0..4] != SAVE_STATE_MAGIC {
            return Err(SnesError::IncompatibleState { reason: "bad magic" });
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != SAVE_STATE_VERSION {
            return Err(SnesError::IncompatibleState { reason: "version mismatch" });
        }
        let length = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
        let payload = &buf[SAVE_STATE_HEADER_LEN..];
        if payload.len() != length {
            return Err(SnesError::IncompatibleState { reason: "length mismatch" });
        }
        if buf[12] != mapper_tag(bus.memory().cartridge().mapper()) {
            return Err(SnesError::IncompatibleState { reason: "cartridge type mismatch" });
        }

        let (decoded, _): (Bus, usize) = bincode::decode_from_slice(payload, BINCODE_CONFIG)
            .map_err(|_| SnesError::IncompatibleState { reason: "failed to decode state" })?;

        self.bus = Some(decoded);
        Ok(())
    }

    /// Returns a bit-exact copy of cartridge SRAM, or `None` if there is no battery-backed SRAM.
    #[must_use]
    pub fn save_battery(&self) -> Option<Vec<u8>> {
        let bus = self.bus.as_ref()?;
        let sram = bus.memory().cartridge().sram();
        if sram.is_empty() {
            None
        } else {
            Some(sram.to_vec())
        }
    }

    /// Loads a previously-saved battery backup. The provided blob's length must exactly match
    /// the cartridge's SRAM size.
    ///
    /// # Errors
    ///
    /// Returns [`SnesError::BatterySizeMismatch`] if `data.len()` doesn't match the cartridge's
    /// SRAM size.
    pub fn load_battery(&mut self, data: &[u8]) -> Result<(), SnesError> {
        let Some(bus) = self.bus.as_mut() else { return Ok(()) };

        let expected = bus.memory().cartridge().sram_len();
        if data.len() != expected {
            return Err(SnesError::BatterySizeMismatch { provided: data.len(), expected });
        }

        bus.memory_mut().cartridge_mut().load_sram(data);
        self.last_sram_checksum = CRC.checksum(data);
        Ok(())
    }

    #[must_use]
    pub fn has_cartridge(&self) -> bool {
        self.bus.is_some()
    }
}

impl Default for SnesEmulator {
    fn default() -> Self {
        Self::init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_lorom(entry_opcodes: &[u8]) -> Vec<u8> {
        const HEADER_ADDR: usize = 0x7FC0;
        let mut rom = vec![0u8; 0x8000];
        rom[HEADER_ADDR + 0x15] = 0x20; // map mode: LoROM
        rom[HEADER_ADDR + 0x19] = 0x01; // region: plausible
        rom[HEADER_ADDR + 0x3C] = 0x00; // reset vector low
        rom[HEADER_ADDR + 0x3D] = 0x80; // reset vector high -> $8000
        rom[..entry_opcodes.len()].copy_from_slice(entry_opcodes);
        rom
    }

    #[test]
    fn reset_vector_boots_to_8000_and_sec_sets_carry() {
        let mut emu = SnesEmulator::init();
        // SEC ($38) at $8000, then BRA -2 ($80 $FE) looping on itself forever.
        emu.load_rom(minimal_lorom(&[0x38, 0x80, 0xFE]), None, TimingMode::Ntsc).unwrap();

        assert_eq!(emu.main_cpu.registers().pc, 0x8000);

        let bus = emu.bus.as_mut().unwrap();
        emu.main_cpu.step(bus);
        assert!(emu.main_cpu.registers().p.c);
        assert_eq!(emu.main_cpu.registers().pc, 0x8001);

        for _ in 0..8 {
            emu.main_cpu.step(bus);
        }
        assert_eq!(emu.main_cpu.registers().pc, 0x8001);
    }

    #[test]
    fn load_rom_rejects_undersized_image() {
        let mut emu = SnesEmulator::init();
        assert!(emu.load_rom(vec![0u8; 100], None, TimingMode::Ntsc).is_err());
    }

    #[test]
    fn save_state_round_trips() {
        let mut emu = SnesEmulator::init();
        emu.load_rom(minimal_lorom(&[0x38, 0x80, 0xFE]), None, TimingMode::Ntsc).unwrap();

        let first = emu.save_state().unwrap();
        emu.load_state(&first).unwrap();
        let second = emu.save_state().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_state_rejects_bad_magic() {
        let mut emu = SnesEmulator::init();
        emu.load_rom(minimal_lorom(&[0x38, 0x80, 0xFE]), None, TimingMode::Ntsc).unwrap();

        let mut buf = emu.save_state().unwrap();
        buf[0] = b'X';
        assert!(emu.load_state(&buf).is_err());
    }

    #[test]
    fn load_battery_rejects_wrong_length() {
        let mut emu = SnesEmulator::init();
        emu.load_rom(minimal_lorom(&[0x38, 0x80, 0xFE]), None, TimingMode::Ntsc).unwrap();
        assert!(emu.load_battery(&[0u8; 12345]).is_err());
    }

    #[test]
    fn no_cartridge_operations_are_harmless_no_ops() {
        let mut emu = SnesEmulator::init();
        assert!(!emu.has_cartridge());
        emu.run_frame();
        emu.set_button(JoypadPort::P1, 0, true);
        assert!(emu.save_battery().is_none());
        let mut pixels = vec![0u8; SCREEN_WIDTH * SCREEN_HEIGHT * 4].into_boxed_slice();
        emu.put_pixels((&mut *pixels).try_into().unwrap());
    }
}
