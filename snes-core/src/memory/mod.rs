//! WRAM, the cartridge wrapper, and the `$4200`-`$421F` CPU-internal register block (multiply/
//! divide, NMI/IRQ enable, H/V IRQ timer, fastROM bit, joypad output). DMA lives in [`dma`];
//! bus routing and timing live in [`crate::bus`].

pub(crate) mod cartridge;
pub(crate) mod dma;

use bincode::{Decode, Encode};
use cartridge::Cartridge;
use emu_common::num::GetBit;

pub use cartridge::{Cartridge, MapperType};

const WRAM_LEN: usize = 128 * 1024;
type Wram = [u8; WRAM_LEN];

#[derive(Debug, Clone, Encode, Decode)]
pub struct Memory {
    cartridge: Cartridge,
    wram: Box<Wram>,
    wram_port_address: u32,
}

impl Memory {
    pub fn new(cartridge: Cartridge) -> Self {
        Self { cartridge, wram: vec![0; WRAM_LEN].into_boxed_slice().try_into().unwrap(), wram_port_address: 0 }
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn cartridge_mut(&mut self) -> &mut Cartridge {
        &mut self.cartridge
    }

    pub fn read_cartridge(&self, address: u32) -> Option<u8> {
        self.cartridge.read(address)
    }

    pub fn write_cartridge(&mut self, address: u32, value: u8) {
        self.cartridge.write(address, value);
    }

    pub fn read_wram(&self, address: u32) -> u8 {
        self.wram[(address as usize) & (WRAM_LEN - 1)]
    }

    pub fn write_wram(&mut self, address: u32, value: u8) {
        self.wram[(address as usize) & (WRAM_LEN - 1)] = value;
    }

    /// `$2180` WMDATA read: reads through the auto-incrementing pointer latched by `$2181`-`$2183`.
    pub fn read_wram_port(&mut self) -> u8 {
        let value = self.wram[self.wram_port_address as usize & (WRAM_LEN - 1)];
        self.increment_wram_port_address();
        value
    }

    pub fn write_wram_port(&mut self, value: u8) {
        self.wram[self.wram_port_address as usize & (WRAM_LEN - 1)] = value;
        self.increment_wram_port_address();
    }

    fn increment_wram_port_address(&mut self) {
        self.wram_port_address = (self.wram_port_address + 1) & (WRAM_LEN as u32 - 1);
    }

    pub fn write_wram_port_address_low(&mut self, value: u8) {
        self.wram_port_address = (self.wram_port_address & 0x1FFF00) | u32::from(value);
    }

    pub fn write_wram_port_address_mid(&mut self, value: u8) {
        self.wram_port_address = (self.wram_port_address & 0x1F00FF) | (u32::from(value) << 8);
    }

    pub fn write_wram_port_address_high(&mut self, value: u8) {
        self.wram_port_address = (self.wram_port_address & 0x00FFFF) | (u32::from(value & 0x01) << 16);
    }

    /// A hard reset re-zeros WRAM; a soft reset leaves its contents (and cartridge SRAM)
    /// undisturbed.
    pub fn reset(&mut self, hard: bool) {
        self.wram_port_address = 0;
        if hard {
            self.wram.fill(0);
        }
    }
}

/// Which scanline position (if any) generates the programmable H/V IRQ, decoded from `$4200`
/// bits 4-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum IrqMode {
    #[default]
    Off,
    H,
    V,
    Hv,
}

impl IrqMode {
    fn from_byte(byte: u8) -> Self {
        match byte & 0x30 {
            0x00 => Self::Off,
            0x10 => Self::H,
            0x20 => Self::V,
            0x30 => Self::Hv,
            _ => unreachable!("value & 0x30 is always one of the above"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum RomSpeed {
    #[default]
    Slow,
    Fast,
}

/// State backing `$4200`-`$420A` and `$420D`, plus the read-only results at `$4210`-`$4217`.
/// `$420B`/`$420C` (DMA channel enable masks) and `$4300`-`$437F` (per-channel DMA registers)
/// are handled by [`crate::bus::Bus`], which owns the [`dma::DmaController`] directly so it can
/// run transfers against the full address space the moment they're triggered.
#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuRegisters {
    pub nmi_enabled: bool,
    pub auto_joypad_read_enabled: bool,
    pub irq_mode: IrqMode,
    pub irq_htime: u16,
    pub irq_vtime: u16,
    pub vblank_nmi_flag: bool,
    pub irq_pending: bool,
    pub programmable_joypad_port: u8,
    pub rom_speed: RomSpeed,

    multiply_operand_l: u8,
    multiply_operand_r: u8,
    multiply_product: u16,
    division_dividend: u16,
    division_divisor: u8,
    division_quotient: u16,
}

impl CpuRegisters {
    pub fn new() -> Self {
        Self {
            nmi_enabled: false,
            auto_joypad_read_enabled: false,
            irq_mode: IrqMode::Off,
            irq_htime: 0,
            irq_vtime: 0,
            vblank_nmi_flag: false,
            irq_pending: false,
            programmable_joypad_port: 0xFF,
            rom_speed: RomSpeed::Slow,
            multiply_operand_l: 0xFF,
            multiply_operand_r: 0xFF,
            multiply_product: 0,
            division_dividend: 0xFFFF,
            division_divisor: 0xFF,
            division_quotient: 0,
        }
    }

    /// `$4200` NMITIMEN. The bus derives the CPU's NMI line as `in_vblank && nmi_enabled`, so
    /// flipping `nmi_enabled` on while already in VBlank raises that line right here and the CPU
    /// core's own edge detector fires NMI on its next poll -- the "enable during VBlank fires
    /// immediately" quirk falls out of that naturally rather than needing special-casing.
    pub fn write_nmitimen(&mut self, value: u8) {
        self.auto_joypad_read_enabled = value.bit(0);
        self.irq_mode = IrqMode::from_byte(value);
        // Any change to the IRQ mask acks a pending H/V IRQ and drops the line.
        self.irq_pending = false;
        self.nmi_enabled = value.bit(7);
    }

    pub fn write_register(&mut self, address: u32, value: u8) {
        match address & 0xFFFF {
            0x4201 => self.programmable_joypad_port = value,
            0x4202 => self.multiply_operand_l = value,
            0x4203 => {
                self.multiply_operand_r = value;
                self.multiply_product = u16::from(self.multiply_operand_l) * u16::from(value);
            }
            0x4204 => self.division_dividend = (self.division_dividend & 0xFF00) | u16::from(value),
            0x4205 => self.division_dividend = (self.division_dividend & 0x00FF) | (u16::from(value) << 8),
            0x4206 => {
                self.division_divisor = value;
                if value != 0 {
                    self.division_quotient = self.division_dividend / u16::from(value);
                    self.multiply_product = self.division_dividend % u16::from(value);
                } else {
                    self.division_quotient = 0xFFFF;
                    self.multiply_product = self.division_dividend;
                }
            }
            0x4207 => self.irq_htime = (self.irq_htime & 0xFF00) | u16::from(value),
            0x4208 => self.irq_htime = (self.irq_htime & 0x00FF) | (u16::from(value & 0x01) << 8),
            0x4209 => self.irq_vtime = (self.irq_vtime & 0xFF00) | u16::from(value),
            0x420A => self.irq_vtime = (self.irq_vtime & 0x00FF) | (u16::from(value & 0x01) << 8),
            0x420D => self.rom_speed = if value.bit(0) { RomSpeed::Fast } else { RomSpeed::Slow },
            _ => {}
        }
    }

    pub fn read_register(&mut self, address: u32, open_bus: u8) -> Option<u8> {
        let value = match address & 0xFFFF {
            0x4210 => {
                let flag = self.vblank_nmi_flag;
                self.vblank_nmi_flag = false;
                (u8::from(flag) << 7) | 0x02 | (open_bus & 0x70)
            }
            0x4211 => {
                let pending = self.irq_pending;
                self.irq_pending = false;
                (u8::from(pending) << 7) | (open_bus & 0x7F)
            }
            0x4213 => self.programmable_joypad_port,
            0x4214 => self.division_quotient as u8,
            0x4215 => (self.division_quotient >> 8) as u8,
            0x4216 => self.multiply_product as u8,
            0x4217 => (self.multiply_product >> 8) as u8,
            _ => return None,
        };
        Some(value)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartridge::Cartridge;

    fn minimal_lorom() -> Cartridge {
        const HEADER_ADDR: usize = 0x7FC0;
        let mut rom = vec![0u8; 0x8000];
        rom[HEADER_ADDR + 0x15] = 0x20;
        rom[HEADER_ADDR + 0x19] = 0x01;
        rom[HEADER_ADDR + 0x3C] = 0x00;
        rom[HEADER_ADDR + 0x3D] = 0x80;
        Cartridge::new(rom, None).unwrap()
    }

    #[test]
    fn wram_port_address_increments_after_each_access() {
        let mut memory = Memory::new(minimal_lorom());
        memory.write_wram_port_address_low(0x10);
        memory.write_wram_port(0xAB);
        memory.write_wram_port(0xCD);
        assert_eq!(memory.read_wram(0x10), 0xAB);
        assert_eq!(memory.read_wram(0x11), 0xCD);
    }

    #[test]
    fn wram_port_address_wraps_at_128k_and_top_byte_is_masked_to_one_bit() {
        let mut memory = Memory::new(minimal_lorom());
        memory.write_wram_port_address_high(0xFF);
        memory.write_wram_port_address_mid(0xFF);
        memory.write_wram_port_address_low(0xFF);
        memory.write_wram_port(0x42);
        assert_eq!(memory.read_wram((WRAM_LEN - 1) as u32), 0x42);
    }

    #[test]
    fn hard_reset_zeros_wram_but_soft_reset_preserves_it() {
        let mut memory = Memory::new(minimal_lorom());
        memory.write_wram(0x100, 0x55);
        memory.reset(false);
        assert_eq!(memory.read_wram(0x100), 0x55);
        memory.reset(true);
        assert_eq!(memory.read_wram(0x100), 0x00);
    }

    #[test]
    fn multiply_register_writes_compute_product_on_operand_r_write() {
        let mut regs = CpuRegisters::new();
        regs.write_register(0x4202, 7);
        regs.write_register(0x4203, 6);
        assert_eq!(regs.read_register(0x4216, 0).unwrap(), 42);
        assert_eq!(regs.read_register(0x4217, 0).unwrap(), 0);
    }

    #[test]
    fn divide_by_zero_yields_max_quotient_and_dividend_as_remainder() {
        let mut regs = CpuRegisters::new();
        regs.write_register(0x4204, 0x34);
        regs.write_register(0x4205, 0x12);
        regs.write_register(0x4206, 0);
        assert_eq!(regs.read_register(0x4214, 0).unwrap(), 0xFF);
        assert_eq!(regs.read_register(0x4215, 0).unwrap(), 0xFF);
        assert_eq!(regs.read_register(0x4216, 0).unwrap(), 0x34);
        assert_eq!(regs.read_register(0x4217, 0).unwrap(), 0x12);
    }

    #[test]
    fn nmi_flag_and_irq_pending_reads_clear_on_read() {
        let mut regs = CpuRegisters::new();
        regs.vblank_nmi_flag = true;
        regs.irq_pending = true;

        assert_eq!(regs.read_register(0x4210, 0).unwrap() & 0x80, 0x80);
        assert_eq!(regs.read_register(0x4210, 0).unwrap() & 0x80, 0x00);

        assert_eq!(regs.read_register(0x4211, 0).unwrap() & 0x80, 0x80);
        assert_eq!(regs.read_register(0x4211, 0).unwrap() & 0x80, 0x00);
    }

    #[test]
    fn nmitimen_write_clears_pending_irq_and_decodes_irq_mode() {
        let mut regs = CpuRegisters::new();
        regs.irq_pending = true;
        regs.write_nmitimen(0xB1); // bit 7 (NMI), bits 4-5 (H+V mode), bit 0 (auto-joypad)
        assert!(!regs.irq_pending);
        assert_eq!(regs.irq_mode, IrqMode::Hv);
        assert!(regs.nmi_enabled);
        assert!(regs.auto_joypad_read_enabled);
    }
}
