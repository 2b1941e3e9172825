//! Cartridge ROM/SRAM storage and LoROM/HiROM/ExHiROM address mapping.

use crate::error::SnesLoadError;
use bincode::{Decode, Encode};
use emu_common::num::GetBit;
use std::cmp::Ordering;

const LOROM_HEADER_ADDR: usize = 0x7FC0;
const HIROM_HEADER_ADDR: usize = 0xFFC0;
const EXHIROM_HEADER_ADDR: usize = 0x40FFC0;

const COPIER_HEADER_LEN: usize = 0x200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum MapperType {
    LoRom,
    HiRom,
    ExHiRom,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Cartridge {
    rom: Box<[u8]>,
    sram: Box<[u8]>,
    mapper: MapperType,
}

impl Cartridge {
    pub fn new(mut rom: Vec<u8>, initial_sram: Option<Vec<u8>>) -> Result<Self, SnesLoadError> {
        SnesLoadError::check_rom_len(rom.len())?;

        if has_copier_header(rom.len()) {
            rom.drain(..COPIER_HEADER_LEN);
        }

        let rom = pad_to_power_of_two(rom);

        let mapper = guess_mapper(&rom).ok_or(SnesLoadError::UnrecognizedMapper)?;
        let header_addr = header_address(mapper);

        // LoROM/HiROM header offset $18 holds SRAM size as a kilobytes power of 2.
        let sram_header_byte = rom[header_addr | 0x18];
        let sram_len = if sram_header_byte == 0 { 0 } else { 1 << (10 + sram_header_byte) };

        let sram = match initial_sram {
            Some(sram) if sram.len() == sram_len => sram.into_boxed_slice(),
            _ => vec![0; sram_len].into_boxed_slice(),
        };

        log::info!("Using mapper {mapper:?} with ROM size {} and SRAM size {sram_len}", rom.len());

        Ok(Self { rom: rom.into_boxed_slice(), sram, mapper })
    }

    pub fn read(&self, address: u32) -> Option<u8> {
        match map_address(self.mapper, address, self.rom.len() as u32, self.sram.len() as u32)? {
            CartridgeAddress::Rom(addr) => Some(self.rom[addr as usize]),
            CartridgeAddress::Sram(addr) => Some(self.sram[addr as usize]),
        }
    }

    pub fn write(&mut self, address: u32, value: u8) {
        if let Some(CartridgeAddress::Sram(addr)) =
            map_address(self.mapper, address, self.rom.len() as u32, self.sram.len() as u32)
        {
            self.sram[addr as usize] = value;
        }
    }

    #[must_use]
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    #[must_use]
    pub fn sram_len(&self) -> usize {
        self.sram.len()
    }

    pub fn load_sram(&mut self, data: &[u8]) {
        self.sram.copy_from_slice(data);
    }

    #[must_use]
    pub fn mapper(&self) -> MapperType {
        self.mapper
    }
}

/// Doubles the ROM by copying the leading piece over itself until its length is a power of two,
/// matching how real hardware mirrors an undersized cartridge across the address space.
fn pad_to_power_of_two(rom: Vec<u8>) -> Vec<u8> {
    let mut rom = rom;
    if rom.is_empty() {
        return rom;
    }
    let target = rom.len().next_power_of_two();
    rom.reserve(target - rom.len());
    while rom.len() < target {
        let remaining = target - rom.len();
        let copy_len = remaining.min(rom.len());
        let copy: Vec<u8> = rom[..copy_len].to_vec();
        rom.extend_from_slice(&copy);
    }
    rom
}

fn has_copier_header(len: usize) -> bool {
    len >= COPIER_HEADER_LEN && (len - COPIER_HEADER_LEN) % 0x8000 == 0 && len % 0x8000 != 0
}

fn header_address(mapper: MapperType) -> usize {
    match mapper {
        MapperType::LoRom => LOROM_HEADER_ADDR,
        MapperType::HiRom => HIROM_HEADER_ADDR,
        MapperType::ExHiRom => EXHIROM_HEADER_ADDR,
    }
}

const HEADER_MAP_MODE_OFFSET: usize = 0x15;
const HEADER_REGION_OFFSET: usize = 0x19;
const HEADER_COMPLEMENT_OFFSET: usize = 0x1C;
const HEADER_CHECKSUM_OFFSET: usize = 0x1E;
const RESET_VECTOR_OFFSET: usize = 0x3C;

fn score_header(rom: &[u8], header_addr: usize) -> i32 {
    if header_addr + 0x40 > rom.len() {
        return i32::MIN;
    }

    let mut score = 0;

    let reset_vector =
        u16::from_le_bytes([rom[header_addr + RESET_VECTOR_OFFSET], rom[header_addr + RESET_VECTOR_OFFSET + 1]]);
    if reset_vector >= 0x8000 {
        score += 8;
    } else {
        return i32::MIN;
    }

    let first_opcode_addr = (reset_vector & 0x7FFF) as usize;
    if first_opcode_addr < rom.len() {
        score += match rom[first_opcode_addr] {
            0x78 | 0x18 | 0x4C | 0x5C | 0x9C | 0x64 | 0x74 | 0x9E => 4,
            0x00 | 0xDB => -4,
            _ => 0,
        };
    }

    let complement = u16::from_le_bytes([
        rom[header_addr + HEADER_COMPLEMENT_OFFSET],
        rom[header_addr + HEADER_COMPLEMENT_OFFSET + 1],
    ]);
    let checksum = u16::from_le_bytes([
        rom[header_addr + HEADER_CHECKSUM_OFFSET],
        rom[header_addr + HEADER_CHECKSUM_OFFSET + 1],
    ]);
    if checksum ^ complement == 0xFFFF && checksum != 0 {
        score += 8;
    }

    let map_mode = rom[header_addr + HEADER_MAP_MODE_OFFSET];
    if matches!(map_mode & 0x0F, 0x00 | 0x01 | 0x02 | 0x05 | 0x0A) {
        score += 5;
    }

    let region = rom[header_addr + HEADER_REGION_OFFSET];
    if region <= 0x14 {
        score += 5;
    }

    score
}

fn guess_mapper(rom: &[u8]) -> Option<MapperType> {
    if rom.len() < 0x8000 {
        return None;
    }

    let lorom_score = score_header(rom, LOROM_HEADER_ADDR);
    let hirom_score = score_header(rom, HIROM_HEADER_ADDR);
    let exhirom_score =
        if rom.len() >= 0x400000 { score_header(rom, EXHIROM_HEADER_ADDR) } else { i32::MIN };

    let best = [
        (MapperType::LoRom, lorom_score),
        (MapperType::HiRom, hirom_score),
        (MapperType::ExHiRom, exhirom_score),
    ]
    .into_iter()
    .max_by_key(|&(_, score)| score)?;

    if best.1 == i32::MIN { None } else { Some(best.0) }
}

enum CartridgeAddress {
    Rom(u32),
    Sram(u32),
}

fn map_address(
    mapper: MapperType,
    address: u32,
    rom_len: u32,
    sram_len: u32,
) -> Option<CartridgeAddress> {
    match mapper {
        MapperType::LoRom => lorom_map_address(address, rom_len, sram_len),
        MapperType::HiRom => hirom_map_address(address, rom_len, sram_len, false),
        MapperType::ExHiRom => hirom_map_address(address, rom_len, sram_len, true),
    }
}

fn lorom_map_address(address: u32, rom_len: u32, sram_len: u32) -> Option<CartridgeAddress> {
    let bank = address >> 16;
    let offset = address & 0xFFFF;
    match (bank, offset) {
        (0x00..=0x3F | 0x80..=0xBF, 0x8000..=0xFFFF)
        | (0x40..=0x6F | 0xC0..=0xEF, _)
        | (0x70..=0x7D | 0xF0..=0xFF, 0x8000..=0xFFFF) => {
            Some(CartridgeAddress::Rom(lorom_map_rom_address(address, rom_len)))
        }
        (0x70..=0x7D | 0xF0..=0xFF, 0x0000..=0x7FFF) => {
            if sram_len != 0 {
                let sram_addr = address & (sram_len - 1);
                Some(CartridgeAddress::Sram(sram_addr))
            } else {
                Some(CartridgeAddress::Rom(lorom_map_rom_address(address, rom_len)))
            }
        }
        _ => None,
    }
}

fn lorom_map_rom_address(address: u32, rom_len: u32) -> u32 {
    let rom_addr = ((address & 0x7F0000) >> 1) | (address & 0x007FFF);
    rom_addr % rom_len
}

fn hirom_map_address(
    address: u32,
    rom_len: u32,
    sram_len: u32,
    exhirom: bool,
) -> Option<CartridgeAddress> {
    let bank = address >> 16;
    let offset = address & 0xFFFF;
    match (bank, offset) {
        (0x40..=0x7D | 0xC0..=0xFF, _) | (0x00..=0x3F | 0x80..=0xBF, 0x8000..=0xFFFF) => {
            Some(CartridgeAddress::Rom(hirom_map_rom_address(address, rom_len, exhirom)))
        }
        (0x00..=0x3F | 0x80..=0xBF, 0x6000..=0x7FFF) if sram_len != 0 => {
            let sram_bank = bank & 0x3F;
            let sram_addr = (sram_bank << 13) | (offset & 0x1FFF);
            Some(CartridgeAddress::Sram(sram_addr & (sram_len - 1)))
        }
        _ => None,
    }
}

fn hirom_map_rom_address(address: u32, rom_len: u32, exhirom: bool) -> u32 {
    let masked = address & 0x3FFFFF;
    let addr = if exhirom && !address.bit(23) { masked + 0x400000 } else { masked };
    addr % rom_len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lorom(size: usize) -> Vec<u8> {
        let mut rom = vec![0u8; size];
        rom[LOROM_HEADER_ADDR + HEADER_MAP_MODE_OFFSET] = 0x20;
        rom[LOROM_HEADER_ADDR + HEADER_REGION_OFFSET] = 0x01;
        rom[LOROM_HEADER_ADDR + RESET_VECTOR_OFFSET] = 0x00;
        rom[LOROM_HEADER_ADDR + RESET_VECTOR_OFFSET + 1] = 0x80;
        rom[0x0000] = 0x78; // SEI at $8000, mapped to file offset 0 for bank 0 LoROM
        rom
    }

    #[test]
    fn detects_lorom_from_header() {
        let rom = make_lorom(0x8000);
        let cart = Cartridge::new(rom, None).unwrap();
        assert_eq!(cart.mapper(), MapperType::LoRom);
    }

    #[test]
    fn lorom_sram_write_to_bank_00_is_a_no_op() {
        let rom = make_lorom(0x8000);
        let mut cart = Cartridge::new(rom, None).unwrap();
        // Bank $00 offset $8000 is ROM, not SRAM; writes must not panic or mutate ROM.
        cart.write(0x008000, 0xFF);
        assert_eq!(cart.read(0x008000), Some(0x78));
    }

    #[test]
    fn rom_too_small_is_rejected() {
        let result = Cartridge::new(vec![0u8; 100], None);
        assert!(result.is_err());
    }
}
