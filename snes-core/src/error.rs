//! Error kinds surfaced at the emulator's public API boundary.
//!
//! Internally the engine never errors: unmapped reads return open bus, unknown register writes
//! are silently dropped, and `$4206` division by zero yields the documented hardware result
//! rather than panicking. These types exist only for [`crate::api::SnesEmulator`] entry points
//! that can be handed bad input from outside the core (a malformed ROM, a foreign save blob).

use thiserror::Error;

const MIN_ROM_LEN: usize = 0x8000;

#[derive(Debug, Error)]
pub enum SnesLoadError {
    #[error("ROM is too small to be a valid SNES image: {len} bytes (minimum {MIN_ROM_LEN})")]
    RomTooSmall { len: usize },
    #[error("could not confidently determine a supported mapper (LoROM/HiROM/ExHiROM) for this ROM")]
    UnrecognizedMapper,
}

impl SnesLoadError {
    pub(crate) fn check_rom_len(len: usize) -> Result<(), Self> {
        if len < MIN_ROM_LEN { Err(Self::RomTooSmall { len }) } else { Ok(()) }
    }
}

#[derive(Debug, Error)]
pub enum SnesError {
    #[error(transparent)]
    Load(#[from] SnesLoadError),
    #[error(
        "save state is incompatible with this emulator instance: {reason}"
    )]
    IncompatibleState { reason: &'static str },
    #[error(
        "battery save has length {provided} bytes, cartridge SRAM expects {expected} bytes"
    )]
    BatterySizeMismatch { provided: usize, expected: usize },
}
