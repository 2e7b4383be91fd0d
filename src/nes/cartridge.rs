use std::{fs, io, path::Path, path::PathBuf};

use thiserror::Error;
use tracing::info;

use super::mapper::NameTableMirroring;

const HEADER_SIZE: usize = 16;
const TRAINER_SIZE: usize = 512;
const PRG_UNIT: usize = 0x4000;
const CHR_UNIT: usize = 0x2000;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("ROM is too small to contain an iNES header ({0} bytes)")]
    TooSmall(usize),
    #[error("invalid iNES header magic, expected NES<EOF>")]
    BadMagic,
    #[error("ROM truncated: expected {expected} {section} bytes but only {available} remain")]
    Truncated {
        section: &'static str,
        expected: usize,
        available: usize,
    },
    #[error("invalid PRG ROM: empty payload")]
    EmptyPrg,
    #[error("unsupported mapper: {0}")]
    UnsupportedMapper(u16),
    #[error("failed to read ROM {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Parsed cartridge image. An empty `chr_rom` means the board carries CHR RAM.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub mapper_number: u16,
    pub mirroring: NameTableMirroring,
    pub has_battery: bool,
    pub prg_rom: Vec<u8>,
    pub chr_rom: Vec<u8>,
    pub chr_ram_size: usize,
    pub prg_ram_size: usize,
    pub trainer: Option<Vec<u8>>,
}

impl Cartridge {
    pub fn from_file(path: &Path) -> Result<Self, RomError> {
        let bytes = fs::read(path).map_err(|source| RomError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cart = Self::from_bytes(&bytes)?;
        info!(
            path = %path.display(),
            mapper = cart.mapper_number,
            prg_kb = cart.prg_rom.len() / 1024,
            chr_kb = cart.chr_rom.len() / 1024,
            "loaded iNES image"
        );
        Ok(cart)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RomError> {
        if bytes.len() < HEADER_SIZE {
            return Err(RomError::TooSmall(bytes.len()));
        }
        if &bytes[0..4] != b"NES\x1A" {
            return Err(RomError::BadMagic);
        }

        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let is_nes2 = (flags7 & 0x0C) == 0x08;

        // Headers with junk in bytes 11-15 predate the upper mapper nibble.
        let clean_tail = bytes[11..16].iter().all(|&b| b == 0);
        let mut mapper_number = (flags6 >> 4) as u16;
        if is_nes2 || clean_tail {
            mapper_number |= (flags7 & 0xF0) as u16;
        }
        if is_nes2 {
            mapper_number |= ((bytes[8] & 0x0F) as u16) << 8;
        }

        let mirroring = if (flags6 & 0x08) != 0 {
            NameTableMirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            NameTableMirroring::Vertical
        } else {
            NameTableMirroring::Horizontal
        };
        let has_battery = (flags6 & 0x02) != 0;
        let trainer_present = (flags6 & 0x04) != 0;

        let (prg_units, chr_units) = if is_nes2 {
            (
                ((bytes[9] & 0x0F) as usize) << 8 | bytes[4] as usize,
                ((bytes[9] >> 4) as usize) << 8 | bytes[5] as usize,
            )
        } else {
            (bytes[4] as usize, bytes[5] as usize)
        };
        if prg_units == 0 {
            return Err(RomError::EmptyPrg);
        }

        let prg_ram_size = if is_nes2 {
            match bytes[10] & 0x0F {
                0 => 0x2000,
                shift => 64usize << shift,
            }
        } else {
            bytes[8].max(1) as usize * 0x2000
        };

        let mut cursor = HEADER_SIZE;
        let trainer = if trainer_present {
            let slice = take(bytes, cursor, TRAINER_SIZE, "trainer")?;
            cursor += TRAINER_SIZE;
            Some(slice.to_vec())
        } else {
            None
        };

        let prg_rom = take(bytes, cursor, prg_units * PRG_UNIT, "PRG")?.to_vec();
        cursor += prg_rom.len();
        let chr_rom = take(bytes, cursor, chr_units * CHR_UNIT, "CHR")?.to_vec();

        Ok(Self {
            mapper_number,
            mirroring,
            has_battery,
            prg_rom,
            chr_rom,
            chr_ram_size: CHR_UNIT,
            prg_ram_size,
            trainer,
        })
    }
}

fn take<'a>(
    bytes: &'a [u8],
    start: usize,
    len: usize,
    section: &'static str,
) -> Result<&'a [u8], RomError> {
    let available = bytes.len().saturating_sub(start);
    if available < len {
        return Err(RomError::Truncated {
            section,
            expected: len,
            available,
        });
    }
    Ok(&bytes[start..start + len])
}
