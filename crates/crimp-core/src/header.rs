use std::io::{Read, Write};

use crate::{CrimpError, Result};

/// Size of the fixed header that prefixes every compressed stream.
pub const HEADER_SIZE: usize = 20;

/// Current container format version, carried in the low byte of the flags
/// word.
pub const FORMAT_VERSION: u8 = 1;

/// Canonical extension for compressed files.
pub const FILE_EXTENSION: &str = "crz";

const RESERVED_FLAG_BITS: u32 = 0xffff_ff00;

/// Fixed 20-byte header written ahead of the compressed payload.
///
/// Layout (little-endian): 4-byte algorithm magic, `u32` flags (version in
/// the low byte, upper 24 bits reserved and zero), `u64` size of the
/// original data, and the CRC32 of the original data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub flags: u32,
    pub original_size: u64,
    pub crc32: u32,
}

impl FileHeader {
    pub fn new(magic: [u8; 4], original_size: u64, crc32: u32) -> Self {
        Self {
            magic,
            flags: u32::from(FORMAT_VERSION),
            original_size,
            crc32,
        }
    }

    /// Version encoded in the low flag byte.
    pub fn version(&self) -> u8 {
        (self.flags & 0xff) as u8
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes)?;
        Self::from_bytes(bytes)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.original_size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);

        let flags = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if (flags & 0xff) as u8 != FORMAT_VERSION {
            return Err(CrimpError::InvalidFormat("unsupported format version"));
        }
        if flags & RESERVED_FLAG_BITS != 0 {
            return Err(CrimpError::InvalidFormat("invalid header reserved bits"));
        }

        Ok(Self {
            magic,
            flags,
            original_size: u64::from_le_bytes([
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ]),
            crc32: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        })
    }
}
