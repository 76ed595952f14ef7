use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The fixed 8-byte compound-file signature.
pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
/// The header always occupies the first 512 bytes, independent of block size.
pub const HEADER_SIZE: usize = 512;
/// Number of big-block-allocation-table pointers stored inline in the header.
pub const INLINE_BAT_ENTRIES: usize = 109;

/// Parsed and validated container header.
///
/// Produced once per container; every derived quantity (block sizes,
/// entries-per-block, physical offsets) is fixed for the container's
/// lifetime.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub class_id: Uuid,
    pub minor_version: u16,
    pub major_version: u16,
    pub byte_order: u16,
    /// log2 of the big-block size; validated to lie in [6, 30].
    pub big_block_shift: u16,
    /// log2 of the small-block size; validated to be <= `big_block_shift`.
    pub small_block_shift: u16,
    pub directory_sectors: u32,
    pub bat_sectors: u32,
    pub directory_start: u32,
    /// Streams strictly below this size live in the mini-stream.
    pub threshold: u32,
    pub sbat_start: u32,
    pub sbat_sectors: u32,
    pub meta_bat_start: u32,
    pub meta_bat_sectors: u32,
    pub inline_bat: [u32; INLINE_BAT_ENTRIES],
}

impl Superblock {
    /// Read and validate the 512-byte header.
    ///
    /// Validation order: signature, block-size shifts, transacting
    /// signature.  Any failure is fatal — the byte source is not a usable
    /// container.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| {
            // A source shorter than one header cannot be a compound file.
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::SignatureMismatch
            } else {
                Error::Io(e)
            }
        })?;

        if buf[..8] != SIGNATURE {
            return Err(Error::SignatureMismatch);
        }

        let mut cur = &buf[8..];
        let mut class_id_bytes = [0u8; 16];
        cur.read_exact(&mut class_id_bytes)?;
        let minor_version = cur.read_u16::<LittleEndian>()?;
        let major_version = cur.read_u16::<LittleEndian>()?;
        let byte_order = cur.read_u16::<LittleEndian>()?;
        let big_block_shift = cur.read_u16::<LittleEndian>()?;
        let small_block_shift = cur.read_u16::<LittleEndian>()?;
        let mut reserved = [0u8; 6];
        cur.read_exact(&mut reserved)?;
        let directory_sectors = cur.read_u32::<LittleEndian>()?;
        let bat_sectors = cur.read_u32::<LittleEndian>()?;
        let directory_start = cur.read_u32::<LittleEndian>()?;
        let transacting = cur.read_u32::<LittleEndian>()?;
        let threshold = cur.read_u32::<LittleEndian>()?;
        let sbat_start = cur.read_u32::<LittleEndian>()?;
        let sbat_sectors = cur.read_u32::<LittleEndian>()?;
        let meta_bat_start = cur.read_u32::<LittleEndian>()?;
        let meta_bat_sectors = cur.read_u32::<LittleEndian>()?;
        let mut inline_bat = [0u32; INLINE_BAT_ENTRIES];
        cur.read_u32_into::<LittleEndian>(&mut inline_bat)?;

        if !(6..=30).contains(&big_block_shift) {
            return Err(Error::UnreasonableGeometry(format!(
                "big-block shift {big_block_shift} outside [6, 30]"
            )));
        }
        if small_block_shift > big_block_shift {
            return Err(Error::UnreasonableGeometry(format!(
                "small-block shift {small_block_shift} exceeds big-block shift {big_block_shift}"
            )));
        }
        if transacting != 0 {
            return Err(Error::UnreasonableGeometry(format!(
                "nonzero transacting signature {transacting:#010X}"
            )));
        }

        Ok(Self {
            class_id: Uuid::from_bytes_le(class_id_bytes),
            minor_version,
            major_version,
            byte_order,
            big_block_shift,
            small_block_shift,
            directory_sectors,
            bat_sectors,
            directory_start,
            threshold,
            sbat_start,
            sbat_sectors,
            meta_bat_start,
            meta_bat_sectors,
            inline_bat,
        })
    }

    pub fn big_block_size(&self) -> u64 {
        1u64 << self.big_block_shift
    }

    pub fn small_block_size(&self) -> u64 {
        1u64 << self.small_block_shift
    }

    /// 32-bit table entries held by one big block.
    pub fn entries_per_block(&self) -> usize {
        (self.big_block_size() / 4) as usize
    }

    /// Physical byte offset of a big block.  Block 0 begins one block size
    /// into the source; the header occupies the space before it.
    pub fn block_offset(&self, block: u32) -> u64 {
        (u64::from(block) + 1) << self.big_block_shift
    }
}
