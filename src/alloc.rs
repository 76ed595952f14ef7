//! Block allocation tables and chain walking.
//!
//! A table is a flat, 0-indexed array mapping block number → next block
//! number, where four reserved high values are sentinels rather than
//! indices.  Two tables exist per container: the big-block table (BAT),
//! built eagerly at open from the header's inline pointers plus the
//! meta-BAT indirection chain, and the small-block table (SBAT), built
//! lazily when the first mini-stream read happens.
//!
//! Chain walking is cycle-guarded: a visited bitmap bounded by the table
//! length guarantees termination in O(table length) no matter how the
//! links are arranged, and a damaged chain still yields the blocks
//! collected before the fault.

use byteorder::{LittleEndian, ReadBytesExt};
use log::warn;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result, Warning};
use crate::superblock::Superblock;

/// Block is not allocated to any chain.
pub const UNUSED: u32 = 0xFFFF_FFFF;
/// Last block of a chain.
pub const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
/// Block holds allocation-table entries.
pub const BAT_BLOCK: u32 = 0xFFFF_FFFD;
/// Block holds meta-allocation-table entries.
pub const META_BAT_BLOCK: u32 = 0xFFFF_FFFC;

/// True for any of the four reserved values that are not block indices.
pub fn is_sentinel(value: u32) -> bool {
    value >= META_BAT_BLOCK
}

/// Why a chain walk stopped before reaching a clean end-of-chain marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFault {
    /// The successor was a block already visited in this walk.
    Cycle { at: u32 },
    /// The successor is neither end-of-chain nor a valid table index.
    OutOfRange { successor: u32 },
}

/// An ordered list of block numbers, possibly cut short by damage.
#[derive(Debug, Clone)]
pub struct Chain {
    pub blocks: Vec<u32>,
    pub fault: Option<ChainFault>,
}

impl Chain {
    pub fn warning(&self, start: u32) -> Option<Warning> {
        match self.fault {
            Some(ChainFault::Cycle { .. }) => Some(Warning::CyclicChain {
                start,
                collected: self.blocks.len(),
            }),
            Some(ChainFault::OutOfRange { successor }) => Some(Warning::BrokenChain {
                start,
                successor,
                collected: self.blocks.len(),
            }),
            None => None,
        }
    }
}

/// A flat next-block-pointer array for big or small blocks.
#[derive(Debug, Clone)]
pub struct AllocTable {
    entries: Vec<u32>,
}

impl AllocTable {
    pub fn new(entries: Vec<u32>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, block: u32) -> Option<u32> {
        self.entries.get(block as usize).copied()
    }

    /// Follow the linked chain from `start` until end-of-chain.
    ///
    /// The walk stops early — keeping the partial chain — when a successor
    /// is out of range or a block repeats.  A `start` equal to the
    /// end-of-chain marker yields an empty, fault-free chain (a zero-length
    /// stream).
    pub fn chain(&self, start: u32) -> Chain {
        let mut blocks = Vec::new();
        let mut visited = vec![false; self.entries.len()];
        let mut current = start;
        let fault = loop {
            if current == END_OF_CHAIN {
                break None;
            }
            if is_sentinel(current) || current as usize >= self.entries.len() {
                break Some(ChainFault::OutOfRange { successor: current });
            }
            if visited[current as usize] {
                break Some(ChainFault::Cycle { at: current });
            }
            visited[current as usize] = true;
            blocks.push(current);
            current = self.entries[current as usize];
        };
        if let Some(f) = fault {
            warn!("chain from block {start} stopped early ({f:?}); kept {} block(s)", blocks.len());
        }
        Chain { blocks, fault }
    }
}

/// Read one big block's worth of 32-bit entries.
fn read_block_entries<R: Read + Seek>(
    source: &mut R,
    sb: &Superblock,
    block: u32,
) -> Result<Vec<u32>> {
    source.seek(SeekFrom::Start(sb.block_offset(block)))?;
    let mut entries = vec![0u32; sb.entries_per_block()];
    source.read_u32_into::<LittleEndian>(&mut entries)?;
    Ok(entries)
}

/// Highest block number that can physically exist in the source, plus one.
fn max_blocks(sb: &Superblock, source_len: u64) -> u64 {
    source_len >> sb.big_block_shift
}

/// Build the big-block allocation table.
///
/// The meta list is seeded from the header's 109 inline pointers and then
/// extended by following the meta-BAT indirection chain for the declared
/// sector count.  Each indirect block carries `entries_per_block - 1`
/// pointers; its final slot links to the next indirect block.
///
/// An *unused* meta entry contributes one block's worth of unused table
/// entries instead of a block read — containers in the wild encode runs of
/// free blocks this way and must not be rejected.
pub fn build_bat<R: Read + Seek>(
    source: &mut R,
    sb: &Superblock,
    source_len: u64,
) -> Result<AllocTable> {
    let epb = sb.entries_per_block();
    let limit = max_blocks(sb, source_len);

    if u64::from(sb.bat_sectors) > limit {
        return Err(Error::InconsistentAllocationTable(format!(
            "{} BAT sector(s) declared but the source holds at most {limit} block(s)",
            sb.bat_sectors
        )));
    }
    let declared = sb.bat_sectors as usize * epb;

    let mut meta: Vec<u32> = sb.inline_bat.to_vec();
    let mut indirect = sb.meta_bat_start;
    for _ in 0..sb.meta_bat_sectors {
        if is_sentinel(indirect) || u64::from(indirect) >= limit {
            return Err(Error::InconsistentAllocationTable(format!(
                "meta-BAT chain ended early at {indirect:#010X} with sectors still declared"
            )));
        }
        let entries = read_block_entries(source, sb, indirect)?;
        meta.extend_from_slice(&entries[..epb - 1]);
        indirect = entries[epb - 1];
    }

    let mut table: Vec<u32> = Vec::with_capacity(declared);
    for &pointer in &meta {
        if table.len() >= declared {
            break;
        }
        if pointer == UNUSED {
            // A deliberate run of unused blocks, not an error.
            table.resize(table.len() + epb, UNUSED);
            continue;
        }
        if is_sentinel(pointer) || u64::from(pointer) >= limit {
            return Err(Error::InconsistentAllocationTable(format!(
                "BAT pointer {pointer:#010X} outside the source"
            )));
        }
        for value in read_block_entries(source, sb, pointer)? {
            if !is_sentinel(value) && value as usize >= declared {
                return Err(Error::InconsistentAllocationTable(format!(
                    "entry {value:#010X} exceeds table length {declared}"
                )));
            }
            table.push(value);
        }
    }

    if table.len() < declared {
        return Err(Error::InconsistentAllocationTable(format!(
            "{declared} entries declared, only {} materialized",
            table.len()
        )));
    }
    table.truncate(declared);
    Ok(AllocTable { entries: table })
}

/// Build the small-block allocation table by walking the big-block chain
/// from the header's SBAT start pointer.
///
/// Called lazily, after the container is already open, so the caller is
/// expected to degrade rather than abort when this fails.
pub fn build_sbat<R: Read + Seek>(
    source: &mut R,
    sb: &Superblock,
    bat: &AllocTable,
    source_len: u64,
) -> Result<AllocTable> {
    if sb.sbat_sectors == 0 {
        return Ok(AllocTable::empty());
    }
    let epb = sb.entries_per_block();
    let limit = max_blocks(sb, source_len);
    if u64::from(sb.sbat_sectors) > limit {
        return Err(Error::InconsistentAllocationTable(format!(
            "{} SBAT sector(s) declared but the source holds at most {limit} block(s)",
            sb.sbat_sectors
        )));
    }
    let declared = sb.sbat_sectors as usize * epb;

    let chain = bat.chain(sb.sbat_start);
    let mut table: Vec<u32> = Vec::with_capacity(declared);
    for &block in chain.blocks.iter().take(sb.sbat_sectors as usize) {
        for value in read_block_entries(source, sb, block)? {
            if !is_sentinel(value) && value as usize >= declared {
                return Err(Error::InconsistentAllocationTable(format!(
                    "entry {value:#010X} exceeds table length {declared}"
                )));
            }
            table.push(value);
        }
    }
    if table.len() < declared {
        warn!(
            "SBAT chain covers {} of {} declared sector(s); small streams may come up short",
            chain.blocks.len(),
            sb.sbat_sectors
        );
    }
    Ok(AllocTable { entries: table })
}
