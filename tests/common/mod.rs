//! Synthetic container fixtures shared by the integration tests.
//!
//! Everything here writes 512-byte big blocks (shift 9) and 64-byte small
//! blocks (shift 6) unless a test overrides the header fields.

#![allow(dead_code)]

use cfbvfs::alloc::{BAT_BLOCK, END_OF_CHAIN, UNUSED};
use cfbvfs::superblock::SIGNATURE;

pub const BLOCK: usize = 512;
pub const ENTRIES_PER_BLOCK: usize = BLOCK / 4;
/// "No entry" marker for dirent sibling/child links.
pub const NO_LINK: u32 = 0xFFFF_FFFF;

pub struct HeaderSpec {
    pub big_shift: u16,
    pub small_shift: u16,
    pub threshold: u32,
    pub directory_start: u32,
    pub bat_sectors: u32,
    pub inline_bat: Vec<u32>,
    pub sbat_start: u32,
    pub sbat_sectors: u32,
    pub meta_bat_start: u32,
    pub meta_bat_sectors: u32,
    pub transacting: u32,
}

impl Default for HeaderSpec {
    fn default() -> Self {
        Self {
            big_shift: 9,
            small_shift: 6,
            threshold: 4096,
            directory_start: 0,
            bat_sectors: 1,
            inline_bat: Vec::new(),
            sbat_start: END_OF_CHAIN,
            sbat_sectors: 0,
            meta_bat_start: END_OF_CHAIN,
            meta_bat_sectors: 0,
            transacting: 0,
        }
    }
}

pub fn header(spec: &HeaderSpec) -> Vec<u8> {
    let mut h = vec![0u8; BLOCK];
    h[..8].copy_from_slice(&SIGNATURE);
    put16(&mut h, 0x18, 0x3E); // minor version
    put16(&mut h, 0x1A, 3); // major version
    put16(&mut h, 0x1C, 0xFFFE); // byte-order marker
    put16(&mut h, 0x1E, spec.big_shift);
    put16(&mut h, 0x20, spec.small_shift);
    put32(&mut h, 0x2C, spec.bat_sectors);
    put32(&mut h, 0x30, spec.directory_start);
    put32(&mut h, 0x34, spec.transacting);
    put32(&mut h, 0x38, spec.threshold);
    put32(&mut h, 0x3C, spec.sbat_start);
    put32(&mut h, 0x40, spec.sbat_sectors);
    put32(&mut h, 0x44, spec.meta_bat_start);
    put32(&mut h, 0x48, spec.meta_bat_sectors);
    for i in 0..109 {
        let value = spec.inline_bat.get(i).copied().unwrap_or(UNUSED);
        put32(&mut h, 0x4C + i * 4, value);
    }
    h
}

/// One 128-byte directory record.
pub fn dirent(
    name: &str,
    flag: u8,
    prev: u32,
    next: u32,
    child: u32,
    first_block: u32,
    size: u32,
) -> Vec<u8> {
    let mut d = vec![0u8; 128];
    let units: Vec<u16> = name.encode_utf16().collect();
    assert!(units.len() <= 31, "fixture name too long: {name}");
    for (i, u) in units.iter().enumerate() {
        d[i * 2..i * 2 + 2].copy_from_slice(&u.to_le_bytes());
    }
    put16(&mut d, 64, ((units.len() + 1) * 2) as u16);
    d[66] = flag;
    d[67] = 1; // color: black
    put32(&mut d, 68, prev);
    put32(&mut d, 72, next);
    put32(&mut d, 76, child);
    put32(&mut d, 116, first_block);
    put32(&mut d, 120, size);
    d
}

pub fn root_dirent(child: u32, first_block: u32, size: u32) -> Vec<u8> {
    dirent("Root Entry", 5, NO_LINK, NO_LINK, child, first_block, size)
}

/// A block of 32-bit table entries, padded to a full sector with UNUSED.
pub fn fat_sector(entries: &[u32]) -> Vec<u8> {
    assert!(entries.len() <= ENTRIES_PER_BLOCK);
    let mut s = Vec::with_capacity(BLOCK);
    for &e in entries {
        s.extend_from_slice(&e.to_le_bytes());
    }
    while s.len() < BLOCK {
        s.extend_from_slice(&UNUSED.to_le_bytes());
    }
    s
}

/// Concatenate a header and blocks, padding every block to 512 bytes.
pub fn assemble(header: Vec<u8>, blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = header;
    for b in blocks {
        assert!(b.len() <= BLOCK, "fixture block exceeds {BLOCK} bytes");
        out.extend_from_slice(b);
        out.resize(out.len() + BLOCK - b.len(), 0);
    }
    out
}

fn put16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ── Whole-tree fixture ───────────────────────────────────────────────────────

/// One node of a synthetic tree, parented onto the root (`parent == 0`) or
/// onto an earlier node.  `size: None` makes it a storage.
pub struct NodeSpec {
    pub parent: usize,
    pub name: String,
    pub size: Option<u32>,
}

/// Deterministic content for stream `id` in tree fixtures.
pub fn node_content(id: usize, size: u32) -> Vec<u8> {
    (0..size).map(|j| (id as u8).wrapping_add(j as u8)).collect()
}

/// Lay out a whole container for a tree of nodes: directory sectors first,
/// then data blocks, then the allocation table itself.  Sibling links are
/// chained in declaration order through NEXT; every declared child list
/// therefore arrives as a degenerate right-spine tree.
///
/// Streams are classified big regardless of size (threshold 0).
pub fn tree_fixture(nodes: &[NodeSpec]) -> Vec<u8> {
    let entry_count = nodes.len() + 1;
    let dir_sectors = entry_count.div_ceil(4);

    // Entry id -> (first_block, blocks) for stream payloads.
    let mut data_start = dir_sectors as u32;
    let mut first_blocks = vec![END_OF_CHAIN; entry_count];
    let mut data_blocks: Vec<Vec<u8>> = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let size = match node.size {
            Some(s) if s > 0 => s,
            _ => continue,
        };
        let content = node_content(i + 1, size);
        first_blocks[i + 1] = data_start;
        for chunk in content.chunks(BLOCK) {
            data_blocks.push(chunk.to_vec());
            data_start += 1;
        }
    }

    let data_end = data_start as usize;
    let mut bat_sectors = 1usize;
    while bat_sectors * ENTRIES_PER_BLOCK < data_end + bat_sectors {
        bat_sectors += 1;
    }
    let total_blocks = data_end + bat_sectors;

    // Next-block pointers for every physical block.
    let mut bat = vec![UNUSED; total_blocks];
    for s in 0..dir_sectors {
        bat[s] = if s + 1 < dir_sectors { (s + 1) as u32 } else { END_OF_CHAIN };
    }
    let mut cursor = dir_sectors;
    for node in nodes.iter() {
        let size = match node.size {
            Some(s) if s > 0 => s as usize,
            _ => continue,
        };
        let blocks = size.div_ceil(BLOCK);
        for b in 0..blocks {
            bat[cursor + b] = if b + 1 < blocks {
                (cursor + b + 1) as u32
            } else {
                END_OF_CHAIN
            };
        }
        cursor += blocks;
    }
    for b in data_end..total_blocks {
        bat[b] = BAT_BLOCK;
    }

    // Sibling chains: first declared child in the parent's CHILD slot,
    // later ones linked through NEXT.
    let mut child_link = vec![NO_LINK; entry_count];
    let mut next_link = vec![NO_LINK; entry_count];
    let mut last_child_of = vec![None::<usize>; entry_count];
    for (i, node) in nodes.iter().enumerate() {
        let id = i + 1;
        match last_child_of[node.parent] {
            None => child_link[node.parent] = id as u32,
            Some(prev) => next_link[prev] = id as u32,
        }
        last_child_of[node.parent] = Some(id);
    }

    let mut records: Vec<Vec<u8>> = Vec::with_capacity(entry_count);
    records.push(root_dirent(child_link[0], END_OF_CHAIN, 0));
    for (i, node) in nodes.iter().enumerate() {
        let id = i + 1;
        let flag = if node.size.is_some() { 2 } else { 1 };
        records.push(dirent(
            &node.name,
            flag,
            NO_LINK,
            next_link[id],
            child_link[id],
            first_blocks[id],
            node.size.unwrap_or(0),
        ));
    }

    let mut blocks: Vec<Vec<u8>> = Vec::with_capacity(total_blocks);
    for chunk in records.chunks(4) {
        blocks.push(chunk.concat());
    }
    blocks.extend(data_blocks);
    let mut inline = Vec::new();
    for (i, chunk) in bat.chunks(ENTRIES_PER_BLOCK).enumerate() {
        blocks.push(fat_sector(chunk));
        inline.push((data_end + i) as u32);
    }

    let spec = HeaderSpec {
        threshold: 0,
        bat_sectors: bat_sectors as u32,
        inline_bat: inline,
        ..HeaderSpec::default()
    };
    assemble(header(&spec), &blocks)
}
