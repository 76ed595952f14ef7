//! One-time directory-tree reconstruction.
//!
//! The on-disk encoding is a flat array of records whose PREV/NEXT fields
//! form a binary-search tree over siblings and whose CHILD field points at
//! the root of a folder's sibling tree.  Corrupt files cycle or point those
//! indices anywhere, so the build pass walks the raw graph exactly once
//! under a visited bitmap and produces an owned arena plus per-parent
//! ordered child lists.  Nothing after construction ever dereferences a raw
//! link again.

use log::warn;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::dirent::{self, cmp_key, DirEntry, EntryKind, DIRENT_SIZE};
use crate::error::{Error, Result, Warning};
use crate::superblock::Superblock;

/// The reconstructed, immutable directory tree.
#[derive(Debug)]
pub struct DirTree {
    /// Arena addressed by entry index; `None` where no entry was reachable.
    entries: Vec<Option<DirEntry>>,
    /// Per-entry child lists, ordered by the sibling sorting key.
    children: Vec<Vec<u32>>,
}

impl DirTree {
    /// Index of the root entry.  Always present in a built tree.
    pub fn root(&self) -> u32 {
        0
    }

    pub fn entry(&self, id: u32) -> Option<&DirEntry> {
        self.entries.get(id as usize)?.as_ref()
    }

    /// Ordered children of a storage entry; `None` for streams and for
    /// indices that never decoded.
    pub fn children(&self, id: u32) -> Option<&[u32]> {
        let entry = self.entry(id)?;
        if !entry.kind.is_storage() {
            return None;
        }
        self.children.get(id as usize).map(Vec::as_slice)
    }

    /// Every decoded entry, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter_map(Option::as_ref)
    }
}

/// Build context threaded through the recursive walk, so independent
/// containers can build concurrently without shared state.
pub(crate) struct TreeBuilder<'a, R> {
    source: &'a mut R,
    sb: &'a Superblock,
    dir_chain: &'a [u32],
    source_len: u64,
    max_entries: usize,
    entries: Vec<Option<DirEntry>>,
    children: Vec<Vec<u32>>,
    visited: Vec<bool>,
    warnings: &'a mut Vec<Warning>,
}

pub(crate) fn build<R: Read + Seek>(
    source: &mut R,
    sb: &Superblock,
    dir_chain: &[u32],
    source_len: u64,
    warnings: &mut Vec<Warning>,
) -> Result<DirTree> {
    let max_entries = ((dir_chain.len() as u64 * sb.big_block_size()) / DIRENT_SIZE as u64)
        .min(u32::MAX as u64) as usize;
    if max_entries == 0 {
        return Err(Error::DirectoryCorruption(
            "directory stream holds no entries".into(),
        ));
    }

    let mut builder = TreeBuilder {
        source,
        sb,
        dir_chain,
        source_len,
        max_entries,
        entries: vec![None; max_entries],
        children: vec![Vec::new(); max_entries],
        visited: vec![false; max_entries],
        warnings,
    };

    let root_buf = builder.read_record(0)?.ok_or_else(|| {
        Error::DirectoryCorruption("directory stream too short for a root entry".into())
    })?;
    let (mut root, flag) = DirEntry::decode_root(&root_buf)?;
    if flag != 5 {
        warn!("root entry carried type flag {flag}; forcing root storage");
        builder.warnings.push(Warning::RootTypeCorrected { found: flag });
    }
    // The mini-stream backing store is always read through big blocks.
    root.mini = false;
    builder.visited[0] = true;
    let child = root.child;
    builder.entries[0] = Some(root);
    builder.walk(child, 0)?;

    Ok(DirTree {
        entries: builder.entries,
        children: builder.children,
    })
}

impl<R: Read + Seek> TreeBuilder<'_, R> {
    /// Walk one raw directory link, decoding the record and recursing into
    /// its sibling tree (same parent) and, for storages, its child tree.
    fn walk(&mut self, raw_link: u32, parent: u32) -> Result<()> {
        let index = match dirent::link(raw_link) {
            Some(i) => i,
            None => return Ok(()),
        };
        if index as usize >= self.max_entries {
            return Ok(());
        }
        if self.visited[index as usize] {
            warn!("directory links revisit entry {index}; stopping this edge");
            let seen = Warning::CyclicDirectory { entry: index };
            if !self.warnings.contains(&seen) {
                self.warnings.push(seen);
            }
            return Ok(());
        }
        self.visited[index as usize] = true;

        let buf = match self.read_record(index as usize)? {
            Some(b) => b,
            // The chain ran out under this record; treat the edge as absent.
            None => return Ok(()),
        };
        let mut entry = DirEntry::decode(&buf, index)?;
        if entry.is_stream() && entry.size > self.source_len {
            return Err(Error::DirectoryCorruption(format!(
                "stream entry {index} declares {} bytes but the source holds {}",
                entry.size, self.source_len
            )));
        }
        entry.mini = entry.is_stream() && entry.size < u64::from(self.sb.threshold);

        let (prev, next, child) = (entry.prev, entry.next, entry.child);
        let kind = entry.kind;
        self.entries[index as usize] = Some(entry);
        self.insert_child(parent, index);

        self.walk(prev, parent)?;
        self.walk(next, parent)?;
        if kind == EntryKind::Storage {
            self.walk(child, index)?;
        }
        Ok(())
    }

    /// Insert into the parent's child list at the position given by the
    /// sorting key, ignoring whatever order the sibling tree implied.
    fn insert_child(&mut self, parent: u32, child: u32) {
        let entries = &self.entries;
        let inserted = match entries.get(child as usize).and_then(Option::as_ref) {
            Some(e) => e,
            None => return,
        };
        let list = &mut self.children[parent as usize];
        let position = list
            .binary_search_by(|&sibling| {
                match entries.get(sibling as usize).and_then(Option::as_ref) {
                    Some(s) => cmp_key(s, inserted),
                    None => std::cmp::Ordering::Less,
                }
            })
            .unwrap_or_else(|p| p);
        list.insert(position, child);
    }

    /// Read the 128-byte record at `index`, translating its logical offset
    /// through the directory chain.  Records may straddle block boundaries
    /// when blocks are smaller than a record.  `None` means the chain or
    /// the source ran out under the record.
    fn read_record(&mut self, index: usize) -> Result<Option<[u8; DIRENT_SIZE]>> {
        let block_size = self.sb.big_block_size();
        let mut buf = [0u8; DIRENT_SIZE];
        let mut offset = index as u64 * DIRENT_SIZE as u64;
        let mut filled = 0usize;
        while filled < DIRENT_SIZE {
            let block = match self.dir_chain.get((offset / block_size) as usize) {
                Some(&b) => b,
                None => return Ok(None),
            };
            let intra = offset % block_size;
            let span = ((block_size - intra) as usize).min(DIRENT_SIZE - filled);
            let physical = self.sb.block_offset(block) + intra;
            self.source.seek(SeekFrom::Start(physical))?;
            match self.source.read_exact(&mut buf[filled..filled + span]) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(Error::Io(e)),
            }
            filled += span;
            offset += span as u64;
        }
        Ok(Some(buf))
    }
}
