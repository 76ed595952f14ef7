//! Readable views over stream entries.
//!
//! Big-block streams translate logical offsets into (chain index,
//! intra-block offset) pairs and read the byte source directly, coalescing
//! physically contiguous blocks into single reads.  Small-block streams
//! resolve through the mini-stream: the root entry's own content, lazily
//! materialized at most once per container and shared by every small
//! stream.
//!
//! Damage degrades instead of failing: a chain that ends before the
//! declared size yields the recoverable prefix, flags the view as
//! truncated, and logs a warning.  Only a stream with *nothing*
//! recoverable surfaces an error from [`Stream::read_all`].

use log::warn;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use crate::alloc;
use crate::container::Shared;
use crate::error::{Error, Result};

/// A readable, seekable view over one stream entry.
///
/// Each view owns its cursor; the allocation tables and directory tree are
/// shared with the container by reference.  Distinct views over the same
/// entry never share position.
pub struct Stream<R> {
    source: Arc<Mutex<R>>,
    shared: Arc<Shared>,
    entry_id: u32,
    size: u64,
    pos: u64,
    truncated: bool,
    backing: Backing,
}

enum Backing {
    /// Chain over the big-block table; read straight from the source.
    Big { chain: Vec<u32> },
    /// Chain over the small-block table; bytes pre-loaded from the
    /// mini-stream on first read.
    Small { first_block: u32, loaded: Option<Vec<u8>> },
}

impl<R: Read + Seek> Stream<R> {
    pub(crate) fn open(
        source: Arc<Mutex<R>>,
        shared: Arc<Shared>,
        entry_id: u32,
    ) -> Option<Stream<R>> {
        let entry = shared.tree.entry(entry_id)?;
        if !entry.is_stream() && entry.kind != crate::dirent::EntryKind::Root {
            return None;
        }
        let size = entry.size;
        let first_block = entry.first_block;
        let (backing, truncated) = if entry.in_mini_stream() {
            // Structural only: the chain is resolved on first read so that
            // opening never touches the byte source.
            (Backing::Small { first_block, loaded: None }, false)
        } else {
            let chain = shared.bat.chain(first_block);
            if chain.fault.is_some() {
                warn!("stream entry {entry_id}: damaged block chain");
            }
            let covered = chain.blocks.len() as u64 * shared.sb.big_block_size();
            let truncated = covered < size || chain.fault.is_some();
            (Backing::Big { chain: chain.blocks }, truncated)
        };
        Some(Stream {
            source,
            shared,
            entry_id,
            size,
            pos: 0,
            truncated,
            backing,
        })
    }

    /// Declared stream size in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the view is known to hold fewer bytes than declared.  For
    /// small-block streams this is only known after the first read.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Index of the directory entry this view reads.
    pub fn entry_id(&self) -> u32 {
        self.entry_id
    }

    /// Drain the whole stream from the start.
    ///
    /// Returns the recoverable bytes — possibly fewer than declared — and
    /// fails only when the stream declared content but nothing at all
    /// could be read back.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(0))?;
        let mut data = Vec::with_capacity(self.size.min(1 << 20) as usize);
        self.read_to_end(&mut data)?;
        if data.is_empty() && self.size > 0 {
            return Err(Error::TruncatedStream { declared: self.size, recovered: 0 });
        }
        if (data.len() as u64) < self.size {
            warn!(
                "stream entry {}: recovered {} of {} declared bytes",
                self.entry_id,
                data.len(),
                self.size
            );
        }
        Ok(data)
    }

    fn read_big(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let block_size = self.shared.sb.big_block_size();
        let want = (buf.len() as u64).min(self.size - self.pos) as usize;
        let mut copied = 0usize;
        let mut hit_end = false;
        while copied < want {
            let chain = match &self.backing {
                Backing::Big { chain } => chain,
                Backing::Small { .. } => break,
            };
            let chain_index = (self.pos / block_size) as usize;
            let intra = self.pos % block_size;
            if chain_index >= chain.len() {
                hit_end = true;
                break;
            }
            // Fold physically consecutive blocks into one read.
            let mut run = 1usize;
            while chain_index + run < chain.len()
                && chain[chain_index + run] == chain[chain_index] + run as u32
                && (run as u64 * block_size) < intra + (want - copied) as u64
            {
                run += 1;
            }
            let span = ((run as u64 * block_size - intra) as usize).min(want - copied);
            let physical = self.shared.sb.block_offset(chain[chain_index]) + intra;

            let mut source = lock_source(&self.source)?;
            source.seek(SeekFrom::Start(physical))?;
            let got = read_full(&mut *source, &mut buf[copied..copied + span])?;
            drop(source);

            copied += got;
            self.pos += got as u64;
            if got < span {
                // Physical end of the source inside a declared block.
                hit_end = true;
                break;
            }
        }
        if hit_end {
            self.note_truncated(copied);
        }
        Ok(copied)
    }

    fn read_small(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_small_loaded()?;
        let loaded = match &self.backing {
            Backing::Small { loaded: Some(l), .. } => l,
            _ => return Ok(0),
        };
        if self.pos >= loaded.len() as u64 {
            return Ok(0);
        }
        let start = self.pos as usize;
        let n = buf.len().min(loaded.len() - start);
        buf[..n].copy_from_slice(&loaded[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    /// Pull this stream's bytes out of the shared mini-stream, building the
    /// small-block table and the mini-stream itself if no reader has yet.
    fn ensure_small_loaded(&mut self) -> io::Result<()> {
        let first_block = match &self.backing {
            Backing::Small { loaded: Some(_), .. } => return Ok(()),
            Backing::Small { first_block, .. } => *first_block,
            Backing::Big { .. } => return Ok(()),
        };

        let sbat = self.shared.sbat(&self.source)?;
        let mini = self.shared.mini_stream(&self.source)?;
        let small_size = self.shared.sb.small_block_size();

        let chain = sbat.chain(first_block);
        if chain.fault.is_some() {
            warn!("stream entry {}: damaged small-block chain", self.entry_id);
        }
        let mut data = Vec::with_capacity(self.size as usize);
        let mut remaining = self.size;
        for &block in &chain.blocks {
            if remaining == 0 {
                break;
            }
            let offset = u64::from(block) * small_size;
            if offset >= mini.len() as u64 {
                break;
            }
            let end = (offset + small_size.min(remaining)).min(mini.len() as u64);
            data.extend_from_slice(&mini[offset as usize..end as usize]);
            remaining = remaining.saturating_sub(end - offset);
        }
        if (data.len() as u64) < self.size {
            self.note_truncated(data.len());
        }
        if let Backing::Small { loaded, .. } = &mut self.backing {
            *loaded = Some(data);
        }
        Ok(())
    }

    fn note_truncated(&mut self, recovered: usize) {
        if !self.truncated {
            warn!(
                "stream entry {}: chain ends at byte {recovered} of {} declared",
                self.entry_id, self.size
            );
        }
        self.truncated = true;
    }
}

impl<R: Read + Seek> Read for Stream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        match self.backing {
            Backing::Big { .. } => self.read_big(buf),
            Backing::Small { .. } => self.read_small(buf),
        }
    }
}

impl<R> Seek for Stream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(t) => {
                self.pos = t;
                Ok(t)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before byte 0 or past u64 range",
            )),
        }
    }
}

/// Read until `buf` is full or the source reports end-of-file.
pub(crate) fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub(crate) fn lock_source<R>(source: &Mutex<R>) -> io::Result<std::sync::MutexGuard<'_, R>> {
    source
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "byte source lock poisoned"))
}

/// Drain a big-block chain into memory; used to materialize the
/// mini-stream.  Returns the bytes plus whether the chain came up short.
pub(crate) fn drain_big_chain<R: Read + Seek>(
    source: &Mutex<R>,
    sb: &crate::superblock::Superblock,
    bat: &alloc::AllocTable,
    first_block: u32,
    size: u64,
) -> io::Result<(Vec<u8>, bool)> {
    let block_size = sb.big_block_size();
    let chain = bat.chain(first_block);
    let mut data = Vec::with_capacity(size.min(1 << 24) as usize);
    let mut remaining = size;
    for &block in &chain.blocks {
        if remaining == 0 {
            break;
        }
        let span = block_size.min(remaining) as usize;
        let mut buf = vec![0u8; span];
        let mut guard = lock_source(source)?;
        guard.seek(SeekFrom::Start(sb.block_offset(block)))?;
        let got = read_full(&mut *guard, &mut buf)?;
        drop(guard);
        buf.truncate(got);
        data.extend_from_slice(&buf);
        remaining -= got as u64;
        if got < span {
            break;
        }
    }
    let truncated = remaining > 0 || chain.fault.is_some();
    Ok((data, truncated))
}
