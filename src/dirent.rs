//! Directory-entry records.
//!
//! One fixed 128-byte record per named object.  PREV/NEXT/CHILD carry raw
//! entry indices forming a binary-search tree over siblings; they are only
//! ever dereferenced during the one-time tree build and never trusted at
//! read time.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use std::char::{decode_utf16, REPLACEMENT_CHARACTER};
use std::cmp::Ordering;
use std::io::Read;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Size of one directory-entry record.
pub const DIRENT_SIZE: usize = 128;

/// Maximum name length in UTF-16 units.
pub const MAX_NAME_UNITS: usize = 32;

/// Link values at or above this are "no entry" markers rather than indices.
pub(crate) const LINK_NONE_MIN: u32 = 0xFFFF_FFFA;

/// Interpret a raw sibling/child field, mapping end markers to `None`.
pub(crate) fn link(raw: u32) -> Option<u32> {
    (raw < LINK_NONE_MIN).then_some(raw)
}

/// What a directory entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A folder: organizes children, has no content of its own.
    Storage,
    /// A file: a byte stream located through an allocation chain.
    Stream,
    /// The root folder; its own content is the mini-stream.
    Root,
}

impl EntryKind {
    pub fn is_storage(self) -> bool {
        matches!(self, EntryKind::Storage | EntryKind::Root)
    }
}

/// A decoded directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub id: u32,
    pub name: String,
    /// Name as raw UTF-16 units; basis of the sibling sorting key.
    name_units: Vec<u16>,
    pub kind: EntryKind,
    pub color: u8,
    pub(crate) prev: u32,
    pub(crate) next: u32,
    pub(crate) child: u32,
    pub class_id: Uuid,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub(crate) first_block: u32,
    /// Declared content size in bytes.  Unreliable for storages.
    pub size: u64,
    /// Whether the content lives in the mini-stream; set during tree build.
    pub(crate) mini: bool,
}

impl DirEntry {
    /// Decode a record, rejecting impossible type flags.
    pub fn decode(buf: &[u8; DIRENT_SIZE], id: u32) -> Result<DirEntry> {
        let (entry, flag) = parse(buf, id)?;
        match entry {
            Some(entry) => Ok(entry),
            None => Err(Error::DirectoryCorruption(format!(
                "entry {id} carries impossible type flag {flag}"
            ))),
        }
    }

    /// Decode the record at index 0, forcing its kind to root storage.
    ///
    /// Returns the raw type flag so the caller can report a corrected one.
    pub(crate) fn decode_root(buf: &[u8; DIRENT_SIZE]) -> Result<(DirEntry, u8)> {
        let (entry, flag) = parse(buf, 0)?;
        let mut entry = match entry {
            Some(e) => e,
            // Root records with garbage flags are still usable once forced.
            None => parse_unchecked(buf, 0, EntryKind::Root)?,
        };
        entry.kind = EntryKind::Root;
        Ok((entry, flag))
    }

    /// True when the content is resolved through the mini-stream.
    pub fn in_mini_stream(&self) -> bool {
        self.mini
    }

    pub fn is_stream(&self) -> bool {
        self.kind == EntryKind::Stream
    }

    /// Name length in UTF-16 units (the primary sorting criterion).
    pub fn name_len_units(&self) -> usize {
        self.name_units.len()
    }
}

fn parse(buf: &[u8; DIRENT_SIZE], id: u32) -> Result<(Option<DirEntry>, u8)> {
    let flag = buf[66];
    let kind = match flag {
        1 => Some(EntryKind::Storage),
        2 => Some(EntryKind::Stream),
        5 => Some(EntryKind::Root),
        _ => None,
    };
    match kind {
        Some(kind) => Ok((Some(parse_unchecked(buf, id, kind)?), flag)),
        None => Ok((None, flag)),
    }
}

fn parse_unchecked(buf: &[u8; DIRENT_SIZE], id: u32, kind: EntryKind) -> Result<DirEntry> {
    let mut cur = &buf[..];

    let mut raw_name = [0u16; MAX_NAME_UNITS];
    cur.read_u16_into::<LittleEndian>(&mut raw_name)?;
    let name_bytes = cur.read_u16::<LittleEndian>()? as usize;
    // Length is in bytes including the terminating NUL unit; clamp garbage.
    let units = (name_bytes / 2).saturating_sub(1).min(MAX_NAME_UNITS);
    let name_units: Vec<u16> = raw_name[..units].to_vec();
    let name: String = decode_utf16(name_units.iter().copied())
        .map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
        .collect();

    let _flag = cur.read_u8()?;
    let color = cur.read_u8()?;
    let prev = cur.read_u32::<LittleEndian>()?;
    let next = cur.read_u32::<LittleEndian>()?;
    let child = cur.read_u32::<LittleEndian>()?;
    let mut class_id_bytes = [0u8; 16];
    cur.read_exact(&mut class_id_bytes)?;
    let _user_flags = cur.read_u32::<LittleEndian>()?;
    let created = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
    let modified = filetime_to_datetime(cur.read_u64::<LittleEndian>()?);
    let first_block = cur.read_u32::<LittleEndian>()?;
    let size = u64::from(cur.read_u32::<LittleEndian>()?);

    Ok(DirEntry {
        id,
        name,
        name_units,
        kind,
        color,
        prev,
        next,
        child,
        class_id: Uuid::from_bytes_le(class_id_bytes),
        created,
        modified,
        first_block,
        size,
        mini: false,
    })
}

/// The sibling sorting key: name length in UTF-16 units first, then a
/// case-normalized unit-wise comparison.  Fully orders distinct names, so
/// sibling order never depends on the on-disk tree shape.
pub(crate) fn cmp_key(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.name_units
        .len()
        .cmp(&b.name_units.len())
        .then_with(|| {
            let au = a.name_units.iter().map(|&u| upper_unit(u));
            let bu = b.name_units.iter().map(|&u| upper_unit(u));
            au.cmp(bu)
        })
}

/// Case-normalize a single UTF-16 unit.  Only one-to-one uppercase
/// mappings that stay in the basic plane apply; everything else (including
/// lone surrogates) compares as-is.
fn upper_unit(unit: u16) -> u16 {
    match char::from_u32(u32::from(unit)) {
        Some(c) => {
            let mut upper = c.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(u), None) if (u as u32) <= 0xFFFF => u as u16,
                _ => unit,
            }
        }
        None => unit,
    }
}

/// 100-ns ticks since 1601-01-01, zero meaning "not recorded".
fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    const EPOCH_DELTA_SECS: i64 = 11_644_473_600;
    if filetime == 0 {
        return None;
    }
    let secs = (filetime / 10_000_000) as i64 - EPOCH_DELTA_SECS;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}
