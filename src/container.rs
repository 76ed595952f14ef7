//! The public container surface.
//!
//! [`Container::open`] drives the whole construction pipeline — header,
//! big-block allocation table, directory chain, directory tree — and then
//! exposes the result as a virtual file system: ordered children per
//! storage, lookup by index or name, and on-demand stream views.
//!
//! Construction is the only fallible-by-corruption phase; afterwards the
//! tables and tree are immutable and shared by reference with every view,
//! so concurrent readers need no locking beyond the byte source itself.

use log::warn;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

use crate::alloc::{self, AllocTable};
use crate::dirent::DirEntry;
use crate::error::{Error, Result, Warning};
use crate::stream::{self, Stream};
use crate::superblock::Superblock;
use crate::tree::{self, DirTree};

/// Container state shared between the facade and every open stream view.
pub(crate) struct Shared {
    pub(crate) sb: Superblock,
    pub(crate) source_len: u64,
    pub(crate) bat: AllocTable,
    pub(crate) tree: DirTree,
    sbat: OnceLock<Arc<AllocTable>>,
    mini: OnceLock<Arc<Vec<u8>>>,
}

impl Shared {
    /// The small-block table, built on first use.  Racing first readers
    /// may both build it; exactly one result is kept.  A table that cannot
    /// be built degrades to empty — small streams then read as truncated
    /// instead of poisoning the container.
    pub(crate) fn sbat<R: Read + Seek>(
        &self,
        source: &Mutex<R>,
    ) -> io::Result<Arc<AllocTable>> {
        if let Some(table) = self.sbat.get() {
            return Ok(table.clone());
        }
        let built = {
            let mut guard = stream::lock_source(source)?;
            match alloc::build_sbat(&mut *guard, &self.sb, &self.bat, self.source_len) {
                Ok(table) => table,
                Err(e) => {
                    warn!("small-block table unusable: {e}");
                    AllocTable::empty()
                }
            }
        };
        Ok(self.sbat.get_or_init(|| Arc::new(built)).clone())
    }

    /// The mini-stream: the root entry's own content, materialized at most
    /// once and shared by every small-block stream.
    pub(crate) fn mini_stream<R: Read + Seek>(
        &self,
        source: &Mutex<R>,
    ) -> io::Result<Arc<Vec<u8>>> {
        if let Some(mini) = self.mini.get() {
            return Ok(mini.clone());
        }
        let (first_block, size) = match self.tree.entry(self.tree.root()) {
            Some(root) => (root.first_block, root.size),
            None => (crate::alloc::END_OF_CHAIN, 0),
        };
        let (data, truncated) =
            stream::drain_big_chain(source, &self.sb, &self.bat, first_block, size)?;
        if truncated {
            warn!("mini-stream holds {} of {size} declared bytes", data.len());
        }
        Ok(self.mini.get_or_init(|| Arc::new(data)).clone())
    }
}

/// A parsed compound-file container.
pub struct Container<R> {
    source: Arc<Mutex<R>>,
    shared: Arc<Shared>,
    warnings: Vec<Warning>,
}

impl<R: Read + Seek> Container<R> {
    /// Parse a container from a seekable byte source.
    ///
    /// Fails only on damage that prevents a coherent directory tree: bad
    /// signature, insane geometry, unusable allocation table, corrupt
    /// directory records.  Damage confined to single chains is collected
    /// into [`Container::warnings`] and parsing proceeds on partial data.
    pub fn open(mut source: R) -> Result<Container<R>> {
        let source_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        let sb = Superblock::read(&mut source)?;

        let mut warnings = Vec::new();
        let bat = alloc::build_bat(&mut source, &sb, source_len)?;

        let dir_chain = bat.chain(sb.directory_start);
        if let Some(w) = dir_chain.warning(sb.directory_start) {
            warnings.push(w);
        }
        if dir_chain.blocks.is_empty() {
            return Err(Error::DirectoryCorruption(format!(
                "no usable directory chain from block {:#010X}",
                sb.directory_start
            )));
        }
        let tree = tree::build(&mut source, &sb, &dir_chain.blocks, source_len, &mut warnings)?;

        Ok(Container {
            source: Arc::new(Mutex::new(source)),
            shared: Arc::new(Shared {
                sb,
                source_len,
                bat,
                tree,
                sbat: OnceLock::new(),
                mini: OnceLock::new(),
            }),
            warnings,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.shared.sb
    }

    /// Non-fatal damage encountered while building the tree.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Total size of the underlying byte source.
    pub fn source_len(&self) -> u64 {
        self.shared.source_len
    }

    /// Index of the root storage entry.
    pub fn root(&self) -> u32 {
        self.shared.tree.root()
    }

    pub fn entry(&self, id: u32) -> Option<&DirEntry> {
        self.shared.tree.entry(id)
    }

    /// Ordered child indices of a storage entry; `None` for streams and
    /// unknown indices.
    pub fn children(&self, id: u32) -> Option<&[u32]> {
        self.shared.tree.children(id)
    }

    /// Number of children of a storage entry; `None` if `id` is not a
    /// storage.
    pub fn child_count(&self, id: u32) -> Option<usize> {
        self.children(id).map(<[u32]>::len)
    }

    pub fn child_by_index(&self, id: u32, index: usize) -> Option<&DirEntry> {
        let child = *self.children(id)?.get(index)?;
        self.entry(child)
    }

    /// Linear scan over the decoded child list for an exact name match.
    pub fn child_by_name(&self, id: u32, name: &str) -> Option<&DirEntry> {
        self.children(id)?
            .iter()
            .filter_map(|&c| self.entry(c))
            .find(|e| e.name == name)
    }

    /// The root entry's 16-byte class identifier.
    pub fn root_class_id(&self) -> Uuid {
        self.entry(self.root())
            .map(|e| e.class_id)
            .unwrap_or_else(Uuid::nil)
    }

    /// Open a readable view over a stream (or the root's mini-stream
    /// backing).  Structural only — no bytes are read until the first
    /// `read` call.  `None` for storages and unknown indices.
    pub fn open_stream(&self, id: u32) -> Option<Stream<R>> {
        Stream::open(self.source.clone(), self.shared.clone(), id)
    }

    /// Resolve a `/`-separated path of child names from the root, then
    /// open the final entry as a stream.
    pub fn open_stream_by_path(&self, path: &str) -> Option<Stream<R>> {
        let mut id = self.root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            id = self.child_by_name(id, segment)?.id;
        }
        self.open_stream(id)
    }

    /// Pre-order traversal of every entry below the root, yielding
    /// `/`-joined paths.
    pub fn walk(&self) -> Walk<'_> {
        let mut stack = Vec::new();
        if let Some(children) = self.children(self.root()) {
            for &child in children.iter().rev() {
                stack.push((child, String::new()));
            }
        }
        Walk { tree: &self.shared.tree, stack }
    }
}

/// Iterator produced by [`Container::walk`].
pub struct Walk<'a> {
    tree: &'a DirTree,
    stack: Vec<(u32, String)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (String, &'a DirEntry);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (id, prefix) = self.stack.pop()?;
            let entry = match self.tree.entry(id) {
                Some(e) => e,
                None => continue,
            };
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            if let Some(children) = self.tree.children(id) {
                for &child in children.iter().rev() {
                    self.stack.push((child, path.clone()));
                }
            }
            return Some((path, entry));
        }
    }
}
