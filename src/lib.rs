//! Read-only virtual file system over Compound File Binary (OLE2/CFB)
//! containers, built for scanning untrusted and possibly damaged files:
//! whatever structure survives corruption is exposed, and the damage is
//! reported alongside it.
//!
//! ```no_run
//! use cfbvfs::Container;
//! use std::fs::File;
//! use std::io::Read;
//!
//! let container = Container::open(File::open("report.doc")?)?;
//! let root = container.root();
//! for i in 0..container.child_count(root).unwrap_or(0) {
//!     let entry = container.child_by_index(root, i).unwrap();
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//! if let Some(mut stream) = container.open_stream_by_path("WordDocument") {
//!     let mut data = Vec::new();
//!     stream.read_to_end(&mut data)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod alloc;
pub mod container;
pub mod dirent;
pub mod error;
pub mod stream;
pub mod superblock;
pub mod tree;

pub use container::Container;
pub use dirent::{DirEntry, EntryKind};
pub use error::{Error, Result, Warning};
pub use stream::Stream;
pub use superblock::Superblock;
