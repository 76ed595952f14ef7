//! Error taxonomy for container parsing.
//!
//! Two tiers, matching how a scanner consumes damaged input:
//!
//! - [`Error`] — fatal to container construction.  Anything that prevents
//!   building a coherent directory tree (bad signature, insane geometry,
//!   unusable allocation table) surfaces as a single construction error.
//! - [`Warning`] — damage confined to one chain or one entry.  Parsing
//!   continues on the partial data; the warnings are accumulated on the
//!   container and mirrored through the `log` facade.

use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The first 8 bytes are not the compound-file signature.
    #[error("not a compound file (signature mismatch)")]
    SignatureMismatch,

    /// Block-size fields are outside the sane range.
    #[error("unreasonable geometry: {0}")]
    UnreasonableGeometry(String),

    /// Allocation-table counts don't add up, or an entry points out of range.
    #[error("inconsistent allocation table: {0}")]
    InconsistentAllocationTable(String),

    /// A directory entry has an impossible type, or a stream declares more
    /// bytes than the byte source holds.
    #[error("directory corruption: {0}")]
    DirectoryCorruption(String),

    /// A stream's block chain ended before its declared size and nothing
    /// was recoverable.
    #[error("truncated stream: {recovered} of {declared} bytes recoverable")]
    TruncatedStream { declared: u64, recovered: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Non-fatal diagnostics collected while parsing a damaged container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A block chain revisited a block; the walk stopped early.
    CyclicChain { start: u32, collected: usize },
    /// A block chain hit an out-of-range or impossible successor.
    BrokenChain { start: u32, successor: u32, collected: usize },
    /// A directory sibling/child link revisited an already-decoded entry.
    CyclicDirectory { entry: u32 },
    /// The first directory entry was not flagged as root storage; the flag
    /// was corrected and parsing continued.
    RootTypeCorrected { found: u8 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::CyclicChain { start, collected } => write!(
                f,
                "cyclic block chain starting at block {start}; kept {collected} block(s)"
            ),
            Warning::BrokenChain { start, successor, collected } => write!(
                f,
                "block chain starting at block {start} hit invalid successor {successor:#010X}; kept {collected} block(s)"
            ),
            Warning::CyclicDirectory { entry } => {
                write!(f, "directory links revisit entry {entry}; subtree walk stopped")
            }
            Warning::RootTypeCorrected { found } => {
                write!(f, "root entry carried type flag {found}; corrected to root storage")
            }
        }
    }
}
