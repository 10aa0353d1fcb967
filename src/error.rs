use std::io;
use std::path::PathBuf;

use hfs_types_rs::ForkType;
use thiserror::Error;

/// Everything that can go wrong while inspecting a volume.
///
/// Lookups that simply find nothing are not errors; they return `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{}: no such file or device", path.display())]
    NotFound { path: PathBuf },

    #[error("{}: permission denied", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("{}: not a block device, character device or regular file", path.display())]
    NotBlockOrRegular { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("short read at offset {offset:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: usize, got: usize },

    #[error("not an HFS+ volume (signature {signature:#06x})")]
    NotHfsPlus { signature: u16 },

    #[error("unsupported HFS wrapper: {0}")]
    UnsupportedWrapped(String),

    #[error("invalid {what}: {reason}")]
    InvalidFormat { what: &'static str, reason: String },

    #[error("{tree} node {node}: {reason}")]
    CorruptNode {
        tree: &'static str,
        node: u32,
        reason: String,
    },

    #[error("{tree} node {node} out of range (tree has {total} nodes)")]
    NodeOutOfRange {
        tree: &'static str,
        node: u32,
        total: u32,
    },

    #[error("record {index} out of range (node has {count} records)")]
    RecordOutOfRange { index: usize, count: usize },

    #[error("decode error: {0}")]
    Decode(#[from] deku::DekuError),

    #[error("{fork} fork of CNID {file_id} has no extent for block {block}")]
    MissingExtents {
        file_id: u32,
        fork: ForkType,
        block: u64,
    },

    #[error("node cache allocation of {0} bytes failed")]
    OutOfMemory(usize),
}

impl Error {
    pub(crate) fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidFormat {
            what,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(tree: &'static str, node: u32, reason: impl Into<String>) -> Self {
        Error::CorruptNode {
            tree,
            node,
            reason: reason.into(),
        }
    }
}

impl From<hfs_types_rs::UnknownValue> for Error {
    fn from(value: hfs_types_rs::UnknownValue) -> Self {
        Error::invalid(value.what, value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
