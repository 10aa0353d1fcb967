//! Read-only inspection of HFS+ and HFSX volumes, partitions and disk
//! images.
//!
//! Open a [`Volume`], optionally attach its partitions with
//! [`partition::load_partitions`], then hand the HFS+ payload to
//! [`Hfs::open`]. All on-disk structures are decoded from big-endian bytes
//! into owned values; nothing is ever written back.
//!
//! ```no_run
//! use hfsinspect::{Hfs, Volume, partition};
//!
//! # fn main() -> hfsinspect::Result<()> {
//! let mut disk = Volume::open("disk.img")?;
//! partition::load_partitions(&mut disk)?;
//! if let Some(volume) = partition::find_hfs(&disk)? {
//!     let hfs = Hfs::open(volume)?;
//!     if let Some(entry) = hfs.resolve_path("/Users")? {
//!         println!("{:?}", entry.cnid());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod btree;
pub mod cache;
mod error;
pub mod extents;
pub mod fork;
mod hfs;
pub mod partition;
pub mod raw;
mod summary;
pub mod trees;
pub mod unicode;
mod volume;
mod walker;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
pub use hfs::{ForkCopy, Hfs, HfsOptions, Wrapper};
pub use summary::{ForkSummary, RankedFile, RankedFork, TOP_N, VolumeSummary};
pub use unicode::HfsName;
pub use volume::{BlockSource, DEFAULT_SECTOR_SIZE, Volume, VolumeKind};
pub use walker::{CatalogEntry, FolderIter};

pub use hfs_types_rs as types;
