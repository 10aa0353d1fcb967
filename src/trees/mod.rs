//! The four HFS+ system B-trees, as [`TreeKind`](crate::btree::TreeKind)s.

mod attributes;
mod catalog;
mod extents;
mod hotfiles;

pub use attributes::{AttributeKey, AttributeValue, AttributesTree};
pub use catalog::{CatalogKey, CatalogRecord, CatalogThread, CatalogTree};
pub use extents::{ExtentKey, ExtentsTree};
pub use hotfiles::{HotFileKey, HotFileRecord, HotFilesTree};

use crate::error::{Error, Result};

fn field<const N: usize>(bytes: &[u8], at: usize, what: &'static str) -> Result<[u8; N]> {
    bytes
        .get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            Error::invalid(
                what,
                format!("{} bytes is too short for a field at byte {at}", bytes.len()),
            )
        })
}

pub(crate) fn be_u8(bytes: &[u8], at: usize, what: &'static str) -> Result<u8> {
    field::<1>(bytes, at, what).map(|b| b[0])
}

pub(crate) fn be_u16(bytes: &[u8], at: usize, what: &'static str) -> Result<u16> {
    field(bytes, at, what).map(u16::from_be_bytes)
}

pub(crate) fn be_u32(bytes: &[u8], at: usize, what: &'static str) -> Result<u32> {
    field(bytes, at, what).map(u32::from_be_bytes)
}
