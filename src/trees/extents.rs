use std::cmp::Ordering;

use deku::DekuContainerRead;
use hfs_types_rs::ForkType;

use super::{be_u8, be_u32};
use crate::btree::{BTree, TreeKind};
use crate::error::{Error, Result};
use crate::fork::OverflowSource;
use crate::raw::{CatalogNodeId, ExtentDescriptor, ExtentRecord};

/// Defined as `struct HFSPlusExtentKey` in TN1150 > Extents Overflow File Key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentKey {
    pub fork_type: ForkType,
    pub file_id: CatalogNodeId,
    /// First logical block mapped by the record.
    pub start_block: u32,
}

impl ExtentKey {
    /// The key length every extents key carries on disk.
    pub const LENGTH: usize = 10;

    pub fn new(file_id: CatalogNodeId, fork_type: ForkType, start_block: u32) -> Self {
        ExtentKey {
            fork_type,
            file_id,
            start_block,
        }
    }

    /// On-disk key bytes, without the key length.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LENGTH);
        out.push(self.fork_type as u8);
        out.push(0);
        out.extend_from_slice(&self.file_id.to_be_bytes());
        out.extend_from_slice(&self.start_block.to_be_bytes());
        out
    }
}

/// Keys ordered by file, then fork (data first), then start block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtentsTree;

impl TreeKind for ExtentsTree {
    type Key = ExtentKey;
    type Value = ExtentRecord;
    const NAME: &'static str = "extents";

    fn decode_key(&self, bytes: &[u8]) -> Result<ExtentKey> {
        if bytes.len() < ExtentKey::LENGTH {
            return Err(Error::invalid(
                "extents key",
                format!("{} bytes, expected {}", bytes.len(), ExtentKey::LENGTH),
            ));
        }
        Ok(ExtentKey {
            fork_type: ForkType::try_from(be_u8(bytes, 0, "extents key")?)?,
            file_id: be_u32(bytes, 2, "extents key")?,
            start_block: be_u32(bytes, 6, "extents key")?,
        })
    }

    fn compare(&self, a: &ExtentKey, b: &ExtentKey) -> Ordering {
        a.file_id
            .cmp(&b.file_id)
            .then(a.fork_type.cmp(&b.fork_type))
            .then(a.start_block.cmp(&b.start_block))
    }

    fn decode_value(&self, _key: &ExtentKey, bytes: &[u8]) -> Result<ExtentRecord> {
        let mut record = ExtentRecord::default();
        let mut rest = (bytes, 0);
        for slot in record.iter_mut() {
            let (next, descriptor) = ExtentDescriptor::from_bytes(rest)?;
            *slot = descriptor;
            rest = next;
        }
        Ok(record)
    }
}

impl OverflowSource for BTree<ExtentsTree> {
    fn overflow_extents(
        &self,
        file_id: u32,
        fork_type: ForkType,
        start_block: u32,
    ) -> Result<Option<ExtentRecord>> {
        let key = ExtentKey::new(file_id, fork_type, start_block);
        Ok(self.find(&key)?.map(|(_, record)| record))
    }
}
