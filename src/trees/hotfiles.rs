use std::cmp::Ordering;

use hfs_types_rs::{ForkType, hot_files};

use super::{be_u8, be_u32};
use crate::btree::TreeKind;
use crate::error::{Error, Result};
use crate::raw::CatalogNodeId;

/// Key of the hot files B-tree, `struct HotFileKey` in the hot file
/// clustering sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotFileKey {
    pub fork_type: ForkType,
    /// Temperature, or [`hot_files::LOOKUP_TAG`] for thread records.
    pub temperature: u32,
    pub file_id: CatalogNodeId,
}

impl HotFileKey {
    pub const LENGTH: usize = 10;

    pub fn new(temperature: u32, file_id: CatalogNodeId, fork_type: ForkType) -> Self {
        HotFileKey {
            fork_type,
            temperature,
            file_id,
        }
    }

    /// Key of the record that maps a file to its current temperature.
    pub fn thread(file_id: CatalogNodeId, fork_type: ForkType) -> Self {
        Self::new(hot_files::LOOKUP_TAG, file_id, fork_type)
    }

    pub fn is_thread(&self) -> bool {
        self.temperature == hot_files::LOOKUP_TAG
    }

    /// On-disk key bytes, without the key length.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LENGTH);
        out.push(self.fork_type as u8);
        out.push(0);
        out.extend_from_slice(&self.temperature.to_be_bytes());
        out.extend_from_slice(&self.file_id.to_be_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotFileRecord {
    /// Value of a thread record: the file's current temperature.
    Temperature(u32),
    /// Value of a temperature record, a fixed tag.
    Tag(u32),
}

/// Keys ordered by temperature, then file, then fork. Thread records carry
/// the largest temperature and therefore sort after every hot file.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotFilesTree;

impl TreeKind for HotFilesTree {
    type Key = HotFileKey;
    type Value = HotFileRecord;
    const NAME: &'static str = "hotfiles";

    fn decode_key(&self, bytes: &[u8]) -> Result<HotFileKey> {
        if bytes.len() < HotFileKey::LENGTH {
            return Err(Error::invalid(
                "hot files key",
                format!("{} bytes, expected {}", bytes.len(), HotFileKey::LENGTH),
            ));
        }
        Ok(HotFileKey {
            fork_type: ForkType::try_from(be_u8(bytes, 0, "hot files key")?)?,
            temperature: be_u32(bytes, 2, "hot files key")?,
            file_id: be_u32(bytes, 6, "hot files key")?,
        })
    }

    fn compare(&self, a: &HotFileKey, b: &HotFileKey) -> Ordering {
        a.temperature
            .cmp(&b.temperature)
            .then(a.file_id.cmp(&b.file_id))
            .then(a.fork_type.cmp(&b.fork_type))
    }

    fn decode_value(&self, key: &HotFileKey, bytes: &[u8]) -> Result<HotFileRecord> {
        let value = be_u32(bytes, 0, "hot files record")?;
        Ok(if key.is_thread() {
            HotFileRecord::Temperature(value)
        } else {
            HotFileRecord::Tag(value)
        })
    }
}
