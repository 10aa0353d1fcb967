use std::cmp::Ordering;

use deku::DekuContainerRead;
use hfs_types_rs::{CatalogRecordType, KeyCompareType};
use tracing::debug;

use super::{be_u16, be_u32};
use crate::btree::TreeKind;
use crate::error::{Error, Result};
use crate::raw::{BTreeHeaderRecord, CatalogFile, CatalogFolder, CatalogNodeId};
use crate::unicode::{HfsName, compare_binary, compare_case_folding};

/// Defined as `struct HFSPlusCatalogKey` in TN1150 > Catalog File Key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogKey {
    pub parent_id: CatalogNodeId,
    pub name: HfsName,
}

impl CatalogKey {
    pub fn new(parent_id: CatalogNodeId, name: impl Into<HfsName>) -> Self {
        CatalogKey {
            parent_id,
            name: name.into(),
        }
    }

    /// Key of the thread record for `cnid`.
    pub fn thread(cnid: CatalogNodeId) -> Self {
        CatalogKey {
            parent_id: cnid,
            name: HfsName::default(),
        }
    }

    /// On-disk key bytes, without the key length.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.name.encoded_len());
        out.extend_from_slice(&self.parent_id.to_be_bytes());
        self.name.encode(&mut out);
        out
    }
}

/// Defined as `struct HFSPlusCatalogThread` in TN1150 > Catalog Thread Records.
/// Maps a CNID back to its parent and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogThread {
    pub parent_id: CatalogNodeId,
    pub name: HfsName,
}

impl CatalogThread {
    fn decode(bytes: &[u8]) -> Result<Self> {
        let parent_id = be_u32(bytes, 4, "catalog thread")?;
        let (name, _) = HfsName::decode(bytes.get(8..).unwrap_or_default())?;
        Ok(CatalogThread { parent_id, name })
    }

    /// On-disk record bytes.
    pub fn encode(&self, record_type: CatalogRecordType) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.name.encoded_len());
        out.extend_from_slice(&(record_type as i16).to_be_bytes());
        out.extend_from_slice(&0i16.to_be_bytes());
        out.extend_from_slice(&self.parent_id.to_be_bytes());
        self.name.encode(&mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    Folder(CatalogFolder),
    File(CatalogFile),
    FolderThread(CatalogThread),
    FileThread(CatalogThread),
}

impl CatalogRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record_type = CatalogRecordType::try_from(be_u16(bytes, 0, "catalog record")? as i16)?;
        Ok(match record_type {
            CatalogRecordType::Folder => {
                let (_rest, folder) = CatalogFolder::from_bytes((bytes, 0))?;
                CatalogRecord::Folder(folder)
            }
            CatalogRecordType::File => {
                let (_rest, file) = CatalogFile::from_bytes((bytes, 0))?;
                CatalogRecord::File(file)
            }
            CatalogRecordType::FolderThread => {
                CatalogRecord::FolderThread(CatalogThread::decode(bytes)?)
            }
            CatalogRecordType::FileThread => CatalogRecord::FileThread(CatalogThread::decode(bytes)?),
        })
    }

    pub fn record_type(&self) -> CatalogRecordType {
        match self {
            CatalogRecord::Folder(_) => CatalogRecordType::Folder,
            CatalogRecord::File(_) => CatalogRecordType::File,
            CatalogRecord::FolderThread(_) => CatalogRecordType::FolderThread,
            CatalogRecord::FileThread(_) => CatalogRecordType::FileThread,
        }
    }

    /// CNID of the folder or file, `None` for thread records.
    pub fn cnid(&self) -> Option<CatalogNodeId> {
        match self {
            CatalogRecord::Folder(folder) => Some(folder.folder_id),
            CatalogRecord::File(file) => Some(file.file_id),
            _ => None,
        }
    }

    pub fn thread(&self) -> Option<&CatalogThread> {
        match self {
            CatalogRecord::FolderThread(thread) | CatalogRecord::FileThread(thread) => Some(thread),
            _ => None,
        }
    }

    pub fn is_thread(&self) -> bool {
        self.thread().is_some()
    }
}

/// Keys ordered by parent CNID, then name. HFSX volumes created with binary
/// compare order names by code unit; everything else folds case.
#[derive(Debug, Clone, Default)]
pub struct CatalogTree {
    hfsx: bool,
    case_sensitive: bool,
}

impl CatalogTree {
    pub fn new(hfsx: bool) -> Self {
        CatalogTree {
            hfsx,
            case_sensitive: false,
        }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn compare_names(&self, a: &HfsName, b: &HfsName) -> Ordering {
        if self.case_sensitive {
            compare_binary(a.units(), b.units())
        } else {
            compare_case_folding(a.units(), b.units())
        }
    }
}

impl TreeKind for CatalogTree {
    type Key = CatalogKey;
    type Value = CatalogRecord;
    const NAME: &'static str = "catalog";

    fn configure(&mut self, header: &BTreeHeaderRecord) -> Result<()> {
        let compare = header.key_compare();
        self.case_sensitive = self.hfsx && compare == Ok(KeyCompareType::BinaryCompare);
        if compare.is_err() {
            debug!(
                key_compare_type = header.key_compare_type,
                "unknown catalog key compare type, folding case"
            );
        }
        Ok(())
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<CatalogKey> {
        if bytes.len() < 6 {
            return Err(Error::invalid(
                "catalog key",
                format!("{} bytes is shorter than the minimum of 6", bytes.len()),
            ));
        }
        let parent_id = be_u32(bytes, 0, "catalog key")?;
        let (name, _) = HfsName::decode(&bytes[4..])?;
        Ok(CatalogKey { parent_id, name })
    }

    fn compare(&self, a: &CatalogKey, b: &CatalogKey) -> Ordering {
        a.parent_id
            .cmp(&b.parent_id)
            .then_with(|| self.compare_names(&a.name, &b.name))
    }

    fn decode_value(&self, _key: &CatalogKey, bytes: &[u8]) -> Result<CatalogRecord> {
        CatalogRecord::decode(bytes)
    }
}
