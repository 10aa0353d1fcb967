//! Catalog navigation: paths, CNIDs and folder listings.

use hfs_types_rs::cnid;
use tracing::trace;

use crate::btree::LeafCursor;
use crate::error::{Error, Result};
use crate::hfs::Hfs;
use crate::raw::CatalogNodeId;
use crate::trees::{AttributeKey, AttributeValue, CatalogKey, CatalogRecord, CatalogTree};
use crate::unicode::HfsName;

/// A catalog leaf record with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: CatalogKey,
    pub record: CatalogRecord,
}

impl CatalogEntry {
    pub fn name(&self) -> &HfsName {
        &self.key.name
    }

    pub fn parent_id(&self) -> CatalogNodeId {
        self.key.parent_id
    }

    /// CNID of the folder or file, `None` for thread records.
    pub fn cnid(&self) -> Option<CatalogNodeId> {
        self.record.cnid()
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.record, CatalogRecord::Folder(_))
    }
}

/// Children of one folder, in catalog order. Thread records are skipped.
pub struct FolderIter<'h> {
    cursor: LeafCursor<'h, CatalogTree>,
    parent: CatalogNodeId,
    done: bool,
}

impl Iterator for FolderIter<'_> {
    type Item = Result<CatalogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.cursor.next()? {
                Ok((key, _)) if key.parent_id != self.parent => self.done = true,
                Ok((_, record)) if record.is_thread() => continue,
                Ok((key, record)) => return Some(Ok(CatalogEntry { key, record })),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

impl Hfs {
    /// The record named `name` in folder `parent`.
    pub fn find_record(&self, parent: CatalogNodeId, name: &HfsName) -> Result<Option<CatalogEntry>> {
        let key = CatalogKey {
            parent_id: parent,
            name: name.clone(),
        };
        Ok(self
            .catalog()?
            .find(&key)?
            .map(|(key, record)| CatalogEntry { key, record }))
    }

    /// Walk `path` from the root folder. `:` in a component stands for `/`
    /// in the stored name.
    pub fn resolve_path(&self, path: &str) -> Result<Option<CatalogEntry>> {
        let Some(mut entry) = self.lookup_cnid(cnid::ROOT_FOLDER)? else {
            return Ok(None);
        };

        for component in path.split('/').filter(|c| !c.is_empty()) {
            let CatalogRecord::Folder(folder) = &entry.record else {
                trace!(path, component, "path continues past a file");
                return Ok(None);
            };
            match self.find_record(folder.folder_id, &HfsName::from_posix(component))? {
                Some(next) => entry = next,
                None => return Ok(None),
            }
        }
        Ok(Some(entry))
    }

    /// The folder or file record for `id`, found through its thread record.
    pub fn lookup_cnid(&self, id: CatalogNodeId) -> Result<Option<CatalogEntry>> {
        let Some((_, record)) = self.catalog()?.find(&CatalogKey::thread(id))? else {
            return Ok(None);
        };
        match record.thread() {
            Some(thread) => self.find_record(thread.parent_id, &thread.name),
            None => Ok(None),
        }
    }

    /// Rebuild the POSIX path of `id` by following thread records up to the
    /// root folder.
    pub fn path_for_cnid(&self, id: CatalogNodeId) -> Result<Option<String>> {
        let catalog = self.catalog()?;
        let limit = catalog.header().leaf_records as usize + 1;
        let mut components = Vec::new();
        let mut current = id;

        while current != cnid::ROOT_FOLDER {
            if components.len() > limit {
                return Err(Error::invalid(
                    "catalog thread chain",
                    format!("cycle while building the path of CNID {id}"),
                ));
            }
            let Some((_, record)) = catalog.find(&CatalogKey::thread(current))? else {
                return Ok(None);
            };
            let Some(thread) = record.thread() else {
                return Ok(None);
            };
            components.push(thread.name.to_posix());
            current = thread.parent_id;
            if current == cnid::ROOT_PARENT {
                return Ok(None);
            }
        }

        components.reverse();
        Ok(Some(format!("/{}", components.join("/"))))
    }

    /// Children of folder `id`. Each call searches the catalog again.
    pub fn list_folder(&self, id: CatalogNodeId) -> Result<FolderIter<'_>> {
        let catalog = self.catalog()?;
        let start = catalog.search(&CatalogKey::thread(id))?;
        Ok(FolderIter {
            cursor: catalog.records_from(start.position)?,
            parent: id,
            done: false,
        })
    }

    /// Extended attributes of `id`, in attributes tree order. Empty when the
    /// volume has no attributes file.
    pub fn attributes_for(&self, id: CatalogNodeId) -> Result<Vec<(AttributeKey, AttributeValue)>> {
        let Some(tree) = self.attributes()? else {
            return Ok(Vec::new());
        };
        let start = tree.search(&AttributeKey::new(id, "", 0))?;
        let mut found = Vec::new();
        for record in tree.records_from(start.position)? {
            let (key, value) = record?;
            if key.file_id != id {
                break;
            }
            found.push((key, value));
        }
        Ok(found)
    }
}
