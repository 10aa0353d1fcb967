//! Whole-volume statistics from a single pass over the catalog leaves.

use hfs_types_rs::{ForkType, NodeKind, cnid, type_codes};
use tracing::{debug, warn};

use crate::btree::BTree;
use crate::error::{Error, Result};
use crate::fork::Fork;
use crate::hfs::Hfs;
use crate::raw::{CatalogFile, CatalogNodeId};
use crate::trees::{CatalogKey, CatalogRecord, ExtentsTree};
use crate::unicode::HfsName;

/// Length of the largest-file and most-fragmented rankings.
pub const TOP_N: usize = 10;

/// Totals for one fork type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkSummary {
    pub forks: u64,
    pub logical_bytes: u64,
    pub allocated_blocks: u64,
    /// Forks stored in more than one extent.
    pub fragmented: u64,
    /// Extent descriptors used in catalog records.
    pub inline_extents: u64,
    pub overflow_records: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedFile {
    pub cnid: CatalogNodeId,
    pub name: HfsName,
    /// Logical size of both forks.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedFork {
    pub cnid: CatalogNodeId,
    pub name: HfsName,
    pub fork_type: ForkType,
    pub extents: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSummary {
    pub files: u64,
    /// Folders, not counting the root.
    pub folders: u64,
    pub thread_records: u64,
    pub hard_links: u64,
    pub directory_hard_links: u64,
    pub symbolic_links: u64,
    pub aliases: u64,
    /// Files with both forks empty.
    pub empty_files: u64,
    pub empty_folders: u64,
    pub invisible: u64,
    /// Records that decoded but could not be analyzed, such as forks with
    /// missing overflow extents.
    pub damaged_records: u64,
    pub data: ForkSummary,
    pub resource: ForkSummary,
    /// Largest first.
    pub largest_files: Vec<RankedFile>,
    /// Most extents first.
    pub most_fragmented: Vec<RankedFork>,
    /// The walk stopped at an unreadable node; totals cover what came
    /// before it.
    pub truncated: bool,
    pub warnings: Vec<String>,
}

/// Insert `item` into a list kept in descending `rank` order and capped at
/// [`TOP_N`]. Ties keep their arrival order.
fn push_ranked<T>(list: &mut Vec<T>, item: T, rank: impl Fn(&T) -> u64) {
    let value = rank(&item);
    if list.len() >= TOP_N && list.last().is_some_and(|last| rank(last) >= value) {
        return;
    }
    let at = list.partition_point(|x| rank(x) >= value);
    list.insert(at, item);
    list.truncate(TOP_N);
}

impl VolumeSummary {
    fn add(
        &mut self,
        key: CatalogKey,
        record: CatalogRecord,
        block_size: u32,
        extents: &BTree<ExtentsTree>,
    ) {
        match record {
            CatalogRecord::Folder(folder) => {
                if folder.folder_id == cnid::ROOT_FOLDER {
                    return;
                }
                self.folders += 1;
                if folder.valence == 0 {
                    self.empty_folders += 1;
                }
                if folder.is_invisible() {
                    self.invisible += 1;
                }
            }
            CatalogRecord::File(file) => self.add_file(key.name, &file, block_size, extents),
            CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => {
                self.thread_records += 1;
            }
        }
    }

    fn add_file(
        &mut self,
        name: HfsName,
        file: &CatalogFile,
        block_size: u32,
        extents: &BTree<ExtentsTree>,
    ) {
        self.files += 1;
        if file.has_type(type_codes::HARD_LINK_TYPE, type_codes::HARD_LINK_CREATOR) {
            self.hard_links += 1;
        } else if file.has_type(type_codes::FOLDER_ALIAS_TYPE, type_codes::FOLDER_ALIAS_CREATOR) {
            self.directory_hard_links += 1;
        } else if file.has_type(type_codes::SYMBOLIC_LINK_TYPE, type_codes::SYMBOLIC_LINK_CREATOR)
        {
            self.symbolic_links += 1;
        }
        if file.is_alias() {
            self.aliases += 1;
        }
        if file.is_invisible() {
            self.invisible += 1;
        }
        if file.data_fork.is_empty() && file.resource_fork.is_empty() {
            self.empty_files += 1;
        }

        push_ranked(
            &mut self.largest_files,
            RankedFile {
                cnid: file.file_id,
                name: name.clone(),
                size: file.data_fork.logical_size + file.resource_fork.logical_size,
            },
            |f| f.size,
        );

        for (fork_type, data) in [
            (ForkType::Data, &file.data_fork),
            (ForkType::Resource, &file.resource_fork),
        ] {
            if data.is_empty() {
                continue;
            }
            let rollup = match fork_type {
                ForkType::Data => &mut self.data,
                ForkType::Resource => &mut self.resource,
            };
            rollup.forks += 1;
            rollup.logical_bytes += data.logical_size;
            rollup.allocated_blocks += data.total_blocks as u64;
            rollup.inline_extents += data.used_extents().count() as u64;

            let mut fork = Fork::new(data, fork_type, file.file_id, block_size);
            match fork.load_all(extents) {
                Ok(records) => rollup.overflow_records += records as u64,
                Err(err) => {
                    debug!(file_id = file.file_id, fork = %fork_type, %err, "unresolvable fork");
                    self.damaged_records += 1;
                    continue;
                }
            }

            let count = fork.extents().len();
            if count > 1 {
                rollup.fragmented += 1;
                push_ranked(
                    &mut self.most_fragmented,
                    RankedFork {
                        cnid: file.file_id,
                        name: name.clone(),
                        fork_type,
                        extents: count,
                    },
                    |f| f.extents as u64,
                );
            }
        }
    }
}

impl Hfs {
    /// Tally every catalog record. Records that fail to decode are counted
    /// as damaged and skipped; an unreadable leaf ends the walk early and
    /// marks the summary truncated rather than failing it.
    pub fn volume_summary(&self) -> Result<VolumeSummary> {
        let catalog = self.catalog()?;
        let extents = self.extents()?;
        let block_size = self.block_size();
        let mut summary = VolumeSummary::default();
        if catalog.is_empty() {
            return Ok(summary);
        }

        let walked = catalog.walk_unverified(catalog.header().first_leaf_node, |node| {
            if node.kind() != NodeKind::Leaf {
                return Err(Error::corrupt(
                    "catalog",
                    node.number(),
                    format!("{} node in the leaf chain", node.kind()),
                ));
            }
            for index in 0..node.num_records() {
                match catalog.leaf_record(node, index) {
                    Ok((key, record)) => summary.add(key, record, block_size, extents),
                    Err(err) => {
                        debug!(node = node.number(), index, %err, "skipping damaged record");
                        summary.damaged_records += 1;
                    }
                }
            }
            Ok(true)
        });

        if let Err(err) = walked {
            warn!(%err, "catalog walk stopped early, summary is partial");
            summary.truncated = true;
            summary.warnings.push(err.to_string());
        }
        Ok(summary)
    }
}
