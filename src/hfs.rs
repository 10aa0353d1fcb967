//! An opened HFS+ (or HFSX) filesystem: the volume header and the system
//! B-trees hanging off it.

use std::cell::OnceCell;
use std::io::Write;

use deku::DekuContainerRead;
use hfs_types_rs::{
    ForkType, VOLUME_HEADER_OFFSET, VOLUME_HEADER_SIZE, VolumeSignature, cnid, hot_files,
    volume_attributes,
};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::btree::BTree;
use crate::error::{Error, Result};
use crate::fork::{Fork, ForkStream, NoOverflow};
use crate::raw::{
    CatalogFile, ForkData, HotFilesInfo, JournalInfoBlock, MasterDirectoryBlock, VolumeHeader,
};
use crate::trees::{AttributesTree, CatalogRecord, CatalogTree, ExtentsTree, HotFilesTree};
use crate::unicode::HfsName;
use crate::volume::{Volume, VolumeKind};

/// Tunables for an opened filesystem.
#[derive(Debug, Clone)]
pub struct HfsOptions {
    /// Nodes cached per B-tree. 0 disables caching.
    pub node_cache_capacity: usize,
}

impl Default for HfsOptions {
    fn default() -> Self {
        HfsOptions {
            node_cache_capacity: 1024,
        }
    }
}

/// Where a classic HFS wrapper keeps its embedded HFS+ volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrapper {
    pub name: String,
    pub offset: u64,
    pub length: u64,
}

/// Result of [`Hfs::copy_fork`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkCopy {
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the copied bytes.
    pub sha256: String,
}

pub struct Hfs {
    volume: Volume,
    header: VolumeHeader,
    signature: VolumeSignature,
    wrapper: Option<Wrapper>,
    options: HfsOptions,
    extents: OnceCell<BTree<ExtentsTree>>,
    catalog: OnceCell<BTree<CatalogTree>>,
    attributes: OnceCell<Option<BTree<AttributesTree>>>,
    hot_files: OnceCell<Option<(BTree<HotFilesTree>, HotFilesInfo)>>,
}

impl std::fmt::Debug for Hfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hfs")
            .field("volume", &self.volume)
            .field("signature", &self.signature)
            .field("wrapper", &self.wrapper)
            .finish_non_exhaustive()
    }
}

fn read_header_bytes(volume: &Volume) -> Result<[u8; VOLUME_HEADER_SIZE]> {
    let mut raw = [0u8; VOLUME_HEADER_SIZE];
    volume.read_exact_at(&mut raw, VOLUME_HEADER_OFFSET)?;
    Ok(raw)
}

impl Hfs {
    pub fn open(volume: &Volume) -> Result<Hfs> {
        Self::open_with(volume, HfsOptions::default())
    }

    /// Read the volume header, looking through a classic HFS wrapper if
    /// there is one.
    pub fn open_with(volume: &Volume, options: HfsOptions) -> Result<Hfs> {
        let mut raw = read_header_bytes(volume)?;
        let mut signature = u16::from_be_bytes([raw[0], raw[1]]);
        let mut wrapper = None;
        let mut filesystem = volume.detached();

        if signature == VolumeSignature::Hfs as u16 {
            let (_rest, mdb) = MasterDirectoryBlock::from_bytes((&raw[..], 0))?;
            if mdb.embed_signature != VolumeSignature::HfsPlus as u16 {
                return Err(Error::NotHfsPlus { signature });
            }
            let (offset, length) = mdb.embedded_volume();
            let outside = volume
                .length()
                .is_some_and(|outer| offset.saturating_add(length) > outer);
            if length == 0 || outside {
                return Err(Error::UnsupportedWrapped(format!(
                    "embedded volume at {offset:#x}+{length:#x} lies outside the {} byte wrapper",
                    volume.length().map_or_else(|| "unbounded".to_string(), |l| format!("{l:#x}"))
                )));
            }
            warn!(name = %mdb.name(), offset, length, "HFS+ volume is wrapped in classic HFS");

            filesystem = volume.sub_volume(offset, length, VolumeKind::EmbeddedHfsPlus);
            raw = read_header_bytes(&filesystem)?;
            signature = u16::from_be_bytes([raw[0], raw[1]]);
            wrapper = Some(Wrapper {
                name: mdb.name(),
                offset,
                length,
            });
        }

        let signature = match VolumeSignature::try_from(signature) {
            Ok(s @ (VolumeSignature::HfsPlus | VolumeSignature::HfsX)) => s,
            _ => return Err(Error::NotHfsPlus { signature }),
        };
        let (_rest, header) = VolumeHeader::from_bytes((&raw[..], 0))?;
        if header.block_size == 0 || !header.block_size.is_power_of_two() {
            return Err(Error::invalid(
                "volume header",
                format!("allocation block size {}", header.block_size),
            ));
        }

        debug!(
            ?signature,
            version = header.version,
            block_size = header.block_size,
            total_blocks = header.total_blocks,
            files = header.file_count,
            folders = header.folder_count,
            "opened HFS+ volume"
        );

        Ok(Hfs {
            volume: filesystem,
            header,
            signature,
            wrapper,
            options,
            extents: OnceCell::new(),
            catalog: OnceCell::new(),
            attributes: OnceCell::new(),
            hot_files: OnceCell::new(),
        })
    }

    /// The volume holding the HFS+ filesystem, inside any wrapper.
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn signature(&self) -> VolumeSignature {
        self.signature
    }

    pub fn is_hfsx(&self) -> bool {
        self.signature == VolumeSignature::HfsX
    }

    pub fn wrapper(&self) -> Option<&Wrapper> {
        self.wrapper.as_ref()
    }

    pub fn options(&self) -> &HfsOptions {
        &self.options
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    /// Fork of a file, ready for [`Hfs::read_fork`].
    pub fn open_fork(&self, file: &CatalogFile, fork_type: ForkType) -> Fork {
        let data = match fork_type {
            ForkType::Data => &file.data_fork,
            ForkType::Resource => &file.resource_fork,
        };
        Fork::new(data, fork_type, file.file_id, self.header.block_size)
    }

    fn system_stream(&self, data: &ForkData, file_id: u32) -> Result<ForkStream> {
        let fork = Fork::new(data, ForkType::Data, file_id, self.header.block_size);
        if file_id == cnid::EXTENTS_FILE {
            ForkStream::open(&self.volume, fork, &NoOverflow)
        } else {
            ForkStream::open(&self.volume, fork, self.extents()?)
        }
    }

    /// The extents overflow tree. Its own extents must all be inline.
    pub fn extents(&self) -> Result<&BTree<ExtentsTree>> {
        if let Some(tree) = self.extents.get() {
            return Ok(tree);
        }
        let stream = self.system_stream(&self.header.extents_file, cnid::EXTENTS_FILE)?;
        let tree = BTree::open(
            ExtentsTree,
            stream,
            cnid::EXTENTS_FILE,
            self.options.node_cache_capacity,
        )?;
        Ok(self.extents.get_or_init(|| tree))
    }

    pub fn catalog(&self) -> Result<&BTree<CatalogTree>> {
        if let Some(tree) = self.catalog.get() {
            return Ok(tree);
        }
        let stream = self.system_stream(&self.header.catalog_file, cnid::CATALOG_FILE)?;
        let tree = BTree::open(
            CatalogTree::new(self.is_hfsx()),
            stream,
            cnid::CATALOG_FILE,
            self.options.node_cache_capacity,
        )?;
        Ok(self.catalog.get_or_init(|| tree))
    }

    /// The attributes tree, `None` when the volume has no attributes file.
    pub fn attributes(&self) -> Result<Option<&BTree<AttributesTree>>> {
        if let Some(tree) = self.attributes.get() {
            return Ok(tree.as_ref());
        }
        let tree = if self.header.attributes_file.total_blocks == 0 {
            debug!("volume has no attributes file");
            None
        } else {
            let stream = self.system_stream(&self.header.attributes_file, cnid::ATTRIBUTES_FILE)?;
            Some(BTree::open(
                AttributesTree,
                stream,
                cnid::ATTRIBUTES_FILE,
                self.options.node_cache_capacity,
            )?)
        };
        Ok(self.attributes.get_or_init(|| tree).as_ref())
    }

    /// The hot files tree stored in `/.hotfiles.btree`, and the header
    /// kept in its user data record. `None` when the file does not exist.
    pub fn hot_files(&self) -> Result<Option<(&BTree<HotFilesTree>, &HotFilesInfo)>> {
        if let Some(entry) = self.hot_files.get() {
            return Ok(entry.as_ref().map(|(tree, info)| (tree, info)));
        }

        let entry = match self.find_record(cnid::ROOT_FOLDER, &HfsName::from(cnid::HOT_FILES_NAME))? {
            Some(found) => match found.record {
                CatalogRecord::File(file) => {
                    let stream = self.system_stream(&file.data_fork, file.file_id)?;
                    let tree = BTree::open(
                        HotFilesTree,
                        stream,
                        file.file_id,
                        self.options.node_cache_capacity,
                    )?;
                    let (_rest, info) = HotFilesInfo::from_bytes((tree.user_data(), 0))?;
                    if info.magic != hot_files::MAGIC {
                        return Err(Error::invalid(
                            "hot files header",
                            format!("magic {:#010x}", info.magic),
                        ));
                    }
                    Some((tree, info))
                }
                _ => None,
            },
            None => None,
        };
        Ok(self
            .hot_files
            .get_or_init(|| entry)
            .as_ref()
            .map(|(tree, info)| (tree, info)))
    }

    /// Read fork bytes at `offset`, loading overflow extents as needed.
    pub fn read_fork(&self, fork: &mut Fork, buf: &mut [u8], offset: u64) -> Result<usize> {
        fork.read_range(&self.volume, self.extents()?, buf, offset)
    }

    /// Copy a whole fork to `out`, hashing it on the way.
    pub fn copy_fork(
        &self,
        file: &CatalogFile,
        fork_type: ForkType,
        out: &mut dyn Write,
    ) -> Result<ForkCopy> {
        let mut fork = self.open_fork(file, fork_type);
        let chunk = (self.header.block_size as usize).max(64 * 1024);
        let mut buf = vec![0u8; chunk];
        let mut hasher = Sha256::new();
        let mut offset = 0u64;

        loop {
            let n = self.read_fork(&mut fork, &mut buf, offset)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            hasher.update(&buf[..n]);
            offset += n as u64;
        }

        let sha256 = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        debug!(
            file_id = file.file_id,
            fork = %fork_type,
            bytes = offset,
            overflow_records = fork.overflow_records(),
            "copied fork"
        );
        Ok(ForkCopy {
            bytes: offset,
            sha256,
        })
    }

    /// The journal info block, when the volume is journaled.
    pub fn journal_info(&self) -> Result<Option<JournalInfoBlock>> {
        if self.header.attributes & volume_attributes::JOURNALED == 0
            || self.header.journal_info_block == 0
        {
            return Ok(None);
        }
        let mut raw = [0u8; JournalInfoBlock::SIZE];
        let offset = self.header.journal_info_block as u64 * self.header.block_size as u64;
        self.volume.read_exact_at(&mut raw, offset)?;
        let (_rest, info) = JournalInfoBlock::from_bytes((&raw[..], 0))?;
        Ok(Some(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fork::OverflowSource;
    use crate::testutil::{IMAGE_BLOCK_SIZE, ImageBuilder, wrap_in_hfs};
    use hfs_types_rs::journal_info_flags;

    #[test]
    fn opens_plain_volume() {
        let mut builder = ImageBuilder::new();
        builder.file(cnid::ROOT_FOLDER, "a.txt", b"alpha");
        let hfs = Hfs::open(&Volume::from_bytes(builder.build())).unwrap();

        assert_eq!(hfs.signature(), VolumeSignature::HfsPlus);
        assert_eq!(hfs.block_size(), IMAGE_BLOCK_SIZE);
        assert_eq!(hfs.header().file_count, 1);
        assert!(hfs.wrapper().is_none());
        assert!(hfs.attributes().unwrap().is_none());
        assert!(hfs.hot_files().unwrap().is_none());
        assert!(hfs.journal_info().unwrap().is_none());
    }

    #[test]
    fn trees_are_memoized() {
        let hfs = Hfs::open(&Volume::from_bytes(ImageBuilder::new().build())).unwrap();
        let first = hfs.catalog().unwrap() as *const _;
        let second = hfs.catalog().unwrap() as *const _;
        assert_eq!(first, second);
        assert_eq!(hfs.extents().unwrap().header().leaf_records, 0);
    }

    #[test]
    fn sees_through_hfs_wrapper() {
        let mut builder = ImageBuilder::new();
        builder.file(cnid::ROOT_FOLDER, "inner", b"wrapped data");
        let image = builder.build();
        let wrapped = wrap_in_hfs(&image);

        let hfs = Hfs::open(&Volume::from_bytes(wrapped.clone())).unwrap();
        let wrapper = hfs.wrapper().unwrap();
        assert_eq!(wrapper.name, "Wrapper");
        assert_eq!(wrapper.offset, 16 * 512 + 2 * 4096);
        assert_eq!(wrapper.length, image.len() as u64);
        assert_eq!(hfs.volume().kind(), &VolumeKind::EmbeddedHfsPlus);
        assert!(hfs.resolve_path("/inner").unwrap().is_some());

        let mut cut = wrapped;
        cut.truncate(cut.len() - 4096);
        assert!(matches!(
            Hfs::open(&Volume::from_bytes(cut)),
            Err(Error::UnsupportedWrapped(_))
        ));
    }

    #[test]
    fn rejects_other_signatures() {
        let mut raw = vec![0u8; 8192];
        assert!(matches!(
            Hfs::open(&Volume::from_bytes(raw.clone())),
            Err(Error::NotHfsPlus { signature: 0 })
        ));

        // Classic HFS without an embedded volume.
        raw[1024..1026].copy_from_slice(b"BD");
        assert!(matches!(
            Hfs::open(&Volume::from_bytes(raw)),
            Err(Error::NotHfsPlus { .. })
        ));

        assert!(matches!(
            Hfs::open(&Volume::from_bytes(vec![0u8; 1100])),
            Err(Error::ShortRead { .. })
        ));
    }

    #[test]
    fn copy_fork_hashes_contents() {
        let contents: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut builder = ImageBuilder::new();
        let id = builder.file(cnid::ROOT_FOLDER, "data.bin", &contents);
        builder.resource_fork(id, b"resource!");
        let hfs = Hfs::open(&Volume::from_bytes(builder.build())).unwrap();

        let entry = hfs.lookup_cnid(id).unwrap().unwrap();
        let CatalogRecord::File(file) = entry.record else {
            panic!("expected a file record");
        };

        let mut out = Vec::new();
        let copy = hfs.copy_fork(&file, ForkType::Data, &mut out).unwrap();
        assert_eq!(out, contents);
        assert_eq!(copy.bytes, contents.len() as u64);
        let expected: String = Sha256::digest(&contents)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(copy.sha256, expected);

        let mut out = Vec::new();
        hfs.copy_fork(&file, ForkType::Resource, &mut out).unwrap();
        assert_eq!(out, b"resource!");
    }

    fn lookup_file(hfs: &Hfs, id: u32) -> CatalogFile {
        let entry = hfs.lookup_cnid(id).unwrap().unwrap();
        let CatalogRecord::File(file) = entry.record else {
            panic!("expected a file record for {id}");
        };
        file
    }

    #[test]
    fn fragmented_forks_read_through_overflow_records() {
        let block = IMAGE_BLOCK_SIZE as usize;
        let contents: Vec<u8> = (0..30 * block + 123).map(|i| (i % 251) as u8).collect();
        let mut builder = ImageBuilder::new();
        let id = builder.fragmented_file(cnid::ROOT_FOLDER, "big", &contents);
        let hfs = Hfs::open(&Volume::from_bytes(builder.build())).unwrap();
        let file = lookup_file(&hfs, id);

        let mut out = Vec::new();
        let copy = hfs.copy_fork(&file, ForkType::Data, &mut out).unwrap();
        assert_eq!(copy.bytes, contents.len() as u64);
        assert!(out == contents, "fork bytes differ from the file contents");

        // From the last inline extent into the first overflow extent.
        let mut fork = hfs.open_fork(&file, ForkType::Data);
        let mut buf = vec![0u8; 300];
        let offset = 8 * block as u64 - 100;
        assert_eq!(hfs.read_fork(&mut fork, &mut buf, offset).unwrap(), 300);
        assert_eq!(buf, contents[offset as usize..offset as usize + 300]);
        assert_eq!(fork.overflow_records(), 1);

        // Deep inside the second overflow record.
        let offset = 19 * block as u64 + 7;
        assert_eq!(hfs.read_fork(&mut fork, &mut buf, offset).unwrap(), 300);
        assert_eq!(buf, contents[offset as usize..offset as usize + 300]);
        assert_eq!(fork.overflow_records(), 2);

        // The tail is clipped to the logical size.
        let offset = contents.len() as u64 - 23;
        assert_eq!(hfs.read_fork(&mut fork, &mut buf, offset).unwrap(), 23);
        assert_eq!(buf[..23], contents[offset as usize..]);
        assert_eq!(fork.overflow_records(), 3);
        assert!(fork.is_fully_mapped());
    }

    #[test]
    fn absent_overflow_record_is_not_found() {
        let block = IMAGE_BLOCK_SIZE as usize;
        let mut builder = ImageBuilder::new();
        builder.skip_to(98);
        builder.fragmented_file(cnid::ROOT_FOLDER, "before", &vec![1u8; 12 * block]);
        let target = builder.file(cnid::ROOT_FOLDER, "target", b"inline only");
        builder.fragmented_file(cnid::ROOT_FOLDER, "after", &vec![2u8; 12 * block]);
        let hfs = Hfs::open(&Volume::from_bytes(builder.build())).unwrap();
        assert_eq!(target, 99);

        let tree = hfs.extents().unwrap();
        assert_eq!(tree.header().leaf_records, 2);
        assert!(tree.overflow_extents(98, ForkType::Data, 8).unwrap().is_some());
        assert!(tree.overflow_extents(99, ForkType::Data, 12_345).unwrap().is_none());

        // A fork claiming more blocks than its inline extents map.
        let mut data = ForkData {
            logical_size: 20_000 * block as u64,
            total_blocks: 20_000,
            ..Default::default()
        };
        data.extents[0].start_block = 1;
        data.extents[0].block_count = 12_345;
        let mut fork = Fork::new(&data, ForkType::Data, 99, IMAGE_BLOCK_SIZE);
        let before = fork.extents().clone();

        assert_eq!(fork.resolve(tree, 12_345).unwrap(), None);
        assert_eq!(fork.extents(), &before);
        assert_eq!(fork.overflow_records(), 0);

        let mut buf = [0u8; 16];
        assert!(matches!(
            hfs.read_fork(&mut fork, &mut buf, 12_345 * block as u64),
            Err(Error::MissingExtents {
                file_id: 99,
                block: 12_345,
                ..
            })
        ));
        assert_eq!(hfs.read_fork(&mut fork, &mut buf, 0).unwrap(), 16);
        assert_eq!(fork.extents(), &before);
    }

    fn assert_strictly_ordered<K: crate::btree::TreeKind>(tree: &BTree<K>) -> usize {
        let keys: Vec<K::Key> = tree.iter().unwrap().map(|r| r.unwrap().0).collect();
        for pair in keys.windows(2) {
            assert_eq!(
                tree.kind().compare(&pair[0], &pair[1]),
                std::cmp::Ordering::Less,
                "{} keys out of order: {:?}",
                tree.name(),
                pair
            );
        }
        keys.len()
    }

    #[test]
    fn system_tree_leaves_are_strictly_ordered() {
        let mut builder = ImageBuilder::new().fanout(3);
        let docs = builder.folder(cnid::ROOT_FOLDER, "Docs");
        let mut ids = Vec::new();
        for name in ["b", "A", "a.txt", "Zed", "éclair", "zz"] {
            ids.push(builder.file(docs, name, b"x"));
        }
        let big = builder.fragmented_file(docs, "big", &vec![3u8; 30 * IMAGE_BLOCK_SIZE as usize]);
        builder.resource_fork(big, b"r");
        for (i, id) in ids.iter().enumerate() {
            builder.inline_attribute(*id, "com.apple.b", b"1");
            builder.inline_attribute(*id, "com.apple.a", &[i as u8]);
        }
        builder.hot_files(&[(5, ids[0]), (5, ids[1]), (70, ids[2])]);
        let hfs = Hfs::open(&Volume::from_bytes(builder.build())).unwrap();

        assert!(assert_strictly_ordered(hfs.catalog().unwrap()) > 16);
        assert_eq!(assert_strictly_ordered(hfs.extents().unwrap()), 3);
        assert_eq!(assert_strictly_ordered(hfs.attributes().unwrap().unwrap()), 12);
        assert_eq!(assert_strictly_ordered(hfs.hot_files().unwrap().unwrap().0), 6);
    }

    #[test]
    fn hot_files_and_journal() {
        let mut builder = ImageBuilder::new();
        let a = builder.file(cnid::ROOT_FOLDER, "warm", b"w");
        let b = builder.file(cnid::ROOT_FOLDER, "hot", b"h");
        builder.hot_files(&[(10, a), (900, b)]);
        builder.journal(8 * IMAGE_BLOCK_SIZE as u64, 1 << 20);
        let hfs = Hfs::open(&Volume::from_bytes(builder.build())).unwrap();

        let (tree, info) = hfs.hot_files().unwrap().unwrap();
        assert_eq!(info.magic, hot_files::MAGIC);
        assert_eq!(info.tag().trim_end(), "CLUSTERED HOT FILES B-TREE");
        let temperatures: Vec<u32> = tree
            .iter()
            .unwrap()
            .map(|r| r.unwrap().0)
            .filter(|key| !key.is_thread())
            .map(|key| key.temperature)
            .collect();
        assert_eq!(temperatures, [10, 900]);

        let journal = hfs.journal_info().unwrap().unwrap();
        assert_eq!(journal.flags, journal_info_flags::IN_FS);
        assert_eq!(journal.size, 1 << 20);
    }
}
