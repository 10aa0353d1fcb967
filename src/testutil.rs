//! Synthetic B-trees and HFS+ images, built in memory for tests.

use std::collections::BTreeMap;

use deku::DekuContainerWrite;
use hfs_types_rs::{
    CatalogRecordType, ForkType, NodeKind, VOLUME_HEADER_OFFSET, VolumeSignature,
    btree_attributes, cnid, hot_files, journal_info_flags, volume_attributes,
};

use crate::btree::TreeKind;
use crate::fork::{Fork, ForkStream, NoOverflow};
use crate::raw::{
    BTreeHeaderRecord, CatalogFile, CatalogFolder, ExtentDescriptor, ExtentRecord, ForkData,
    HfsExtentDescriptor, HotFilesInfo, JournalInfoBlock, MasterDirectoryBlock, NodeDescriptor,
    VolumeHeader,
};
use crate::trees::{
    AttributeKey, AttributeValue, AttributesTree, CatalogKey, CatalogThread, CatalogTree,
    ExtentKey, ExtentsTree, HotFileKey, HotFilesTree,
};

/// Shape of a synthetic B-tree.
#[derive(Debug, Clone)]
pub(crate) struct TreeSpec {
    pub node_size: usize,
    pub big_keys: bool,
    pub variable_index_keys: bool,
    pub max_key_length: u16,
    pub key_compare_type: u8,
    pub records_per_leaf: usize,
    pub records_per_index: usize,
    /// Give node 0 a leaf descriptor.
    pub corrupt_header_kind: bool,
    pub user_data: Vec<u8>,
}

impl Default for TreeSpec {
    fn default() -> Self {
        let mut user_data = b"user".to_vec();
        user_data.resize(128, 0);
        TreeSpec {
            node_size: 512,
            big_keys: true,
            variable_index_keys: true,
            max_key_length: 516,
            key_compare_type: 0xCF,
            records_per_leaf: 8,
            records_per_index: 8,
            corrupt_header_kind: false,
            user_data,
        }
    }
}

/// Length prefix, key padded to `key_size`, value, each part ending on an
/// even offset.
fn encode_record(key: &[u8], key_size: usize, value: &[u8], big_keys: bool) -> Vec<u8> {
    let mut out = Vec::new();
    if big_keys {
        out.extend_from_slice(&(key.len() as u16).to_be_bytes());
    } else {
        out.push(key.len() as u8);
    }
    let prefix = out.len();
    out.extend_from_slice(key);
    out.resize(prefix + key_size.max(key.len()), 0);
    if out.len() % 2 == 1 {
        out.push(0);
    }
    out.extend_from_slice(value);
    if out.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn write_node(node_size: usize, descriptor: NodeDescriptor, records: &[Vec<u8>]) -> Vec<u8> {
    let mut node = descriptor.to_bytes().unwrap();
    node.resize(node_size, 0);

    let mut at = NodeDescriptor::SIZE;
    let mut offsets = vec![at];
    for record in records {
        node[at..at + record.len()].copy_from_slice(record);
        at += record.len();
        offsets.push(at);
    }
    assert!(at + 2 * offsets.len() <= node_size, "records overflow node");
    for (i, offset) in offsets.iter().enumerate() {
        let slot = node_size - 2 * (i + 1);
        node[slot..slot + 2].copy_from_slice(&(*offset as u16).to_be_bytes());
    }
    node
}

/// Greedily group `(first key, encoded record)` pairs into nodes.
fn pack(
    records: Vec<(Vec<u8>, Vec<u8>)>,
    per_node: usize,
    node_size: usize,
) -> Vec<Vec<(Vec<u8>, Vec<u8>)>> {
    let empty = NodeDescriptor::SIZE + 2;
    let mut groups = Vec::new();
    let mut current: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut used = empty;
    for record in records {
        let need = record.1.len() + 2;
        if !current.is_empty() && (current.len() >= per_node || used + need > node_size) {
            groups.push(std::mem::take(&mut current));
            used = empty;
        }
        assert!(used + need <= node_size, "{} byte record does not fit", record.1.len());
        used += need;
        current.push(record);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Append one level of sibling nodes, returning each node's first key and
/// number.
fn emit_level(
    nodes: &mut Vec<Vec<u8>>,
    groups: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
    kind: NodeKind,
    height: u8,
    node_size: usize,
) -> Vec<(Vec<u8>, u32)> {
    let first = nodes.len() as u32;
    let count = groups.len() as u32;
    let mut level = Vec::new();
    for (i, group) in groups.into_iter().enumerate() {
        let number = first + i as u32;
        let descriptor = NodeDescriptor {
            forward_link: if number + 1 < first + count { number + 1 } else { 0 },
            backward_link: if i == 0 { 0 } else { number - 1 },
            kind: kind as i8,
            height,
            num_records: group.len() as u16,
            reserved: 0,
        };
        level.push((group[0].0.clone(), number));
        let records: Vec<Vec<u8>> = group.into_iter().map(|(_, record)| record).collect();
        nodes.push(write_node(node_size, descriptor, &records));
    }
    level
}

/// Build a complete tree from records already sorted by key. Leaves come
/// first after the header node, then each index level bottom up.
pub(crate) fn build_tree(records: &[(Vec<u8>, Vec<u8>)], spec: &TreeSpec) -> Vec<u8> {
    let node_size = spec.node_size;
    let mut nodes: Vec<Vec<u8>> = vec![Vec::new()];

    let leaf_records = records
        .iter()
        .map(|(key, value)| {
            (key.clone(), encode_record(key, key.len(), value, spec.big_keys))
        })
        .collect();
    let groups = pack(leaf_records, spec.records_per_leaf.max(1), node_size);
    let mut height = 1;
    let mut level = emit_level(&mut nodes, groups, NodeKind::Leaf, height, node_size);
    let first_leaf = level.first().map_or(0, |l| l.1);
    let last_leaf = level.last().map_or(0, |l| l.1);

    while level.len() > 1 {
        height += 1;
        let index_records = level
            .iter()
            .map(|(key, child)| {
                let key_size = if spec.variable_index_keys {
                    key.len()
                } else {
                    spec.max_key_length as usize
                };
                let record = encode_record(key, key_size, &child.to_be_bytes(), spec.big_keys);
                (key.clone(), record)
            })
            .collect();
        let groups = pack(index_records, spec.records_per_index.max(2), node_size);
        level = emit_level(&mut nodes, groups, NodeKind::Index, height, node_size);
    }

    let mut attributes = 0;
    if spec.big_keys {
        attributes |= btree_attributes::BIG_KEYS;
    }
    if spec.variable_index_keys {
        attributes |= btree_attributes::VARIABLE_INDEX_KEYS;
    }
    let total_nodes = nodes.len();
    let header = BTreeHeaderRecord {
        tree_depth: if records.is_empty() { 0 } else { height as u16 },
        root_node: level.first().map_or(0, |l| l.1),
        leaf_records: records.len() as u32,
        first_leaf_node: first_leaf,
        last_leaf_node: last_leaf,
        node_size: node_size as u16,
        max_key_length: spec.max_key_length,
        total_nodes: total_nodes as u32,
        free_nodes: 0,
        clump_size: node_size as u32,
        key_compare_type: spec.key_compare_type,
        attributes,
        ..Default::default()
    };

    let mut user_data = spec.user_data.clone();
    user_data.resize(128, 0);
    let mut map = vec![0u8; node_size - 8 - 248];
    for n in 0..total_nodes {
        map[n / 8] |= 0x80 >> (n % 8);
    }
    let kind = if spec.corrupt_header_kind {
        NodeKind::Leaf
    } else {
        NodeKind::Header
    };
    nodes[0] = write_node(
        node_size,
        NodeDescriptor {
            kind: kind as i8,
            num_records: 3,
            ..Default::default()
        },
        &[header.to_bytes().unwrap(), user_data, map],
    );

    nodes.concat()
}

/// A fork stream over `bytes`, laid out as a single extent.
pub(crate) fn tree_stream(bytes: Vec<u8>, node_size: usize) -> ForkStream {
    let blocks = (bytes.len() / node_size) as u32;
    let mut data = ForkData {
        logical_size: bytes.len() as u64,
        total_blocks: blocks,
        ..Default::default()
    };
    data.extents[0] = ExtentDescriptor {
        start_block: 0,
        block_count: blocks,
    };
    let volume = crate::volume::Volume::from_bytes(bytes);
    let fork = Fork::new(&data, ForkType::Data, 0, node_size as u32);
    ForkStream::open(&volume, fork, &NoOverflow).unwrap()
}

/// A tree of big-endian u32 keys. Each value is the key repeated twice.
pub(crate) fn u32_tree(keys: &[u32], spec: TreeSpec) -> ForkStream {
    let records: Vec<(Vec<u8>, Vec<u8>)> = keys
        .iter()
        .map(|k| (k.to_be_bytes().to_vec(), k.to_be_bytes().repeat(2)))
        .collect();
    let node_size = spec.node_size;
    tree_stream(build_tree(&records, &spec), node_size)
}

pub(crate) const IMAGE_BLOCK_SIZE: u32 = 4096;
pub(crate) const ROOT_NAME: &str = "Test Volume";

/// Builds a small HFS+ volume: catalog, extents overflow and attributes
/// trees, file data, and optionally a hot files tree and journal info block.
pub(crate) struct ImageBuilder {
    signature: VolumeSignature,
    key_compare_type: u8,
    fanout: usize,
    image: Vec<u8>,
    next_cnid: u32,
    folders: BTreeMap<u32, (CatalogKey, CatalogFolder)>,
    files: BTreeMap<u32, (CatalogKey, CatalogFile)>,
    extents: Vec<(ExtentKey, ExtentRecord)>,
    attributes: Vec<(AttributeKey, Vec<u8>)>,
    journal_block: Option<u32>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        let mut builder = ImageBuilder {
            signature: VolumeSignature::HfsPlus,
            key_compare_type: 0xCF,
            fanout: 4,
            image: vec![0u8; IMAGE_BLOCK_SIZE as usize],
            next_cnid: cnid::FIRST_USER_CATALOG_NODE,
            folders: BTreeMap::new(),
            files: BTreeMap::new(),
            extents: Vec::new(),
            attributes: Vec::new(),
            journal_block: None,
        };
        builder.folders.insert(
            cnid::ROOT_FOLDER,
            (
                CatalogKey::new(cnid::ROOT_PARENT, ROOT_NAME),
                folder_record(cnid::ROOT_FOLDER),
            ),
        );
        builder
    }

    /// Make the volume HFSX, optionally with binary name ordering.
    pub fn hfsx(mut self, binary: bool) -> Self {
        self.signature = VolumeSignature::HfsX;
        self.key_compare_type = if binary { 0xBC } else { 0xCF };
        self
    }

    /// Records per catalog node, to force deeper trees.
    pub fn fanout(mut self, records: usize) -> Self {
        self.fanout = records;
        self
    }

    /// Hand out `id` as the next CNID.
    pub fn skip_to(&mut self, id: u32) {
        assert!(id >= self.next_cnid, "CNID {id} already used");
        self.next_cnid = id;
    }

    fn next_cnid(&mut self) -> u32 {
        let id = self.next_cnid;
        self.next_cnid += 1;
        id
    }

    fn allocate(&mut self, blocks: u32) -> u32 {
        let start = (self.image.len() / IMAGE_BLOCK_SIZE as usize) as u32;
        self.image
            .resize(self.image.len() + (blocks * IMAGE_BLOCK_SIZE) as usize, 0);
        start
    }

    fn write_blocks(&mut self, contents: &[u8]) -> ForkData {
        let blocks = contents.len().div_ceil(IMAGE_BLOCK_SIZE as usize) as u32;
        if blocks == 0 {
            return ForkData::default();
        }
        let start = self.allocate(blocks);
        let at = (start * IMAGE_BLOCK_SIZE) as usize;
        self.image[at..at + contents.len()].copy_from_slice(contents);

        let mut fork = ForkData {
            logical_size: contents.len() as u64,
            clump_size: IMAGE_BLOCK_SIZE,
            total_blocks: blocks,
            ..Default::default()
        };
        fork.extents[0] = ExtentDescriptor {
            start_block: start,
            block_count: blocks,
        };
        fork
    }

    pub fn folder(&mut self, parent: u32, name: &str) -> u32 {
        let id = self.next_cnid();
        self.folders
            .insert(id, (CatalogKey::new(parent, name), folder_record(id)));
        id
    }

    pub fn file(&mut self, parent: u32, name: &str, contents: &[u8]) -> u32 {
        let id = self.next_cnid();
        let mut file = file_record(id);
        file.data_fork = self.write_blocks(contents);
        self.files.insert(id, (CatalogKey::new(parent, name), file));
        id
    }

    /// A file whose every block is its own extent, with a gap between
    /// extents. Blocks past the eighth go to extents overflow records.
    pub fn fragmented_file(&mut self, parent: u32, name: &str, contents: &[u8]) -> u32 {
        let id = self.next_cnid();
        let chunks: Vec<&[u8]> = contents.chunks(IMAGE_BLOCK_SIZE as usize).collect();
        let mut descriptors = Vec::new();
        for chunk in &chunks {
            let start = self.allocate(2);
            let at = (start * IMAGE_BLOCK_SIZE) as usize;
            self.image[at..at + chunk.len()].copy_from_slice(chunk);
            descriptors.push(ExtentDescriptor {
                start_block: start,
                block_count: 1,
            });
        }

        let mut file = file_record(id);
        file.data_fork = ForkData {
            logical_size: contents.len() as u64,
            clump_size: IMAGE_BLOCK_SIZE,
            total_blocks: chunks.len() as u32,
            ..Default::default()
        };
        for (slot, descriptor) in file.data_fork.extents.iter_mut().zip(&descriptors) {
            *slot = *descriptor;
        }
        let overflow = descriptors.get(8..).unwrap_or_default();
        for (i, chunk) in overflow.chunks(8).enumerate() {
            let mut record = ExtentRecord::default();
            for (slot, descriptor) in record.iter_mut().zip(chunk) {
                *slot = *descriptor;
            }
            let start_block = (8 + i * 8) as u32;
            self.extents
                .push((ExtentKey::new(id, ForkType::Data, start_block), record));
        }

        self.files.insert(id, (CatalogKey::new(parent, name), file));
        id
    }

    pub fn resource_fork(&mut self, id: u32, contents: &[u8]) {
        let fork = self.write_blocks(contents);
        self.edit_file(id, |file| file.resource_fork = fork);
    }

    pub fn edit_file(&mut self, id: u32, edit: impl FnOnce(&mut CatalogFile)) {
        let (_, file) = self.files.get_mut(&id).unwrap();
        edit(file);
    }

    pub fn edit_folder(&mut self, id: u32, edit: impl FnOnce(&mut CatalogFolder)) {
        let (_, folder) = self.folders.get_mut(&id).unwrap();
        edit(folder);
    }

    /// Drop an extents overflow record, leaving its fork unresolvable.
    pub fn drop_overflow(&mut self, id: u32) {
        self.extents.retain(|(key, _)| key.file_id != id);
    }

    pub fn inline_attribute(&mut self, id: u32, name: &str, data: &[u8]) {
        self.attributes.push((
            AttributeKey::new(id, name, 0),
            AttributeValue::encode_inline(data),
        ));
    }

    /// Add `/.hotfiles.btree` holding `(temperature, file id)` entries.
    pub fn hot_files(&mut self, entries: &[(u32, u32)]) -> u32 {
        let tree = HotFilesTree;
        let mut records = Vec::new();
        for &(temperature, file_id) in entries {
            records.push((
                HotFileKey::new(temperature, file_id, ForkType::Data),
                u32::from_be_bytes(*b"hotf"),
            ));
            records.push((HotFileKey::thread(file_id, ForkType::Data), temperature));
        }
        records.sort_by(|a, b| tree.compare(&a.0, &b.0));

        let mut tag = [0u8; 32];
        let text = b"CLUSTERED HOT FILES B-TREE     ";
        tag[..text.len()].copy_from_slice(text);
        let info = HotFilesInfo {
            magic: hot_files::MAGIC,
            version: 1,
            duration: 216_000,
            timebase: 0,
            timeleft: 0,
            threshold: 24,
            max_file_blocks: 2560,
            max_file_count: 1000,
            tag,
        };
        let spec = TreeSpec {
            max_key_length: 12,
            user_data: info.to_bytes().unwrap(),
            ..TreeSpec::default()
        };
        let encoded: Vec<(Vec<u8>, Vec<u8>)> = records
            .iter()
            .map(|(key, value)| (key.encode(), value.to_be_bytes().to_vec()))
            .collect();
        let bytes = build_tree(&encoded, &spec);
        self.file(cnid::ROOT_FOLDER, cnid::HOT_FILES_NAME, &bytes)
    }

    pub fn journal(&mut self, offset: u64, size: u64) {
        let block = JournalInfoBlock {
            flags: journal_info_flags::IN_FS,
            offset,
            size,
            ..Default::default()
        };
        let fork = self.write_blocks(&block.to_bytes().unwrap());
        self.journal_block = Some(fork.extents[0].start_block);
    }

    fn write_tree(&mut self, records: &[(Vec<u8>, Vec<u8>)], spec: &TreeSpec) -> ForkData {
        let bytes = build_tree(records, spec);
        self.write_blocks(&bytes)
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut valence: BTreeMap<u32, u32> = BTreeMap::new();
        let mut folder_count: BTreeMap<u32, u32> = BTreeMap::new();
        for (id, (key, _)) in &self.folders {
            if *id != cnid::ROOT_FOLDER {
                *valence.entry(key.parent_id).or_default() += 1;
                *folder_count.entry(key.parent_id).or_default() += 1;
            }
        }
        for (key, _) in self.files.values() {
            *valence.entry(key.parent_id).or_default() += 1;
        }

        let mut catalog: Vec<(CatalogKey, Vec<u8>)> = Vec::new();
        for (id, (key, folder)) in &self.folders {
            let mut folder = folder.clone();
            folder.valence = valence.get(id).copied().unwrap_or(0);
            folder.folder_count = folder_count.get(id).copied().unwrap_or(0);
            catalog.push((key.clone(), folder.to_bytes().unwrap()));
            let thread = CatalogThread {
                parent_id: key.parent_id,
                name: key.name.clone(),
            };
            catalog.push((
                CatalogKey::thread(*id),
                thread.encode(CatalogRecordType::FolderThread),
            ));
        }
        for (id, (key, file)) in &self.files {
            catalog.push((key.clone(), file.to_bytes().unwrap()));
            let thread = CatalogThread {
                parent_id: key.parent_id,
                name: key.name.clone(),
            };
            catalog.push((
                CatalogKey::thread(*id),
                thread.encode(CatalogRecordType::FileThread),
            ));
        }

        let mut order = CatalogTree::new(self.signature == VolumeSignature::HfsX);
        order
            .configure(&BTreeHeaderRecord {
                key_compare_type: self.key_compare_type,
                ..Default::default()
            })
            .unwrap();
        catalog.sort_by(|a, b| order.compare(&a.0, &b.0));
        let catalog: Vec<(Vec<u8>, Vec<u8>)> =
            catalog.into_iter().map(|(k, v)| (k.encode(), v)).collect();
        let catalog_fork = self.write_tree(
            &catalog,
            &TreeSpec {
                node_size: 4096,
                key_compare_type: self.key_compare_type,
                records_per_leaf: self.fanout,
                records_per_index: self.fanout,
                ..TreeSpec::default()
            },
        );

        let mut extents = std::mem::take(&mut self.extents);
        extents.sort_by(|a, b| ExtentsTree.compare(&a.0, &b.0));
        let extents: Vec<(Vec<u8>, Vec<u8>)> = extents
            .iter()
            .map(|(key, record)| {
                let value = record.iter().flat_map(|d| d.to_bytes().unwrap()).collect();
                (key.encode(), value)
            })
            .collect();
        let extents_fork = self.write_tree(
            &extents,
            &TreeSpec {
                node_size: 4096,
                variable_index_keys: false,
                max_key_length: ExtentKey::LENGTH as u16,
                key_compare_type: 0,
                ..TreeSpec::default()
            },
        );

        let mut attributes = std::mem::take(&mut self.attributes);
        let attributes_fork = if attributes.is_empty() {
            ForkData::default()
        } else {
            attributes.sort_by(|a, b| AttributesTree.compare(&a.0, &b.0));
            let attributes: Vec<(Vec<u8>, Vec<u8>)> =
                attributes.into_iter().map(|(k, v)| (k.encode(), v)).collect();
            self.write_tree(
                &attributes,
                &TreeSpec {
                    node_size: 4096,
                    max_key_length: 266,
                    key_compare_type: 0,
                    ..TreeSpec::default()
                },
            )
        };

        let mut attributes_flags = volume_attributes::UNMOUNTED;
        if self.journal_block.is_some() {
            attributes_flags |= volume_attributes::JOURNALED;
        }
        let header = VolumeHeader {
            signature: self.signature as u16,
            version: if self.signature == VolumeSignature::HfsX { 5 } else { 4 },
            attributes: attributes_flags,
            last_mounted_version: u32::from_be_bytes(*b"10.0"),
            journal_info_block: self.journal_block.unwrap_or(0),
            file_count: self.files.len() as u32,
            folder_count: self.folders.len() as u32 - 1,
            block_size: IMAGE_BLOCK_SIZE,
            total_blocks: (self.image.len() / IMAGE_BLOCK_SIZE as usize) as u32,
            rsrc_clump_size: IMAGE_BLOCK_SIZE,
            data_clump_size: IMAGE_BLOCK_SIZE,
            next_catalog_id: self.next_cnid,
            extents_file: extents_fork,
            catalog_file: catalog_fork,
            attributes_file: attributes_fork,
            ..Default::default()
        };
        let at = VOLUME_HEADER_OFFSET as usize;
        self.image[at..at + VolumeHeader::SIZE].copy_from_slice(&header.to_bytes().unwrap());
        self.image
    }
}

fn folder_record(id: u32) -> CatalogFolder {
    CatalogFolder {
        record_type: CatalogRecordType::Folder as i16,
        folder_id: id,
        ..Default::default()
    }
}

fn file_record(id: u32) -> CatalogFile {
    CatalogFile {
        record_type: CatalogRecordType::File as i16,
        file_id: id,
        ..Default::default()
    }
}

/// Embed `image` in a classic HFS wrapper, two 4 KiB allocation blocks
/// after an allocation area starting at sector 16.
pub(crate) fn wrap_in_hfs(image: &[u8]) -> Vec<u8> {
    let mut volume_name = [0u8; 28];
    volume_name[0] = 7;
    volume_name[1..8].copy_from_slice(b"Wrapper");
    let mdb = MasterDirectoryBlock {
        signature: VolumeSignature::Hfs as u16,
        alloc_block_size: 4096,
        alloc_block_start: 16,
        volume_name,
        embed_signature: VolumeSignature::HfsPlus as u16,
        embed_extent: HfsExtentDescriptor {
            start_block: 2,
            block_count: (image.len() / 4096) as u16,
        },
        ..Default::default()
    };

    let mut out = vec![0u8; 16 * 512 + 2 * 4096];
    let at = VOLUME_HEADER_OFFSET as usize;
    out[at..at + MasterDirectoryBlock::SIZE].copy_from_slice(&mdb.to_bytes().unwrap());
    out.extend_from_slice(image);
    out
}
