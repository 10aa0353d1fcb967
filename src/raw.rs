//! Fixed-layout on-disk structures, decoded with deku. Field names follow
//! [TN1150](https://developer.apple.com/library/archive/technotes/tn/tn1150.html),
//! adjusted to Rust naming. Everything is big-endian.
//!
//! Variable-length structures (keys, thread records, inline attribute data)
//! are parsed by hand in [`crate::trees`].

use deku::ctx::Endian;
use deku::prelude::*;
use hfs_types_rs::{
    KeyCompareType, NodeKind, UnknownValue, btree_attributes, finder_flags, four_char_code,
};

/// Seconds since Jan 1, 1904 GMT. Defined in TN1150 > HFS Plus Dates.
pub type Date = u32;

/// Catalog Node ID. Defined in TN1150 > Catalog File.
pub type CatalogNodeId = u32;

/// Four character code, such as a Finder type or creator.
pub type OsType = u32;

/// Defined as `struct HFSPlusExtentDescriptor` in TN1150 > Fork Data Structure.
/// Unused descriptors are zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtentDescriptor {
    pub start_block: u32,
    pub block_count: u32,
}

/// A fork's inline extents, or one extents overflow record.
pub type ExtentRecord = [ExtentDescriptor; 8];

/// Defined as `struct HFSPlusForkData` in TN1150 > Fork Data Structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ForkData {
    pub logical_size: u64,
    pub clump_size: u32,
    pub total_blocks: u32,
    pub extents: ExtentRecord,
}

impl ForkData {
    pub const SIZE: usize = 80;

    /// Inline descriptors in use, up to the first empty one.
    pub fn used_extents(&self) -> impl Iterator<Item = &ExtentDescriptor> {
        self.extents.iter().take_while(|e| e.block_count != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.logical_size == 0 && self.total_blocks == 0
    }
}

/// Defined as `struct HFSPlusVolumeHeader` in TN1150 > Volume Header.
/// Stored 1024 bytes from the start of the volume.
#[derive(Debug, Clone, Default, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct VolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub last_mounted_version: u32,
    pub journal_info_block: u32,

    pub create_date: Date,
    pub modify_date: Date,
    pub backup_date: Date,
    pub checked_date: Date,

    pub file_count: u32,
    pub folder_count: u32,

    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,

    pub next_allocation: u32,
    pub rsrc_clump_size: u32,
    pub data_clump_size: u32,
    pub next_catalog_id: CatalogNodeId,

    pub write_count: u32,
    pub encodings_bitmap: u64,

    pub finder_info: [u32; 8],

    pub allocation_file: ForkData,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
    pub attributes_file: ForkData,
    pub startup_file: ForkData,
}

impl VolumeHeader {
    pub const SIZE: usize = 512;

    pub fn last_mounted_by(&self) -> String {
        four_char_code(self.last_mounted_version)
    }
}

/// Extent descriptor of classic HFS, with 16-bit fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct HfsExtentDescriptor {
    pub start_block: u16,
    pub block_count: u16,
}

/// Classic HFS Master Directory Block, read to detect an embedded HFS+
/// volume. Defined as `struct HFSMasterDirectoryBlock` in Inside Macintosh:
/// Files, and summarized in TN1150 > HFS Wrapper.
#[derive(Debug, Clone, Default, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct MasterDirectoryBlock {
    pub signature: u16,
    pub create_date: Date,
    pub modify_date: Date,
    pub attributes: u16,
    pub root_file_count: u16,
    pub bitmap_start: u16,
    pub alloc_ptr: u16,
    pub alloc_block_count: u16,
    pub alloc_block_size: u32,
    pub clump_size: u32,
    /// First allocation block, in 512-byte sectors.
    pub alloc_block_start: u16,
    pub next_catalog_id: u32,
    pub free_blocks: u16,
    /// Pascal string, MacRoman.
    pub volume_name: [u8; 28],
    pub backup_date: Date,
    pub sequence_number: u16,
    pub write_count: u32,
    pub extents_clump_size: u32,
    pub catalog_clump_size: u32,
    pub root_dir_count: u16,
    pub file_count: u32,
    pub dir_count: u32,
    pub finder_info: [u32; 8],
    pub embed_signature: u16,
    pub embed_extent: HfsExtentDescriptor,
    pub extents_file_size: u32,
    pub extents_file_extents: [HfsExtentDescriptor; 3],
    pub catalog_file_size: u32,
    pub catalog_file_extents: [HfsExtentDescriptor; 3],
}

impl MasterDirectoryBlock {
    pub const SIZE: usize = 162;

    /// Volume name, with non-ASCII bytes replaced.
    pub fn name(&self) -> String {
        let len = (self.volume_name[0] as usize).min(27);
        self.volume_name[1..=len]
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
            .collect()
    }

    /// Byte offset and length of the embedded HFS+ volume.
    pub fn embedded_volume(&self) -> (u64, u64) {
        let block_size = self.alloc_block_size as u64;
        let offset = self.alloc_block_start as u64 * 512
            + self.embed_extent.start_block as u64 * block_size;
        let length = self.embed_extent.block_count as u64 * block_size;
        (offset, length)
    }
}

/// Defined as `struct BTNodeDescriptor` in TN1150 > Node Structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct NodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: i8,
    pub height: u8,
    pub num_records: u16,
    pub reserved: u16,
}

impl NodeDescriptor {
    pub const SIZE: usize = hfs_types_rs::NODE_DESCRIPTOR_SIZE;

    pub fn kind(&self) -> Result<NodeKind, UnknownValue> {
        NodeKind::try_from(self.kind)
    }
}

/// Defined as `struct BTHeaderRec` in TN1150 > Header Record.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct BTreeHeaderRecord {
    pub tree_depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
    pub reserved_1: u16,
    pub clump_size: u32,
    pub btree_type: u8,
    pub key_compare_type: u8,
    pub attributes: u32,
    pub reserved_3: [u32; 16],
}

impl BTreeHeaderRecord {
    pub const SIZE: usize = hfs_types_rs::HEADER_RECORD_SIZE;

    pub fn key_compare(&self) -> Result<KeyCompareType, UnknownValue> {
        KeyCompareType::try_from(self.key_compare_type)
    }

    pub fn big_keys(&self) -> bool {
        self.attributes & btree_attributes::BIG_KEYS != 0
    }

    pub fn variable_index_keys(&self) -> bool {
        self.attributes & btree_attributes::VARIABLE_INDEX_KEYS != 0
    }
}

/// Defined as `struct HFSPlusBSDInfo` in TN1150 > HFS Plus Permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct BsdInfo {
    pub owner_id: u32,
    pub group_id: u32,
    pub admin_flags: u8,
    pub owner_flags: u8,
    pub file_mode: u16,
    /// Inode number, link count or raw device, depending on the file.
    pub special: u32,
}

/// Defined in TN1150 > Finder Info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct Point {
    pub v: i16,
    pub h: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

/// Finder presentation info for files.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct FileInfo {
    pub file_type: OsType,
    pub file_creator: OsType,
    pub finder_flags: u16,
    pub location: Point,
    pub reserved: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtendedFileInfo {
    pub reserved_1: [i16; 4],
    pub extended_finder_flags: u16,
    pub reserved_2: i16,
    pub put_away_folder_id: i32,
}

/// Finder presentation info for folders.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct FolderInfo {
    pub window_bounds: Rect,
    pub finder_flags: u16,
    pub location: Point,
    pub reserved: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct ExtendedFolderInfo {
    pub scroll_position: Point,
    pub reserved_1: i32,
    pub extended_finder_flags: u16,
    pub reserved_2: i16,
    pub put_away_folder_id: i32,
}

/// Defined as `struct HFSPlusCatalogFolder` in TN1150 > Catalog Folder Records.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct CatalogFolder {
    pub record_type: i16,
    pub flags: u16,
    pub valence: u32,
    pub folder_id: CatalogNodeId,
    pub create_date: Date,
    pub content_mod_date: Date,
    pub attribute_mod_date: Date,
    pub access_date: Date,
    pub backup_date: Date,
    pub permissions: BsdInfo,
    pub user_info: FolderInfo,
    pub finder_info: ExtendedFolderInfo,
    pub text_encoding: u32,
    /// Reserved in TN1150; newer systems keep a subfolder count here.
    pub folder_count: u32,
}

impl CatalogFolder {
    pub const SIZE: usize = 88;

    pub fn is_invisible(&self) -> bool {
        self.user_info.finder_flags & finder_flags::IS_INVISIBLE != 0
    }
}

/// Defined as `struct HFSPlusCatalogFile` in TN1150 > Catalog File Records.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: Endian", ctx_default = "Endian::Big")]
pub struct CatalogFile {
    pub record_type: i16,
    pub flags: u16,
    pub reserved_1: u32,
    pub file_id: CatalogNodeId,
    pub create_date: Date,
    pub content_mod_date: Date,
    pub attribute_mod_date: Date,
    pub access_date: Date,
    pub backup_date: Date,
    pub permissions: BsdInfo,
    pub user_info: FileInfo,
    pub finder_info: ExtendedFileInfo,
    pub text_encoding: u32,
    pub reserved_2: u32,

    pub data_fork: ForkData,
    pub resource_fork: ForkData,
}

impl CatalogFile {
    pub const SIZE: usize = 248;

    pub fn is_invisible(&self) -> bool {
        self.user_info.finder_flags & finder_flags::IS_INVISIBLE != 0
    }

    pub fn is_alias(&self) -> bool {
        self.user_info.finder_flags & finder_flags::IS_ALIAS != 0
    }

    pub fn has_type(&self, file_type: OsType, creator: OsType) -> bool {
        self.user_info.file_type == file_type && self.user_info.file_creator == creator
    }
}

/// Defined as `struct JournalInfoBlock` in TN1150 > Journal Info Block.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct JournalInfoBlock {
    pub flags: u32,
    pub device_signature: [u32; 8],
    /// Byte offset of the journal header from the start of the volume.
    pub offset: u64,
    pub size: u64,
    pub reserved: [u32; 32],
}

impl JournalInfoBlock {
    pub const SIZE: usize = 180;
}

/// Hot file clustering state, the user data record of the hot files B-tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct HotFilesInfo {
    pub magic: u32,
    pub version: u32,
    /// Duration of a recording period, in seconds.
    pub duration: u32,
    pub timebase: u32,
    pub timeleft: u32,
    pub threshold: u32,
    pub max_file_blocks: u32,
    pub max_file_count: u32,
    pub tag: [u8; 32],
}

impl HotFilesInfo {
    pub const SIZE: usize = 64;

    pub fn tag(&self) -> String {
        let end = self.tag.iter().position(|&b| b == 0).unwrap_or(self.tag.len());
        String::from_utf8_lossy(&self.tag[..end]).into_owned()
    }
}

/// Defined as `struct HFSPlusAttrForkData` in TN1150 > Fork Data Attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct AttributeForkData {
    pub record_type: u32,
    pub reserved: u32,
    pub fork: ForkData,
}

/// Defined as `struct HFSPlusAttrExtents` in TN1150 > Extension Attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct AttributeExtents {
    pub record_type: u32,
    pub reserved: u32,
    pub extents: ExtentRecord,
}
