// SPDX-License-Identifier: MIT

//! Constants and closed enumerations from Apple's [TN1150 - HFS Plus Volume Format](https://developer.apple.com/library/archive/technotes/tn/tn1150.html),
//! adjusted to use Rust-friendly naming.
//!
//! Raw on-disk values are converted with `TryFrom`, so that a value outside
//! the documented set is reported instead of silently reinterpreted.

#![forbid(unsafe_code)]
#![deny(dead_code)]

use std::error::Error;
use std::fmt;

/// A raw on-disk value that does not name any known variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownValue {
    pub what: &'static str,
    pub value: i64,
}

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} {:#x}", self.what, self.value)
    }
}

impl Error for UnknownValue {}

/// Render a four character code (`OSType`) such as `hlnk`, replacing
/// unprintable bytes with `.`.
pub fn four_char_code(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// Offset of the volume header (and of the classic HFS master directory block)
/// from the start of the volume.
pub const VOLUME_HEADER_OFFSET: u64 = 1024;

/// Volume headers and master directory blocks are one 512-byte sector.
pub const VOLUME_HEADER_SIZE: usize = 512;

/// Volume signature.
///
/// Described in TN1150 [Volume Header](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#VolumeHeader)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum VolumeSignature {
    /// Classic HFS master directory block, possibly wrapping an HFS+ volume.
    Hfs = u16::from_be_bytes(*b"BD"),
    HfsPlus = u16::from_be_bytes(*b"H+"),
    /// Case-sensitive variant of HFS+.
    HfsX = u16::from_be_bytes(*b"HX"),
}

impl TryFrom<u16> for VolumeSignature {
    type Error = UnknownValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            v if v == Self::Hfs as u16 => Ok(Self::Hfs),
            v if v == Self::HfsPlus as u16 => Ok(Self::HfsPlus),
            v if v == Self::HfsX as u16 => Ok(Self::HfsX),
            _ => Err(UnknownValue {
                what: "volume signature",
                value: value as i64,
            }),
        }
    }
}

/// Catalog node IDs reserved for the volume's special files.
///
/// Described in TN1150 [Catalog File](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#CatalogFile)
pub mod cnid {
    pub const ROOT_PARENT: u32 = 1;
    pub const ROOT_FOLDER: u32 = 2;
    pub const EXTENTS_FILE: u32 = 3;
    pub const CATALOG_FILE: u32 = 4;
    pub const BAD_BLOCK_FILE: u32 = 5;
    pub const ALLOCATION_FILE: u32 = 6;
    pub const STARTUP_FILE: u32 = 7;
    pub const ATTRIBUTES_FILE: u32 = 8;
    pub const REPAIR_CATALOG_FILE: u32 = 14;
    pub const BOGUS_EXTENT_FILE: u32 = 15;
    pub const FIRST_USER_CATALOG_NODE: u32 = 16;

    /// Name of the special file holding the hot files B-tree, in the root folder.
    pub const HOT_FILES_NAME: &str = ".hotfiles.btree";
}

/// Volume attribute bits from the volume header `attributes` field.
pub mod volume_attributes {
    /// Volume is write-protected due to hardware setting (macOS only).
    pub const HARDWARE_LOCK: u32 = 1 << 7;
    /// The volume was correctly flushed before being unmounted.
    pub const UNMOUNTED: u32 = 1 << 8;
    /// The overflow file contains bad block records.
    pub const SPARED_BLOCKS: u32 = 1 << 9;
    pub const NO_CACHE_REQUIRED: u32 = 1 << 10;
    /// Set while mounted; a consistency check is needed if found set.
    pub const BOOT_VOLUME_INCONSISTENT: u32 = 1 << 11;
    pub const CATALOG_NODE_IDS_REUSED: u32 = 1 << 12;
    /// The journal is described by the `journal_info_block`.
    pub const JOURNALED: u32 = 1 << 13;
    pub const SOFTWARE_LOCK: u32 = 1 << 15;

    /// Names of the set bits, lowest first.
    pub fn names(attributes: u32) -> Vec<&'static str> {
        [
            (HARDWARE_LOCK, "hardware-lock"),
            (UNMOUNTED, "unmounted"),
            (SPARED_BLOCKS, "spared-blocks"),
            (NO_CACHE_REQUIRED, "no-cache-required"),
            (BOOT_VOLUME_INCONSISTENT, "inconsistent"),
            (CATALOG_NODE_IDS_REUSED, "cnids-reused"),
            (JOURNALED, "journaled"),
            (SOFTWARE_LOCK, "software-lock"),
        ]
        .into_iter()
        .filter(|(mask, _)| attributes & mask != 0)
        .map(|(_, name)| name)
        .collect()
    }
}

/// Type of a B-tree node.
///
/// Described in TN1150 [B-Trees](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#BTrees)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum NodeKind {
    Leaf = -1,
    Index = 0,
    Header = 1,
    Map = 2,
}

impl TryFrom<i8> for NodeKind {
    type Error = UnknownValue;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Leaf),
            0 => Ok(Self::Index),
            1 => Ok(Self::Header),
            2 => Ok(Self::Map),
            _ => Err(UnknownValue {
                what: "node kind",
                value: value as i64,
            }),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Leaf => "leaf",
            Self::Index => "index",
            Self::Header => "header",
            Self::Map => "map",
        })
    }
}

/// Size of the node descriptor at the start of every node.
pub const NODE_DESCRIPTOR_SIZE: usize = 14;
/// Size of the B-tree header record, record 0 of the header node.
pub const HEADER_RECORD_SIZE: usize = 106;
/// Size of the user data record, record 1 of the header node.
pub const USER_DATA_RECORD_SIZE: usize = 128;

/// Bits of the B-tree header `attributes` field.
///
/// Described in TN1150 [Header Record](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HeaderRecord)
pub mod btree_attributes {
    /// Not closed properly. Not used by HFS+.
    pub const BAD_CLOSE: u32 = 1;
    /// Key length fields are u16 rather than u8.
    pub const BIG_KEYS: u32 = 2;
    /// Index keys occupy their own key length, not `max_key_length`.
    pub const VARIABLE_INDEX_KEYS: u32 = 4;
}

/// Case sensitivity of catalog keys on HFSX volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyCompareType {
    /// Field is reserved on HFS+ volumes; treated as case folding.
    Unspecified = 0x00,
    CaseFolding = 0xCF,
    BinaryCompare = 0xBC,
}

impl TryFrom<u8> for KeyCompareType {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Unspecified),
            0xCF => Ok(Self::CaseFolding),
            0xBC => Ok(Self::BinaryCompare),
            _ => Err(UnknownValue {
                what: "key compare type",
                value: value as i64,
            }),
        }
    }
}

/// Type of a catalog leaf record, stored in its first two bytes.
///
/// Described by TN1150 in [Catalog File Data](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#CatalogFile)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum CatalogRecordType {
    Folder = 0x0001,
    File = 0x0002,
    FolderThread = 0x0003,
    FileThread = 0x0004,
}

impl TryFrom<i16> for CatalogRecordType {
    type Error = UnknownValue;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Folder),
            0x0002 => Ok(Self::File),
            0x0003 => Ok(Self::FolderThread),
            0x0004 => Ok(Self::FileThread),
            _ => Err(UnknownValue {
                what: "catalog record type",
                value: value as i64,
            }),
        }
    }
}

/// Fork addressed by an extents or hot files key.
///
/// Described by TN1150 in [Extents Overflow File Key](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#ExtentsOverflowFile)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ForkType {
    Data = 0x00,
    Resource = 0xFF,
}

impl TryFrom<u8> for ForkType {
    type Error = UnknownValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Data),
            0xFF => Ok(Self::Resource),
            _ => Err(UnknownValue {
                what: "fork type",
                value: value as i64,
            }),
        }
    }
}

impl fmt::Display for ForkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "data",
            Self::Resource => "resource",
        })
    }
}

/// Type tag of an attributes B-tree leaf record.
///
/// Described by TN1150 in [Attributes File Data](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#AttributesFile)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AttributeRecordType {
    InlineData = 0x10,
    ForkData = 0x20,
    Extents = 0x30,
}

impl TryFrom<u32> for AttributeRecordType {
    type Error = UnknownValue;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::InlineData),
            0x20 => Ok(Self::ForkData),
            0x30 => Ok(Self::Extents),
            _ => Err(UnknownValue {
                what: "attribute record type",
                value: value as i64,
            }),
        }
    }
}

/// Hot files B-tree constants, from the hot file clustering implementation
/// described in TN1150 [Hot Files](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HotFile).
pub mod hot_files {
    /// Magic number of the `HotFilesInfo` user data record.
    pub const MAGIC: u32 = 0xFF28_FF26;
    /// Temperature used in thread record keys, which map a file to its current temperature.
    pub const LOOKUP_TAG: u32 = 0xFFFF_FFFF;
}

/// `JournalInfoBlock.flags`.
///
/// Described in TN1150 [Journal Info Block](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#JournalInfoBlock)
pub mod journal_info_flags {
    /// The journal lives on this volume, at `offset`.
    pub const IN_FS: u32 = 0x0000_0001;
    /// The journal lives on another device, named by `device_signature`.
    pub const ON_OTHER_DEVICE: u32 = 0x0000_0002;
    /// The journal header is invalid and must be initialized.
    pub const NEED_INIT: u32 = 0x0000_0004;
}

/// Finder flags (`finderFlags` in `FileInfo` and `FolderInfo`).
///
/// Described by TN1150 in [Finder Info](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#FinderInfo)
pub mod finder_flags {
    pub const IS_ON_DESK: u16 = 0x0001;
    pub const COLOR: u16 = 0x000E;
    pub const IS_SHARED: u16 = 0x0040;
    pub const HAS_NO_INITS: u16 = 0x0080;
    pub const HAS_BEEN_INITED: u16 = 0x0100;
    pub const HAS_CUSTOM_ICON: u16 = 0x0400;
    pub const IS_STATIONERY: u16 = 0x0800;
    pub const NAME_LOCKED: u16 = 0x1000;
    pub const HAS_BUNDLE: u16 = 0x2000;
    pub const IS_INVISIBLE: u16 = 0x4000;
    pub const IS_ALIAS: u16 = 0x8000;
}

/// Catalog file record `flags`.
pub mod catalog_file_flags {
    pub const FILE_LOCKED: u16 = 0x0001;
    pub const THREAD_EXISTS: u16 = 0x0002;
    pub const HAS_ATTRIBUTES: u16 = 0x0004;
    pub const HAS_SECURITY: u16 = 0x0008;
    pub const HAS_FOLDER_COUNT: u16 = 0x0010;
    pub const HAS_LINK_CHAIN: u16 = 0x0020;
}

/// Well-known Finder type and creator codes that mark special files.
///
/// Described by TN1150 in [Hard Links](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HardLinks)
/// and [Symbolic Links](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#Symlinks).
pub mod type_codes {
    pub const HARD_LINK_TYPE: u32 = u32::from_be_bytes(*b"hlnk");
    pub const HARD_LINK_CREATOR: u32 = u32::from_be_bytes(*b"hfs+");
    pub const SYMBOLIC_LINK_TYPE: u32 = u32::from_be_bytes(*b"slnk");
    pub const SYMBOLIC_LINK_CREATOR: u32 = u32::from_be_bytes(*b"rhap");
    /// Directory hard links are stored as aliases with this type and creator.
    pub const FOLDER_ALIAS_TYPE: u32 = u32::from_be_bytes(*b"fdrp");
    pub const FOLDER_ALIAS_CREATOR: u32 = u32::from_be_bytes(*b"MACS");
}

/// BSD `st_mode` bits stored in `BSDInfo.fileMode`.
///
/// Described in TN1150 [HFS Plus Permissions](https://developer.apple.com/library/archive/technotes/tn/tn1150.html#HFSPlusPermissions)
pub mod file_mode {
    pub const TYPE_MASK: u16 = 0o17_0000;
    pub const NAMED_PIPE: u16 = 0o01_0000;
    pub const CHARACTER_SPECIAL: u16 = 0o02_0000;
    pub const DIRECTORY: u16 = 0o04_0000;
    pub const BLOCK_SPECIAL: u16 = 0o06_0000;
    pub const REGULAR: u16 = 0o10_0000;
    pub const SYMBOLIC_LINK: u16 = 0o12_0000;
    pub const SOCKET: u16 = 0o14_0000;
    pub const WHITEOUT: u16 = 0o16_0000;

    /// `ls -l` style type character for a file mode.
    pub fn type_char(mode: u16) -> char {
        match mode & TYPE_MASK {
            NAMED_PIPE => 'p',
            CHARACTER_SPECIAL => 'c',
            DIRECTORY => 'd',
            BLOCK_SPECIAL => 'b',
            SYMBOLIC_LINK => 'l',
            SOCKET => 's',
            WHITEOUT => 'w',
            _ => '-',
        }
    }
}

/// Seconds between the HFS epoch (1904-01-01) and the Unix epoch.
pub const HFS_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Convert an HFS+ date (seconds since 1904-01-01 GMT) into Unix time.
/// A zero date means "never" and maps to `None`.
pub fn hfs_to_unix_time(date: u32) -> Option<i64> {
    (date != 0).then(|| date as i64 - HFS_EPOCH_OFFSET)
}
