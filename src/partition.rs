//! Partition map sniffing: just enough of APM, GPT and MBR to find the
//! HFS+ payload on a whole-disk image.

use std::fmt;

use deku::prelude::*;
use hfs_types_rs::{VOLUME_HEADER_OFFSET, VolumeSignature};
use tracing::debug;

use crate::error;
use crate::volume::{Volume, VolumeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScheme {
    Apm,
    Gpt,
    Mbr,
}

impl fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitionScheme::Apm => "Apple Partition Map",
            PartitionScheme::Gpt => "GUID Partition Table",
            PartitionScheme::Mbr => "Master Boot Record",
        })
    }
}

/// One partition, located relative to the start of the disk volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub scheme: PartitionScheme,
    pub index: usize,
    pub offset: u64,
    pub length: u64,
    pub name: String,
    pub type_name: String,
    hfs: bool,
}

impl PartitionEntry {
    /// Whether the partition type says it holds HFS+ (or HFSX).
    pub fn is_hfs(&self) -> bool {
        self.hfs
    }
}

const DDR_SIGNATURE: u16 = u16::from_be_bytes(*b"ER");
const APM_ENTRY_SIGNATURE: u16 = u16::from_be_bytes(*b"PM");
const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const MBR_PROTECTIVE: u8 = 0xEE;
const MBR_HFS: u8 = 0xAF;

/// `48465300-0000-11AA-AA11-00306543ECAC`, in on-disk (mixed-endian) order.
const GPT_HFS_PLUS: [u8; 16] = [
    0x00, 0x53, 0x46, 0x48, 0x00, 0x00, 0xAA, 0x11, 0xAA, 0x11, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC,
];

/// Upper bound on partition entries considered, to survive garbage counts.
const MAX_ENTRIES: u32 = 1024;

/// Driver Descriptor Record, block 0 of an APM disk.
#[derive(Debug, DekuRead)]
#[deku(endian = "big")]
struct DriverDescriptor {
    signature: u16,
    block_size: u16,
    block_count: u32,
}

/// Apple Partition Map entry, one per map block starting at block 1.
#[derive(Debug, DekuRead)]
#[deku(endian = "big")]
struct ApmEntry {
    signature: u16,
    reserved: u16,
    map_entries: u32,
    start_block: u32,
    block_count: u32,
    name: [u8; 32],
    type_name: [u8; 32],
}

#[derive(Debug, DekuRead)]
#[deku(endian = "little")]
struct GptHeader {
    signature: [u8; 8],
    revision: u32,
    header_size: u32,
    header_crc: u32,
    reserved: u32,
    current_lba: u64,
    backup_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    disk_guid: [u8; 16],
    entries_lba: u64,
    entry_count: u32,
    entry_size: u32,
    entries_crc: u32,
}

#[derive(Debug, DekuRead)]
#[deku(endian = "little")]
struct GptEntry {
    type_guid: [u8; 16],
    unique_guid: [u8; 16],
    first_lba: u64,
    last_lba: u64,
    attributes: u64,
    name: [u16; 36],
}

#[derive(Debug, DekuRead)]
#[deku(endian = "little")]
struct MbrEntry {
    status: u8,
    chs_first: [u8; 3],
    partition_type: u8,
    chs_last: [u8; 3],
    lba_start: u32,
    sector_count: u32,
}

/// Identify the partition map on `volume`, if any.
pub fn detect(volume: &Volume) -> error::Result<Option<(PartitionScheme, Vec<PartitionEntry>)>> {
    if let Some(entries) = read_gpt(volume)? {
        return Ok(Some((PartitionScheme::Gpt, entries)));
    }
    if let Some(entries) = read_apm(volume)? {
        return Ok(Some((PartitionScheme::Apm, entries)));
    }
    if let Some(entries) = read_mbr(volume)? {
        return Ok(Some((PartitionScheme::Mbr, entries)));
    }
    Ok(None)
}

/// Attach one child volume per partition. Returns the number attached.
pub fn load_partitions(volume: &mut Volume) -> error::Result<usize> {
    let Some((scheme, entries)) = detect(volume)? else {
        return Ok(0);
    };
    debug!(%scheme, count = entries.len(), "found partition map");

    let count = entries.len();
    for entry in entries {
        let child = volume.sub_volume(
            entry.offset,
            entry.length,
            VolumeKind::Partition {
                scheme: entry.scheme,
                index: entry.index,
                name: entry.name,
                type_name: entry.type_name,
            },
        );
        volume.add_child(child);
    }
    Ok(count)
}

/// The volume holding the HFS+ filesystem: the first partition whose
/// header area carries an HFS, HFS+ or HFSX signature, or `volume` itself
/// when it has no partitions.
pub fn find_hfs(volume: &Volume) -> error::Result<Option<&Volume>> {
    for child in volume.children() {
        if has_hfs_signature(child)? {
            debug!(offset = child.offset(), kind = ?child.kind(), "selected HFS partition");
            return Ok(Some(child));
        }
    }
    if volume.children().is_empty() && has_hfs_signature(volume)? {
        return Ok(Some(volume));
    }
    Ok(None)
}

fn has_hfs_signature(volume: &Volume) -> error::Result<bool> {
    let Some(raw) = read_block(volume, VOLUME_HEADER_OFFSET, 2)? else {
        return Ok(false);
    };
    Ok(VolumeSignature::try_from(u16::from_be_bytes([raw[0], raw[1]])).is_ok())
}

fn read_block(volume: &Volume, offset: u64, len: usize) -> error::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; len];
    let got = volume.read(&mut buf, offset)?;
    Ok((got == len).then_some(buf))
}

fn read_apm(volume: &Volume) -> error::Result<Option<Vec<PartitionEntry>>> {
    let Some(block) = read_block(volume, 0, 512)? else {
        return Ok(None);
    };
    let (_rest, ddr) = DriverDescriptor::from_bytes((&block, 0))?;
    if ddr.signature != DDR_SIGNATURE {
        return Ok(None);
    }
    let block_size = match ddr.block_size {
        0 => 512u64,
        size => size as u64,
    };

    let mut entries = Vec::new();
    let mut map_entries = 1u32;
    let mut index = 1u32;
    while index <= map_entries.min(MAX_ENTRIES) {
        let Some(block) = read_block(volume, index as u64 * block_size, 512)? else {
            break;
        };
        let (_rest, entry) = ApmEntry::from_bytes((&block, 0))?;
        if entry.signature != APM_ENTRY_SIGNATURE {
            break;
        }
        map_entries = entry.map_entries;

        let type_name = c_string(&entry.type_name);
        entries.push(PartitionEntry {
            scheme: PartitionScheme::Apm,
            index: index as usize,
            offset: entry.start_block as u64 * block_size,
            length: entry.block_count as u64 * block_size,
            name: c_string(&entry.name),
            hfs: type_name == "Apple_HFS" || type_name == "Apple_HFSX",
            type_name,
        });
        index += 1;
    }

    Ok((!entries.is_empty()).then_some(entries))
}

fn read_gpt(volume: &Volume) -> error::Result<Option<Vec<PartitionEntry>>> {
    let sector = volume.sector_size() as u64;
    let Some(block) = read_block(volume, sector, 92)? else {
        return Ok(None);
    };
    let (_rest, header) = GptHeader::from_bytes((&block, 0))?;
    if header.signature != GPT_SIGNATURE || header.entry_size < 128 {
        return Ok(None);
    }

    let Some(table) = header.entries_lba.checked_mul(sector) else {
        debug!(lba = header.entries_lba, "GPT entry array lies beyond any disk");
        return Ok(None);
    };

    let mut entries = Vec::new();
    for i in 0..header.entry_count.min(MAX_ENTRIES) {
        let Some(offset) = table.checked_add(i as u64 * header.entry_size as u64) else {
            break;
        };
        let Some(raw) = read_block(volume, offset, 128)? else {
            break;
        };
        let (_rest, entry) = GptEntry::from_bytes((&raw, 0))?;
        if entry.type_guid == [0u8; 16] {
            continue;
        }
        let Some((start, length)) = gpt_extent(&entry, sector, volume.length()) else {
            debug!(
                index = i + 1,
                first = entry.first_lba,
                last = entry.last_lba,
                "skipping GPT entry outside the disk"
            );
            continue;
        };

        let units: Vec<u16> = entry.name.iter().copied().take_while(|&c| c != 0).collect();
        entries.push(PartitionEntry {
            scheme: PartitionScheme::Gpt,
            index: i as usize + 1,
            offset: start,
            length,
            name: String::from_utf16_lossy(&units),
            type_name: format_guid(&entry.type_guid),
            hfs: entry.type_guid == GPT_HFS_PLUS,
        });
    }

    Ok(Some(entries))
}

/// Byte offset and length of a GPT entry, or `None` when its LBAs are
/// inverted, overflow, or run past the end of a bounded volume.
fn gpt_extent(entry: &GptEntry, sector: u64, volume_len: Option<u64>) -> Option<(u64, u64)> {
    let sectors = entry
        .last_lba
        .checked_sub(entry.first_lba)?
        .checked_add(1)?;
    let start = entry.first_lba.checked_mul(sector)?;
    let length = sectors.checked_mul(sector)?;
    let end = start.checked_add(length)?;
    match volume_len {
        Some(len) if end > len => None,
        _ => Some((start, length)),
    }
}

fn read_mbr(volume: &Volume) -> error::Result<Option<Vec<PartitionEntry>>> {
    let Some(block) = read_block(volume, 0, 512)? else {
        return Ok(None);
    };
    if block[510..512] != MBR_SIGNATURE {
        return Ok(None);
    }

    let sector = volume.sector_size() as u64;
    let mut entries = Vec::new();
    for i in 0..4 {
        let start = 446 + i * 16;
        let (_rest, entry) = MbrEntry::from_bytes((&block[start..start + 16], 0))?;
        if entry.partition_type == 0 || entry.sector_count == 0 {
            continue;
        }
        if entry.partition_type == MBR_PROTECTIVE {
            // GPT would have been found first; a lone protective entry is not a map.
            return Ok(None);
        }
        entries.push(PartitionEntry {
            scheme: PartitionScheme::Mbr,
            index: i + 1,
            offset: entry.lba_start as u64 * sector,
            length: entry.sector_count as u64 * sector,
            name: String::new(),
            type_name: format!("{:#04x}", entry.partition_type),
            hfs: entry.partition_type == MBR_HFS,
        });
    }

    Ok((!entries.is_empty()).then_some(entries))
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Render a GPT GUID from its mixed-endian on-disk form.
fn format_guid(g: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        g[3], g[2], g[1], g[0], g[5], g[4], g[7], g[6], g[8], g[9], g[10], g[11], g[12], g[13],
        g[14], g[15]
    )
}
