//! Text rendering of the structures returned by the library.

use std::io::{self, Write};

use hfsinspect::btree::{BTree, Node, TreeKind};
use hfsinspect::raw::{
    BTreeHeaderRecord, BsdInfo, CatalogFile, CatalogFolder, ForkData, HotFilesInfo,
    JournalInfoBlock,
};
use hfsinspect::trees::{AttributeKey, AttributeValue, CatalogRecord};
use hfsinspect::types::{
    NodeKind, catalog_file_flags, file_mode, four_char_code, hfs_to_unix_time, journal_info_flags,
    volume_attributes,
};
use hfsinspect::{CatalogEntry, ForkSummary, Hfs, Volume, VolumeKind, VolumeSummary};

const BOLD_BLUE: &str = "1;34";
const BOLD_CYAN: &str = "1;36";
const BOLD_YELLOW: &str = "1;33";

/// ANSI styling, switched off by `NOCOLOR` or a non-terminal stdout.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    pub color: bool,
}

impl Style {
    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, out: &mut dyn Write, text: &str) -> io::Result<()> {
        writeln!(out, "{}", self.paint(BOLD_BLUE, text))
    }

    fn field(&self, out: &mut dyn Write, label: &str, value: impl std::fmt::Display) -> io::Result<()> {
        writeln!(out, "  {} {value}", self.paint(BOLD_CYAN, &format!("{label:<24}")))
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

fn date(value: u32) -> String {
    match hfs_to_unix_time(value) {
        Some(unix) => format!("{value} (unix {unix})"),
        None => "never".to_string(),
    }
}

/// `value` in hex, followed by the names of its known set bits.
fn flag_names(value: u32, names: &[(u32, &str)]) -> String {
    let set: Vec<&str> = names
        .iter()
        .filter(|(bit, _)| value & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if set.is_empty() {
        format!("{value:#x}")
    } else {
        format!("{value:#x} ({})", set.join(", "))
    }
}

fn mode_string(mode: u16) -> String {
    let mut s = String::with_capacity(10);
    s.push(file_mode::type_char(mode));
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 4 != 0 { 'r' } else { '-' });
        s.push(if bits & 2 != 0 { 'w' } else { '-' });
        s.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    s
}

fn fork(style: &Style, out: &mut dyn Write, label: &str, data: &ForkData) -> io::Result<()> {
    style.field(
        out,
        label,
        format!(
            "{} ({} blocks, clump {})",
            format_bytes(data.logical_size),
            data.total_blocks,
            data.clump_size
        ),
    )?;
    for (i, extent) in data.used_extents().enumerate() {
        writeln!(
            out,
            "    extent {i}: start {} count {}",
            extent.start_block, extent.block_count
        )?;
    }
    Ok(())
}

pub fn volume_header(style: &Style, out: &mut dyn Write, hfs: &Hfs) -> io::Result<()> {
    let header = hfs.header();
    style.heading(out, "Volume header")?;
    if let Some(wrapper) = hfs.wrapper() {
        style.field(
            out,
            "HFS wrapper",
            format!("{:?} at {:#x}, {}", wrapper.name, wrapper.offset, format_bytes(wrapper.length)),
        )?;
    }
    style.field(out, "signature", format!("{:?}", hfs.signature()))?;
    style.field(out, "version", header.version)?;
    style.field(
        out,
        "attributes",
        flag_names(
            header.attributes,
            &[
                (volume_attributes::HARDWARE_LOCK, "hardware lock"),
                (volume_attributes::UNMOUNTED, "unmounted"),
                (volume_attributes::SPARED_BLOCKS, "spared blocks"),
                (volume_attributes::NO_CACHE_REQUIRED, "no cache required"),
                (volume_attributes::BOOT_VOLUME_INCONSISTENT, "inconsistent"),
                (volume_attributes::CATALOG_NODE_IDS_REUSED, "CNIDs reused"),
                (volume_attributes::JOURNALED, "journaled"),
                (volume_attributes::SOFTWARE_LOCK, "software lock"),
            ],
        ),
    )?;
    style.field(out, "last mounted by", header.last_mounted_by())?;
    style.field(out, "journal info block", header.journal_info_block)?;
    style.field(out, "created", date(header.create_date))?;
    style.field(out, "modified", date(header.modify_date))?;
    style.field(out, "backed up", date(header.backup_date))?;
    style.field(out, "checked", date(header.checked_date))?;
    style.field(out, "files", header.file_count)?;
    style.field(out, "folders", header.folder_count)?;
    style.field(out, "block size", header.block_size)?;
    style.field(out, "total blocks", header.total_blocks)?;
    style.field(out, "free blocks", header.free_blocks)?;
    style.field(
        out,
        "capacity",
        format_bytes(header.total_blocks as u64 * header.block_size as u64),
    )?;
    style.field(out, "next allocation", header.next_allocation)?;
    style.field(out, "next CNID", header.next_catalog_id)?;
    style.field(out, "write count", header.write_count)?;
    style.field(out, "encodings", format!("{:#018x}", header.encodings_bitmap))?;
    fork(style, out, "allocation file", &header.allocation_file)?;
    fork(style, out, "extents file", &header.extents_file)?;
    fork(style, out, "catalog file", &header.catalog_file)?;
    fork(style, out, "attributes file", &header.attributes_file)?;
    fork(style, out, "startup file", &header.startup_file)
}

pub fn partitions(style: &Style, out: &mut dyn Write, disk: &Volume) -> io::Result<()> {
    style.heading(out, "Partitions")?;
    if disk.children().is_empty() {
        return writeln!(out, "  no partition map");
    }
    for (i, child) in disk.children().iter().enumerate() {
        let VolumeKind::Partition {
            scheme,
            name,
            type_name,
            ..
        } = child.kind()
        else {
            continue;
        };
        writeln!(
            out,
            "  {:>2}  {:<20} {:<24} {:<38} offset {:#x} {}",
            i,
            scheme.to_string(),
            name,
            type_name,
            child.offset(),
            child
                .length()
                .map_or_else(|| "unbounded".to_string(), format_bytes)
        )?;
    }
    Ok(())
}

pub fn tree_header(
    style: &Style,
    out: &mut dyn Write,
    name: &str,
    header: &BTreeHeaderRecord,
) -> io::Result<()> {
    style.heading(out, &format!("{name} B-tree header"))?;
    style.field(out, "depth", header.tree_depth)?;
    style.field(out, "root node", header.root_node)?;
    style.field(out, "leaf records", header.leaf_records)?;
    style.field(out, "first leaf", header.first_leaf_node)?;
    style.field(out, "last leaf", header.last_leaf_node)?;
    style.field(out, "node size", header.node_size)?;
    style.field(out, "max key length", header.max_key_length)?;
    style.field(out, "total nodes", header.total_nodes)?;
    style.field(out, "free nodes", header.free_nodes)?;
    style.field(out, "clump size", header.clump_size)?;
    style.field(out, "btree type", header.btree_type)?;
    style.field(
        out,
        "key compare",
        match header.key_compare() {
            Ok(kind) => format!("{kind:?}"),
            Err(err) => err.to_string(),
        },
    )?;
    style.field(
        out,
        "attributes",
        flag_names(
            header.attributes,
            &[(1, "bad close"), (2, "big keys"), (4, "variable index keys")],
        ),
    )
}

pub fn hot_files_info(style: &Style, out: &mut dyn Write, info: &HotFilesInfo) -> io::Result<()> {
    style.heading(out, "Hot files")?;
    style.field(out, "magic", format!("{:#010x}", info.magic))?;
    style.field(out, "version", info.version)?;
    style.field(out, "duration", info.duration)?;
    style.field(out, "timebase", info.timebase)?;
    style.field(out, "time left", info.timeleft)?;
    style.field(out, "threshold", info.threshold)?;
    style.field(out, "max file blocks", info.max_file_blocks)?;
    style.field(out, "max file count", info.max_file_count)?;
    style.field(out, "tag", info.tag())
}

pub fn node<K: TreeKind>(
    style: &Style,
    out: &mut dyn Write,
    tree: &BTree<K>,
    node: &Node,
) -> io::Result<()> {
    style.heading(
        out,
        &format!("{} node {} ({})", tree.name(), node.number(), node.kind()),
    )?;
    style.field(out, "forward link", node.forward_link())?;
    style.field(out, "backward link", node.backward_link())?;
    style.field(out, "height", node.height())?;
    style.field(out, "records", node.num_records())?;
    style.field(out, "free space", node.free_space())?;
    style.field(out, "offsets", format!("{:?}", node.offsets()))?;

    for index in 0..node.num_records() {
        let label = style.paint(BOLD_YELLOW, &format!("record {index}"));
        match node.kind() {
            NodeKind::Header => {
                let size = node.record_bytes(index).map(<[u8]>::len).unwrap_or(0);
                writeln!(out, "  {label}: {size} bytes")?;
            }
            NodeKind::Map => {
                let used = node
                    .record_bytes(index)
                    .map(|bytes| bytes.iter().map(|b| b.count_ones()).sum::<u32>())
                    .unwrap_or(0);
                writeln!(out, "  {label}: {used} nodes marked in use")?;
            }
            NodeKind::Index => match tree.index_record(node, index) {
                Ok((key, child)) => writeln!(out, "  {label}: {key:?} -> node {child}")?,
                Err(err) => writeln!(out, "  {label}: {err}")?,
            },
            NodeKind::Leaf => match tree.leaf_record(node, index) {
                Ok((key, value)) => writeln!(out, "  {label}: {key:?}\n    {value:?}")?,
                Err(err) => writeln!(out, "  {label}: {err}")?,
            },
        }
    }
    if node.kind() == NodeKind::Header {
        tree_header(style, out, tree.name(), tree.header())?;
    }
    Ok(())
}

fn permissions(style: &Style, out: &mut dyn Write, bsd: &BsdInfo) -> io::Result<()> {
    style.field(out, "owner", format!("{}:{}", bsd.owner_id, bsd.group_id))?;
    style.field(out, "mode", format!("{} ({:o})", mode_string(bsd.file_mode), bsd.file_mode))?;
    style.field(out, "flags", format!("admin {:#04x} owner {:#04x}", bsd.admin_flags, bsd.owner_flags))
}

fn folder(style: &Style, out: &mut dyn Write, folder: &CatalogFolder) -> io::Result<()> {
    style.field(out, "kind", "folder")?;
    style.field(out, "CNID", folder.folder_id)?;
    style.field(out, "valence", folder.valence)?;
    style.field(out, "subfolders", folder.folder_count)?;
    style.field(out, "created", date(folder.create_date))?;
    style.field(out, "content modified", date(folder.content_mod_date))?;
    style.field(out, "accessed", date(folder.access_date))?;
    permissions(style, out, &folder.permissions)?;
    style.field(out, "finder flags", format!("{:#06x}", folder.user_info.finder_flags))?;
    style.field(out, "text encoding", folder.text_encoding)
}

fn file(style: &Style, out: &mut dyn Write, file: &CatalogFile) -> io::Result<()> {
    style.field(out, "kind", "file")?;
    style.field(out, "CNID", file.file_id)?;
    style.field(
        out,
        "record flags",
        flag_names(
            file.flags as u32,
            &[
                (catalog_file_flags::FILE_LOCKED as u32, "locked"),
                (catalog_file_flags::THREAD_EXISTS as u32, "thread"),
                (catalog_file_flags::HAS_ATTRIBUTES as u32, "attributes"),
                (catalog_file_flags::HAS_SECURITY as u32, "security"),
                (catalog_file_flags::HAS_LINK_CHAIN as u32, "link chain"),
            ],
        ),
    )?;
    style.field(out, "created", date(file.create_date))?;
    style.field(out, "content modified", date(file.content_mod_date))?;
    style.field(out, "accessed", date(file.access_date))?;
    permissions(style, out, &file.permissions)?;
    style.field(
        out,
        "type/creator",
        format!(
            "{}/{}",
            four_char_code(file.user_info.file_type),
            four_char_code(file.user_info.file_creator)
        ),
    )?;
    style.field(out, "finder flags", format!("{:#06x}", file.user_info.finder_flags))?;
    style.field(out, "text encoding", file.text_encoding)?;
    fork(style, out, "data fork", &file.data_fork)?;
    fork(style, out, "resource fork", &file.resource_fork)
}

pub fn entry(
    style: &Style,
    out: &mut dyn Write,
    entry: &CatalogEntry,
    path: Option<&str>,
) -> io::Result<()> {
    style.heading(out, &format!("{}", entry.name()))?;
    if let Some(path) = path {
        style.field(out, "path", path)?;
    }
    style.field(out, "parent", entry.parent_id())?;
    match &entry.record {
        CatalogRecord::Folder(record) => folder(style, out, record),
        CatalogRecord::File(record) => file(style, out, record),
        CatalogRecord::FolderThread(thread) | CatalogRecord::FileThread(thread) => {
            style.field(out, "kind", "thread")?;
            style.field(out, "target", format!("{} in {}", thread.name, thread.parent_id))
        }
    }
}

/// One line per child: type, CNID, size and name.
pub fn listing(style: &Style, out: &mut dyn Write, entries: &[CatalogEntry]) -> io::Result<()> {
    for child in entries {
        match &child.record {
            CatalogRecord::Folder(record) => writeln!(
                out,
                "{} {:>10} {:>12} {}/",
                mode_string(record.permissions.file_mode | file_mode::DIRECTORY),
                record.folder_id,
                record.valence,
                style.paint(BOLD_BLUE, &child.name().to_posix()),
            )?,
            CatalogRecord::File(record) => writeln!(
                out,
                "{} {:>10} {:>12} {}",
                mode_string(record.permissions.file_mode),
                record.file_id,
                record.data_fork.logical_size,
                child.name().to_posix(),
            )?,
            CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => {}
        }
    }
    Ok(())
}

pub fn attributes(
    style: &Style,
    out: &mut dyn Write,
    attrs: &[(AttributeKey, AttributeValue)],
) -> io::Result<()> {
    if attrs.is_empty() {
        return writeln!(out, "no extended attributes");
    }
    for (key, value) in attrs {
        let name = style.paint(BOLD_CYAN, &key.name.to_string());
        match value {
            AttributeValue::Inline(data) => {
                let shown: Vec<String> = data.iter().take(32).map(|b| format!("{b:02x}")).collect();
                let more = if data.len() > 32 { " ..." } else { "" };
                writeln!(out, "{name}: inline {} bytes: {}{more}", data.len(), shown.join(" "))?;
            }
            AttributeValue::Fork(data) => writeln!(
                out,
                "{name}: fork {} in {} blocks",
                format_bytes(data.logical_size),
                data.total_blocks
            )?,
            AttributeValue::Extents(extents) => writeln!(
                out,
                "{name}: {} more extents from block {}",
                extents.iter().filter(|e| e.block_count != 0).count(),
                key.start_block
            )?,
        }
    }
    Ok(())
}

fn fork_summary(style: &Style, out: &mut dyn Write, label: &str, forks: &ForkSummary) -> io::Result<()> {
    style.field(
        out,
        label,
        format!(
            "{} forks, {} in {} blocks",
            forks.forks,
            format_bytes(forks.logical_bytes),
            forks.allocated_blocks
        ),
    )?;
    writeln!(
        out,
        "    {} fragmented, {} inline extents, {} overflow records",
        forks.fragmented, forks.inline_extents, forks.overflow_records
    )
}

pub fn summary(style: &Style, out: &mut dyn Write, summary: &VolumeSummary) -> io::Result<()> {
    style.heading(out, "Volume summary")?;
    style.field(out, "files", summary.files)?;
    style.field(out, "folders", summary.folders)?;
    style.field(out, "thread records", summary.thread_records)?;
    style.field(out, "hard links", summary.hard_links)?;
    style.field(out, "directory hard links", summary.directory_hard_links)?;
    style.field(out, "symbolic links", summary.symbolic_links)?;
    style.field(out, "aliases", summary.aliases)?;
    style.field(out, "empty files", summary.empty_files)?;
    style.field(out, "empty folders", summary.empty_folders)?;
    style.field(out, "invisible", summary.invisible)?;
    style.field(out, "damaged records", summary.damaged_records)?;
    fork_summary(style, out, "data forks", &summary.data)?;
    fork_summary(style, out, "resource forks", &summary.resource)?;

    style.heading(out, "Largest files")?;
    for ranked in &summary.largest_files {
        writeln!(out, "  {:>12}  {:>10}  {}", format_bytes(ranked.size), ranked.cnid, ranked.name)?;
    }
    style.heading(out, "Most fragmented forks")?;
    for ranked in &summary.most_fragmented {
        writeln!(
            out,
            "  {:>6} extents  {:>10}  {} ({})",
            ranked.extents, ranked.cnid, ranked.name, ranked.fork_type
        )?;
    }
    if summary.truncated {
        style.heading(out, "Incomplete")?;
        for warning in &summary.warnings {
            writeln!(out, "  {warning}")?;
        }
    }
    Ok(())
}

pub fn journal(style: &Style, out: &mut dyn Write, info: &JournalInfoBlock) -> io::Result<()> {
    style.heading(out, "Journal info block")?;
    style.field(
        out,
        "flags",
        flag_names(
            info.flags,
            &[
                (journal_info_flags::IN_FS, "in filesystem"),
                (journal_info_flags::ON_OTHER_DEVICE, "other device"),
                (journal_info_flags::NEED_INIT, "needs init"),
            ],
        ),
    )?;
    style.field(out, "offset", format!("{:#x}", info.offset))?;
    style.field(out, "size", format_bytes(info.size))
}
