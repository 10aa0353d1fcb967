//! hfsinspect
//!
//! Read-only inspector for HFS+ volumes, partitions and disk images.

#![forbid(unsafe_code)]

mod render;

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use hfsinspect::btree::{BTree, TreeKind};
use hfsinspect::partition;
use hfsinspect::trees::CatalogRecord;
use hfsinspect::types::ForkType;
use hfsinspect::{CatalogEntry, Hfs, HfsOptions, Volume};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use render::Style;

#[derive(Parser, Debug)]
#[command(name = "hfsinspect", version)]
#[command(about = "Read-only inspector for HFS+ volumes, partitions and disk images")]
struct Args {
    /// Disk image, partition or device to inspect
    device: PathBuf,

    /// Inspect partition N, as numbered by `partitions`, instead of the
    /// first one holding HFS+
    #[arg(short, long)]
    partition: Option<usize>,

    /// B-tree nodes cached per tree, 0 to disable caching
    #[arg(long, default_value_t = HfsOptions::default().node_cache_capacity)]
    cache_nodes: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the volume header
    Header,
    /// List the partition map
    Partitions,
    /// Dump one B-tree node
    Node {
        #[arg(long, value_enum, default_value_t)]
        tree: TreeName,
        id: u32,
    },
    /// Show a B-tree header record
    TreeHeader {
        #[arg(long, value_enum, default_value_t)]
        tree: TreeName,
    },
    /// Show the catalog record at a path
    Path { path: String },
    /// Show the catalog record of a CNID and its path
    Cnid { cnid: u32 },
    /// List a folder
    List {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Copy a fork to a file and print its SHA-256
    Extract {
        path: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Copy the resource fork instead of the data fork
        #[arg(long)]
        resource: bool,
    },
    /// List extended attributes
    Attrs { path: String },
    /// Whole-volume statistics
    Summary,
    /// Show the journal info block
    Journal,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
enum TreeName {
    #[default]
    Catalog,
    Extents,
    Attributes,
    Hotfile,
}

fn main() {
    let color = env::var_os("NOCOLOR").is_none();
    init_logging(color);

    let args = Args::parse();
    let style = Style {
        color: color && io::stdout().is_terminal(),
    };
    if let Err(error) = run(args, style) {
        eprintln!("error: {error:#}");
        process::exit(1);
    }
}

fn init_logging(color: bool) {
    let default = if env::var_os("DEBUG").is_some() {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(color)
        .init();
}

/// `/dev/diskN` to `/dev/rdiskN`, the raw device macOS prefers for reads.
fn raw_device_path(path: &Path) -> Option<PathBuf> {
    let rest = path.to_str()?.strip_prefix("/dev/disk")?;
    Some(PathBuf::from(format!("/dev/rdisk{rest}")))
}

fn open_device(path: &Path) -> Result<Volume> {
    match Volume::open(path) {
        Ok(volume) => Ok(volume),
        Err(err) => {
            let Some(raw) = raw_device_path(path) else {
                return Err(err).with_context(|| format!("opening {}", path.display()));
            };
            warn!(%err, retry = %raw.display(), "open failed, trying the raw device");
            Volume::open(&raw).with_context(|| format!("opening {}", raw.display()))
        }
    }
}

fn select_volume(disk: &Volume, index: Option<usize>) -> Result<&Volume> {
    match index {
        Some(index) => disk.children().get(index).with_context(|| {
            format!(
                "no partition {index}, the disk has {}",
                disk.children().len()
            )
        }),
        None => partition::find_hfs(disk)
            .context("probing for an HFS+ volume")?
            .context("no HFS+ volume found"),
    }
}

fn run(args: Args, style: Style) -> Result<()> {
    let mut disk = open_device(&args.device)?;
    let count = partition::load_partitions(&mut disk).context("reading the partition map")?;
    debug!(partitions = count, device = %args.device.display(), "opened device");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if let Command::Partitions = args.command {
        render::partitions(&style, &mut out, &disk)?;
        out.flush()?;
        return Ok(());
    }

    let volume = select_volume(&disk, args.partition)?;
    let options = HfsOptions {
        node_cache_capacity: args.cache_nodes,
    };
    let hfs = Hfs::open_with(volume, options).context("opening the HFS+ volume")?;

    match args.command {
        Command::Partitions => {}
        Command::Header => render::volume_header(&style, &mut out, &hfs)?,
        Command::Node { tree, id } => with_tree(&hfs, tree, |t| t.render_node(&style, &mut out, id))?,
        Command::TreeHeader { tree } => {
            with_tree(&hfs, tree, |t| {
                render::tree_header(&style, &mut out, t.name(), t.header())?;
                Ok(())
            })?;
            if tree == TreeName::Hotfile {
                if let Some((_, info)) = hfs.hot_files()? {
                    render::hot_files_info(&style, &mut out, info)?;
                }
            }
        }
        Command::Path { path } => {
            let entry = resolve(&hfs, &path)?;
            render::entry(&style, &mut out, &entry, Some(&path))?;
        }
        Command::Cnid { cnid } => {
            let entry = hfs
                .lookup_cnid(cnid)
                .with_context(|| format!("looking up CNID {cnid}"))?;
            let Some(entry) = entry else {
                bail!("CNID {cnid}: not found");
            };
            let path = hfs.path_for_cnid(cnid)?;
            render::entry(&style, &mut out, &entry, path.as_deref())?;
        }
        Command::List { path } => {
            let entry = resolve(&hfs, &path)?;
            match &entry.record {
                CatalogRecord::Folder(folder) => {
                    let children = hfs
                        .list_folder(folder.folder_id)?
                        .collect::<hfsinspect::Result<Vec<_>>>()
                        .with_context(|| format!("listing {path}"))?;
                    render::listing(&style, &mut out, &children)?;
                }
                _ => render::listing(&style, &mut out, std::slice::from_ref(&entry))?,
            }
        }
        Command::Extract {
            path,
            output,
            resource,
        } => {
            let entry = resolve(&hfs, &path)?;
            let CatalogRecord::File(file) = &entry.record else {
                bail!("{path}: not a file");
            };
            let fork_type = if resource {
                ForkType::Resource
            } else {
                ForkType::Data
            };
            let mut writer = BufWriter::new(
                File::create(&output)
                    .with_context(|| format!("creating {}", output.display()))?,
            );
            let copy = hfs
                .copy_fork(file, fork_type, &mut writer)
                .with_context(|| format!("copying the {fork_type} fork of {path}"))?;
            writer.flush()?;
            writeln!(out, "{}  {} ({} bytes)", copy.sha256, output.display(), copy.bytes)?;
        }
        Command::Attrs { path } => {
            let entry = resolve(&hfs, &path)?;
            let Some(cnid) = entry.cnid() else {
                bail!("{path}: not a file or folder");
            };
            let attrs = hfs
                .attributes_for(cnid)
                .with_context(|| format!("reading attributes of {path}"))?;
            render::attributes(&style, &mut out, &attrs)?;
        }
        Command::Summary => {
            let summary = hfs.volume_summary().context("summarizing the catalog")?;
            render::summary(&style, &mut out, &summary)?;
        }
        Command::Journal => match hfs.journal_info().context("reading the journal info block")? {
            Some(info) => render::journal(&style, &mut out, &info)?,
            None => writeln!(out, "volume is not journaled")?,
        },
    }

    out.flush()?;
    Ok(())
}

fn resolve(hfs: &Hfs, path: &str) -> Result<CatalogEntry> {
    hfs.resolve_path(path)
        .with_context(|| format!("resolving {path}"))?
        .with_context(|| format!("{path}: not found"))
}

/// Run `f` on the selected system tree.
fn with_tree(
    hfs: &Hfs,
    name: TreeName,
    f: impl FnOnce(&dyn TreeView) -> Result<()>,
) -> Result<()> {
    match name {
        TreeName::Catalog => f(hfs.catalog()?),
        TreeName::Extents => f(hfs.extents()?),
        TreeName::Attributes => f(hfs
            .attributes()?
            .context("volume has no attributes B-tree")?),
        TreeName::Hotfile => f(hfs
            .hot_files()?
            .context("volume has no hot files B-tree")?
            .0),
    }
}

/// The parts of a [`BTree`] the CLI shows, independent of its key type.
trait TreeView {
    fn name(&self) -> &'static str;
    fn header(&self) -> &hfsinspect::raw::BTreeHeaderRecord;
    fn render_node(&self, style: &Style, out: &mut dyn Write, id: u32) -> Result<()>;
}

impl<K: TreeKind> TreeView for BTree<K> {
    fn name(&self) -> &'static str {
        BTree::name(self)
    }

    fn header(&self) -> &hfsinspect::raw::BTreeHeaderRecord {
        BTree::header(self)
    }

    fn render_node(&self, style: &Style, out: &mut dyn Write, id: u32) -> Result<()> {
        let node = self
            .node(id)
            .with_context(|| format!("reading {} node {id}", BTree::name(self)))?;
        render::node(style, out, self, &node)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_device_fallback() {
        assert_eq!(
            raw_device_path(Path::new("/dev/disk2s1")),
            Some(PathBuf::from("/dev/rdisk2s1"))
        );
        assert_eq!(raw_device_path(Path::new("/dev/rdisk2")), None);
        assert_eq!(raw_device_path(Path::new("disk.img")), None);
    }

    #[test]
    fn arguments_parse() {
        let args = Args::try_parse_from([
            "hfsinspect",
            "disk.img",
            "--partition",
            "1",
            "node",
            "--tree",
            "extents",
            "3",
        ])
        .unwrap();
        assert_eq!(args.partition, Some(1));
        assert!(matches!(
            args.command,
            Command::Node {
                tree: TreeName::Extents,
                id: 3
            }
        ));

        let args = Args::try_parse_from(["hfsinspect", "disk.img", "tree-header"]).unwrap();
        assert_eq!(args.cache_nodes, 1024);
        assert!(matches!(
            args.command,
            Command::TreeHeader {
                tree: TreeName::Catalog
            }
        ));

        let args = Args::try_parse_from([
            "hfsinspect",
            "disk.img",
            "extract",
            "/a",
            "-o",
            "out.bin",
            "--resource",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Extract { resource: true, .. }));
    }

    #[test]
    fn missing_partition_is_reported() {
        let disk = Volume::from_bytes(vec![0u8; 4096]);
        let err = select_volume(&disk, Some(2)).unwrap_err();
        assert!(err.to_string().contains("no partition 2"));
        assert!(select_volume(&disk, None).is_err());
    }
}
