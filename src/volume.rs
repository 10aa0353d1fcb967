//! Byte-addressable sources: disk images, devices, in-memory buffers, and
//! the partitions carved out of them.

use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::partition::PartitionScheme;

pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Positional reads from some backing store. Implementations must not keep a
/// cursor, so a single source can back many volumes at once.
pub trait BlockSource: fmt::Debug + Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at end of source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Size in bytes, or 0 when unknown.
    fn len(&self) -> u64;
}

#[derive(Debug)]
struct FileSource {
    file: File,
    len: u64,
}

impl BlockSource for FileSource {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

#[derive(Debug)]
struct MemorySource(Vec<u8>);

impl BlockSource for MemorySource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.0.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.0.len() - start);
        buf[..n].copy_from_slice(&self.0[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.0.len() as u64
    }
}

/// What a volume contains, as far as the loader that created it knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeKind {
    /// A whole disk image, device, or buffer.
    Image,
    /// One entry of a partition map.
    Partition {
        scheme: PartitionScheme,
        index: usize,
        name: String,
        type_name: String,
    },
    /// An HFS+ volume embedded in a classic HFS wrapper.
    EmbeddedHfsPlus,
}

/// A bounded window onto a [`BlockSource`].
///
/// Offsets passed to [`Volume::read`] are relative to the start of the
/// volume. Reads never cross `length` when the volume is bounded.
pub struct Volume {
    // Declared first so that children are released before the shared source.
    children: Vec<Volume>,
    source: Arc<dyn BlockSource>,
    path: Option<PathBuf>,
    offset: u64,
    // None when the source size is unknown.
    length: Option<u64>,
    sector_size: u32,
    depth: u32,
    kind: VolumeKind,
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("sector_size", &self.sector_size)
            .field("depth", &self.depth)
            .field("children", &self.children.len())
            .finish()
    }
}

impl Volume {
    /// Open a regular file, block device or raw (character) device read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Volume> {
        let path = path.as_ref();
        let file = File::options()
            .read(true)
            .open(path)
            .map_err(|err| open_error(path, err))?;
        let metadata = file.metadata().map_err(|err| open_error(path, err))?;
        let file_type = metadata.file_type();

        let (len, sector_size) = if file_type.is_file() {
            (metadata.len(), DEFAULT_SECTOR_SIZE)
        } else if is_device(&file_type) {
            let len = (&file).seek(SeekFrom::End(0))?;
            (len, detect_sector_size(path))
        } else {
            return Err(Error::NotBlockOrRegular {
                path: path.to_path_buf(),
            });
        };

        debug!(path = %path.display(), len, sector_size, "opened volume");

        Ok(Volume {
            children: Vec::new(),
            source: Arc::new(FileSource { file, len }),
            path: Some(path.to_path_buf()),
            offset: 0,
            length: (file_type.is_file() || len != 0).then_some(len),
            sector_size,
            depth: 0,
            kind: VolumeKind::Image,
        })
    }

    /// Wrap an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>) -> Volume {
        let length = bytes.len() as u64;
        Volume {
            children: Vec::new(),
            source: Arc::new(MemorySource(bytes)),
            path: None,
            offset: 0,
            length: Some(length),
            sector_size: DEFAULT_SECTOR_SIZE,
            depth: 0,
            kind: VolumeKind::Image,
        }
    }

    /// Wrap any other source. A `sector_size` of 0 selects the default.
    pub fn from_source(source: Arc<dyn BlockSource>, sector_size: u32) -> Volume {
        let length = match source.len() {
            0 => None,
            len => Some(len),
        };
        Volume {
            children: Vec::new(),
            source,
            path: None,
            offset: 0,
            length,
            sector_size: if sector_size == 0 {
                DEFAULT_SECTOR_SIZE
            } else {
                sector_size
            },
            depth: 0,
            kind: VolumeKind::Image,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Absolute start within the backing source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length in bytes, `None` when unbounded.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn kind(&self) -> &VolumeKind {
        &self.kind
    }

    pub fn children(&self) -> &[Volume] {
        &self.children
    }

    /// A window of this volume, starting `offset` bytes in. The length is
    /// clipped to the parent's bounds and the sector size is inherited; a
    /// window starting past the parent's end is empty.
    pub fn sub_volume(&self, offset: u64, length: u64, kind: VolumeKind) -> Volume {
        let length = match self.length {
            None => Some(length),
            Some(parent) => Some(length.min(parent.saturating_sub(offset))),
        };

        Volume {
            children: Vec::new(),
            source: Arc::clone(&self.source),
            path: self.path.clone(),
            offset: self.offset.saturating_add(offset),
            length,
            sector_size: self.sector_size,
            depth: self.depth + 1,
            kind,
        }
    }

    /// Attach a child volume, returning a reference to it.
    pub fn add_child(&mut self, child: Volume) -> &Volume {
        self.children.push(child);
        &self.children[self.children.len() - 1]
    }

    /// A handle on the same window without the child tree.
    pub fn detached(&self) -> Volume {
        Volume {
            children: Vec::new(),
            source: Arc::clone(&self.source),
            path: self.path.clone(),
            offset: self.offset,
            length: self.length,
            sector_size: self.sector_size,
            depth: self.depth,
            kind: self.kind.clone(),
        }
    }

    /// Read up to `buf.len()` bytes at `offset`. Reads at or past the end of a
    /// bounded volume return 0 bytes; reads straddling the end are clipped.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let wanted = match self.length {
            None => buf.len(),
            Some(length) if offset >= length => return Ok(0),
            Some(length) => {
                buf.len().min(usize::try_from(length - offset).unwrap_or(usize::MAX))
            }
        };
        let Some(start) = self.offset.checked_add(offset) else {
            return Ok(0);
        };

        let mut done = 0;
        while done < wanted {
            match self
                .source
                .read_at(&mut buf[done..wanted], start + done as u64)
            {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        trace!(offset, wanted, done, "volume read");
        Ok(done)
    }

    /// Read exactly `buf.len()` bytes or fail with [`Error::ShortRead`].
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let got = self.read(buf, offset)?;
        if got != buf.len() {
            return Err(Error::ShortRead {
                offset,
                wanted: buf.len(),
                got,
            });
        }
        Ok(())
    }

    /// Release children (most recent first), then this volume.
    pub fn close(mut self) {
        while let Some(child) = self.children.pop() {
            child.close();
        }
        trace!(offset = self.offset, depth = self.depth, "closed volume");
    }
}

fn open_error(path: &Path, err: io::Error) -> Error {
    match err.kind() {
        ErrorKind::NotFound => Error::NotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => Error::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Error::Io(err),
    }
}

#[cfg(unix)]
fn is_device(file_type: &std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_block_device() || file_type.is_char_device()
}

#[cfg(not(unix))]
fn is_device(_file_type: &std::fs::FileType) -> bool {
    false
}

/// Ask the OS for the logical sector size of a device, falling back to 512.
fn detect_sector_size(path: &Path) -> u32 {
    let name = std::fs::canonicalize(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
    let Some(name) = name else {
        return DEFAULT_SECTOR_SIZE;
    };

    // Partitions keep their queue parameters on the parent disk.
    [
        format!("/sys/class/block/{name}/queue/logical_block_size"),
        format!("/sys/class/block/{name}/../queue/logical_block_size"),
    ]
    .iter()
    .filter_map(|candidate| std::fs::read_to_string(candidate).ok())
    .filter_map(|text| text.trim().parse::<u32>().ok())
    .find(|&size| size >= 512 && size.is_power_of_two())
    .unwrap_or(DEFAULT_SECTOR_SIZE)
}
