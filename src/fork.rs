//! Logical-to-physical mapping of file forks, including overflow extents.

use hfs_types_rs::ForkType;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::extents::ExtentList;
use crate::raw::{ExtentRecord, ForkData};
use crate::volume::Volume;

/// Supplies extents overflow records, keyed as in the extents B-tree.
pub trait OverflowSource {
    /// The record for `(file_id, fork_type)` whose first extent maps logical
    /// block `start_block`, if there is one.
    fn overflow_extents(
        &self,
        file_id: u32,
        fork_type: ForkType,
        start_block: u32,
    ) -> Result<Option<ExtentRecord>>;
}

/// For forks that must be fully described by their inline extents, such as
/// the extents B-tree itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverflow;

impl OverflowSource for NoOverflow {
    fn overflow_extents(&self, _: u32, _: ForkType, _: u32) -> Result<Option<ExtentRecord>> {
        Ok(None)
    }
}

/// Where a logical block lives on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub physical_block: u64,
    /// Contiguous blocks from `physical_block` to the end of its extent.
    pub blocks_available: u64,
}

#[derive(Debug, Clone)]
pub struct Fork {
    file_id: u32,
    fork_type: ForkType,
    logical_size: u64,
    total_blocks: u64,
    block_size: u64,
    extents: ExtentList,
    overflow_records: usize,
}

impl Fork {
    /// Seed the extent list from the inline descriptors. The first empty
    /// descriptor ends the list.
    pub fn new(data: &ForkData, fork_type: ForkType, file_id: u32, block_size: u32) -> Fork {
        let mut extents = ExtentList::new();
        for descriptor in data.used_extents() {
            extents.add(descriptor.start_block as u64, descriptor.block_count as u64);
        }

        Fork {
            file_id,
            fork_type,
            logical_size: data.logical_size,
            total_blocks: data.total_blocks as u64,
            block_size: block_size as u64,
            extents,
            overflow_records: 0,
        }
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn fork_type(&self) -> ForkType {
        self.fork_type
    }

    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn extents(&self) -> &ExtentList {
        &self.extents
    }

    /// Overflow records merged into the extent list so far.
    pub fn overflow_records(&self) -> usize {
        self.overflow_records
    }

    /// Whether every allocated block has a mapping.
    pub fn is_fully_mapped(&self) -> bool {
        self.extents.mapped_blocks() >= self.total_blocks
    }

    /// Map `logical_block`, pulling in overflow records as needed. `None`
    /// when the block is past the end of the fork or no overflow record
    /// covers it.
    pub fn resolve(
        &mut self,
        overflow: &dyn OverflowSource,
        logical_block: u64,
    ) -> Result<Option<Mapping>> {
        if logical_block >= self.total_blocks {
            return Ok(None);
        }

        loop {
            if let Some((physical_block, blocks_available)) = self.extents.lookup(logical_block) {
                return Ok(Some(Mapping {
                    physical_block,
                    blocks_available,
                }));
            }
            if self.is_fully_mapped() || !self.extend(overflow)? {
                return Ok(None);
            }
        }
    }

    /// Resolve every block of the fork. Returns the number of overflow
    /// records loaded.
    pub fn load_all(&mut self, overflow: &dyn OverflowSource) -> Result<usize> {
        while !self.is_fully_mapped() {
            if !self.extend(overflow)? {
                return Err(self.missing(self.extents.mapped_blocks()));
            }
        }
        Ok(self.overflow_records)
    }

    /// Append the overflow record that starts at the first unmapped block.
    fn extend(&mut self, overflow: &dyn OverflowSource) -> Result<bool> {
        let next = self.extents.mapped_blocks();
        let Ok(start_block) = u32::try_from(next) else {
            return Ok(false);
        };

        let Some(record) = overflow.overflow_extents(self.file_id, self.fork_type, start_block)?
        else {
            debug!(
                file_id = self.file_id,
                fork = %self.fork_type,
                start_block,
                total_blocks = self.total_blocks,
                "no overflow record for unmapped blocks"
            );
            return Ok(false);
        };

        let mut added = false;
        for descriptor in record.iter().take_while(|d| d.block_count != 0) {
            added |= self
                .extents
                .add(descriptor.start_block as u64, descriptor.block_count as u64);
        }
        if added {
            self.overflow_records += 1;
            trace!(
                file_id = self.file_id,
                fork = %self.fork_type,
                start_block,
                mapped = self.extents.mapped_blocks(),
                "loaded overflow extents"
            );
        }
        Ok(added)
    }

    fn missing(&self, block: u64) -> Error {
        Error::MissingExtents {
            file_id: self.file_id,
            fork: self.fork_type,
            block,
        }
    }

    /// Read fork bytes at `offset`, resolving overflow extents on the way.
    /// Reads are clipped to the logical size, so they come up short only at
    /// the end of the fork.
    pub fn read_range(
        &mut self,
        volume: &Volume,
        overflow: &dyn OverflowSource,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        let (block_size, logical_size) = (self.block_size, self.logical_size);
        read_runs(volume, block_size, logical_size, buf, offset, |block| {
            self.resolve(overflow, block)?
                .ok_or_else(|| self.missing(block))
        })
    }

    /// Like [`Fork::read_range`], for a fork whose extents are already loaded.
    pub fn read_mapped(&self, volume: &Volume, buf: &mut [u8], offset: u64) -> Result<usize> {
        read_runs(
            volume,
            self.block_size,
            self.logical_size,
            buf,
            offset,
            |block| {
                self.extents
                    .lookup(block)
                    .filter(|_| block < self.total_blocks)
                    .map(|(physical_block, blocks_available)| Mapping {
                        physical_block,
                        blocks_available,
                    })
                    .ok_or_else(|| self.missing(block))
            },
        )
    }
}

/// One volume read per contiguous run of blocks.
fn read_runs(
    volume: &Volume,
    block_size: u64,
    logical_size: u64,
    buf: &mut [u8],
    offset: u64,
    mut map: impl FnMut(u64) -> Result<Mapping>,
) -> Result<usize> {
    if offset >= logical_size || block_size == 0 {
        return Ok(0);
    }
    let wanted = buf
        .len()
        .min(usize::try_from(logical_size - offset).unwrap_or(usize::MAX));

    let mut done = 0;
    while done < wanted {
        let position = offset + done as u64;
        let within = position % block_size;
        let mapping = map(position / block_size)?;

        let run = mapping.blocks_available * block_size - within;
        let n = (wanted - done).min(usize::try_from(run).unwrap_or(usize::MAX));
        volume.read_exact_at(
            &mut buf[done..done + n],
            mapping.physical_block * block_size + within,
        )?;
        done += n;
    }
    Ok(done)
}

/// A fully resolved fork on its volume, used as the backing store of a
/// B-tree.
#[derive(Debug)]
pub struct ForkStream {
    volume: Volume,
    fork: Fork,
}

impl ForkStream {
    pub fn open(volume: &Volume, mut fork: Fork, overflow: &dyn OverflowSource) -> Result<Self> {
        fork.load_all(overflow)?;
        Ok(ForkStream {
            volume: volume.detached(),
            fork,
        })
    }

    pub fn fork(&self) -> &Fork {
        &self.fork
    }

    pub fn len(&self) -> u64 {
        self.fork.logical_size
    }

    pub fn is_empty(&self) -> bool {
        self.fork.logical_size == 0
    }

    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let got = self.fork.read_mapped(&self.volume, buf, offset)?;
        if got != buf.len() {
            return Err(Error::ShortRead {
                offset,
                wanted: buf.len(),
                got,
            });
        }
        Ok(())
    }
}
