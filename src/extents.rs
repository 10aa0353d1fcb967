//! Ordered logical-to-physical block maps for a single fork.

use itertools::Itertools;

use crate::error::{Error, Result};

/// A run of allocation blocks. All values are in allocation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub logical_start: u64,
    pub start_block: u64,
    pub block_count: u64,
}

impl Extent {
    pub fn logical_end(&self) -> u64 {
        self.logical_start + self.block_count
    }

    fn contains(&self, logical_block: u64) -> bool {
        (self.logical_start..self.logical_end()).contains(&logical_block)
    }
}

/// Extents ordered by `logical_start`, never overlapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtentList {
    extents: Vec<Extent>,
}

impl ExtentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a run directly after the last mapped block. Empty runs are
    /// ignored and reported as `false`.
    pub fn add(&mut self, start_block: u64, block_count: u64) -> bool {
        if block_count == 0 {
            return false;
        }
        let logical_start = self.mapped_blocks();
        self.extents.push(Extent {
            logical_start,
            start_block,
            block_count,
        });
        true
    }

    /// Place a run at an explicit logical position, keeping the list sorted.
    /// Runs overlapping an existing extent are rejected.
    pub fn insert(&mut self, logical_start: u64, start_block: u64, block_count: u64) -> Result<()> {
        if block_count == 0 {
            return Ok(());
        }
        let extent = Extent {
            logical_start,
            start_block,
            block_count,
        };
        let at = self
            .extents
            .partition_point(|e| e.logical_start < logical_start);

        let overlaps_previous = at > 0 && self.extents[at - 1].logical_end() > logical_start;
        let overlaps_next = self
            .extents
            .get(at)
            .is_some_and(|next| next.logical_start < extent.logical_end());
        if overlaps_previous || overlaps_next {
            return Err(Error::invalid(
                "extent list",
                format!(
                    "extent at logical block {logical_start} ({block_count} blocks) overlaps an existing extent"
                ),
            ));
        }

        self.extents.insert(at, extent);
        Ok(())
    }

    /// Map a logical block. Returns the physical block and the number of
    /// blocks available from there to the end of its extent.
    pub fn lookup(&self, logical_block: u64) -> Option<(u64, u64)> {
        let at = self
            .extents
            .partition_point(|e| e.logical_start <= logical_block);
        let extent = self.extents.get(at.checked_sub(1)?)?;
        if !extent.contains(logical_block) {
            return None;
        }
        let skip = logical_block - extent.logical_start;
        Some((extent.start_block + skip, extent.block_count - skip))
    }

    /// First logical block past the last extent.
    pub fn mapped_blocks(&self) -> u64 {
        self.extents.last().map_or(0, Extent::logical_end)
    }

    /// Whether the extents cover `0..mapped_blocks()` without gaps.
    pub fn is_contiguous(&self) -> bool {
        self.extents.first().is_none_or(|e| e.logical_start == 0)
            && self
                .extents
                .iter()
                .tuple_windows()
                .all(|(a, b)| b.logical_start == a.logical_end())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Extent> {
        self.extents.iter()
    }

    pub fn as_slice(&self) -> &[Extent] {
        &self.extents
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }
}
