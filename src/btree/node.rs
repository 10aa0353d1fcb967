use std::sync::Arc;

use deku::DekuContainerRead;
use hfs_types_rs::NodeKind;
use itertools::Itertools;

use crate::error::{Error, Result};
use crate::raw::{BTreeHeaderRecord, NodeDescriptor};

/// How keys are laid out within records, from the header record attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    /// Key lengths are u16 rather than u8.
    pub big_keys: bool,
    /// Index keys occupy their own length instead of `max_key_length`.
    pub variable_index_keys: bool,
    pub max_key_length: u16,
}

impl RecordLayout {
    pub fn from_header(header: &BTreeHeaderRecord) -> Self {
        RecordLayout {
            big_keys: header.big_keys(),
            variable_index_keys: header.variable_index_keys(),
            max_key_length: header.max_key_length,
        }
    }
}

/// A keyed record, split into key bytes (without the length prefix) and
/// value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// One B-tree node with its validated offset table.
#[derive(Debug, Clone)]
pub struct Node {
    tree: &'static str,
    number: u32,
    descriptor: NodeDescriptor,
    kind: NodeKind,
    data: Arc<[u8]>,
    /// Record offsets front to back, plus the free space offset.
    offsets: Vec<u16>,
}

impl Node {
    /// Decode the descriptor and offset table. Offsets must start after the
    /// descriptor, never decrease, and stay clear of the table itself.
    pub fn parse(tree: &'static str, number: u32, data: Arc<[u8]>) -> Result<Node> {
        let corrupt = |reason: String| Error::corrupt(tree, number, reason);

        let (_rest, descriptor) = NodeDescriptor::from_bytes((&data[..], 0))?;
        let kind = descriptor.kind().map_err(|e| corrupt(e.to_string()))?;

        let size = data.len();
        let count = descriptor.num_records as usize;
        let table_len = (count + 1) * 2;
        if NodeDescriptor::SIZE + table_len > size {
            return Err(corrupt(format!(
                "offset table for {count} records does not fit in {size} bytes"
            )));
        }
        let table_start = size - table_len;

        let offsets: Vec<u16> = (0..=count)
            .map(|i| {
                let at = size - 2 * (i + 1);
                u16::from_be_bytes([data[at], data[at + 1]])
            })
            .collect();

        if (offsets[0] as usize) < NodeDescriptor::SIZE {
            return Err(corrupt(format!(
                "first record offset {} overlaps the node descriptor",
                offsets[0]
            )));
        }
        if let Some((i, (a, b))) = offsets
            .iter()
            .tuple_windows()
            .enumerate()
            .find(|(_, (a, b))| b < a)
        {
            return Err(corrupt(format!(
                "record offsets decrease at record {i} ({a} then {b})"
            )));
        }
        if offsets[count] as usize > table_start {
            return Err(corrupt(format!(
                "free space offset {} runs into the offset table at {table_start}",
                offsets[count]
            )));
        }

        Ok(Node {
            tree,
            number,
            descriptor,
            kind,
            data,
            offsets,
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn height(&self) -> u8 {
        self.descriptor.height
    }

    pub fn forward_link(&self) -> u32 {
        self.descriptor.forward_link
    }

    pub fn backward_link(&self) -> u32 {
        self.descriptor.backward_link
    }

    pub fn num_records(&self) -> usize {
        self.descriptor.num_records as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Record offsets, front to back, followed by the free space offset.
    pub fn offsets(&self) -> &[u16] {
        &self.offsets
    }

    /// Unused bytes between the last record and the offset table.
    pub fn free_space(&self) -> usize {
        let table_start = self.data.len() - self.offsets.len() * 2;
        table_start - self.offsets[self.num_records()] as usize
    }

    /// Raw bytes of record `index`.
    pub fn record_bytes(&self, index: usize) -> Result<&[u8]> {
        let count = self.num_records();
        if index >= count {
            return Err(Error::RecordOutOfRange { index, count });
        }
        let start = self.offsets[index] as usize;
        let end = self.offsets[index + 1] as usize;
        Ok(&self.data[start..end])
    }

    /// Split record `index` of an index or leaf node into key and value.
    pub fn record(&self, index: usize, layout: &RecordLayout) -> Result<Record<'_>> {
        let raw = self.record_bytes(index)?;
        let corrupt = |reason: String| Error::corrupt(self.tree, self.number, reason);

        let (prefix, key_length) = if layout.big_keys {
            match raw {
                [hi, lo, ..] => (2, u16::from_be_bytes([*hi, *lo]) as usize),
                _ => return Err(corrupt(format!("record {index} has no key length"))),
            }
        } else {
            match raw {
                [len, ..] => (1, *len as usize),
                _ => return Err(corrupt(format!("record {index} has no key length"))),
            }
        };

        let key_size = if self.kind == NodeKind::Index && !layout.variable_index_keys {
            layout.max_key_length as usize
        } else {
            key_length
        };
        if key_length > key_size {
            return Err(corrupt(format!(
                "record {index} key length {key_length} exceeds {key_size}"
            )));
        }

        let key_end = prefix + key_size;
        let value_start = key_end + (key_end & 1);
        if value_start > raw.len() {
            return Err(corrupt(format!(
                "record {index} key of {key_size} bytes overruns its {} byte record",
                raw.len()
            )));
        }

        Ok(Record {
            key: &raw[prefix..prefix + key_length],
            value: &raw[value_start..],
        })
    }
}
