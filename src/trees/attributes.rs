use std::cmp::Ordering;

use deku::DekuContainerRead;
use hfs_types_rs::AttributeRecordType;

use super::{be_u16, be_u32};
use crate::btree::TreeKind;
use crate::error::{Error, Result};
use crate::raw::{AttributeExtents, AttributeForkData, CatalogNodeId, ExtentRecord, ForkData};
use crate::unicode::HfsName;

/// Defined as `struct HFSPlusAttrKey` in TN1150 > Attributes File Key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeKey {
    pub file_id: CatalogNodeId,
    /// First allocation block of this piece of a fork-based attribute.
    pub start_block: u32,
    pub name: HfsName,
}

impl AttributeKey {
    pub fn new(file_id: CatalogNodeId, name: impl Into<HfsName>, start_block: u32) -> Self {
        AttributeKey {
            file_id,
            start_block,
            name: name.into(),
        }
    }

    /// On-disk key bytes, without the key length.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.name.encoded_len());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.file_id.to_be_bytes());
        out.extend_from_slice(&self.start_block.to_be_bytes());
        self.name.encode(&mut out);
        out
    }
}

/// Attribute data, switched on the record type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// `HFSPlusAttrData`: the value is stored in the record.
    Inline(Vec<u8>),
    /// `HFSPlusAttrForkData`: the value lives in allocation blocks.
    Fork(ForkData),
    /// `HFSPlusAttrExtents`: more extents for a fork-based value.
    Extents(ExtentRecord),
}

impl AttributeValue {
    const INLINE_HEADER: usize = 16;

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record_type = AttributeRecordType::try_from(be_u32(bytes, 0, "attribute record")?)?;
        Ok(match record_type {
            AttributeRecordType::InlineData => {
                let size = be_u32(bytes, 12, "inline attribute")? as usize;
                let data = bytes
                    .get(Self::INLINE_HEADER..Self::INLINE_HEADER + size)
                    .ok_or_else(|| {
                        Error::invalid(
                            "inline attribute",
                            format!("{size} bytes of data do not fit in a {} byte record", bytes.len()),
                        )
                    })?;
                AttributeValue::Inline(data.to_vec())
            }
            AttributeRecordType::ForkData => {
                let (_rest, fork) = AttributeForkData::from_bytes((bytes, 0))?;
                AttributeValue::Fork(fork.fork)
            }
            AttributeRecordType::Extents => {
                let (_rest, extents) = AttributeExtents::from_bytes((bytes, 0))?;
                AttributeValue::Extents(extents.extents)
            }
        })
    }

    /// On-disk record bytes for an inline value.
    pub fn encode_inline(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::INLINE_HEADER + data.len());
        out.extend_from_slice(&(AttributeRecordType::InlineData as u32).to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    /// Size of the attribute value, when known from this record alone.
    pub fn size(&self) -> Option<u64> {
        match self {
            AttributeValue::Inline(data) => Some(data.len() as u64),
            AttributeValue::Fork(fork) => Some(fork.logical_size),
            AttributeValue::Extents(_) => None,
        }
    }
}

/// Keys ordered by file, then name, then start block.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributesTree;

impl TreeKind for AttributesTree {
    type Key = AttributeKey;
    type Value = AttributeValue;
    const NAME: &'static str = "attributes";

    fn decode_key(&self, bytes: &[u8]) -> Result<AttributeKey> {
        let _pad = be_u16(bytes, 0, "attributes key")?;
        let file_id = be_u32(bytes, 2, "attributes key")?;
        let start_block = be_u32(bytes, 6, "attributes key")?;
        let (name, _) = HfsName::decode(&bytes[10..])?;
        Ok(AttributeKey {
            file_id,
            start_block,
            name,
        })
    }

    /// Names compare code unit by code unit over their common prefix, and
    /// the shorter name sorts first when one is a prefix of the other.
    fn compare(&self, a: &AttributeKey, b: &AttributeKey) -> Ordering {
        a.file_id
            .cmp(&b.file_id)
            .then_with(|| a.name.units().cmp(b.name.units()))
            .then(a.start_block.cmp(&b.start_block))
    }

    fn decode_value(&self, _key: &AttributeKey, bytes: &[u8]) -> Result<AttributeValue> {
        AttributeValue::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::ExtentDescriptor;
    use deku::DekuContainerWrite;

    #[test]
    fn names_order_with_prefix_rule() {
        let tree = AttributesTree;
        let short = AttributeKey::new(20, "com.apple", 0);
        let long = AttributeKey::new(20, "com.apple.quarantine", 0);
        let other = AttributeKey::new(20, "com.apple.FinderInfo", 0);

        assert_eq!(tree.compare(&short, &long), Ordering::Less);
        assert_eq!(tree.compare(&long, &short), Ordering::Greater);
        // Binary order: 'F' < 'q'.
        assert_eq!(tree.compare(&other, &long), Ordering::Less);
        assert_eq!(
            tree.compare(&AttributeKey::new(19, "z", 0), &short),
            Ordering::Less
        );
        assert_eq!(
            tree.compare(&long, &AttributeKey::new(20, "com.apple.quarantine", 4)),
            Ordering::Less
        );
        assert_eq!(tree.compare(&long, &long.clone()), Ordering::Equal);
    }

    #[test]
    fn key_round_trip() {
        let key = AttributeKey::new(42, "com.apple.ResourceFork", 0);
        assert_eq!(AttributesTree.decode_key(&key.encode()).unwrap(), key);
    }

    #[test]
    fn value_variants() {
        let inline = AttributeValue::encode_inline(b"hello");
        assert_eq!(
            AttributeValue::decode(&inline).unwrap(),
            AttributeValue::Inline(b"hello".to_vec())
        );
        assert!(AttributeValue::decode(&inline[..18]).is_err());

        let fork = AttributeForkData {
            record_type: AttributeRecordType::ForkData as u32,
            reserved: 0,
            fork: ForkData {
                logical_size: 9000,
                total_blocks: 3,
                ..Default::default()
            },
        };
        let decoded = AttributeValue::decode(&fork.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.size(), Some(9000));

        let mut extents = AttributeExtents {
            record_type: AttributeRecordType::Extents as u32,
            ..Default::default()
        };
        extents.extents[0] = ExtentDescriptor {
            start_block: 77,
            block_count: 1,
        };
        let decoded = AttributeValue::decode(&extents.to_bytes().unwrap()).unwrap();
        assert!(matches!(decoded, AttributeValue::Extents(e) if e[0].start_block == 77));

        assert!(AttributeValue::decode(&[0, 0, 0, 0x40]).is_err());
    }
}
