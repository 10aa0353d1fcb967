//! HFS+ names and their orderings.
//!
//! Names are stored as up to 255 UTF-16 code units (`HFSUniStr255`), fully
//! decomposed. HFS+ catalogs order them case-insensitively with Apple's
//! `FastUnicodeCompare`; HFSX volumes may instead use a plain binary order.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// Longest name HFS+ can store, in UTF-16 code units.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HfsName(Vec<u16>);

impl HfsName {
    pub fn new(units: Vec<u16>) -> Self {
        HfsName(units)
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode a length-prefixed `HFSUniStr255`. Returns the name and the
    /// number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(HfsName, usize)> {
        let Some(len) = bytes.get(..2) else {
            return Err(Error::invalid("name", "missing length"));
        };
        let count = u16::from_be_bytes([len[0], len[1]]) as usize;
        if count > MAX_NAME_LEN {
            return Err(Error::invalid("name", format!("length {count} exceeds 255")));
        }
        let end = 2 + count * 2;
        let Some(raw) = bytes.get(2..end) else {
            return Err(Error::invalid(
                "name",
                format!("{count} units do not fit in {} bytes", bytes.len()),
            ));
        };
        let units = raw
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        Ok((HfsName(units), end))
    }

    /// Append the on-disk form: big-endian length, then big-endian units.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.0.len() as u16).to_be_bytes());
        for unit in &self.0 {
            out.extend_from_slice(&unit.to_be_bytes());
        }
    }

    /// Encoded size in bytes, including the length prefix.
    pub fn encoded_len(&self) -> usize {
        2 + 2 * self.0.len()
    }

    /// The name as a POSIX path component. HFS+ stores `/` where the POSIX
    /// view shows `:`.
    pub fn to_posix(&self) -> String {
        self.to_string().replace('/', ":")
    }

    /// Parse a POSIX path component, mapping `:` back to `/`.
    pub fn from_posix(component: &str) -> HfsName {
        HfsName::from(component.replace(':', "/").as_str())
    }
}

impl From<&str> for HfsName {
    fn from(value: &str) -> Self {
        HfsName(value.encode_utf16().collect())
    }
}

impl fmt::Display for HfsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf16_lossy(&self.0))
    }
}

impl fmt::Debug for HfsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf16_lossy(&self.0))
    }
}

/// Code points that `FastUnicodeCompare` skips entirely.
fn is_ignorable(unit: u16) -> bool {
    matches!(unit, 0x200C..=0x200F | 0x202A..=0x202E | 0x206A..=0x206F | 0xFEFF)
}

/// Case fold one code unit. Returns 0 for ignorable units. NUL folds to
/// 0xFFFF so that it sorts after everything else.
pub fn fold_unit(unit: u16) -> u16 {
    if unit == 0 {
        return 0xFFFF;
    }
    if is_ignorable(unit) {
        return 0;
    }
    let Some(c) = char::from_u32(unit as u32) else {
        // Lone surrogate halves compare as themselves.
        return unit;
    };
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => u16::try_from(l as u32).unwrap_or(unit),
        _ => unit,
    }
}

/// Case-insensitive HFS+ name order.
pub fn compare_case_folding(a: &[u16], b: &[u16]) -> Ordering {
    let folded = |units: &[u16]| {
        units
            .iter()
            .map(|&u| fold_unit(u))
            .filter(|&u| u != 0)
            .collect::<Vec<u16>>()
    };
    folded(a).cmp(&folded(b))
}

/// HFSX binary order: unit by unit, shorter first.
pub fn compare_binary(a: &[u16], b: &[u16]) -> Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fold_cmp(a: &str, b: &str) -> Ordering {
        compare_case_folding(HfsName::from(a).units(), HfsName::from(b).units())
    }

    #[test]
    fn case_is_ignored() {
        assert_eq!(fold_cmp("Report.TXT", "report.txt"), Ordering::Equal);
        assert_eq!(fold_cmp("apple", "Banana"), Ordering::Less);
        assert_eq!(fold_cmp("ÉTÉ", "été"), Ordering::Equal);
    }

    #[test]
    fn ignorable_code_points_are_skipped() {
        assert_eq!(fold_cmp("ab\u{200D}c", "abc"), Ordering::Equal);
        assert_eq!(fold_cmp("\u{FEFF}x", "x"), Ordering::Equal);
    }

    #[test]
    fn prefixes_and_nul() {
        assert_eq!(fold_cmp("", "a"), Ordering::Less);
        assert_eq!(fold_cmp("abc", "abcd"), Ordering::Less);
        assert_eq!(fold_cmp("a\u{0}", "az"), Ordering::Greater);
    }

    #[test]
    fn binary_order_respects_case() {
        let upper = HfsName::from("A");
        let lower = HfsName::from("a");
        assert_eq!(compare_binary(upper.units(), lower.units()), Ordering::Less);
        assert_ne!(compare_binary(upper.units(), lower.units()), Ordering::Equal);
    }

    #[test]
    fn decode_and_posix_mapping() {
        let name = HfsName::from("a/b");
        let mut buf = Vec::new();
        name.encode(&mut buf);
        buf.push(0xAA);

        let (decoded, used) = HfsName::decode(&buf).unwrap();
        assert_eq!(used, name.encoded_len());
        assert_eq!(decoded, name);
        assert_eq!(decoded.to_posix(), "a:b");
        assert_eq!(HfsName::from_posix("a:b"), name);
    }

    #[test]
    fn decode_rejects_truncated_names() {
        assert!(HfsName::decode(&[0x00]).is_err());
        assert!(HfsName::decode(&[0x00, 0x03, 0x00, 0x41]).is_err());
        assert!(HfsName::decode(&[0x01, 0x00]).is_err());
    }

    proptest! {
        #[test]
        fn case_folding_is_antisymmetric(a in "\\PC{0,12}", b in "\\PC{0,12}") {
            let (a, b) = (HfsName::from(a.as_str()), HfsName::from(b.as_str()));
            prop_assert_eq!(
                compare_case_folding(a.units(), b.units()),
                compare_case_folding(b.units(), a.units()).reverse()
            );
        }

        #[test]
        fn case_folding_ignores_ascii_case(s in "[a-zA-Z0-9 ._-]{0,20}") {
            let upper = HfsName::from(s.to_ascii_uppercase().as_str());
            let lower = HfsName::from(s.to_ascii_lowercase().as_str());
            prop_assert_eq!(compare_case_folding(upper.units(), lower.units()), Ordering::Equal);
        }
    }
}
