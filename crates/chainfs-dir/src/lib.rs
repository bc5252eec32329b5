#![forbid(unsafe_code)]
//! Directory payload codec.
//!
//! A directory's chain payload is a concatenation of variable-length
//! records: the entry name's bytes, a NUL terminator, then the entry's
//! inode index as u16 little-endian. Pure functions over that byte form
//! and the decoded `(name, inode)` list; nothing here touches storage.
//!
//! Names are byte strings. The codec accepts anything the wire can hold;
//! keeping NUL and `/` out of names is the path layer's job.

use chainfs_error::{ChainFsError, Result};
use chainfs_types::{InodeIndex, ParseError};

/// One decoded directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub inode: InodeIndex,
}

impl DirEntry {
    /// The name as a UTF-8 string (lossy), for display surfaces.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Decode a directory payload into its entry list.
pub fn decode(bytes: &[u8]) -> std::result::Result<Vec<DirEntry>, ParseError> {
    let mut entries = Vec::new();
    let mut cursor = 0;

    while cursor < bytes.len() {
        let Some(nul) = bytes[cursor..].iter().position(|b| *b == 0) else {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "unterminated directory entry name",
            });
        };
        let name = bytes[cursor..cursor + nul].to_vec();
        let inode = chainfs_types::read_le_u16(bytes, cursor + nul + 1)?;

        entries.push(DirEntry {
            name,
            inode: InodeIndex(inode),
        });
        cursor += nul + 3;
    }

    Ok(entries)
}

/// Encode an entry list back into the wire payload.
#[must_use]
pub fn encode(entries: &[DirEntry]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(entries.iter().map(|e| e.name.len() + 3).sum());
    for entry in entries {
        bytes.extend_from_slice(&entry.name);
        bytes.push(0);
        bytes.extend_from_slice(&entry.inode.0.to_le_bytes());
    }
    bytes
}

/// Inode index of the first entry named `name`, if any.
#[must_use]
pub fn lookup(entries: &[DirEntry], name: &[u8]) -> Option<InodeIndex> {
    entries.iter().find(|e| e.name == name).map(|e| e.inode)
}

/// Append an entry; duplicate names are rejected.
pub fn add(entries: &mut Vec<DirEntry>, name: &[u8], inode: InodeIndex) -> Result<()> {
    if lookup(entries, name).is_some() {
        return Err(ChainFsError::AlreadyExists(
            String::from_utf8_lossy(name).into_owned(),
        ));
    }
    entries.push(DirEntry {
        name: name.to_vec(),
        inode,
    });
    Ok(())
}

/// Remove the entry named `name`.
pub fn remove(entries: &mut Vec<DirEntry>, name: &[u8]) -> Result<()> {
    let position = entries.iter().position(|e| e.name == name).ok_or_else(|| {
        ChainFsError::NotFound(String::from_utf8_lossy(name).into_owned())
    })?;
    entries.remove(position);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(name: &[u8], inode: u16) -> DirEntry {
        DirEntry {
            name: name.to_vec(),
            inode: InodeIndex(inode),
        }
    }

    #[test]
    fn encode_is_name_nul_index_le() {
        let bytes = encode(&[entry(b"ab", 0x0102), entry(b"c", 3)]);
        assert_eq!(bytes, b"ab\x00\x02\x01c\x00\x03\x00");
    }

    #[test]
    fn empty_directory_is_an_empty_payload() {
        assert_eq!(encode(&[]), Vec::<u8>::new());
        assert_eq!(decode(&[]).unwrap(), Vec::<DirEntry>::new());
    }

    #[test]
    fn decode_roundtrips_multiple_entries() {
        let entries = vec![entry(b"etc", 1), entry(b"data.bin", 300), entry(b"x", 2)];
        assert_eq!(decode(&encode(&entries)).unwrap(), entries);
    }

    #[test]
    fn inode_indices_above_255_keep_both_bytes() {
        // Regression guard: the high byte must be the index's high byte,
        // not a copy of the low one.
        let entries = vec![entry(b"f", 0x1234)];
        let bytes = encode(&entries);
        assert_eq!(&bytes[2..], &[0x34, 0x12]);
        assert_eq!(decode(&bytes).unwrap()[0].inode, InodeIndex(0x1234));
    }

    #[test]
    fn decode_rejects_truncated_records() {
        assert!(decode(b"name").is_err()); // no NUL
        assert!(decode(b"name\x00\x01").is_err()); // one index byte
    }

    #[test]
    fn lookup_first_match_wins() {
        let entries = vec![entry(b"a", 1), entry(b"b", 2)];
        assert_eq!(lookup(&entries, b"b"), Some(InodeIndex(2)));
        assert_eq!(lookup(&entries, b"missing"), None);
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut entries = vec![entry(b"a", 1)];
        assert!(matches!(
            add(&mut entries, b"a", InodeIndex(2)),
            Err(ChainFsError::AlreadyExists(_))
        ));
        add(&mut entries, b"b", InodeIndex(2)).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn remove_requires_presence() {
        let mut entries = vec![entry(b"a", 1), entry(b"b", 2)];
        remove(&mut entries, b"a").unwrap();
        assert_eq!(entries, vec![entry(b"b", 2)]);
        assert!(matches!(
            remove(&mut entries, b"a"),
            Err(ChainFsError::NotFound(_))
        ));
    }

    prop_compose! {
        /// Names: non-empty byte strings without NUL or `/`.
        fn dir_name()(bytes in proptest::collection::vec(
            (1u8..=255).prop_filter("no slash", |b| *b != b'/'),
            1..24,
        )) -> Vec<u8> {
            bytes
        }
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            names in proptest::collection::btree_set(dir_name(), 0..12),
            indices in proptest::collection::vec(0u16.., 12),
        ) {
            let entries: Vec<DirEntry> = names
                .into_iter()
                .zip(indices)
                .map(|(name, inode)| DirEntry { name, inode: InodeIndex(inode) })
                .collect();
            prop_assert_eq!(decode(&encode(&entries)).unwrap(), entries);
        }
    }
}
