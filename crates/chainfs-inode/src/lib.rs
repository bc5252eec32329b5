#![forbid(unsafe_code)]
//! The inode table.
//!
//! A homogeneous array of `{kind, refcount, head}` records indexed by
//! `InodeIndex`. No allocation policy lives here; the table only mutates
//! the slot it is told to. Refcounts are checked on both edges; a wrap
//! would silently change which inodes count as live.

use chainfs_error::{ChainFsError, Result};
use chainfs_types::{BlockIndex, INODE_WIRE_SIZE, InodeIndex, ParseError, ensure_slice};

/// What an inode stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

impl InodeKind {
    fn to_wire(self) -> u8 {
        match self {
            Self::File => 0,
            Self::Directory => 1,
        }
    }

    fn from_wire(byte: u8) -> std::result::Result<Self, ParseError> {
        match byte {
            0 => Ok(Self::File),
            1 => Ok(Self::Directory),
            _ => Err(ParseError::InvalidField {
                field: "is_dir",
                reason: "expected 0 or 1",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Inode {
    kind: InodeKind,
    refcount: u8,
    head: BlockIndex,
}

impl Inode {
    fn dead() -> Self {
        Self {
            kind: InodeKind::File,
            refcount: 0,
            head: BlockIndex(0),
        }
    }
}

/// The image's inode array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeTable {
    nodes: Vec<Inode>,
}

impl InodeTable {
    /// Fresh table: inode 0 is the root directory (refcount 0, head 0),
    /// every other slot is dead.
    #[must_use]
    pub fn with_root_directory(len: u16) -> Self {
        let mut nodes = vec![Inode::dead(); usize::from(len)];
        if let Some(root) = nodes.first_mut() {
            root.kind = InodeKind::Directory;
        }
        Self { nodes }
    }

    /// Number of inode slots.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u16 {
        self.nodes.len() as u16
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, idx: InodeIndex) -> Result<&Inode> {
        self.nodes
            .get(idx.index())
            .ok_or_else(|| ChainFsError::Corrupt(format!("inode {idx} out of range")))
    }

    fn node_mut(&mut self, idx: InodeIndex) -> Result<&mut Inode> {
        self.nodes
            .get_mut(idx.index())
            .ok_or_else(|| ChainFsError::Corrupt(format!("inode {idx} out of range")))
    }

    /// Publish a new inode in slot `idx`.
    ///
    /// Files start with refcount 1 (the directory entry about to be
    /// recorded); directories start at 0 and receive their parent-link
    /// increment from the engine once the entry exists.
    pub fn create(&mut self, idx: InodeIndex, kind: InodeKind, head: BlockIndex) -> Result<()> {
        let node = self.node_mut(idx)?;
        node.kind = kind;
        node.refcount = match kind {
            InodeKind::File => 1,
            InodeKind::Directory => 0,
        };
        node.head = head;
        Ok(())
    }

    pub fn kind(&self, idx: InodeIndex) -> Result<InodeKind> {
        Ok(self.node(idx)?.kind)
    }

    pub fn is_dir(&self, idx: InodeIndex) -> Result<bool> {
        Ok(self.node(idx)?.kind == InodeKind::Directory)
    }

    pub fn refcount(&self, idx: InodeIndex) -> Result<u8> {
        Ok(self.node(idx)?.refcount)
    }

    /// Head block of the inode's chain.
    pub fn head(&self, idx: InodeIndex) -> Result<BlockIndex> {
        Ok(self.node(idx)?.head)
    }

    pub fn incref(&mut self, idx: InodeIndex) -> Result<()> {
        let node = self.node_mut(idx)?;
        node.refcount = node
            .refcount
            .checked_add(1)
            .ok_or_else(|| ChainFsError::Corrupt(format!("refcount overflow on inode {idx}")))?;
        Ok(())
    }

    /// Decrement and return the new refcount.
    pub fn decref(&mut self, idx: InodeIndex) -> Result<u8> {
        let node = self.node_mut(idx)?;
        node.refcount = node
            .refcount
            .checked_sub(1)
            .ok_or_else(|| ChainFsError::Corrupt(format!("refcount underflow on inode {idx}")))?;
        Ok(node.refcount)
    }

    // ── Wire codec ──────────────────────────────────────────────────────

    /// Decode `count` inodes at `offset`: `is_dir` (u8), `refcount` (u8),
    /// `head` (u16 LE) each. Returns the table and the next offset.
    pub fn decode(
        data: &[u8],
        offset: usize,
        count: u16,
    ) -> std::result::Result<(Self, usize), ParseError> {
        let mut nodes = Vec::with_capacity(usize::from(count));
        let mut cursor = offset;

        for _ in 0..count {
            let raw = ensure_slice(data, cursor, INODE_WIRE_SIZE)?;
            let kind = InodeKind::from_wire(raw[0])?;
            let head = u16::from_le_bytes([raw[2], raw[3]]);
            if head >= count {
                return Err(ParseError::InvalidField {
                    field: "head",
                    reason: "head block beyond the block array",
                });
            }
            nodes.push(Inode {
                kind,
                refcount: raw[1],
                head: BlockIndex(head),
            });
            cursor += INODE_WIRE_SIZE;
        }

        Ok((Self { nodes }, cursor))
    }

    /// Append the wire form of every inode to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for node in &self.nodes {
            out.push(node.kind.to_wire());
            out.push(node.refcount);
            out.extend_from_slice(&node.head.0.to_le_bytes());
        }
    }
}
