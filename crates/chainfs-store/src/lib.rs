#![forbid(unsafe_code)]
//! Linked fixed-size data blocks.
//!
//! The store owns the image's array of 50-byte payload blocks and the
//! singly-linked chains threaded through them via `next` links. A `next`
//! of 0 terminates a chain; block 0 is the root directory's head and is
//! never a link target. Chains only grow and shrink at the tail, and a
//! block leaving a chain is zeroed so image dumps stay zero-padded.

use chainfs_error::{ChainFsError, Result};
use chainfs_types::{BLOCK_PAYLOAD, BLOCK_WIRE_SIZE, BlockIndex, ParseError, ensure_slice};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    next: BlockIndex,
    occupied: u8,
    payload: [u8; BLOCK_PAYLOAD],
}

impl Block {
    fn zeroed() -> Self {
        Self {
            next: BlockIndex(0),
            occupied: 0,
            payload: [0; BLOCK_PAYLOAD],
        }
    }

    fn clear(&mut self) {
        *self = Self::zeroed();
    }
}

/// The image's data block array plus chain bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStore {
    blocks: Vec<Block>,
}

impl BlockStore {
    /// A store of `len` zeroed blocks (fresh-image state).
    #[must_use]
    pub fn zeroed(len: u16) -> Self {
        Self {
            blocks: vec![Block::zeroed(); usize::from(len)],
        }
    }

    /// Number of blocks in the store.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u16 {
        self.blocks.len() as u16
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn block(&self, idx: BlockIndex) -> Result<&Block> {
        self.blocks
            .get(idx.index())
            .ok_or_else(|| ChainFsError::Corrupt(format!("block {idx} out of range")))
    }

    fn block_mut(&mut self, idx: BlockIndex) -> Result<&mut Block> {
        let len = self.len();
        self.blocks
            .get_mut(idx.index())
            .ok_or_else(|| ChainFsError::Corrupt(format!("block {idx} out of range (of {len})")))
    }

    /// Every block index on the chain starting at `head`, head first.
    ///
    /// Rejects out-of-range links and cyclic chains (a chain can never be
    /// longer than the store).
    pub fn chain_blocks(&self, head: BlockIndex) -> Result<Vec<BlockIndex>> {
        let mut indices = Vec::new();
        let mut cursor = head;

        loop {
            if indices.len() >= self.blocks.len() {
                return Err(ChainFsError::Corrupt(format!(
                    "cyclic block chain at head {head}"
                )));
            }
            indices.push(cursor);
            let next = self.block(cursor)?.next;
            if next.is_end() {
                return Ok(indices);
            }
            cursor = next;
        }
    }

    /// Total payload capacity of the chain at `head`.
    pub fn capacity(&self, head: BlockIndex) -> Result<usize> {
        Ok(self.chain_blocks(head)?.len() * BLOCK_PAYLOAD)
    }

    /// Concatenated valid payload bytes of the chain at `head`.
    pub fn read_chain(&self, head: BlockIndex) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        for idx in self.chain_blocks(head)? {
            let block = self.block(idx)?;
            content.extend_from_slice(&block.payload[..usize::from(block.occupied)]);
        }
        Ok(content)
    }

    /// Write `content` across the chain at `head`.
    ///
    /// The chain's capacity must already fit the content; callers reshape
    /// first. Intermediate blocks fill completely, the final written block
    /// keeps the remainder, and an empty content leaves the head with
    /// `occupied = 0`.
    pub fn write_chain(&mut self, head: BlockIndex, content: &[u8]) -> Result<()> {
        let indices = self.chain_blocks(head)?;
        if content.len() > indices.len() * BLOCK_PAYLOAD {
            return Err(ChainFsError::Corrupt(format!(
                "content of {} bytes exceeds chain capacity {}",
                content.len(),
                indices.len() * BLOCK_PAYLOAD
            )));
        }

        let mut chunks = content.chunks(BLOCK_PAYLOAD);
        for idx in indices {
            let chunk = chunks.next().unwrap_or(&[]);
            let block = self.block_mut(idx)?;
            block.payload[..chunk.len()].copy_from_slice(chunk);
            #[expect(clippy::cast_possible_truncation)]
            {
                block.occupied = chunk.len() as u8;
            }
        }
        trace!(target: "chainfs::store", head = head.0, bytes = content.len(), "write_chain");
        Ok(())
    }

    /// Link the zeroed block `new` onto the tail of the chain at `head`.
    pub fn append_block(&mut self, head: BlockIndex, new: BlockIndex) -> Result<()> {
        if new.is_end() {
            return Err(ChainFsError::Corrupt(
                "block 0 cannot be linked into a chain".to_owned(),
            ));
        }
        self.block(new)?;

        let tail = self
            .chain_blocks(head)?
            .last()
            .copied()
            .ok_or_else(|| ChainFsError::Corrupt(format!("empty chain at head {head}")))?;
        self.block_mut(new)?.clear();
        self.block_mut(tail)?.next = new;
        debug!(target: "chainfs::store", head = head.0, block = new.0, "chain grew");
        Ok(())
    }

    /// Unlink and return the tail block of the chain at `head`.
    ///
    /// The head itself can never be removed; the freed block is zeroed.
    pub fn pop_block(&mut self, head: BlockIndex) -> Result<BlockIndex> {
        let indices = self.chain_blocks(head)?;
        let [.., before_tail, tail] = indices.as_slice() else {
            return Err(ChainFsError::Corrupt(format!(
                "cannot shrink the single-block chain at head {head}"
            )));
        };
        let (before_tail, tail) = (*before_tail, *tail);

        self.block_mut(before_tail)?.next = BlockIndex(0);
        self.block_mut(tail)?.clear();
        debug!(target: "chainfs::store", head = head.0, block = tail.0, "chain shrank");
        Ok(tail)
    }

    /// Zero every block of the chain at `head` and return all freed
    /// indices, head included.
    pub fn free_chain(&mut self, head: BlockIndex) -> Result<Vec<BlockIndex>> {
        let indices = self.chain_blocks(head)?;
        for idx in &indices {
            self.block_mut(*idx)?.clear();
        }
        debug!(target: "chainfs::store", head = head.0, blocks = indices.len(), "chain freed");
        Ok(indices)
    }

    // ── Wire codec ──────────────────────────────────────────────────────

    /// Decode `count` blocks at `offset`; returns the store and the next
    /// offset. Each block is `next` (u16 LE), `occupied` (u8), then the
    /// payload bytes.
    pub fn decode(
        data: &[u8],
        offset: usize,
        count: u16,
    ) -> std::result::Result<(Self, usize), ParseError> {
        let mut blocks = Vec::with_capacity(usize::from(count));
        let mut cursor = offset;

        for _ in 0..count {
            let raw = ensure_slice(data, cursor, BLOCK_WIRE_SIZE)?;
            let next = u16::from_le_bytes([raw[0], raw[1]]);
            let occupied = raw[2];

            if usize::from(next) >= usize::from(count) {
                return Err(ParseError::InvalidField {
                    field: "next",
                    reason: "link beyond the block array",
                });
            }
            if usize::from(occupied) > BLOCK_PAYLOAD {
                return Err(ParseError::InvalidField {
                    field: "occupied",
                    reason: "exceeds block payload",
                });
            }

            let mut payload = [0u8; BLOCK_PAYLOAD];
            payload.copy_from_slice(&raw[3..]);
            blocks.push(Block {
                next: BlockIndex(next),
                occupied,
                payload,
            });
            cursor += BLOCK_WIRE_SIZE;
        }

        Ok((Self { blocks }, cursor))
    }

    /// Append the wire form of every block to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for block in &self.blocks {
            out.extend_from_slice(&block.next.0.to_le_bytes());
            out.push(block.occupied);
            out.extend_from_slice(&block.payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store with a 3-block chain at head 0 (blocks 0 → 1 → 2).
    fn chained_store() -> BlockStore {
        let mut store = BlockStore::zeroed(6);
        store.append_block(BlockIndex(0), BlockIndex(1)).unwrap();
        store.append_block(BlockIndex(0), BlockIndex(2)).unwrap();
        store
    }

    #[test]
    fn fresh_store_is_all_single_chains() {
        let store = BlockStore::zeroed(4);
        assert_eq!(store.capacity(BlockIndex(0)).unwrap(), BLOCK_PAYLOAD);
        assert_eq!(store.read_chain(BlockIndex(0)).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn write_then_read_roundtrips_across_blocks() {
        let mut store = chained_store();
        let content: Vec<u8> = (0..120).collect();
        store.write_chain(BlockIndex(0), &content).unwrap();
        assert_eq!(store.read_chain(BlockIndex(0)).unwrap(), content);
    }

    #[test]
    fn write_sets_occupied_per_block() {
        let mut store = chained_store();
        store.write_chain(BlockIndex(0), &[7u8; 70]).unwrap();
        assert_eq!(store.blocks[0].occupied, 50);
        assert_eq!(store.blocks[1].occupied, 20);
        assert_eq!(store.blocks[2].occupied, 0);
    }

    #[test]
    fn empty_write_clears_head_occupancy() {
        let mut store = BlockStore::zeroed(2);
        store.write_chain(BlockIndex(0), b"hello").unwrap();
        store.write_chain(BlockIndex(0), &[]).unwrap();
        assert_eq!(store.blocks[0].occupied, 0);
        assert_eq!(store.read_chain(BlockIndex(0)).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn write_rejects_overflow() {
        let mut store = BlockStore::zeroed(2);
        assert!(store.write_chain(BlockIndex(0), &[0u8; 51]).is_err());
    }

    #[test]
    fn append_walks_to_the_tail() {
        let store = chained_store();
        assert_eq!(
            store.chain_blocks(BlockIndex(0)).unwrap(),
            vec![BlockIndex(0), BlockIndex(1), BlockIndex(2)]
        );
        assert_eq!(store.capacity(BlockIndex(0)).unwrap(), 150);
    }

    #[test]
    fn append_rejects_block_zero() {
        let mut store = BlockStore::zeroed(3);
        assert!(store.append_block(BlockIndex(1), BlockIndex(0)).is_err());
    }

    #[test]
    fn pop_removes_and_zeroes_the_tail() {
        let mut store = chained_store();
        store.write_chain(BlockIndex(0), &[9u8; 120]).unwrap();

        let freed = store.pop_block(BlockIndex(0)).unwrap();
        assert_eq!(freed, BlockIndex(2));
        assert_eq!(store.blocks[2], Block::zeroed());
        assert_eq!(store.blocks[1].next, BlockIndex(0));
        assert_eq!(store.capacity(BlockIndex(0)).unwrap(), 100);
    }

    #[test]
    fn pop_refuses_single_block_chain() {
        let mut store = BlockStore::zeroed(2);
        assert!(matches!(
            store.pop_block(BlockIndex(0)),
            Err(ChainFsError::Corrupt(_))
        ));
    }

    #[test]
    fn free_chain_returns_every_index_and_zeroes() {
        let mut store = chained_store();
        store.write_chain(BlockIndex(0), &[1u8; 120]).unwrap();

        let freed = store.free_chain(BlockIndex(0)).unwrap();
        assert_eq!(freed, vec![BlockIndex(0), BlockIndex(1), BlockIndex(2)]);
        for block in &store.blocks {
            assert_eq!(*block, Block::zeroed());
        }
    }

    #[test]
    fn cyclic_chain_is_reported_corrupt() {
        let mut store = BlockStore::zeroed(3);
        store.append_block(BlockIndex(1), BlockIndex(2)).unwrap();
        store.blocks[2].next = BlockIndex(1);
        assert!(matches!(
            store.read_chain(BlockIndex(1)),
            Err(ChainFsError::Corrupt(_))
        ));
    }

    #[test]
    fn wire_roundtrip() {
        let mut store = chained_store();
        store.write_chain(BlockIndex(0), &[42u8; 60]).unwrap();

        let mut wire = Vec::new();
        store.encode_into(&mut wire);
        assert_eq!(wire.len(), 6 * BLOCK_WIRE_SIZE);

        let (decoded, next) = BlockStore::decode(&wire, 0, 6).expect("decode");
        assert_eq!(next, wire.len());
        assert_eq!(decoded, store);
    }

    #[test]
    fn decode_rejects_bad_occupied_and_links() {
        let mut wire = Vec::new();
        BlockStore::zeroed(2).encode_into(&mut wire);
        wire[2] = 51; // occupied beyond payload
        assert!(BlockStore::decode(&wire, 0, 2).is_err());

        wire[2] = 0;
        wire[0] = 5; // next outside the 2-block array
        assert!(BlockStore::decode(&wire, 0, 2).is_err());
    }
}
