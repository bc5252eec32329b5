#![forbid(unsafe_code)]
//! Bit-exact image codec.
//!
//! An image is four sections, in order, no padding, all integers
//! little-endian:
//!
//! ```text
//! [inode_alloc]  u16 N ; N × u8 status
//! [inodes]       N × { u8 is_dir ; u8 refcount ; u16 head }
//! [block_alloc]  u16 N ; N × u8 status
//! [blocks]       N × { u16 next ; u8 occupied ; 50 × u8 payload }
//! ```
//!
//! Total size is exactly `59N + 4` bytes. Dumps serialise all state, not
//! a delta. The host file is read whole at startup and rewritten whole at
//! shutdown; those two touchpoints live here as well.

use chainfs_alloc::Allocator;
use chainfs_error::{ChainFsError, Result};
use chainfs_inode::InodeTable;
use chainfs_store::BlockStore;
use chainfs_types::{image_wire_size, slot_count_for_budget};
use std::path::Path;
use tracing::debug;

/// Decoded image state: both allocators, the inode table, and the block
/// array. The engine crate owns one of these per mounted image.
#[derive(Debug, Clone)]
pub struct Image {
    pub inode_alloc: Allocator,
    pub inodes: InodeTable,
    pub block_alloc: Allocator,
    pub store: BlockStore,
}

impl Image {
    /// Synthesise a fresh image for a byte budget: `N = budget / 4` slots,
    /// slot 0 of each allocator reserved, inode 0 the empty root directory,
    /// every block zeroed.
    pub fn empty(budget_bytes: u64) -> Result<Self> {
        let n = slot_count_for_budget(budget_bytes);
        if n == 0 {
            return Err(ChainFsError::Format(format!(
                "budget of {budget_bytes} bytes is below one slot (need at least 4)"
            )));
        }

        Ok(Self {
            inode_alloc: Allocator::with_root_reserved(n),
            inodes: InodeTable::with_root_directory(n),
            block_alloc: Allocator::with_root_reserved(n),
            store: BlockStore::zeroed(n),
        })
    }

    /// Number of inode slots (= number of data blocks).
    #[must_use]
    pub fn slot_count(&self) -> u16 {
        self.inode_alloc.len()
    }

    /// Decode a full image from its wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (inode_alloc, offset) = Allocator::decode(bytes, 0)?;
        let n = inode_alloc.len();

        let (inodes, offset) = InodeTable::decode(bytes, offset, n)?;

        let (block_alloc, offset) = Allocator::decode(bytes, offset)?;
        if block_alloc.len() != n {
            return Err(ChainFsError::Format(format!(
                "allocator sizes disagree: {n} inode slots vs {} block slots",
                block_alloc.len()
            )));
        }

        let (store, offset) = BlockStore::decode(bytes, offset, n)?;
        if offset != bytes.len() {
            return Err(ChainFsError::Format(format!(
                "{} trailing bytes after the block array",
                bytes.len() - offset
            )));
        }

        Ok(Self {
            inode_alloc,
            inodes,
            block_alloc,
            store,
        })
    }

    /// Encode the full image into its wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(image_wire_size(self.slot_count()));
        self.inode_alloc.encode_into(&mut out);
        self.inodes.encode_into(&mut out);
        self.block_alloc.encode_into(&mut out);
        self.store.encode_into(&mut out);
        out
    }
}

/// Synthesise the wire form of a fresh image directly.
pub fn make_empty(budget_bytes: u64) -> Result<Vec<u8>> {
    Ok(Image::empty(budget_bytes)?.encode())
}

/// Read and decode an image from a host file.
pub fn load_image_file(path: impl AsRef<Path>) -> Result<Image> {
    let bytes = std::fs::read(path.as_ref())?;
    debug!(
        target: "chainfs::image",
        path = %path.as_ref().display(),
        bytes = bytes.len(),
        "image loaded"
    );
    Image::decode(&bytes)
}

/// Encode and write an image to a host file, replacing its contents.
pub fn store_image_file(path: impl AsRef<Path>, image: &Image) -> Result<()> {
    let bytes = image.encode();
    std::fs::write(path.as_ref(), &bytes)?;
    debug!(
        target: "chainfs::image",
        path = %path.as_ref().display(),
        bytes = bytes.len(),
        "image stored"
    );
    Ok(())
}
