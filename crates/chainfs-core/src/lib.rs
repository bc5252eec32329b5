#![forbid(unsafe_code)]
//! The file-system engine.
//!
//! `FileSystem` composes the two allocators, the inode table, and the
//! block store into user-level operations: path resolution with
//! auto-created intermediate directories, file and directory creation,
//! append/truncate writes, erase, hard links, and the read-only
//! reporting surface. It is the only layer that mutates more than one
//! of the underlying components in a single operation.
//!
//! Directory state is handled as value snapshots (`DirView`); nothing
//! aliases into the store. A snapshot is edited in memory and written
//! back through the reshape step, which grows or shrinks the backing
//! chain so that at most one trailing block is ever fully unused.

mod path;

pub use path::{PathSpec, split_path};

use chainfs_dir::DirEntry;
use chainfs_error::{ChainFsError, Result};
use chainfs_image::Image;
use chainfs_inode::InodeKind;
use chainfs_types::{BLOCK_PAYLOAD, BlockIndex, InodeIndex};
use serde::Serialize;
use tracing::debug;

/// Value snapshot of one directory: its inode, head block, and decoded
/// entry list. Mutations happen on the snapshot and are persisted
/// explicitly.
#[derive(Debug, Clone)]
pub struct DirView {
    pub ino: InodeIndex,
    pub head: BlockIndex,
    pub entries: Vec<DirEntry>,
}

/// What a name resolves to, for the read-only surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File { content: Vec<u8> },
    Directory { entries: Vec<DirEntry> },
}

/// Sizes reported by `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InfoReport {
    File { size: usize },
    Directory { size: usize, entries: Vec<EntryInfo> },
}

/// One directory entry in an `InfoReport`: files report their payload
/// size, directories the total size of their subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: usize,
}

/// Slot totals of one allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub total: u16,
    pub free: u16,
}

/// Slot totals of both allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocatorReport {
    pub inodes: UsageReport,
    pub blocks: UsageReport,
}

/// The engine: exclusive owner of the image state.
#[derive(Debug, Clone)]
pub struct FileSystem {
    image: Image,
}

impl FileSystem {
    /// Wrap an already-decoded image.
    #[must_use]
    pub fn new(image: Image) -> Self {
        Self { image }
    }

    /// Fresh file system for a byte budget (`budget / 4` slots).
    pub fn create(budget_bytes: u64) -> Result<Self> {
        Ok(Self::new(Image::empty(budget_bytes)?))
    }

    /// Decode an image from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(Image::decode(bytes)?))
    }

    /// Encode the full state back into wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.image.encode()
    }

    /// The underlying image state (read-only).
    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> Image {
        self.image
    }

    // ── Path resolution ─────────────────────────────────────────────────

    fn load_dir(&self, ino: InodeIndex, head: BlockIndex) -> Result<DirView> {
        let payload = self.image.store.read_chain(head)?;
        Ok(DirView {
            ino,
            head,
            entries: chainfs_dir::decode(&payload)?,
        })
    }

    /// Walk `parent` from the root, creating any missing intermediate
    /// directory along the way. A segment that resolves to a file fails
    /// the walk.
    pub fn resolve(&mut self, parent: &[&str]) -> Result<DirView> {
        let mut dir = self.load_dir(InodeIndex::ROOT, BlockIndex::ROOT)?;

        for segment in parent {
            let ino = match chainfs_dir::lookup(&dir.entries, segment.as_bytes()) {
                Some(ino) => ino,
                None => {
                    debug!(target: "chainfs::fs", segment, "auto-creating directory");
                    let ino = self.add_new_entry(&mut dir, segment, InodeKind::Directory)?;
                    self.persist_dir(&dir)?;
                    ino
                }
            };

            if !self.image.inodes.is_dir(ino)? {
                return Err(ChainFsError::NotADirectory((*segment).to_owned()));
            }

            let head = self.image.inodes.head(ino)?;
            dir = self.load_dir(ino, head)?;
        }

        Ok(dir)
    }

    // ── Creation ────────────────────────────────────────────────────────

    /// Create an empty file under `parent`.
    pub fn touch(&mut self, parent: &[&str], name: &str) -> Result<()> {
        self.create_node(parent, name, InodeKind::File)
    }

    /// Create an empty directory under `parent`.
    pub fn mkdir(&mut self, parent: &[&str], name: &str) -> Result<()> {
        self.create_node(parent, name, InodeKind::Directory)
    }

    fn create_node(&mut self, parent: &[&str], name: &str, kind: InodeKind) -> Result<()> {
        let mut dir = self.resolve(parent)?;
        self.add_new_entry(&mut dir, name, kind)?;
        self.persist_dir(&dir)
    }

    /// Allocate an inode and a head block, publish the inode, and record
    /// the entry in the snapshot. The duplicate-name check runs before
    /// any allocator is touched, so a name clash leaves no trace.
    fn add_new_entry(
        &mut self,
        dir: &mut DirView,
        name: &str,
        kind: InodeKind,
    ) -> Result<InodeIndex> {
        if chainfs_dir::lookup(&dir.entries, name.as_bytes()).is_some() {
            return Err(ChainFsError::AlreadyExists(name.to_owned()));
        }

        let ino = self
            .image
            .inode_alloc
            .next_free()
            .ok_or(ChainFsError::OutOfInodes)?;
        let head = self
            .image
            .block_alloc
            .next_free()
            .ok_or(ChainFsError::OutOfBlocks)?;

        self.image.inode_alloc.mark_used(ino)?;
        self.image.block_alloc.mark_used(head)?;

        let ino = InodeIndex(ino);
        self.image.inodes.create(ino, kind, BlockIndex(head))?;
        chainfs_dir::add(&mut dir.entries, name.as_bytes(), ino)?;

        // The parent gained an entry; a new directory additionally gets
        // its parent-link count now that the entry exists.
        self.image.inodes.incref(dir.ino)?;
        if kind == InodeKind::Directory {
            self.image.inodes.incref(ino)?;
        }

        debug!(
            target: "chainfs::fs",
            name,
            inode = ino.0,
            head,
            directory = (kind == InodeKind::Directory),
            "entry created"
        );
        Ok(ino)
    }

    // ── File content ────────────────────────────────────────────────────

    /// Append `data` to the file `name` under `parent`.
    pub fn write(&mut self, parent: &[&str], name: &str, data: &[u8]) -> Result<()> {
        let dir = self.resolve(parent)?;
        let (head, mut content) = self.open_file(&dir, name)?;
        content.extend_from_slice(data);
        self.reshape_flush(head, &content)
    }

    /// Drop the trailing `n` bytes of the file `name` under `parent`.
    /// Cutting more than the file holds empties it.
    pub fn cut(&mut self, parent: &[&str], name: &str, n: usize) -> Result<()> {
        let dir = self.resolve(parent)?;
        let (head, mut content) = self.open_file(&dir, name)?;
        content.truncate(content.len().saturating_sub(n));
        self.reshape_flush(head, &content)
    }

    /// Full payload of the file `name` under `parent`.
    pub fn read(&mut self, parent: &[&str], name: &str) -> Result<Vec<u8>> {
        let dir = self.resolve(parent)?;
        if name == "/" {
            return Err(ChainFsError::IsADirectory(name.to_owned()));
        }
        Ok(self.open_file(&dir, name)?.1)
    }

    fn open_file(&self, dir: &DirView, name: &str) -> Result<(BlockIndex, Vec<u8>)> {
        let ino = chainfs_dir::lookup(&dir.entries, name.as_bytes())
            .ok_or_else(|| ChainFsError::NotFound(name.to_owned()))?;
        if self.image.inodes.is_dir(ino)? {
            return Err(ChainFsError::IsADirectory(name.to_owned()));
        }
        let head = self.image.inodes.head(ino)?;
        Ok((head, self.image.store.read_chain(head)?))
    }

    // ── Erase and link ──────────────────────────────────────────────────

    /// Remove the entry `name` from `parent`.
    ///
    /// Directories must be empty. A file loses one link and is destroyed
    /// with its chain when the last link goes.
    pub fn erase(&mut self, parent: &[&str], name: &str) -> Result<()> {
        let mut dir = self.resolve(parent)?;
        let target = chainfs_dir::lookup(&dir.entries, name.as_bytes())
            .ok_or_else(|| ChainFsError::NotFound(name.to_owned()))?;

        if self.image.inodes.is_dir(target)? {
            let head = self.image.inodes.head(target)?;
            if !self.image.store.read_chain(head)?.is_empty() {
                return Err(ChainFsError::NotEmpty(name.to_owned()));
            }
        }

        // An empty directory's remaining count is exactly the parent
        // link being severed here, so both kinds share the zero check.
        if self.image.inodes.decref(target)? == 0 {
            self.destroy_inode(target)?;
        }

        chainfs_dir::remove(&mut dir.entries, name.as_bytes())?;
        self.persist_dir(&dir)?;
        self.image.inodes.decref(dir.ino)?;
        debug!(target: "chainfs::fs", name, inode = target.0, "entry erased");
        Ok(())
    }

    /// Return an unreferenced inode's chain to the block allocator and
    /// its slot to the inode allocator. The inode record itself keeps
    /// its last value until the slot is reused.
    fn destroy_inode(&mut self, target: InodeIndex) -> Result<()> {
        let head = self.image.inodes.head(target)?;
        for block in self.image.store.free_chain(head)? {
            self.image.block_alloc.release(block.0)?;
        }
        self.image.inode_alloc.release(target.0)?;
        debug!(target: "chainfs::fs", inode = target.0, "inode destroyed");
        Ok(())
    }

    /// Hard-link the file `src_name` (under `src_parent`) as `dst_name`
    /// under `dst_parent`. Directories cannot be linked.
    pub fn link(
        &mut self,
        src_parent: &[&str],
        src_name: &str,
        dst_parent: &[&str],
        dst_name: &str,
    ) -> Result<()> {
        let src_dir = self.resolve(src_parent)?;
        let src = chainfs_dir::lookup(&src_dir.entries, src_name.as_bytes())
            .ok_or_else(|| ChainFsError::NotFound(src_name.to_owned()))?;
        if self.image.inodes.is_dir(src)? {
            return Err(ChainFsError::IsADirectory(src_name.to_owned()));
        }

        let mut dst_dir = self.resolve(dst_parent)?;
        chainfs_dir::add(&mut dst_dir.entries, dst_name.as_bytes(), src)?;
        self.persist_dir(&dst_dir)?;

        self.image.inodes.incref(dst_dir.ino)?;
        self.image.inodes.incref(src)?;
        debug!(target: "chainfs::fs", src_name, dst_name, inode = src.0, "link created");
        Ok(())
    }

    // ── Read-only surface ───────────────────────────────────────────────

    /// Resolve `name` under `parent` to a tagged value. The leaf `/`
    /// stands for the resolved directory itself, so `open(&[], "/")` is
    /// the root listing.
    pub fn open(&mut self, parent: &[&str], name: &str) -> Result<Node> {
        let dir = self.resolve(parent)?;
        if name == "/" {
            return Ok(Node::Directory {
                entries: dir.entries,
            });
        }

        let ino = chainfs_dir::lookup(&dir.entries, name.as_bytes())
            .ok_or_else(|| ChainFsError::NotFound(name.to_owned()))?;
        let head = self.image.inodes.head(ino)?;
        let payload = self.image.store.read_chain(head)?;

        if self.image.inodes.is_dir(ino)? {
            Ok(Node::Directory {
                entries: chainfs_dir::decode(&payload)?,
            })
        } else {
            Ok(Node::File { content: payload })
        }
    }

    /// Size report for `name` under `parent`. Directory entries are
    /// listed with their subtree totals.
    pub fn info(&mut self, parent: &[&str], name: &str) -> Result<InfoReport> {
        let dir = self.resolve(parent)?;

        let ino = if name == "/" {
            dir.ino
        } else {
            chainfs_dir::lookup(&dir.entries, name.as_bytes())
                .ok_or_else(|| ChainFsError::NotFound(name.to_owned()))?
        };

        let head = self.image.inodes.head(ino)?;
        let payload = self.image.store.read_chain(head)?;

        if !self.image.inodes.is_dir(ino)? {
            return Ok(InfoReport::File {
                size: payload.len(),
            });
        }

        let entries = chainfs_dir::decode(&payload)?;
        let mut listed = Vec::with_capacity(entries.len());
        for entry in &entries {
            listed.push(EntryInfo {
                name: entry.name_str(),
                is_dir: self.image.inodes.is_dir(entry.inode)?,
                size: self.tree_size(entry.inode)?,
            });
        }

        Ok(InfoReport::Directory {
            size: payload.len(),
            entries: listed,
        })
    }

    /// Payload size of a file, or the recursive total of a directory:
    /// its own payload plus every child's subtree.
    fn tree_size(&self, ino: InodeIndex) -> Result<usize> {
        let head = self.image.inodes.head(ino)?;
        let payload = self.image.store.read_chain(head)?;

        if !self.image.inodes.is_dir(ino)? {
            return Ok(payload.len());
        }

        let mut size = payload.len();
        for entry in chainfs_dir::decode(&payload)? {
            size += self.tree_size(entry.inode)?;
        }
        Ok(size)
    }

    /// Slot totals of both allocators.
    #[must_use]
    pub fn allocator_info(&self) -> AllocatorReport {
        let inodes = self.image.inode_alloc.usage();
        let blocks = self.image.block_alloc.usage();
        AllocatorReport {
            inodes: UsageReport {
                total: inodes.total,
                free: inodes.free,
            },
            blocks: UsageReport {
                total: blocks.total,
                free: blocks.free,
            },
        }
    }

    // ── Reshape ─────────────────────────────────────────────────────────

    fn persist_dir(&mut self, dir: &DirView) -> Result<()> {
        self.reshape_flush(dir.head, &chainfs_dir::encode(&dir.entries))
    }

    /// Fit the chain at `head` to `content` and write it.
    ///
    /// Growth allocates and appends tail blocks until the content fits;
    /// exhaustion mid-way surfaces as `OutOfBlocks` with the partial
    /// extension left in place. Shrinking pops tail blocks while a full
    /// one is unused, so the chain never carries more than one fully
    /// unused trailing block.
    fn reshape_flush(&mut self, head: BlockIndex, content: &[u8]) -> Result<()> {
        let mut capacity = self.image.store.capacity(head)?;

        while content.len() > capacity {
            let new = self
                .image
                .block_alloc
                .next_free()
                .ok_or(ChainFsError::OutOfBlocks)?;
            self.image.block_alloc.mark_used(new)?;
            self.image.store.append_block(head, BlockIndex(new))?;
            capacity += BLOCK_PAYLOAD;
        }

        while content.len() + BLOCK_PAYLOAD < capacity {
            let freed = self.image.store.pop_block(head)?;
            self.image.block_alloc.release(freed.0)?;
            capacity -= BLOCK_PAYLOAD;
        }

        self.image.store.write_chain(head, content)
    }
}
