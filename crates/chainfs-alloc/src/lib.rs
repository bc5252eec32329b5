#![forbid(unsafe_code)]
//! Free-slot bookkeeping.
//!
//! One `Allocator` instance tracks the inode slots, another the data
//! blocks; the two are structurally identical. Allocation hands out the
//! lowest free index, guided by a cached `first_free` hint that may lag
//! behind the truth and is corrected by a forward scan.

use chainfs_error::{ChainFsError, Result};
use chainfs_types::{ALLOC_HEADER_SIZE, ParseError, ensure_slice, read_le_u16};
use tracing::trace;

/// Wire byte for a free slot.
const FREE_BYTE: u8 = b'1';
/// Wire byte for a used slot.
const USED_BYTE: u8 = b'0';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Used,
}

/// Totals reported by [`Allocator::usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorUsage {
    pub total: u16,
    pub free: u16,
}

/// Slot allocator with a first-fit hint.
///
/// Invariant: `first_free` is at or before the lowest free slot. Slot 0 is
/// reserved for the root and never handed out.
#[derive(Debug, Clone)]
pub struct Allocator {
    first_free: u16,
    slots: Vec<SlotState>,
}

impl Allocator {
    /// Fresh allocator with slot 0 recorded as used (reserved for the root).
    #[must_use]
    pub fn with_root_reserved(len: u16) -> Self {
        let mut slots = vec![SlotState::Free; usize::from(len)];
        if let Some(first) = slots.first_mut() {
            *first = SlotState::Used;
        }
        Self {
            first_free: u16::from(len > 0),
            slots,
        }
    }

    /// Number of slots managed by this allocator.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u16 {
        self.slots.len() as u16
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether slot `idx` is currently free. Out-of-range reads as used.
    #[must_use]
    pub fn is_free(&self, idx: u16) -> bool {
        self.slots.get(usize::from(idx)) == Some(&SlotState::Free)
    }

    /// Advance the hint to the lowest free slot and return it, or `None`
    /// when every slot is taken. Does not mark; callers confirm with
    /// [`Allocator::mark_used`]. Lowest index always wins.
    pub fn next_free(&mut self) -> Option<u16> {
        while usize::from(self.first_free) < self.slots.len()
            && self.slots[usize::from(self.first_free)] == SlotState::Used
        {
            self.first_free += 1;
        }

        if usize::from(self.first_free) < self.slots.len() {
            Some(self.first_free)
        } else {
            None
        }
    }

    /// Record slot `idx` as used.
    pub fn mark_used(&mut self, idx: u16) -> Result<()> {
        let slot = self
            .slots
            .get_mut(usize::from(idx))
            .ok_or_else(|| ChainFsError::Corrupt(format!("slot {idx} out of range")))?;

        if *slot == SlotState::Used {
            return Err(ChainFsError::Corrupt(format!(
                "slot {idx} is already in use"
            )));
        }

        *slot = SlotState::Used;
        trace!(target: "chainfs::alloc", slot = idx, "mark_used");
        Ok(())
    }

    /// Return slot `idx` to the free pool. Slot 0 is never released.
    pub fn release(&mut self, idx: u16) -> Result<()> {
        if idx == 0 || idx >= self.len() {
            return Err(ChainFsError::Corrupt(format!(
                "cannot release reserved or out-of-range slot {idx}"
            )));
        }

        let slot = &mut self.slots[usize::from(idx)];
        if *slot == SlotState::Free {
            return Err(ChainFsError::Corrupt(format!(
                "double release of slot {idx}"
            )));
        }

        *slot = SlotState::Free;
        self.first_free = self.first_free.min(idx);
        trace!(target: "chainfs::alloc", slot = idx, "release");
        Ok(())
    }

    /// Slot totals for the `info` surface.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn usage(&self) -> AllocatorUsage {
        let free = self
            .slots
            .iter()
            .filter(|s| **s == SlotState::Free)
            .count() as u16;
        AllocatorUsage {
            total: self.len(),
            free,
        }
    }

    // ── Wire codec ──────────────────────────────────────────────────────

    /// Decode an allocator section at `offset`: u16 LE slot count, then one
    /// status byte per slot. Returns the allocator and the next offset.
    pub fn decode(data: &[u8], offset: usize) -> std::result::Result<(Self, usize), ParseError> {
        let len = read_le_u16(data, offset)?;
        let status = ensure_slice(data, offset + ALLOC_HEADER_SIZE, usize::from(len))?;

        let mut slots = Vec::with_capacity(usize::from(len));
        for byte in status {
            slots.push(match *byte {
                FREE_BYTE => SlotState::Free,
                USED_BYTE => SlotState::Used,
                _ => {
                    return Err(ParseError::InvalidField {
                        field: "slot_state",
                        reason: "expected '0' or '1'",
                    });
                }
            });
        }

        let mut alloc = Self {
            first_free: 0,
            slots,
        };
        // Settle the hint on the lowest free slot up front.
        let _ = alloc.next_free();
        Ok((alloc, offset + ALLOC_HEADER_SIZE + usize::from(len)))
    }

    /// Append the wire form of this allocator to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.len().to_le_bytes());
        out.extend(self.slots.iter().map(|s| match s {
            SlotState::Free => FREE_BYTE,
            SlotState::Used => USED_BYTE,
        }));
    }
}
