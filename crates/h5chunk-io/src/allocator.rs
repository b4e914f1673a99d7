//! Append-only free-space allocation.

use h5chunk_format::error::FormatError;
use tracing::trace;

/// Hands out file space from a moving end-of-allocation mark. Space is
/// never reclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpaceAllocator {
    next: u64,
    limit: Option<u64>,
    alignment: u64,
}

impl FreeSpaceAllocator {
    /// Start allocating at `start` with no limit and byte alignment.
    pub fn new(start: u64) -> Self {
        Self {
            next: start,
            limit: None,
            alignment: 1,
        }
    }

    /// Refuse any allocation that would end past `limit`.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Replace the allocation limit; `None` removes it.
    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    /// Align every returned address to `alignment` bytes (0 is treated
    /// as 1).
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    /// First unallocated byte.
    pub fn end_of_allocation(&self) -> u64 {
        self.next
    }

    /// Bytes still available under the limit, if any.
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|l| l.saturating_sub(self.next))
    }

    /// Reserve `len` bytes and return their address.
    pub fn allocate(&mut self, len: u64) -> Result<u64, FormatError> {
        let address = self.next.div_ceil(self.alignment) * self.alignment;
        let end = address.checked_add(len);
        match (end, self.limit) {
            (Some(end), Some(limit)) if end <= limit => {}
            (Some(_), None) => {}
            _ => {
                return Err(FormatError::AllocationExhausted {
                    requested: len,
                    available: self.remaining().unwrap_or(0),
                })
            }
        }
        self.next = address + len;
        trace!(address, len, "allocated file space");
        Ok(address)
    }
}
