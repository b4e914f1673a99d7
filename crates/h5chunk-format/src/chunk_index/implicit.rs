//! Implicit index: no persisted structure, every chunk lives at
//! `base + linear * chunk_bytes` inside a region allocated up front.

use crate::data_layout::{ChunkIndexKind, IndexLocation};
use crate::dataspace::ChunkGrid;
use crate::error::FormatError;

use super::{BlockIo, ChunkIndexEntry, ChunkIndexOps};

#[derive(Debug, Clone)]
pub struct ImplicitIndex {
    grid: ChunkGrid,
    chunk_bytes: u64,
    base_address: Option<u64>,
}

impl ImplicitIndex {
    pub fn new(grid: ChunkGrid, chunk_bytes: u64, base_address: Option<u64>) -> Self {
        Self {
            grid,
            chunk_bytes,
            base_address,
        }
    }

    /// Bytes the pre-allocated region must span.
    pub fn region_size(grid: &ChunkGrid, chunk_bytes: u64) -> u64 {
        grid.num_chunks() * chunk_bytes
    }

    /// Fixed address of `coord`.
    pub fn address_of(&self, coord: &[u64]) -> Result<u64, FormatError> {
        let linear = self.grid.linear_index(coord)?;
        let base = self.base_address.ok_or_else(|| {
            FormatError::UnsupportedLayout("implicit chunk index has no storage region".into())
        })?;
        Ok(base + linear * self.chunk_bytes)
    }
}

impl ChunkIndexOps for ImplicitIndex {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::Implicit
    }

    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError> {
        let linear = self.grid.linear_index(coord)?;
        Ok(match self.base_address {
            Some(base) => ChunkIndexEntry::new(base + linear * self.chunk_bytes, self.chunk_bytes, 0),
            None => ChunkIndexEntry::UNALLOCATED,
        })
    }

    fn upsert(
        &mut self,
        coord: &[u64],
        address: u64,
        stored_size: u64,
        filter_mask: u32,
    ) -> Result<(), FormatError> {
        let expected = self.address_of(coord)?;
        if address != expected || stored_size != self.chunk_bytes || filter_mask != 0 {
            return Err(FormatError::malformed(
                "implicit chunk index",
                format!(
                    "chunk {coord:?} must live at {expected} with {} bytes and no mask, \
                     got {address} with {stored_size} bytes and mask {filter_mask:#x}",
                    self.chunk_bytes
                ),
            ));
        }
        Ok(())
    }

    fn persist(&mut self, _io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError> {
        Ok(IndexLocation::Implicit {
            base_address: self.base_address,
        })
    }

    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)> {
        match self.base_address {
            Some(base) => (0..self.grid.num_chunks())
                .map(|l| (l, ChunkIndexEntry::new(base + l * self.chunk_bytes, self.chunk_bytes, 0)))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_base_plus_linear_offset() {
        let grid = ChunkGrid::new(&[10, 7], &[4, 3]).unwrap();
        let idx = ImplicitIndex::new(grid.clone(), 96, Some(512));
        for linear in 0..grid.num_chunks() {
            let coord = grid.coord_of(linear).unwrap();
            let entry = idx.lookup(&coord).unwrap();
            assert_eq!(entry.address, Some(512 + linear * 96));
            assert_eq!(entry.filter_mask, 0);
            assert_eq!(entry.stored_size, 96);
        }
        assert_eq!(ImplicitIndex::region_size(&grid, 96), 9 * 96);
    }

    #[test]
    fn upsert_must_agree_with_arithmetic() {
        let grid = ChunkGrid::new(&[8], &[4]).unwrap();
        let mut idx = ImplicitIndex::new(grid, 16, Some(100));
        idx.upsert(&[1], 116, 16, 0).unwrap();
        assert!(idx.upsert(&[1], 200, 16, 0).is_err());
        assert!(idx.upsert(&[0], 100, 16, 1).is_err());
    }
}
