//! Single-chunk index: the only chunk's location is stored directly in the
//! layout message.

use crate::data_layout::{ChunkIndexKind, IndexLocation};
use crate::dataspace::ChunkGrid;
use crate::error::FormatError;

use super::{BlockIo, ChunkIndexEntry, ChunkIndexOps, StoredChunk};

#[derive(Debug, Clone)]
pub struct SingleChunkIndex {
    grid: ChunkGrid,
    chunk_bytes: u64,
    filtered: bool,
    chunk: Option<StoredChunk>,
}

impl SingleChunkIndex {
    /// Fails unless the grid holds exactly one chunk.
    pub fn new(grid: ChunkGrid, chunk_bytes: u64, filtered: bool) -> Result<Self, FormatError> {
        if grid.num_chunks() != 1 {
            return Err(FormatError::UnsupportedLayout(format!(
                "single-chunk index over a grid of {} chunks",
                grid.num_chunks()
            )));
        }
        Ok(Self {
            grid,
            chunk_bytes,
            filtered,
            chunk: None,
        })
    }

    pub fn from_location(
        grid: ChunkGrid,
        chunk_bytes: u64,
        address: Option<u64>,
        filtered: Option<(u64, u32)>,
    ) -> Result<Self, FormatError> {
        let mut idx = Self::new(grid, chunk_bytes, filtered.is_some())?;
        idx.chunk = address.map(|address| {
            let (size, mask) = filtered.unwrap_or((chunk_bytes, 0));
            StoredChunk {
                address,
                size,
                mask,
            }
        });
        Ok(idx)
    }
}

impl ChunkIndexOps for SingleChunkIndex {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::SingleChunk
    }

    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError> {
        self.grid.linear_index(coord)?;
        Ok(StoredChunk::entry(self.chunk.as_ref()))
    }

    fn upsert(
        &mut self,
        coord: &[u64],
        address: u64,
        stored_size: u64,
        filter_mask: u32,
    ) -> Result<(), FormatError> {
        self.grid.linear_index(coord)?;
        if !self.filtered && (stored_size != self.chunk_bytes || filter_mask != 0) {
            return Err(FormatError::UnsupportedLayout(
                "unfiltered single chunk must be stored at its nominal size".into(),
            ));
        }
        self.chunk = Some(StoredChunk {
            address,
            size: stored_size,
            mask: filter_mask,
        });
        Ok(())
    }

    fn persist(&mut self, _io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError> {
        Ok(IndexLocation::SingleChunk {
            address: self.chunk.map(|c| c.address),
            filtered: self
                .filtered
                .then(|| self.chunk.map_or((0, 0), |c| (c.size, c.mask))),
        })
    }

    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)> {
        self.chunk
            .iter()
            .map(|c| (0, StoredChunk::entry(Some(c))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_io::VecBlockIo;
    use super::*;

    #[test]
    fn requires_exactly_one_chunk() {
        let grid = ChunkGrid::new(&[8], &[4]).unwrap();
        assert!(SingleChunkIndex::new(grid, 16, false).is_err());
    }

    #[test]
    fn location_roundtrip() {
        let grid = ChunkGrid::new(&[3, 3], &[3, 3]).unwrap();
        let mut idx = SingleChunkIndex::new(grid.clone(), 72, true).unwrap();
        idx.upsert(&[0, 0], 4096, 41, 0b1).unwrap();
        let location = idx.persist(&mut VecBlockIo::default()).unwrap();
        assert_eq!(
            location,
            IndexLocation::SingleChunk {
                address: Some(4096),
                filtered: Some((41, 0b1)),
            }
        );
        let IndexLocation::SingleChunk { address, filtered } = location else {
            unreachable!()
        };
        let back = SingleChunkIndex::from_location(grid, 72, address, filtered).unwrap();
        assert_eq!(back.lookup(&[0, 0]).unwrap(), ChunkIndexEntry::new(4096, 41, 1));
    }

    #[test]
    fn unfiltered_chunk_has_nominal_size() {
        let grid = ChunkGrid::new(&[5], &[5]).unwrap();
        let idx = SingleChunkIndex::from_location(grid, 20, Some(64), None).unwrap();
        assert_eq!(idx.lookup(&[0]).unwrap(), ChunkIndexEntry::new(64, 20, 0));
    }
}
