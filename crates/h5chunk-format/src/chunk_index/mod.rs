//! Chunk indexes: resolve a chunk coordinate to its stored location.
//!
//! Six variants share one contract, [`ChunkIndexOps`]. The variant is
//! picked once, from the layout message's [`ChunkIndexKind`], and carried
//! in the closed [`ChunkIndex`] enum.
//!
//! Persisted indexes are decoded in full when opened, so `lookup` never
//! touches storage and never mutates. `persist` writes the current state
//! through a [`BlockIo`] and returns the [`IndexLocation`] to embed in the
//! layout message.

mod btree;
mod btree_v1;
mod btree_v2;
mod extensible_array;
mod fixed_array;
mod implicit;
mod single_chunk;

pub use btree::{BTree, DEFAULT_NODE_CAPACITY};
pub use btree_v1::BTreeV1Index;
pub use btree_v2::BTreeV2Index;
pub use extensible_array::{ExtensibleArrayIndex, ExtensibleArrayParams};
pub use fixed_array::FixedArrayIndex;
pub use implicit::ImplicitIndex;
pub use single_chunk::SingleChunkIndex;

use tracing::debug;

use crate::codec::{chunk_size_width, put_address, put_u32, put_uint, ByteReader};
use crate::data_layout::{ChunkIndexKind, IndexLocation};
use crate::dataspace::ChunkGrid;
use crate::error::FormatError;

/// Where (and how) one chunk is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkIndexEntry {
    /// File offset, or `None` if the chunk was never written.
    pub address: Option<u64>,
    /// Stored (post-filter) size in bytes.
    pub stored_size: u64,
    /// Filter stages skipped for this chunk.
    pub filter_mask: u32,
}

impl ChunkIndexEntry {
    /// The entry of a chunk that has never been written.
    pub const UNALLOCATED: ChunkIndexEntry = ChunkIndexEntry {
        address: None,
        stored_size: 0,
        filter_mask: 0,
    };

    pub fn new(address: u64, stored_size: u64, filter_mask: u32) -> Self {
        Self {
            address: Some(address),
            stored_size,
            filter_mask,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.address.is_some()
    }
}

/// Block-level access to the backing store, as needed by index codecs.
pub trait BlockIo {
    /// Read exactly `len` bytes at `address`.
    fn read_block(&mut self, address: u64, len: usize) -> Result<Vec<u8>, FormatError>;

    /// Reserve `len` bytes and return their address.
    fn allocate(&mut self, len: u64) -> Result<u64, FormatError>;

    /// Write `data` at `address`.
    fn write_block(&mut self, address: u64, data: &[u8]) -> Result<(), FormatError>;

    /// Allocate and write in one step.
    fn append_block(&mut self, data: &[u8]) -> Result<u64, FormatError> {
        let address = self.allocate(data.len() as u64)?;
        self.write_block(address, data)?;
        Ok(address)
    }
}

/// The shared lookup/upsert contract.
pub trait ChunkIndexOps {
    /// Which variant this is.
    fn kind(&self) -> ChunkIndexKind;

    /// Resolve `coord` (scaled chunk coordinate). Unwritten chunks yield
    /// [`ChunkIndexEntry::UNALLOCATED`].
    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError>;

    /// Record the final location of `coord`. Only called once stored size
    /// and filter mask are known.
    fn upsert(
        &mut self,
        coord: &[u64],
        address: u64,
        stored_size: u64,
        filter_mask: u32,
    ) -> Result<(), FormatError>;

    /// Write the index through `io` and return its location.
    fn persist(&mut self, io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError>;

    /// Every allocated chunk as `(linear index, entry)`, ascending.
    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)>;
}

/// Parameters needed to build a fresh index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParams {
    /// Nominal (unfiltered) chunk size in bytes.
    pub chunk_bytes: u64,
    /// Whether a filter pipeline is attached.
    pub filtered: bool,
    /// Axes with unlimited maximum extent.
    pub unlimited_axes: Vec<usize>,
    /// Base address of the implicit index's pre-allocated region.
    pub implicit_base: Option<u64>,
    /// Maximum entries per B-tree node.
    pub btree_node_capacity: usize,
}

impl IndexParams {
    pub fn new(chunk_bytes: u64, filtered: bool) -> Self {
        Self {
            chunk_bytes,
            filtered,
            unlimited_axes: Vec::new(),
            implicit_base: None,
            btree_node_capacity: DEFAULT_NODE_CAPACITY,
        }
    }
}

/// Closed set of chunk index variants.
#[derive(Debug, Clone)]
pub enum ChunkIndex {
    Implicit(ImplicitIndex),
    SingleChunk(SingleChunkIndex),
    FixedArray(FixedArrayIndex),
    ExtensibleArray(ExtensibleArrayIndex),
    BTreeV1(BTreeV1Index),
    BTreeV2(BTreeV2Index),
}

impl ChunkIndex {
    /// Build an empty index of `kind` for `grid`.
    pub fn create(
        kind: ChunkIndexKind,
        grid: &ChunkGrid,
        params: &IndexParams,
    ) -> Result<Self, FormatError> {
        debug!(?kind, chunks = grid.num_chunks(), "creating chunk index");
        Ok(match kind {
            ChunkIndexKind::Implicit => {
                if params.filtered {
                    return Err(FormatError::UnsupportedLayout(
                        "implicit chunk index cannot hold filtered chunks".into(),
                    ));
                }
                let base = params.implicit_base.ok_or_else(|| {
                    FormatError::UnsupportedLayout(
                        "implicit chunk index needs a pre-allocated region".into(),
                    )
                })?;
                ChunkIndex::Implicit(ImplicitIndex::new(grid.clone(), params.chunk_bytes, Some(base)))
            }
            ChunkIndexKind::SingleChunk => ChunkIndex::SingleChunk(SingleChunkIndex::new(
                grid.clone(),
                params.chunk_bytes,
                params.filtered,
            )?),
            ChunkIndexKind::FixedArray => ChunkIndex::FixedArray(FixedArrayIndex::new(
                grid.clone(),
                params.chunk_bytes,
                params.filtered,
            )),
            ChunkIndexKind::ExtensibleArray => {
                ChunkIndex::ExtensibleArray(ExtensibleArrayIndex::new(
                    grid.clone(),
                    params.chunk_bytes,
                    params.filtered,
                    &params.unlimited_axes,
                    ExtensibleArrayParams::default(),
                )?)
            }
            ChunkIndexKind::BTreeV1 => ChunkIndex::BTreeV1(BTreeV1Index::new(
                grid.clone(),
                params.chunk_bytes,
                params.btree_node_capacity,
            )),
            ChunkIndexKind::BTreeV2 => ChunkIndex::BTreeV2(BTreeV2Index::new(
                grid.clone(),
                params.chunk_bytes,
                params.filtered,
                params.btree_node_capacity,
            )),
        })
    }

    /// Reopen an index from the location recorded in a layout message.
    pub fn open(
        location: &IndexLocation,
        grid: &ChunkGrid,
        params: &IndexParams,
        io: &mut dyn BlockIo,
    ) -> Result<Self, FormatError> {
        debug!(kind = ?location.kind(), "opening chunk index");
        let index = match location {
            IndexLocation::Implicit { base_address } => ChunkIndex::Implicit(ImplicitIndex::new(
                grid.clone(),
                params.chunk_bytes,
                *base_address,
            )),
            IndexLocation::SingleChunk { address, filtered } => {
                ChunkIndex::SingleChunk(SingleChunkIndex::from_location(
                    grid.clone(),
                    params.chunk_bytes,
                    *address,
                    *filtered,
                )?)
            }
            IndexLocation::FixedArray { header_address } => match header_address {
                Some(addr) => ChunkIndex::FixedArray(FixedArrayIndex::open(
                    grid.clone(),
                    params.chunk_bytes,
                    *addr,
                    io,
                )?),
                None => Self::create(ChunkIndexKind::FixedArray, grid, params)?,
            },
            IndexLocation::ExtensibleArray { header_address } => match header_address {
                Some(addr) => ChunkIndex::ExtensibleArray(ExtensibleArrayIndex::open(
                    grid.clone(),
                    params.chunk_bytes,
                    *addr,
                    io,
                )?),
                None => Self::create(ChunkIndexKind::ExtensibleArray, grid, params)?,
            },
            IndexLocation::BTreeV1 { root_address } => ChunkIndex::BTreeV1(BTreeV1Index::open(
                grid.clone(),
                params.chunk_bytes,
                *root_address,
                params.btree_node_capacity,
                io,
            )?),
            IndexLocation::BTreeV2 { header_address } => match header_address {
                Some(addr) => ChunkIndex::BTreeV2(BTreeV2Index::open(
                    grid.clone(),
                    params.chunk_bytes,
                    *addr,
                    io,
                )?),
                None => Self::create(ChunkIndexKind::BTreeV2, grid, params)?,
            },
        };
        Ok(index)
    }

    /// Fixed storage address of `coord` when the variant dictates one
    /// (implicit index only).
    pub fn fixed_address(&self, coord: &[u64]) -> Result<Option<u64>, FormatError> {
        match self {
            ChunkIndex::Implicit(idx) => idx.address_of(coord).map(Some),
            _ => Ok(None),
        }
    }

    fn ops(&self) -> &dyn ChunkIndexOps {
        match self {
            ChunkIndex::Implicit(i) => i,
            ChunkIndex::SingleChunk(i) => i,
            ChunkIndex::FixedArray(i) => i,
            ChunkIndex::ExtensibleArray(i) => i,
            ChunkIndex::BTreeV1(i) => i,
            ChunkIndex::BTreeV2(i) => i,
        }
    }

    fn ops_mut(&mut self) -> &mut dyn ChunkIndexOps {
        match self {
            ChunkIndex::Implicit(i) => i,
            ChunkIndex::SingleChunk(i) => i,
            ChunkIndex::FixedArray(i) => i,
            ChunkIndex::ExtensibleArray(i) => i,
            ChunkIndex::BTreeV1(i) => i,
            ChunkIndex::BTreeV2(i) => i,
        }
    }
}

impl ChunkIndexOps for ChunkIndex {
    fn kind(&self) -> ChunkIndexKind {
        self.ops().kind()
    }

    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError> {
        self.ops().lookup(coord)
    }

    fn upsert(
        &mut self,
        coord: &[u64],
        address: u64,
        stored_size: u64,
        filter_mask: u32,
    ) -> Result<(), FormatError> {
        self.ops_mut().upsert(coord, address, stored_size, filter_mask)
    }

    fn persist(&mut self, io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError> {
        let location = self.ops_mut().persist(io)?;
        debug!(?location, "persisted chunk index");
        Ok(location)
    }

    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)> {
        self.ops().allocated()
    }
}

/// Entry slot shared by the array-backed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoredChunk {
    pub address: u64,
    pub size: u64,
    pub mask: u32,
}

impl StoredChunk {
    pub fn entry(slot: Option<&StoredChunk>) -> ChunkIndexEntry {
        match slot {
            Some(s) => ChunkIndexEntry::new(s.address, s.size, s.mask),
            None => ChunkIndexEntry::UNALLOCATED,
        }
    }
}

/// Element encoding for array-backed indexes: an address, plus stored size
/// and filter mask when the dataset is filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ElementCodec {
    pub filtered: bool,
    pub size_width: usize,
    pub chunk_bytes: u64,
}

impl ElementCodec {
    pub fn new(filtered: bool, chunk_bytes: u64) -> Self {
        Self {
            filtered,
            size_width: chunk_size_width(chunk_bytes),
            chunk_bytes,
        }
    }

    pub fn width(&self) -> usize {
        if self.filtered {
            8 + self.size_width + 4
        } else {
            8
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>, slot: Option<&StoredChunk>) {
        put_address(buf, slot.map(|s| s.address));
        if self.filtered {
            put_uint(buf, slot.map_or(0, |s| s.size), self.size_width);
            put_u32(buf, slot.map_or(0, |s| s.mask));
        }
    }

    pub fn read(
        &self,
        r: &mut ByteReader<'_>,
    ) -> Result<Option<StoredChunk>, FormatError> {
        let address = r.address()?;
        let (size, mask) = if self.filtered {
            (r.uint(self.size_width)?, r.u32()?)
        } else {
            (self.chunk_bytes, 0)
        };
        Ok(address.map(|address| StoredChunk {
            address,
            size,
            mask,
        }))
    }

    /// Check that an unfiltered upsert is consistent with this encoding.
    pub fn check(&self, stored_size: u64, filter_mask: u32) -> Result<(), FormatError> {
        if !self.filtered && (filter_mask != 0 || stored_size != self.chunk_bytes) {
            return Err(FormatError::UnsupportedLayout(format!(
                "unfiltered index cannot record a {stored_size}-byte chunk with mask {filter_mask:#x}"
            )));
        }
        if self.filtered && self.size_width < 8 && stored_size >> (self.size_width * 8) != 0 {
            return Err(FormatError::UnsupportedLayout(format!(
                "stored size {stored_size} does not fit the {}-byte size field",
                self.size_width
            )));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_io::VecBlockIo;
    use super::*;

    fn params(filtered: bool) -> IndexParams {
        IndexParams {
            chunk_bytes: 32,
            filtered,
            unlimited_axes: vec![0],
            implicit_base: Some(0),
            btree_node_capacity: 4,
        }
    }

    fn all_kinds() -> [ChunkIndexKind; 6] {
        [
            ChunkIndexKind::Implicit,
            ChunkIndexKind::SingleChunk,
            ChunkIndexKind::FixedArray,
            ChunkIndexKind::ExtensibleArray,
            ChunkIndexKind::BTreeV1,
            ChunkIndexKind::BTreeV2,
        ]
    }

    #[test]
    fn every_variant_starts_unallocated() {
        let grid = ChunkGrid::new(&[4, 4], &[4, 4]).unwrap();
        for kind in all_kinds() {
            let idx = ChunkIndex::create(kind, &grid, &params(false)).unwrap();
            assert_eq!(idx.kind(), kind);
            let entry = idx.lookup(&[0, 0]).unwrap();
            if kind == ChunkIndexKind::Implicit {
                assert_eq!(entry.address, Some(0));
            } else {
                assert_eq!(entry, ChunkIndexEntry::UNALLOCATED, "{kind:?}");
            }
        }
    }

    #[test]
    fn filtered_variants_share_the_contract() {
        let grid = ChunkGrid::new(&[40, 9], &[4, 3]).unwrap();
        let kinds = [
            ChunkIndexKind::FixedArray,
            ChunkIndexKind::ExtensibleArray,
            ChunkIndexKind::BTreeV1,
            ChunkIndexKind::BTreeV2,
        ];
        for kind in kinds {
            let mut io = VecBlockIo::default();
            let mut idx = ChunkIndex::create(kind, &grid, &params(true)).unwrap();
            for linear in (0..grid.num_chunks()).rev().step_by(3) {
                let coord = grid.coord_of(linear).unwrap();
                idx.upsert(&coord, 1000 + linear * 64, 20 + linear, (linear % 4) as u32)
                    .unwrap();
            }
            let location = idx.persist(&mut io).unwrap();
            let reopened = ChunkIndex::open(&location, &grid, &params(true), &mut io).unwrap();
            for linear in 0..grid.num_chunks() {
                let coord = grid.coord_of(linear).unwrap();
                let entry = reopened.lookup(&coord).unwrap();
                assert_eq!(entry, idx.lookup(&coord).unwrap(), "{kind:?} chunk {linear}");
                if (grid.num_chunks() - 1 - linear) % 3 == 0 {
                    let expected =
                        ChunkIndexEntry::new(1000 + linear * 64, 20 + linear, (linear % 4) as u32);
                    assert_eq!(entry, expected);
                } else {
                    assert!(!entry.is_allocated());
                }
            }
            assert_eq!(reopened.allocated(), idx.allocated());
        }
    }

    #[test]
    fn lookup_outside_grid_fails() {
        let grid = ChunkGrid::new(&[8], &[4]).unwrap();
        for kind in all_kinds() {
            if kind == ChunkIndexKind::SingleChunk {
                continue;
            }
            let idx = ChunkIndex::create(kind, &grid, &params(false)).unwrap();
            assert!(idx.lookup(&[2]).is_err(), "{kind:?}");
        }
    }

    #[test]
    fn implicit_rejects_filters() {
        let grid = ChunkGrid::new(&[8], &[4]).unwrap();
        assert!(matches!(
            ChunkIndex::create(ChunkIndexKind::Implicit, &grid, &params(true)),
            Err(FormatError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn fixed_address_only_for_implicit() {
        let grid = ChunkGrid::new(&[8], &[4]).unwrap();
        let mut p = params(false);
        p.implicit_base = Some(256);
        let implicit = ChunkIndex::create(ChunkIndexKind::Implicit, &grid, &p).unwrap();
        assert_eq!(implicit.fixed_address(&[1]).unwrap(), Some(256 + 32));
        let fa = ChunkIndex::create(ChunkIndexKind::FixedArray, &grid, &p).unwrap();
        assert_eq!(fa.fixed_address(&[1]).unwrap(), None);
    }
}
