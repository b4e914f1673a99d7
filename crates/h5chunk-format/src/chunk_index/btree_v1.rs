//! Version 1 B-tree chunk index, keyed by chunk coordinate.
//!
//! Keys are the chunk's element offsets plus a trailing zero for the
//! element-size axis; records carry a 32-bit stored size, the filter mask
//! and the chunk address. Used with version 3 layout messages.

use crate::codec::{put_u32, put_u64, ByteReader};
use crate::data_layout::{ChunkIndexKind, IndexLocation};
use crate::dataspace::ChunkGrid;
use crate::error::FormatError;

use super::btree::{BTree, NodeFormat};
use super::{BlockIo, ChunkIndexEntry, ChunkIndexOps, StoredChunk};

const NODE_TYPE_RAW_DATA: u8 = 1;

struct V1Format<'a> {
    chunk_dims: &'a [u64],
}

impl NodeFormat<Vec<u64>, StoredChunk> for V1Format<'_> {
    const STRUCTURE: &'static str = "v1 B-tree node";

    fn signature(&self, _leaf: bool) -> &'static [u8; 4] {
        b"TREE"
    }

    fn node_type(&self) -> u8 {
        NODE_TYPE_RAW_DATA
    }

    fn key_width(&self) -> usize {
        (self.chunk_dims.len() + 1) * 8
    }

    fn record_width(&self) -> usize {
        16
    }

    fn write_key(&self, key: &Vec<u64>, buf: &mut Vec<u8>) {
        for (c, d) in key.iter().zip(self.chunk_dims) {
            put_u64(buf, c * d);
        }
        put_u64(buf, 0);
    }

    fn read_key(&self, r: &mut ByteReader<'_>) -> Result<Vec<u64>, FormatError> {
        let mut coord = Vec::with_capacity(self.chunk_dims.len());
        for &d in self.chunk_dims {
            let offset = r.u64()?;
            if offset % d != 0 {
                return Err(FormatError::malformed(
                    Self::STRUCTURE,
                    format!("offset {offset} is not aligned to chunk extent {d}"),
                ));
            }
            coord.push(offset / d);
        }
        if r.u64()? != 0 {
            return Err(FormatError::malformed(
                Self::STRUCTURE,
                "non-zero element-size offset in key",
            ));
        }
        Ok(coord)
    }

    fn write_record(&self, record: &StoredChunk, buf: &mut Vec<u8>) {
        put_u32(buf, record.size as u32);
        put_u32(buf, record.mask);
        put_u64(buf, record.address);
    }

    fn read_record(&self, r: &mut ByteReader<'_>) -> Result<StoredChunk, FormatError> {
        let size = u64::from(r.u32()?);
        let mask = r.u32()?;
        let address = r.address()?.ok_or_else(|| {
            FormatError::malformed(Self::STRUCTURE, "record with an undefined address")
        })?;
        Ok(StoredChunk {
            address,
            size,
            mask,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BTreeV1Index {
    grid: ChunkGrid,
    chunk_bytes: u64,
    tree: BTree<Vec<u64>, StoredChunk>,
}

impl BTreeV1Index {
    pub fn new(grid: ChunkGrid, chunk_bytes: u64, node_capacity: usize) -> Self {
        Self {
            grid,
            chunk_bytes,
            tree: BTree::new(node_capacity),
        }
    }

    /// Decode the tree rooted at `root`. An undefined root is an empty index.
    pub fn open(
        grid: ChunkGrid,
        chunk_bytes: u64,
        root: Option<u64>,
        node_capacity: usize,
        io: &mut dyn BlockIo,
    ) -> Result<Self, FormatError> {
        let Some(root) = root else {
            return Ok(Self::new(grid, chunk_bytes, node_capacity));
        };
        let format = V1Format {
            chunk_dims: grid.chunk_dims(),
        };
        let tree: BTree<Vec<u64>, StoredChunk> =
            BTree::load(&format, root, None, node_capacity, io)?;
        for (coord, _) in tree.iter() {
            grid.linear_index(coord).map_err(|_| {
                FormatError::malformed("v1 B-tree node", format!("key {coord:?} is outside the grid"))
            })?;
        }
        Ok(Self {
            grid,
            chunk_bytes,
            tree,
        })
    }

    /// Tree depth (0 when the root is a leaf).
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }
}

impl ChunkIndexOps for BTreeV1Index {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::BTreeV1
    }

    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError> {
        self.grid.linear_index(coord)?;
        Ok(StoredChunk::entry(self.tree.get(&coord.to_vec())))
    }

    fn upsert(
        &mut self,
        coord: &[u64],
        address: u64,
        stored_size: u64,
        filter_mask: u32,
    ) -> Result<(), FormatError> {
        self.grid.linear_index(coord)?;
        if stored_size > u64::from(u32::MAX) {
            return Err(FormatError::UnsupportedLayout(format!(
                "v1 B-tree cannot record a {stored_size}-byte chunk (nominal {})",
                self.chunk_bytes
            )));
        }
        self.tree.insert(
            coord.to_vec(),
            StoredChunk {
                address,
                size: stored_size,
                mask: filter_mask,
            },
        );
        Ok(())
    }

    fn persist(&mut self, io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError> {
        let format = V1Format {
            chunk_dims: self.grid.chunk_dims(),
        };
        let root = self.tree.persist(&format, io)?;
        Ok(IndexLocation::BTreeV1 {
            root_address: Some(root),
        })
    }

    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)> {
        self.tree
            .iter()
            .into_iter()
            .filter_map(|(coord, s)| {
                let linear = self.grid.linear_index(coord).ok()?;
                Some((linear, StoredChunk::entry(Some(s))))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_io::VecBlockIo;
    use super::*;

    #[test]
    fn many_chunks_build_a_deep_tree() {
        let grid = ChunkGrid::new(&[64, 64], &[4, 4]).unwrap();
        let mut idx = BTreeV1Index::new(grid.clone(), 64, 4);
        for linear in 0..grid.num_chunks() {
            let coord = grid.coord_of(linear).unwrap();
            idx.upsert(&coord, 10_000 + linear * 70, 60, 0).unwrap();
        }
        assert!(idx.depth() >= 2);

        let mut io = VecBlockIo::default();
        let location = idx.persist(&mut io).unwrap();
        let IndexLocation::BTreeV1 { root_address } = location else {
            panic!("expected a v1 B-tree location");
        };
        let back = BTreeV1Index::open(grid.clone(), 64, root_address, 4, &mut io).unwrap();
        assert_eq!(back.depth(), idx.depth());
        for linear in 0..grid.num_chunks() {
            let coord = grid.coord_of(linear).unwrap();
            assert_eq!(
                back.lookup(&coord).unwrap(),
                ChunkIndexEntry::new(10_000 + linear * 70, 60, 0)
            );
        }
    }

    #[test]
    fn keys_are_element_offsets() {
        let grid = ChunkGrid::new(&[10, 10], &[5, 2]).unwrap();
        let mut idx = BTreeV1Index::new(grid.clone(), 80, 8);
        idx.upsert(&[1, 3], 4096, 80, 0).unwrap();
        let mut io = VecBlockIo::default();
        idx.persist(&mut io).unwrap();
        // prefix(10) then key offsets [5, 6, 0]
        assert_eq!(&io.bytes[..4], b"TREE");
        assert_eq!(&io.bytes[10..18], &5u64.to_le_bytes());
        assert_eq!(&io.bytes[18..26], &6u64.to_le_bytes());
        assert_eq!(&io.bytes[26..34], &0u64.to_le_bytes());
    }

    #[test]
    fn empty_root_means_no_chunks() {
        let grid = ChunkGrid::new(&[4], &[2]).unwrap();
        let idx = BTreeV1Index::open(grid, 8, None, 8, &mut VecBlockIo::default()).unwrap();
        assert!(idx.allocated().is_empty());
    }
}
