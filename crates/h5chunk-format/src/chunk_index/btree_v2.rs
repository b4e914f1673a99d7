//! Version 2 B-tree chunk index, keyed by linear chunk index.
//!
//! A `BTHD` header records the record type, node capacity, depth and root;
//! nodes are `BTIN` (internal) and `BTLF` (leaf) blocks.

use crate::checksum::{seal, verify};
use crate::codec::{put_address, put_u16, put_u32, put_u64, ByteReader};
use crate::data_layout::{ChunkIndexKind, IndexLocation};
use crate::dataspace::ChunkGrid;
use crate::error::FormatError;

use super::btree::{BTree, NodeFormat};
use super::{BlockIo, ChunkIndexEntry, ChunkIndexOps, ElementCodec, StoredChunk};

const HEADER_SIG: &[u8; 4] = b"BTHD";
const HEADER_SIZE: usize = 34;
const VERSION: u8 = 0;
const TYPE_UNFILTERED: u8 = 10;
const TYPE_FILTERED: u8 = 11;

struct V2Format {
    codec: ElementCodec,
}

impl NodeFormat<u64, StoredChunk> for V2Format {
    const STRUCTURE: &'static str = "v2 B-tree node";

    fn signature(&self, leaf: bool) -> &'static [u8; 4] {
        if leaf {
            b"BTLF"
        } else {
            b"BTIN"
        }
    }

    fn node_type(&self) -> u8 {
        record_type(self.codec.filtered)
    }

    fn key_width(&self) -> usize {
        8
    }

    fn record_width(&self) -> usize {
        self.codec.width()
    }

    fn write_key(&self, key: &u64, buf: &mut Vec<u8>) {
        put_u64(buf, *key);
    }

    fn read_key(&self, r: &mut ByteReader<'_>) -> Result<u64, FormatError> {
        r.u64()
    }

    fn write_record(&self, record: &StoredChunk, buf: &mut Vec<u8>) {
        self.codec.write(buf, Some(record));
    }

    fn read_record(&self, r: &mut ByteReader<'_>) -> Result<StoredChunk, FormatError> {
        self.codec.read(r)?.ok_or_else(|| {
            FormatError::malformed(Self::STRUCTURE, "record with an undefined address")
        })
    }
}

fn record_type(filtered: bool) -> u8 {
    if filtered {
        TYPE_FILTERED
    } else {
        TYPE_UNFILTERED
    }
}

#[derive(Debug, Clone)]
pub struct BTreeV2Index {
    grid: ChunkGrid,
    codec: ElementCodec,
    node_capacity: usize,
    tree: BTree<u64, StoredChunk>,
}

impl BTreeV2Index {
    pub fn new(grid: ChunkGrid, chunk_bytes: u64, filtered: bool, node_capacity: usize) -> Self {
        Self {
            grid,
            codec: ElementCodec::new(filtered, chunk_bytes),
            node_capacity,
            tree: BTree::new(node_capacity),
        }
    }

    /// Decode the tree described by the header at `header_address`.
    pub fn open(
        grid: ChunkGrid,
        chunk_bytes: u64,
        header_address: u64,
        io: &mut dyn BlockIo,
    ) -> Result<Self, FormatError> {
        let raw = io.read_block(header_address, HEADER_SIZE)?;
        let body = verify(&raw, "v2 B-tree header")?;
        let mut r = ByteReader::new(body);
        r.signature(HEADER_SIG, "v2 B-tree header")?;
        let filtered = match (r.u8()?, r.u8()?) {
            (VERSION, TYPE_UNFILTERED) => false,
            (VERSION, TYPE_FILTERED) => true,
            (v, t) => {
                return Err(FormatError::malformed(
                    "v2 B-tree header",
                    format!("version {v} with record type {t}"),
                ))
            }
        };
        let node_capacity = r.u32()? as usize;
        let record_size = r.u16()? as usize;
        let depth = r.u16()?;
        let root = r.address()?;
        let total = r.u64()?;

        let mut idx = Self::new(grid, chunk_bytes, filtered, node_capacity);
        if record_size != idx.codec.width() {
            return Err(FormatError::malformed(
                "v2 B-tree header",
                format!("record size {record_size}, expected {}", idx.codec.width()),
            ));
        }
        let Some(root) = root else {
            return Ok(idx);
        };
        let format = V2Format { codec: idx.codec };
        idx.tree = BTree::load(&format, root, Some(depth), node_capacity, io)?;
        if idx.tree.len() as u64 != total {
            return Err(FormatError::malformed(
                "v2 B-tree header",
                format!("header counts {total} records, tree holds {}", idx.tree.len()),
            ));
        }
        if let Some((&last, _)) = idx.tree.iter().last() {
            if last >= idx.grid.num_chunks() {
                return Err(FormatError::malformed(
                    "v2 B-tree node",
                    format!("linear index {last} is outside the grid"),
                ));
            }
        }
        Ok(idx)
    }

    /// Tree depth (0 when the root is a leaf).
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }
}

impl ChunkIndexOps for BTreeV2Index {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::BTreeV2
    }

    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError> {
        let linear = self.grid.linear_index(coord)?;
        Ok(StoredChunk::entry(self.tree.get(&linear)))
    }

    fn upsert(
        &mut self,
        coord: &[u64],
        address: u64,
        stored_size: u64,
        filter_mask: u32,
    ) -> Result<(), FormatError> {
        let linear = self.grid.linear_index(coord)?;
        self.codec.check(stored_size, filter_mask)?;
        self.tree.insert(
            linear,
            StoredChunk {
                address,
                size: stored_size,
                mask: filter_mask,
            },
        );
        Ok(())
    }

    fn persist(&mut self, io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError> {
        let format = V2Format { codec: self.codec };
        let root = if self.tree.is_empty() {
            None
        } else {
            Some(self.tree.persist(&format, io)?)
        };

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(HEADER_SIG);
        header.extend_from_slice(&[VERSION, record_type(self.codec.filtered)]);
        put_u32(&mut header, self.node_capacity as u32);
        put_u16(&mut header, self.codec.width() as u16);
        put_u16(&mut header, self.tree.depth() as u16);
        put_address(&mut header, root);
        put_u64(&mut header, self.tree.len() as u64);
        seal(&mut header);
        let header_address = io.append_block(&header)?;

        Ok(IndexLocation::BTreeV2 {
            header_address: Some(header_address),
        })
    }

    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)> {
        self.tree
            .iter()
            .into_iter()
            .map(|(&linear, s)| (linear, StoredChunk::entry(Some(s))))
            .collect()
    }
}
