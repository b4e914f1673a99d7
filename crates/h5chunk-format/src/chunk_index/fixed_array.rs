//! Fixed array index: one slot per chunk, addressed directly by linear
//! chunk index. Valid while the chunk grid cannot grow.
//!
//! On disk: an `FAHD` header pointing at a single `FADB` data block that
//! points back at the header. Both end in a lookup3 checksum.

use crate::checksum::{seal, verify};
use crate::codec::{put_address, put_u64, ByteReader};
use crate::data_layout::{ChunkIndexKind, IndexLocation};
use crate::dataspace::ChunkGrid;
use crate::error::FormatError;

use super::{BlockIo, ChunkIndexEntry, ChunkIndexOps, ElementCodec, StoredChunk};

const HEADER_SIG: &[u8; 4] = b"FAHD";
const DATA_BLOCK_SIG: &[u8; 4] = b"FADB";
const VERSION: u8 = 0;
const CLIENT_UNFILTERED: u8 = 0;
const CLIENT_FILTERED: u8 = 1;
const HEADER_SIZE: usize = 28;
const DATA_BLOCK_PREFIX: usize = 14;
const MIN_PAGE_BITS: u8 = 10;

#[derive(Debug, Clone)]
pub struct FixedArrayIndex {
    grid: ChunkGrid,
    codec: ElementCodec,
    slots: Vec<Option<StoredChunk>>,
}

impl FixedArrayIndex {
    pub fn new(grid: ChunkGrid, chunk_bytes: u64, filtered: bool) -> Self {
        let slots = vec![None; grid.num_chunks() as usize];
        Self {
            grid,
            codec: ElementCodec::new(filtered, chunk_bytes),
            slots,
        }
    }

    /// Decode the array whose header is at `header_address`.
    pub fn open(
        grid: ChunkGrid,
        chunk_bytes: u64,
        header_address: u64,
        io: &mut dyn BlockIo,
    ) -> Result<Self, FormatError> {
        let raw = io.read_block(header_address, HEADER_SIZE)?;
        let body = verify(&raw, "fixed array header")?;
        let mut r = ByteReader::new(body);
        r.signature(HEADER_SIG, "fixed array header")?;
        let version = r.u8()?;
        if version != VERSION {
            return Err(FormatError::malformed(
                "fixed array header",
                format!("version {version}"),
            ));
        }
        let filtered = match r.u8()? {
            CLIENT_UNFILTERED => false,
            CLIENT_FILTERED => true,
            other => {
                return Err(FormatError::malformed(
                    "fixed array header",
                    format!("client id {other}"),
                ))
            }
        };
        let mut idx = Self::new(grid, chunk_bytes, filtered);
        let element_width = r.u8()? as usize;
        if element_width != idx.codec.width() {
            return Err(FormatError::malformed(
                "fixed array header",
                format!(
                    "element width {element_width}, expected {}",
                    idx.codec.width()
                ),
            ));
        }
        let page_bits = r.u8()?;
        let count = r.u64()?;
        if count != idx.slots.len() as u64 {
            return Err(FormatError::malformed(
                "fixed array header",
                format!("{count} elements for a grid of {} chunks", idx.slots.len()),
            ));
        }
        if page_bits < 64 && count > 1u64 << page_bits {
            return Err(FormatError::UnsupportedLayout(
                "paged fixed array data blocks".into(),
            ));
        }
        let Some(data_address) = r.address()? else {
            return Ok(idx);
        };

        let block_len = DATA_BLOCK_PREFIX + idx.slots.len() * element_width + 4;
        let raw = io.read_block(data_address, block_len)?;
        let body = verify(&raw, "fixed array data block")?;
        let mut r = ByteReader::new(body);
        r.signature(DATA_BLOCK_SIG, "fixed array data block")?;
        r.skip(2)?;
        if r.address()? != Some(header_address) {
            return Err(FormatError::malformed(
                "fixed array data block",
                "header back-pointer does not match",
            ));
        }
        for slot in idx.slots.iter_mut() {
            *slot = idx.codec.read(&mut r)?;
        }
        Ok(idx)
    }

    fn client_id(&self) -> u8 {
        if self.codec.filtered {
            CLIENT_FILTERED
        } else {
            CLIENT_UNFILTERED
        }
    }

    fn page_bits(&self) -> u8 {
        let needed = 64 - (self.slots.len() as u64).saturating_sub(1).leading_zeros() as u8;
        needed.max(MIN_PAGE_BITS)
    }
}

impl ChunkIndexOps for FixedArrayIndex {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::FixedArray
    }

    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError> {
        let linear = self.grid.linear_index(coord)? as usize;
        Ok(StoredChunk::entry(self.slots[linear].as_ref()))
    }

    fn upsert(
        &mut self,
        coord: &[u64],
        address: u64,
        stored_size: u64,
        filter_mask: u32,
    ) -> Result<(), FormatError> {
        let linear = self.grid.linear_index(coord)? as usize;
        self.codec.check(stored_size, filter_mask)?;
        self.slots[linear] = Some(StoredChunk {
            address,
            size: stored_size,
            mask: filter_mask,
        });
        Ok(())
    }

    fn persist(&mut self, io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError> {
        let header_address = io.allocate(HEADER_SIZE as u64)?;

        let mut block = Vec::with_capacity(DATA_BLOCK_PREFIX + self.slots.len() * self.codec.width() + 4);
        block.extend_from_slice(DATA_BLOCK_SIG);
        block.extend_from_slice(&[VERSION, self.client_id()]);
        put_address(&mut block, Some(header_address));
        for slot in &self.slots {
            self.codec.write(&mut block, slot.as_ref());
        }
        seal(&mut block);
        let data_address = io.append_block(&block)?;

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(HEADER_SIG);
        header.extend_from_slice(&[
            VERSION,
            self.client_id(),
            self.codec.width() as u8,
            self.page_bits(),
        ]);
        put_u64(&mut header, self.slots.len() as u64);
        put_address(&mut header, Some(data_address));
        seal(&mut header);
        io.write_block(header_address, &header)?;

        Ok(IndexLocation::FixedArray {
            header_address: Some(header_address),
        })
    }

    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i as u64, StoredChunk::entry(Some(s)))))
            .collect()
    }
}
