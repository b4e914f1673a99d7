//! Extensible array index for datasets that grow along their leading
//! (unlimited) axis.
//!
//! The first `index_block_elements` entries live in the index block
//! itself. The rest are paged into data blocks whose sizes double the way
//! super blocks do: super block `s` owns `2^floor(s/2)` data blocks of
//! `data_block_min_elements * 2^ceil(s/2)` entries. Data blocks are only
//! materialized once an entry inside them is written, and their addresses
//! are listed directly in the index block.
//!
//! Entries past the current chunk grid are reachable through the index
//! API, but a dataset's extent is fixed once created, so a `Dataset`
//! only ever addresses the chunks of its initial grid.

use crate::checksum::{seal, verify};
use crate::codec::{put_address, put_u64, ByteReader};
use crate::data_layout::{ChunkIndexKind, IndexLocation};
use crate::dataspace::ChunkGrid;
use crate::error::FormatError;

use super::{BlockIo, ChunkIndexEntry, ChunkIndexOps, ElementCodec, StoredChunk};

const HEADER_SIG: &[u8; 4] = b"EAHD";
const INDEX_BLOCK_SIG: &[u8; 4] = b"EAIB";
const DATA_BLOCK_SIG: &[u8; 4] = b"EADB";
const VERSION: u8 = 0;
const HEADER_SIZE: usize = 37;
const INDEX_BLOCK_PREFIX: usize = 14;
const DATA_BLOCK_PREFIX: usize = 22;

/// Creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensibleArrayParams {
    /// Entries stored inline in the index block.
    pub index_block_elements: u8,
    /// Entries in the smallest data block.
    pub data_block_min_elements: u8,
}

impl Default for ExtensibleArrayParams {
    fn default() -> Self {
        Self {
            index_block_elements: 4,
            data_block_min_elements: 16,
        }
    }
}

type DataBlock = Vec<Option<StoredChunk>>;

#[derive(Debug, Clone)]
pub struct ExtensibleArrayIndex {
    grid: ChunkGrid,
    codec: ElementCodec,
    params: ExtensibleArrayParams,
    inline: Vec<Option<StoredChunk>>,
    data_blocks: Vec<Option<DataBlock>>,
    /// One past the highest linear index ever written.
    max_index_set: u64,
}

impl ExtensibleArrayIndex {
    /// Only a dataset whose sole unlimited axis is axis 0 can use this
    /// index: linear indices then stay stable while the grid grows.
    pub fn new(
        grid: ChunkGrid,
        chunk_bytes: u64,
        filtered: bool,
        unlimited_axes: &[usize],
        params: ExtensibleArrayParams,
    ) -> Result<Self, FormatError> {
        if unlimited_axes != [0] {
            return Err(FormatError::UnsupportedLayout(format!(
                "extensible array index needs axis 0 as the only unlimited axis, got {unlimited_axes:?}"
            )));
        }
        if params.data_block_min_elements == 0 {
            return Err(FormatError::UnsupportedLayout(
                "extensible array data blocks must hold at least one entry".into(),
            ));
        }
        Ok(Self::empty(grid, chunk_bytes, filtered, params))
    }

    fn empty(
        grid: ChunkGrid,
        chunk_bytes: u64,
        filtered: bool,
        params: ExtensibleArrayParams,
    ) -> Self {
        Self {
            grid,
            codec: ElementCodec::new(filtered, chunk_bytes),
            params,
            inline: vec![None; params.index_block_elements as usize],
            data_blocks: Vec::new(),
            max_index_set: 0,
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
        let body = verify(&raw, "extensible array header")?;
        let mut r = ByteReader::new(body);
        r.signature(HEADER_SIG, "extensible array header")?;
        let version = r.u8()?;
        let filtered = match (version, r.u8()?) {
            (VERSION, 0) => false,
            (VERSION, 1) => true,
            (v, c) => {
                return Err(FormatError::malformed(
                    "extensible array header",
                    format!("version {v} with client id {c}"),
                ))
            }
        };
        let element_width = r.u8()? as usize;
        let params = ExtensibleArrayParams {
            index_block_elements: r.u8()?,
            data_block_min_elements: r.u8()?,
        };
        if params.data_block_min_elements == 0 {
            return Err(FormatError::malformed(
                "extensible array header",
                "zero-sized data blocks",
            ));
        }
        let num_data_blocks = r.u64()? as usize;
        let max_index_set = r.u64()?;
        let index_block = r.address()?;

        let mut idx = Self::empty(grid, chunk_bytes, filtered, params);
        if element_width != idx.codec.width() {
            return Err(FormatError::malformed(
                "extensible array header",
                format!("element width {element_width}, expected {}", idx.codec.width()),
            ));
        }
        idx.max_index_set = max_index_set;
        let Some(index_block) = index_block else {
            return Ok(idx);
        };

        let len = INDEX_BLOCK_PREFIX + idx.inline.len() * element_width + num_data_blocks * 8 + 4;
        let raw = io.read_block(index_block, len)?;
        let body = verify(&raw, "extensible array index block")?;
        let mut r = ByteReader::new(body);
        r.signature(INDEX_BLOCK_SIG, "extensible array index block")?;
        r.skip(2)?;
        check_back_pointer(&mut r, header_address, "extensible array index block")?;
        for slot in idx.inline.iter_mut() {
            *slot = idx.codec.read(&mut r)?;
        }
        let mut addresses = Vec::with_capacity(num_data_blocks);
        for _ in 0..num_data_blocks {
            addresses.push(r.address()?);
        }

        for (n, address) in addresses.into_iter().enumerate() {
            let block = match address {
                Some(address) => Some(idx.read_data_block(n, address, header_address, io)?),
                None => None,
            };
            idx.data_blocks.push(block);
        }
        Ok(idx)
    }

    fn read_data_block(
        &self,
        n: usize,
        address: u64,
        header_address: u64,
        io: &mut dyn BlockIo,
    ) -> Result<DataBlock, FormatError> {
        let (offset, capacity) = self.block_span(n);
        let len = DATA_BLOCK_PREFIX + capacity * self.codec.width() + 4;
        let raw = io.read_block(address, len)?;
        let body = verify(&raw, "extensible array data block")?;
        let mut r = ByteReader::new(body);
        r.signature(DATA_BLOCK_SIG, "extensible array data block")?;
        r.skip(2)?;
        check_back_pointer(&mut r, header_address, "extensible array data block")?;
        let stored_offset = r.u64()?;
        if stored_offset != offset {
            return Err(FormatError::malformed(
                "extensible array data block",
                format!("block {n} starts at element {stored_offset}, expected {offset}"),
            ));
        }
        (0..capacity).map(|_| self.codec.read(&mut r)).collect()
    }

    /// Map an index past the inline entries to `(data block, slot)`.
    fn locate(&self, rel: u64) -> (usize, usize) {
        let min = u64::from(self.params.data_block_min_elements);
        let (mut start, mut block, mut s) = (0u64, 0usize, 0u32);
        loop {
            let count = 1u64 << (s / 2);
            let capacity = min << s.div_ceil(2);
            if rel < start + count * capacity {
                let within = rel - start;
                return (block + (within / capacity) as usize, (within % capacity) as usize);
            }
            start += count * capacity;
            block += count as usize;
            s += 1;
        }
    }

    /// First relative element and capacity of data block `n`.
    fn block_span(&self, n: usize) -> (u64, usize) {
        let min = u64::from(self.params.data_block_min_elements);
        let (mut start, mut block, mut s) = (0u64, 0usize, 0u32);
        loop {
            let count = 1usize << (s / 2);
            let capacity = min << s.div_ceil(2);
            if n < block + count {
                return (start + (n - block) as u64 * capacity, capacity as usize);
            }
            start += count as u64 * capacity;
            block += count;
            s += 1;
        }
    }

    fn slot(&self, linear: u64) -> Option<&StoredChunk> {
        let inline = self.inline.len() as u64;
        if linear < inline {
            return self.inline[linear as usize].as_ref();
        }
        let (block, slot) = self.locate(linear - inline);
        self.data_blocks
            .get(block)?
            .as_ref()?
            .get(slot)?
            .as_ref()
    }

    fn client_id(&self) -> u8 {
        u8::from(self.codec.filtered)
    }
}

fn check_back_pointer(
    r: &mut ByteReader<'_>,
    header_address: u64,
    structure: &'static str,
) -> Result<(), FormatError> {
    if r.address()? != Some(header_address) {
        return Err(FormatError::malformed(
            structure,
            "header back-pointer does not match",
        ));
    }
    Ok(())
}

impl ChunkIndexOps for ExtensibleArrayIndex {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::ExtensibleArray
    }

    fn lookup(&self, coord: &[u64]) -> Result<ChunkIndexEntry, FormatError> {
        let linear = self.grid.linear_index(coord)?;
        Ok(StoredChunk::entry(self.slot(linear)))
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
        let stored = Some(StoredChunk {
            address,
            size: stored_size,
            mask: filter_mask,
        });
        let inline = self.inline.len() as u64;
        if linear < inline {
            self.inline[linear as usize] = stored;
        } else {
            let (block, slot) = self.locate(linear - inline);
            if self.data_blocks.len() <= block {
                self.data_blocks.resize(block + 1, None);
            }
            let capacity = self.block_span(block).1;
            self.data_blocks[block].get_or_insert_with(|| vec![None; capacity])[slot] = stored;
        }
        self.max_index_set = self.max_index_set.max(linear + 1);
        Ok(())
    }

    fn persist(&mut self, io: &mut dyn BlockIo) -> Result<IndexLocation, FormatError> {
        let header_address = io.allocate(HEADER_SIZE as u64)?;
        let client = self.client_id();

        let mut block_addresses = Vec::with_capacity(self.data_blocks.len());
        for (n, block) in self.data_blocks.iter().enumerate() {
            let Some(entries) = block else {
                block_addresses.push(None);
                continue;
            };
            let mut buf = Vec::with_capacity(DATA_BLOCK_PREFIX + entries.len() * self.codec.width() + 4);
            buf.extend_from_slice(DATA_BLOCK_SIG);
            buf.extend_from_slice(&[VERSION, client]);
            put_address(&mut buf, Some(header_address));
            put_u64(&mut buf, self.block_span(n).0);
            for e in entries {
                self.codec.write(&mut buf, e.as_ref());
            }
            seal(&mut buf);
            block_addresses.push(Some(io.append_block(&buf)?));
        }

        let mut ib = Vec::new();
        ib.extend_from_slice(INDEX_BLOCK_SIG);
        ib.extend_from_slice(&[VERSION, client]);
        put_address(&mut ib, Some(header_address));
        for e in &self.inline {
            self.codec.write(&mut ib, e.as_ref());
        }
        for address in &block_addresses {
            put_address(&mut ib, *address);
        }
        seal(&mut ib);
        let index_block = io.append_block(&ib)?;

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(HEADER_SIG);
        header.extend_from_slice(&[
            VERSION,
            client,
            self.codec.width() as u8,
            self.params.index_block_elements,
            self.params.data_block_min_elements,
        ]);
        put_u64(&mut header, self.data_blocks.len() as u64);
        put_u64(&mut header, self.max_index_set);
        put_address(&mut header, Some(index_block));
        seal(&mut header);
        io.write_block(header_address, &header)?;

        Ok(IndexLocation::ExtensibleArray {
            header_address: Some(header_address),
        })
    }

    fn allocated(&self) -> Vec<(u64, ChunkIndexEntry)> {
        (0..self.max_index_set)
            .filter_map(|l| self.slot(l).map(|s| (l, StoredChunk::entry(Some(s)))))
            .collect()
    }
}
