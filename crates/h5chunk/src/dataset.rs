//! Chunked dataset I/O.
//!
//! A [`Dataset`] ties together the chunk grid, the chunk index, the filter
//! pipeline and the chunk cache over one [`Storage`]. Reads and writes are
//! planned per chunk by a [`TransferPlan`]; chunks are visited in ascending
//! linear order and pass through the cache, which defers encoding and
//! storage of written chunks until they are evicted or flushed.
//!
//! Committing a dataset flushes every dirty chunk, persists the chunk index
//! and returns a [`DatasetDescriptor`] from which the dataset can be
//! reopened later.

use tracing::{debug, trace};

use h5chunk_format::chunk_cache::{CacheStats, ChunkCache, ChunkSlot};
use h5chunk_format::chunk_index::{ChunkIndex, ChunkIndexEntry, ChunkIndexOps, ImplicitIndex, IndexParams};
use h5chunk_format::data_layout::{ChunkIndexKind, DataLayout, IndexLocation};
use h5chunk_format::dataspace::{ChunkGrid, Dataspace};
use h5chunk_format::error::FormatError;
use h5chunk_format::filter_pipeline::FilterPipeline;
use h5chunk_format::filters::{decode_chunk, encode_chunk, EncodedChunk};
use h5chunk_format::selection::Selection;
use h5chunk_format::transfer::{ChunkTransfer, TransferPlan};
use h5chunk_io::{BlockStore, FreeSpaceAllocator, Storage};

use crate::config::{DatasetAccess, DatasetCreation};
use crate::element::{decode_elements, encode_elements, ByteOrder, ElementKind, H5Element};
use crate::error::{Error, Result};

/// Everything needed to reopen a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub space: Dataspace,
    pub kind: ElementKind,
    pub byte_order: ByteOrder,
    pub layout: DataLayout,
    pub pipeline: FilterPipeline,
    /// Fill value of one element.
    pub fill_value: Vec<u8>,
    /// Whether partial edge chunks go through the pipeline.
    pub filter_edge_chunks: bool,
}

/// An open chunked dataset over storage `S`.
pub struct Dataset<S: Storage> {
    name: String,
    storage: S,
    allocator: FreeSpaceAllocator,
    space: Dataspace,
    grid: ChunkGrid,
    kind: ElementKind,
    byte_order: ByteOrder,
    pipeline: FilterPipeline,
    fill_value: Vec<u8>,
    filter_edge_chunks: bool,
    /// Stored as a contiguous range rather than a chunked layout.
    contiguous: bool,
    index: ChunkIndex,
    /// Last persisted index location, cleared when the index changes.
    location: Option<IndexLocation>,
    cache: ChunkCache,
    bulk_copy: bool,
}

/// Borrowed view of what it takes to turn stored bytes into a decoded
/// chunk buffer.
struct ChunkCodec<'a> {
    pipeline: &'a FilterPipeline,
    fill_value: &'a [u8],
    element_size: usize,
    chunk_bytes: usize,
}

impl ChunkCodec<'_> {
    fn fill(&self) -> Vec<u8> {
        self.fill_value.repeat(self.chunk_bytes / self.element_size)
    }

    /// Read and decode the chunk behind `entry`; unallocated chunks come
    /// back as fill.
    fn load<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        entry: &ChunkIndexEntry,
    ) -> std::result::Result<Vec<u8>, FormatError> {
        let Some(address) = entry.address else {
            return Ok(self.fill());
        };
        let mut raw = vec![0u8; entry.stored_size as usize];
        storage.read_at(address, &mut raw)?;
        let data = if self.pipeline.is_empty() {
            raw
        } else {
            decode_chunk(
                &raw,
                self.pipeline,
                entry.filter_mask,
                self.element_size,
                self.chunk_bytes,
            )?
        };
        if data.len() != self.chunk_bytes {
            return Err(FormatError::FilterError(format!(
                "decoded chunk holds {} bytes, expected {}",
                data.len(),
                self.chunk_bytes
            )));
        }
        Ok(data)
    }
}

impl<S: Storage> Dataset<S> {
    /// Create a new dataset named `name`, allocating from `allocator`.
    pub fn create(
        name: &str,
        mut storage: S,
        mut allocator: FreeSpaceAllocator,
        space: Dataspace,
        kind: ElementKind,
        creation: &DatasetCreation,
        access: &DatasetAccess,
    ) -> Result<Self> {
        let element_size = element_size_of(kind)?;
        let fill_value = match &creation.fill_value {
            None => vec![0u8; element_size],
            Some(fill) if fill.len() == element_size => fill.clone(),
            Some(fill) => {
                return Err(Error::InvalidConfig(format!(
                    "fill value holds {} bytes, elements are {element_size}",
                    fill.len()
                )))
            }
        };

        let dims = space.effective_dims();
        let unlimited = space.unlimited_axes();
        let (chunk_dims, contiguous) = match &creation.chunk_dims {
            Some(chunk) => (chunk.clone(), false),
            None => (
                dims.iter().map(|&d| d.max(1)).collect(),
                !creation.has_filters(),
            ),
        };
        if contiguous && !unlimited.is_empty() {
            return Err(Error::InvalidConfig(
                "unlimited dimensions require chunk dimensions".into(),
            ));
        }

        let grid = ChunkGrid::new(&dims, &chunk_dims).map_err(|e| dataset_error(name, e))?;
        let pipeline = creation.pipeline();
        let chunk_bytes = grid.chunk_elements() * element_size as u64;
        let index_kind = if contiguous {
            ChunkIndexKind::Implicit
        } else {
            creation.choose_index(grid.num_chunks(), &unlimited)
        };

        let mut params = IndexParams::new(chunk_bytes, !pipeline.is_empty());
        params.unlimited_axes = unlimited;
        params.btree_node_capacity = creation.btree_node_capacity;
        if index_kind == ChunkIndexKind::Implicit && !pipeline.is_empty() {
            return Err(dataset_error(
                name,
                FormatError::UnsupportedLayout(
                    "implicit chunk index cannot hold filtered chunks".into(),
                ),
            ));
        }
        if index_kind == ChunkIndexKind::Implicit {
            let base = allocate_fill_region(&mut storage, &mut allocator, &grid, chunk_bytes, &fill_value)
                .map_err(|e| dataset_error(name, e))?;
            params.implicit_base = Some(base);
        }
        let index =
            ChunkIndex::create(index_kind, &grid, &params).map_err(|e| dataset_error(name, e))?;

        debug!(
            dataset = name,
            dims = ?dims,
            chunk = ?chunk_dims,
            kind = %kind,
            index = ?index_kind,
            filters = pipeline.len(),
            "created dataset"
        );

        Ok(Self {
            name: name.to_string(),
            storage,
            allocator,
            space,
            grid,
            kind,
            byte_order: creation.byte_order,
            pipeline,
            fill_value,
            filter_edge_chunks: creation.filter_edge_chunks,
            contiguous,
            index,
            location: None,
            cache: ChunkCache::new(access.cache),
            bulk_copy: access.bulk_copy,
        })
    }

    /// Reopen a dataset from its descriptor.
    pub fn open(
        name: &str,
        mut storage: S,
        mut allocator: FreeSpaceAllocator,
        descriptor: &DatasetDescriptor,
        access: &DatasetAccess,
    ) -> Result<Self> {
        let element_size = element_size_of(descriptor.kind)?;
        if descriptor.fill_value.len() != element_size {
            return Err(Error::InvalidConfig(format!(
                "fill value holds {} bytes, elements are {element_size}",
                descriptor.fill_value.len()
            )));
        }
        let dims = descriptor.space.effective_dims();

        let (chunk_dims, location, contiguous) = match &descriptor.layout {
            DataLayout::Compact { .. } => {
                return Err(dataset_error(
                    name,
                    FormatError::UnsupportedLayout("compact storage".into()),
                ))
            }
            DataLayout::Contiguous { address, .. } => (
                dims.iter().map(|&d| d.max(1)).collect::<Vec<_>>(),
                IndexLocation::Implicit {
                    base_address: *address,
                },
                true,
            ),
            DataLayout::Chunked {
                chunk_dims,
                element_size: stored,
                index,
            } => {
                if *stored as usize != element_size {
                    return Err(dataset_error(
                        name,
                        FormatError::UnsupportedLayout(format!(
                            "layout element size {stored} does not match {} ({element_size} bytes)",
                            descriptor.kind
                        )),
                    ));
                }
                (chunk_dims.clone(), index.clone(), false)
            }
        };

        let grid = ChunkGrid::new(&dims, &chunk_dims).map_err(|e| dataset_error(name, e))?;
        let chunk_bytes = grid.chunk_elements() * element_size as u64;
        if let DataLayout::Contiguous { size, .. } = &descriptor.layout {
            let expected = ImplicitIndex::region_size(&grid, chunk_bytes);
            if *size != expected {
                return Err(dataset_error(
                    name,
                    FormatError::UnsupportedLayout(format!(
                        "contiguous storage of {size} bytes, dataset needs {expected}"
                    )),
                ));
            }
        }

        let mut params = IndexParams::new(chunk_bytes, !descriptor.pipeline.is_empty());
        params.unlimited_axes = descriptor.space.unlimited_axes();
        let kind = location.kind();
        let persisted = location != IndexLocation::empty(kind);
        let index = if persisted {
            let mut io = BlockStore::new(&mut storage, &mut allocator);
            let opened = ChunkIndex::open(&location, &grid, &params, &mut io);
            opened.map_err(|e| dataset_error(name, e))?
        } else {
            // never committed with data; start from a fresh index
            if kind == ChunkIndexKind::Implicit {
                let base = allocate_fill_region(
                    &mut storage,
                    &mut allocator,
                    &grid,
                    chunk_bytes,
                    &descriptor.fill_value,
                )
                .map_err(|e| dataset_error(name, e))?;
                params.implicit_base = Some(base);
            }
            ChunkIndex::create(kind, &grid, &params).map_err(|e| dataset_error(name, e))?
        };

        debug!(dataset = name, index = ?kind, chunks = index.allocated().len(), "opened dataset");

        Ok(Self {
            name: name.to_string(),
            storage,
            allocator,
            space: descriptor.space.clone(),
            grid,
            kind: descriptor.kind,
            byte_order: descriptor.byte_order,
            pipeline: descriptor.pipeline.clone(),
            fill_value: descriptor.fill_value.clone(),
            filter_edge_chunks: descriptor.filter_edge_chunks,
            contiguous,
            index,
            location: persisted.then_some(location),
            cache: ChunkCache::new(access.cache),
            bulk_copy: access.bulk_copy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &Dataspace {
        &self.space
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Which chunk index variant backs this dataset.
    pub fn index_kind(&self) -> ChunkIndexKind {
        self.index.kind()
    }

    /// Storage entry for the chunk at `coord`, ignoring the cache.
    pub fn chunk_entry(&self, coord: &[u64]) -> Result<ChunkIndexEntry> {
        self.index
            .lookup(coord)
            .map_err(|e| chunk_error(&self.name, coord, e))
    }

    /// Decoded payload of a cached chunk.
    pub fn cached_chunk(&self, linear_index: u64) -> Option<&[u8]> {
        self.cache.peek(linear_index)
    }

    /// Linear indices of the chunks currently held by the cache.
    pub fn cached_chunks(&self) -> Vec<u64> {
        self.cache.resident_indices()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Written chunks not yet stored, resident or parked.
    pub fn dirty_chunks(&self) -> usize {
        self.cache.dirty_count()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn allocator_mut(&mut self) -> &mut FreeSpaceAllocator {
        &mut self.allocator
    }

    /// Give back storage and allocator. Cached writes that were not flushed
    /// are lost.
    pub fn into_parts(self) -> (S, FreeSpaceAllocator) {
        (self.storage, self.allocator)
    }

    // -----------------------------------------------------------------------
    // Raw transfers
    // -----------------------------------------------------------------------

    /// Read the elements picked by `file_selection` (everything when
    /// `None`) into a new buffer of shape `memory_dims`, placing them at
    /// `memory_selection`. Unselected memory elements hold the fill value.
    pub fn read_selection(
        &mut self,
        file_selection: Option<&Selection>,
        memory_selection: Option<&Selection>,
        memory_dims: Option<&[u64]>,
    ) -> Result<Vec<u8>> {
        let all = Selection::All;
        let file_selection = file_selection.unwrap_or(&all);
        let memory_dims = match memory_dims {
            Some(dims) => dims.to_vec(),
            None => file_selection.output_shape(self.grid.dataset_dims()),
        };
        let plan = self.plan(file_selection, memory_selection, &memory_dims)?;

        let mut out = self
            .fill_value
            .repeat(plan.memory_bytes() / self.fill_value.len());
        // dirty chunks evicted here stay parked until the next write or flush
        for chunk in plan.chunks() {
            self.read_chunk(&plan, chunk, &mut out)
                .map_err(|e| chunk_error(&self.name, &chunk.coord, e))?;
        }
        trace!(dataset = %self.name, elements = plan.num_elements(), "read selection");
        Ok(out)
    }

    /// Write `data`, laid out as `memory_dims` (a flat buffer when `None`),
    /// to the elements picked by `file_selection`.
    pub fn write_selection(
        &mut self,
        data: &[u8],
        file_selection: Option<&Selection>,
        memory_selection: Option<&Selection>,
        memory_dims: Option<&[u64]>,
    ) -> Result<()> {
        let element_size = self.fill_value.len();
        if data.len() % element_size != 0 {
            return Err(Error::BufferSize {
                expected: data.len() - data.len() % element_size,
                actual: data.len(),
            });
        }
        let all = Selection::All;
        let file_selection = file_selection.unwrap_or(&all);
        let memory_dims = match memory_dims {
            Some(dims) => dims.to_vec(),
            None => vec![(data.len() / element_size) as u64],
        };
        let plan = self.plan(file_selection, memory_selection, &memory_dims)?;
        if data.len() < plan.memory_bytes() {
            return Err(Error::BufferSize {
                expected: plan.memory_bytes(),
                actual: data.len(),
            });
        }

        for chunk in plan.chunks() {
            let bypassed = self
                .write_chunk(&plan, chunk, data)
                .map_err(|e| chunk_error(&self.name, &chunk.coord, e))?;
            if let Some(payload) = bypassed {
                self.store_chunk(&chunk.coord, &payload)?;
            }
            self.flush_evicted()?;
        }
        trace!(dataset = %self.name, elements = plan.num_elements(), "wrote selection");
        Ok(())
    }

    fn plan(
        &self,
        file_selection: &Selection,
        memory_selection: Option<&Selection>,
        memory_dims: &[u64],
    ) -> Result<TransferPlan> {
        let all = Selection::All;
        TransferPlan::new(
            &self.grid,
            file_selection,
            memory_dims,
            memory_selection.unwrap_or(&all),
            self.fill_value.len(),
        )
        .map(|plan| plan.with_bulk_copy(self.bulk_copy))
        .map_err(|e| dataset_error(&self.name, e))
    }

    fn read_chunk(
        &mut self,
        plan: &TransferPlan,
        chunk: &ChunkTransfer,
        out: &mut [u8],
    ) -> std::result::Result<(), FormatError> {
        let linear = chunk.linear_index;
        let Dataset {
            storage,
            grid,
            pipeline,
            fill_value,
            index,
            cache,
            ..
        } = &mut *self;
        let element_size = fill_value.len();
        let codec = ChunkCodec {
            pipeline: &*pipeline,
            fill_value: fill_value.as_slice(),
            element_size,
            chunk_bytes: grid.chunk_elements() as usize * element_size,
        };

        if !cache.holds(linear) {
            let entry = index.lookup(&chunk.coord)?;
            if !entry.is_allocated() {
                // never written: served from fill without occupying the cache
                return plan.read_chunk(grid, chunk, &codec.fill(), out);
            }
        }
        let payload = cache.get_chunk(linear, || {
            let entry = index.lookup(&chunk.coord)?;
            codec.load(storage, &entry)
        })?;
        plan.read_chunk(grid, chunk, &payload, out)
    }

    /// Apply `data` to one chunk through the cache. Returns the payload
    /// when the cache could not hold it.
    fn write_chunk(
        &mut self,
        plan: &TransferPlan,
        chunk: &ChunkTransfer,
        data: &[u8],
    ) -> std::result::Result<Option<Vec<u8>>, FormatError> {
        let Dataset {
            storage,
            grid,
            pipeline,
            fill_value,
            index,
            cache,
            ..
        } = &mut *self;
        let element_size = fill_value.len();
        let codec = ChunkCodec {
            pipeline: &*pipeline,
            fill_value: fill_value.as_slice(),
            element_size,
            chunk_bytes: grid.chunk_elements() as usize * element_size,
        };
        let overwrite = plan.covers_chunk(grid, chunk);

        let slot = cache.get_chunk_mut(chunk.linear_index, || {
            if overwrite {
                return Ok(codec.fill());
            }
            let entry = index.lookup(&chunk.coord)?;
            codec.load(storage, &entry)
        })?;
        match slot {
            ChunkSlot::Resident(buf) => {
                plan.write_chunk(grid, chunk, buf, data)?;
                Ok(None)
            }
            ChunkSlot::Bypassed(mut buf) => {
                plan.write_chunk(grid, chunk, &mut buf, data)?;
                Ok(Some(buf))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------------

    /// Encode and store one decoded chunk, then record it in the index.
    fn store_chunk(&mut self, coord: &[u64], data: &[u8]) -> Result<()> {
        self.try_store_chunk(coord, data)
            .map_err(|e| chunk_error(&self.name, coord, e))
    }

    fn try_store_chunk(
        &mut self,
        coord: &[u64],
        data: &[u8],
    ) -> std::result::Result<(), FormatError> {
        let encoded = if self.pipeline.is_empty() {
            EncodedChunk {
                data: data.to_vec(),
                filter_mask: 0,
            }
        } else if !self.filter_edge_chunks && self.grid.is_edge_chunk(coord) {
            EncodedChunk {
                data: data.to_vec(),
                filter_mask: self.pipeline.all_skipped_mask(),
            }
        } else {
            encode_chunk(data, &self.pipeline, self.fill_value.len())?
        };
        let size = encoded.data.len() as u64;

        let address = match self.index.fixed_address(coord)? {
            Some(address) => address,
            None => {
                let previous = self.index.lookup(coord)?;
                match previous.address {
                    Some(address) if previous.stored_size == size => address,
                    _ => self.allocator.allocate(size)?,
                }
            }
        };
        self.storage.write_at(address, &encoded.data)?;
        self.index
            .upsert(coord, address, size, encoded.filter_mask)?;
        self.location = None;

        debug!(
            dataset = %self.name,
            chunk = ?coord,
            address,
            bytes = size,
            mask = encoded.filter_mask,
            "stored chunk"
        );
        Ok(())
    }

    /// Store chunks the cache pushed out while they were dirty. On the
    /// first failure the unstored chunks go back to the cache.
    fn flush_evicted(&mut self) -> Result<()> {
        let mut pending = self.cache.take_evicted().into_iter();
        while let Some(evicted) = pending.next() {
            let stored = match self.grid.coord_of(evicted.linear_index) {
                Ok(coord) => self.store_chunk(&coord, &evicted.data),
                Err(e) => Err(dataset_error(&self.name, e)),
            };
            if let Err(err) = stored {
                let mut unstored = vec![evicted];
                unstored.extend(pending);
                debug!(dataset = %self.name, chunks = unstored.len(), "keeping unstored chunks parked");
                self.cache.restore_evicted(unstored);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Encode and store every dirty cached chunk. Chunks stay cached.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_evicted()?;
        let dirty = self.cache.dirty_indices();
        for &linear in &dirty {
            let Some(payload) = self.cache.peek(linear).map(<[u8]>::to_vec) else {
                continue;
            };
            let coord = self
                .grid
                .coord_of(linear)
                .map_err(|e| dataset_error(&self.name, e))?;
            self.store_chunk(&coord, &payload)?;
            self.cache.mark_clean(linear);
        }
        self.storage.flush()?;
        debug!(dataset = %self.name, chunks = dirty.len(), "flushed dataset");
        Ok(())
    }

    /// Persist the chunk index and return the layout message describing
    /// it. Fails while written chunks are still waiting in the cache.
    pub fn layout_message(&mut self) -> Result<DataLayout> {
        let dirty = self.cache.dirty_count();
        if dirty > 0 {
            return Err(dataset_error(&self.name, FormatError::UnflushedChunks(dirty)));
        }
        let location = match &self.location {
            Some(location) => location.clone(),
            None => {
                let mut io = BlockStore::new(&mut self.storage, &mut self.allocator);
                let location = self
                    .index
                    .persist(&mut io)
                    .map_err(|e| dataset_error(&self.name, e))?;
                self.location = Some(location.clone());
                location
            }
        };

        let element_size = self.fill_value.len();
        Ok(if self.contiguous {
            let address = match location {
                IndexLocation::Implicit { base_address } => base_address,
                _ => None,
            };
            DataLayout::Contiguous {
                address,
                size: ImplicitIndex::region_size(
                    &self.grid,
                    self.grid.chunk_elements() * element_size as u64,
                ),
            }
        } else {
            DataLayout::Chunked {
                chunk_dims: self.grid.chunk_dims().to_vec(),
                element_size: element_size as u32,
                index: location,
            }
        })
    }

    /// Flush, persist the index and describe the dataset.
    pub fn commit(&mut self) -> Result<DatasetDescriptor> {
        self.flush()?;
        let layout = self.layout_message()?;
        Ok(DatasetDescriptor {
            space: self.space.clone(),
            kind: self.kind,
            byte_order: self.byte_order,
            layout,
            pipeline: self.pipeline.clone(),
            fill_value: self.fill_value.clone(),
            filter_edge_chunks: self.filter_edge_chunks,
        })
    }

    // -----------------------------------------------------------------------
    // Typed transfers
    // -----------------------------------------------------------------------

    fn check_kind<T: H5Element>(&self) -> Result<()> {
        if T::KIND != self.kind {
            return Err(Error::TypeMismatch {
                expected: T::KIND,
                actual: self.kind,
            });
        }
        Ok(())
    }

    /// Read the whole dataset.
    pub fn read<T: H5Element>(&mut self) -> Result<Vec<T>> {
        self.read_slice(&Selection::All)
    }

    /// Read a selection into a dense vector in selection order.
    pub fn read_slice<T: H5Element>(&mut self, selection: &Selection) -> Result<Vec<T>> {
        self.check_kind::<T>()?;
        let raw = self.read_selection(Some(selection), None, None)?;
        Ok(decode_elements(&raw, self.byte_order))
    }

    /// Write the whole dataset.
    pub fn write<T: H5Element>(&mut self, values: &[T]) -> Result<()> {
        self.write_slice(&Selection::All, values)
    }

    /// Write `values`, in selection order, to a selection.
    pub fn write_slice<T: H5Element>(&mut self, selection: &Selection, values: &[T]) -> Result<()> {
        self.check_kind::<T>()?;
        let raw = encode_elements(values, self.byte_order);
        self.write_selection(&raw, Some(selection), None, None)
    }
}

fn element_size_of(kind: ElementKind) -> Result<usize> {
    match kind.size() {
        0 => Err(Error::InvalidConfig(format!("{kind} elements have no size"))),
        n => Ok(n),
    }
}

/// Reserve the fixed region of an implicitly indexed dataset and
/// initialize every chunk slot with fill.
fn allocate_fill_region<S: Storage + ?Sized>(
    storage: &mut S,
    allocator: &mut FreeSpaceAllocator,
    grid: &ChunkGrid,
    chunk_bytes: u64,
    fill_value: &[u8],
) -> std::result::Result<u64, FormatError> {
    let region = ImplicitIndex::region_size(grid, chunk_bytes);
    let base = allocator.allocate(region)?;
    let fill = fill_value.repeat((chunk_bytes as usize) / fill_value.len());
    for linear in 0..grid.num_chunks() {
        storage.write_at(base + linear * chunk_bytes, &fill)?;
    }
    trace!(base, bytes = region, "allocated fixed chunk region");
    Ok(base)
}

fn dataset_error(name: &str, source: FormatError) -> Error {
    Error::Dataset {
        name: name.to_string(),
        source,
    }
}

fn chunk_error(name: &str, coord: &[u64], source: FormatError) -> Error {
    Error::Chunk {
        dataset: name.to_string(),
        coord: coord.to_vec(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
