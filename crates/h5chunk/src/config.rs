//! Dataset access and creation properties.
//!
//! Property bundles group related configuration into reusable values.
//! Both can be loaded from JSON.

use serde::{Deserialize, Serialize};

use h5chunk_format::chunk_index::DEFAULT_NODE_CAPACITY;
use h5chunk_format::data_layout::ChunkIndexKind;
use h5chunk_format::filter_pipeline::FilterPipeline;

pub use h5chunk_format::chunk_cache::ChunkCacheConfig;

use crate::element::ByteOrder;
use crate::error::{Error, Result};

/// Dataset access properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetAccess {
    /// Chunk cache sizing.
    pub cache: ChunkCacheConfig,
    /// Copy contiguous runs in one step instead of element by element.
    pub bulk_copy: bool,
}

impl Default for DatasetAccess {
    fn default() -> Self {
        Self {
            cache: ChunkCacheConfig::default(),
            bulk_copy: true,
        }
    }
}

impl DatasetAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk cache configuration.
    pub fn cache(mut self, cache: ChunkCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Enable or disable bulk run copies.
    pub fn bulk_copy(mut self, enabled: bool) -> Self {
        self.bulk_copy = enabled;
        self
    }

    /// Parse from JSON. The cache section is validated.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Dataset creation properties.
///
/// Controls chunking, filters, fill value and index selection for a new
/// dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetCreation {
    /// Chunk dimensions. Without them the dataset is contiguous, unless
    /// filters are configured, in which case one chunk spans the dataset.
    pub chunk_dims: Option<Vec<u64>>,
    /// Deflate compression level (0-9).
    pub deflate_level: Option<u32>,
    /// Byte shuffle before compression.
    pub shuffle: bool,
    /// Fletcher-32 checksum.
    pub fletcher32: bool,
    /// Fill value for one element. Zeros when unset.
    pub fill_value: Option<Vec<u8>>,
    /// Force a chunk index variant instead of choosing one.
    pub index_kind: Option<ChunkIndexKind>,
    /// Run partial edge chunks through the filters. When disabled they are
    /// stored raw with every filter bit set in their mask.
    pub filter_edge_chunks: bool,
    /// Maximum entries per B-tree node.
    pub btree_node_capacity: usize,
    /// Byte order of stored elements.
    pub byte_order: ByteOrder,
}

impl Default for DatasetCreation {
    fn default() -> Self {
        Self {
            chunk_dims: None,
            deflate_level: None,
            shuffle: false,
            fletcher32: false,
            fill_value: None,
            index_kind: None,
            filter_edge_chunks: true,
            btree_node_capacity: DEFAULT_NODE_CAPACITY,
            byte_order: ByteOrder::LittleEndian,
        }
    }
}

impl DatasetCreation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk dimensions.
    pub fn chunk(mut self, dims: &[u64]) -> Self {
        self.chunk_dims = Some(dims.to_vec());
        self
    }

    /// Set deflate compression level (0-9).
    pub fn deflate(mut self, level: u32) -> Self {
        self.deflate_level = Some(level);
        self
    }

    /// Enable the shuffle filter.
    pub fn shuffle(mut self) -> Self {
        self.shuffle = true;
        self
    }

    /// Enable the fletcher32 checksum.
    pub fn fletcher32(mut self) -> Self {
        self.fletcher32 = true;
        self
    }

    /// Set the fill value of one element.
    pub fn fill_value(mut self, bytes: &[u8]) -> Self {
        self.fill_value = Some(bytes.to_vec());
        self
    }

    /// Force a chunk index variant.
    pub fn index_kind(mut self, kind: ChunkIndexKind) -> Self {
        self.index_kind = Some(kind);
        self
    }

    /// Store partial edge chunks unfiltered.
    pub fn skip_edge_chunk_filters(mut self) -> Self {
        self.filter_edge_chunks = false;
        self
    }

    /// Set the B-tree node capacity.
    pub fn btree_node_capacity(mut self, capacity: usize) -> Self {
        self.btree_node_capacity = capacity;
        self
    }

    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Whether any filter is configured.
    pub fn has_filters(&self) -> bool {
        self.deflate_level.is_some() || self.shuffle || self.fletcher32
    }

    /// The filter pipeline, in encode order: shuffle, deflate, fletcher32.
    pub fn pipeline(&self) -> FilterPipeline {
        let mut pipeline = FilterPipeline::new();
        if self.shuffle {
            pipeline = pipeline.shuffle();
        }
        if let Some(level) = self.deflate_level {
            pipeline = pipeline.deflate(level);
        }
        if self.fletcher32 {
            pipeline = pipeline.fletcher32();
        }
        pipeline
    }

    /// Index variant for a dataset with `num_chunks` chunks and the given
    /// unlimited axes, unless one was forced.
    pub fn choose_index(&self, num_chunks: u64, unlimited_axes: &[usize]) -> ChunkIndexKind {
        if let Some(kind) = self.index_kind {
            return kind;
        }
        match unlimited_axes {
            [0] => ChunkIndexKind::ExtensibleArray,
            [] if num_chunks == 1 => ChunkIndexKind::SingleChunk,
            [] if !self.has_filters() => ChunkIndexKind::Implicit,
            [] => ChunkIndexKind::FixedArray,
            _ => ChunkIndexKind::BTreeV2,
        }
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let creation: Self = serde_json::from_str(json)?;
        if let Some(level) = creation.deflate_level {
            if level > 9 {
                return Err(Error::InvalidConfig(format!(
                    "deflate level {level} is outside 0-9"
                )));
            }
        }
        Ok(creation)
    }
}
