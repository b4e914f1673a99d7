//! Chunked-dataset storage structures for HDF5 files.
//!
//! This crate holds the I/O-free half of the chunk storage engine: chunk
//! grid arithmetic, the layout message, the filter pipeline, the chunk
//! cache, every chunk index variant with its on-disk codec, and the
//! selection/transfer engine that moves elements between chunk buffers
//! and caller memory. Storage access is abstracted behind
//! [`chunk_index::BlockIo`].

pub mod checksum;
pub mod chunk_cache;
pub mod chunk_index;
pub mod codec;
pub mod data_layout;
pub mod dataspace;
pub mod error;
pub mod filter_pipeline;
pub mod filters;
pub mod selection;
pub mod transfer;

pub use chunk_cache::{CacheStats, ChunkCache, ChunkCacheConfig, ChunkSlot};
pub use chunk_index::{BlockIo, ChunkIndex, ChunkIndexEntry, ChunkIndexOps, IndexParams};
pub use data_layout::{ChunkIndexKind, DataLayout, IndexLocation};
pub use dataspace::{ChunkGrid, Dataspace, UNLIMITED};
pub use error::FormatError;
pub use filter_pipeline::FilterPipeline;
pub use selection::Selection;
pub use transfer::TransferPlan;
