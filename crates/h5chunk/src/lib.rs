//! Chunked dataset storage for HDF5-style containers.
//!
//! `h5chunk` reads and writes N-dimensional datasets split into fixed-size
//! chunks. Each chunk is located through one of several chunk index
//! variants, passed through a filter pipeline (shuffle, deflate,
//! Fletcher-32) and held decoded in a bounded LRU cache. Transfers between
//! arbitrary file and memory selections are planned chunk by chunk.
//!
//! # Example
//!
//! ```
//! use h5chunk::{Dataset, DatasetAccess, DatasetCreation, Dataspace, ElementKind};
//! use h5chunk::{FreeSpaceAllocator, MemoryStorage, Selection};
//!
//! let creation = DatasetCreation::new().chunk(&[4, 4]).deflate(6);
//! let mut ds = Dataset::create(
//!     "temperature",
//!     MemoryStorage::new(),
//!     FreeSpaceAllocator::new(0),
//!     Dataspace::simple(&[10, 10]),
//!     ElementKind::F64,
//!     &creation,
//!     &DatasetAccess::default(),
//! )
//! .unwrap();
//!
//! let values: Vec<f64> = (0..100).map(f64::from).collect();
//! ds.write(&values).unwrap();
//! let row: Vec<f64> = ds.read_slice(&Selection::slice(&[3..4, 0..10])).unwrap();
//! assert_eq!(row, values[30..40]);
//!
//! let descriptor = ds.commit().unwrap();
//! assert_eq!(descriptor.kind, ElementKind::F64);
//! ```

pub mod config;
pub mod dataset;
pub mod element;
pub mod encoder;
pub mod error;
pub mod logging;

pub use config::{ChunkCacheConfig, DatasetAccess, DatasetCreation};
pub use dataset::{Dataset, DatasetDescriptor};
pub use element::{ByteOrder, ElementKind, H5Element};
pub use encoder::{read_object, DecodedObject, Object, ObjectEncoder, ObjectGraph, ObjectId};
pub use error::{Error, Result};
pub use logging::LoggingConfig;

pub use h5chunk_format::{
    ChunkIndexKind, DataLayout, Dataspace, FilterPipeline, FormatError, Selection, UNLIMITED,
};
pub use h5chunk_io::{FileStorage, FreeSpaceAllocator, MemoryStorage, Storage};

pub use h5chunk_format;
pub use h5chunk_io;
