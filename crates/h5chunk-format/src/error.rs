//! Error types for the chunked storage engine.

use core::fmt;

/// Errors raised while indexing, filtering, caching or transferring chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// The layout class or chunk-index discriminant is not implemented.
    UnsupportedLayout(String),
    /// An on-disk index structure violates its own invariants.
    MalformedIndex {
        /// Which structure was being decoded (e.g. `"fixed array data block"`).
        structure: &'static str,
        /// What was wrong with it.
        reason: String,
    },
    /// A checksum stage (or metadata block checksum) failed verification.
    ChecksumMismatch {
        /// The checksum stored alongside the data.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// A selection has a different rank than the space it selects from.
    SelectionRankMismatch {
        /// Rank of the dataspace.
        expected: usize,
        /// Rank of the selection.
        actual: usize,
    },
    /// A selection reaches outside the space it selects from.
    SelectionOutOfBounds {
        /// Offending dimension.
        dim: usize,
        /// Exclusive end of the selection along `dim`.
        end: u64,
        /// Extent of the space along `dim`.
        extent: u64,
    },
    /// File-side and memory-side selections describe different element counts.
    SelectionCountMismatch {
        /// Elements selected in the file space.
        file: u64,
        /// Elements selected in the memory space.
        memory: u64,
    },
    /// A hyperslab whose blocks overlap (stride smaller than block).
    OverlappingHyperslab {
        /// Offending dimension.
        dim: usize,
    },
    /// A structural object was reached again while its encoding was in progress.
    CircularEncodeReference(String),
    /// The free-space allocator cannot satisfy a request.
    AllocationExhausted {
        /// Bytes requested.
        requested: u64,
        /// Bytes still available.
        available: u64,
    },
    /// A filter id that no stage implements.
    UnsupportedFilter(u16),
    /// A filter stage rejected its input.
    FilterError(String),
    /// Compression failed.
    CompressionError(String),
    /// Decompression failed.
    DecompressionError(String),
    /// Chunk dimensions are zero, of the wrong rank, or otherwise unusable.
    InvalidChunkDimensions(String),
    /// A chunk coordinate lies outside the chunk grid.
    ChunkOutOfGrid {
        /// The scaled chunk coordinate.
        coord: Vec<u64>,
    },
    /// Layout metadata was requested while chunks are still only in the cache.
    UnflushedChunks(usize),
    /// Chunk cache parameters were rejected.
    InvalidCacheConfig(String),
    /// The backing byte store failed.
    Io(String),
}

impl FormatError {
    /// Shorthand for a [`FormatError::MalformedIndex`].
    pub fn malformed(structure: &'static str, reason: impl Into<String>) -> Self {
        FormatError::MalformedIndex {
            structure,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::UnsupportedLayout(what) => write!(f, "unsupported layout: {what}"),
            FormatError::MalformedIndex { structure, reason } => {
                write!(f, "malformed {structure}: {reason}")
            }
            FormatError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::SelectionRankMismatch { expected, actual } => {
                write!(f, "selection rank {actual} does not match space rank {expected}")
            }
            FormatError::SelectionOutOfBounds { dim, end, extent } => {
                write!(
                    f,
                    "selection ends at {end} in dimension {dim}, but the extent is {extent}"
                )
            }
            FormatError::SelectionCountMismatch { file, memory } => {
                write!(
                    f,
                    "file selection has {file} elements but memory selection has {memory}"
                )
            }
            FormatError::OverlappingHyperslab { dim } => {
                write!(f, "hyperslab blocks overlap in dimension {dim} (stride < block)")
            }
            FormatError::CircularEncodeReference(what) => {
                write!(f, "{what} is already being encoded (circular reference)")
            }
            FormatError::AllocationExhausted {
                requested,
                available,
            } => {
                write!(
                    f,
                    "cannot allocate {requested} bytes, only {available} bytes available"
                )
            }
            FormatError::UnsupportedFilter(id) => write!(f, "unsupported filter id {id}"),
            FormatError::FilterError(msg) => write!(f, "filter error: {msg}"),
            FormatError::CompressionError(msg) => write!(f, "compression error: {msg}"),
            FormatError::DecompressionError(msg) => write!(f, "decompression error: {msg}"),
            FormatError::InvalidChunkDimensions(msg) => {
                write!(f, "invalid chunk dimensions: {msg}")
            }
            FormatError::ChunkOutOfGrid { coord } => {
                write!(f, "chunk {coord:?} lies outside the chunk grid")
            }
            FormatError::UnflushedChunks(n) => {
                write!(f, "{n} chunk(s) must be flushed before encoding layout metadata")
            }
            FormatError::InvalidCacheConfig(msg) => write!(f, "invalid chunk cache config: {msg}"),
            FormatError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for FormatError {}

impl From<std::io::Error> for FormatError {
    fn from(e: std::io::Error) -> Self {
        FormatError::Io(e.to_string())
    }
}
