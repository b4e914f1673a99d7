//! Data layout message (message type 0x0008): compact, contiguous and
//! chunked storage, with the chunk-index discriminant for chunked data.

use serde::{Deserialize, Serialize};

use crate::codec::{put_address, put_u16, put_u32, put_u64, ByteReader};
use crate::error::FormatError;

/// Chunk indexing strategy, as recorded in the layout message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkIndexKind {
    SingleChunk,
    Implicit,
    FixedArray,
    ExtensibleArray,
    BTreeV2,
    /// Version 1 B-tree keyed by chunk coordinate (layout message v3).
    BTreeV1,
}

impl ChunkIndexKind {
    /// Discriminant stored in a version 4 layout message. `None` for the
    /// v1 B-tree, which is implied by layout version 3.
    pub fn discriminant(self) -> Option<u8> {
        match self {
            ChunkIndexKind::SingleChunk => Some(1),
            ChunkIndexKind::Implicit => Some(2),
            ChunkIndexKind::FixedArray => Some(3),
            ChunkIndexKind::ExtensibleArray => Some(4),
            ChunkIndexKind::BTreeV2 => Some(5),
            ChunkIndexKind::BTreeV1 => None,
        }
    }

    /// Resolve a version 4 discriminant.
    pub fn from_discriminant(value: u8) -> Result<Self, FormatError> {
        match value {
            1 => Ok(ChunkIndexKind::SingleChunk),
            2 => Ok(ChunkIndexKind::Implicit),
            3 => Ok(ChunkIndexKind::FixedArray),
            4 => Ok(ChunkIndexKind::ExtensibleArray),
            5 => Ok(ChunkIndexKind::BTreeV2),
            other => Err(FormatError::UnsupportedLayout(format!(
                "chunk index type {other}"
            ))),
        }
    }
}

/// Where a chunk index keeps its root, as embedded in the layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    SingleChunk {
        address: Option<u64>,
        /// Stored size and mask are only recorded for filtered datasets.
        filtered: Option<(u64, u32)>,
    },
    Implicit { base_address: Option<u64> },
    FixedArray { header_address: Option<u64> },
    ExtensibleArray { header_address: Option<u64> },
    BTreeV2 { header_address: Option<u64> },
    BTreeV1 { root_address: Option<u64> },
}

impl IndexLocation {
    /// The index kind this location belongs to.
    pub fn kind(&self) -> ChunkIndexKind {
        match self {
            IndexLocation::SingleChunk { .. } => ChunkIndexKind::SingleChunk,
            IndexLocation::Implicit { .. } => ChunkIndexKind::Implicit,
            IndexLocation::FixedArray { .. } => ChunkIndexKind::FixedArray,
            IndexLocation::ExtensibleArray { .. } => ChunkIndexKind::ExtensibleArray,
            IndexLocation::BTreeV2 { .. } => ChunkIndexKind::BTreeV2,
            IndexLocation::BTreeV1 { .. } => ChunkIndexKind::BTreeV1,
        }
    }

    /// An empty (never persisted) location of `kind`.
    pub fn empty(kind: ChunkIndexKind) -> Self {
        match kind {
            ChunkIndexKind::SingleChunk => IndexLocation::SingleChunk {
                address: None,
                filtered: None,
            },
            ChunkIndexKind::Implicit => IndexLocation::Implicit { base_address: None },
            ChunkIndexKind::FixedArray => IndexLocation::FixedArray {
                header_address: None,
            },
            ChunkIndexKind::ExtensibleArray => IndexLocation::ExtensibleArray {
                header_address: None,
            },
            ChunkIndexKind::BTreeV2 => IndexLocation::BTreeV2 {
                header_address: None,
            },
            ChunkIndexKind::BTreeV1 => IndexLocation::BTreeV1 { root_address: None },
        }
    }
}

/// A decoded data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Raw data stored inline in the message.
    Compact { data: Vec<u8> },
    /// Raw data stored in one contiguous range.
    Contiguous { address: Option<u64>, size: u64 },
    /// Chunked storage.
    Chunked {
        /// Chunk extents, one per dataset axis.
        chunk_dims: Vec<u64>,
        /// Bytes per element.
        element_size: u32,
        /// Index variant and its root.
        index: IndexLocation,
    },
}

const CLASS_COMPACT: u8 = 0;
const CLASS_CONTIGUOUS: u8 = 1;
const CLASS_CHUNKED: u8 = 2;

/// v4 chunked flag: the single chunk is filtered (size and mask follow).
const FLAG_SINGLE_FILTERED: u8 = 0x02;

/// Fixed parameter bytes written ahead of the index address for the
/// array and v2 B-tree kinds. Their real parameters live in the index
/// headers; these only keep the message self-describing.
const FIXED_ARRAY_PAGE_BITS: u8 = 10;
const EA_PARAMS: [u8; 5] = [32, 4, 16, 4, 10];
const BT2_PARAMS: [u8; 6] = [0, 2, 0, 0, 100, 40];

impl DataLayout {
    /// Encode. The v1 B-tree produces a version 3 message; everything else
    /// produces version 4.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            DataLayout::Compact { data } => {
                buf.extend_from_slice(&[4, CLASS_COMPACT]);
                put_u16(&mut buf, data.len() as u16);
                buf.extend_from_slice(data);
            }
            DataLayout::Contiguous { address, size } => {
                buf.extend_from_slice(&[4, CLASS_CONTIGUOUS]);
                put_address(&mut buf, *address);
                put_u64(&mut buf, *size);
            }
            DataLayout::Chunked {
                chunk_dims,
                element_size,
                index: IndexLocation::BTreeV1 { root_address },
            } => {
                buf.extend_from_slice(&[3, CLASS_CHUNKED, chunk_dims.len() as u8 + 1]);
                put_address(&mut buf, *root_address);
                for &d in chunk_dims {
                    put_u32(&mut buf, d as u32);
                }
                put_u32(&mut buf, *element_size);
            }
            DataLayout::Chunked {
                chunk_dims,
                element_size,
                index,
            } => {
                let flags = match index {
                    IndexLocation::SingleChunk {
                        filtered: Some(_), ..
                    } => FLAG_SINGLE_FILTERED,
                    _ => 0,
                };
                buf.extend_from_slice(&[4, CLASS_CHUNKED, flags, chunk_dims.len() as u8 + 1, 8]);
                for &d in chunk_dims {
                    put_u64(&mut buf, d);
                }
                put_u64(&mut buf, u64::from(*element_size));
                buf.push(index.kind().discriminant().unwrap_or(0));
                match index {
                    IndexLocation::SingleChunk { address, filtered } => {
                        if let Some((size, mask)) = filtered {
                            put_u64(&mut buf, *size);
                            put_u32(&mut buf, *mask);
                        }
                        put_address(&mut buf, *address);
                    }
                    IndexLocation::Implicit { base_address } => {
                        put_address(&mut buf, *base_address)
                    }
                    IndexLocation::FixedArray { header_address } => {
                        buf.push(FIXED_ARRAY_PAGE_BITS);
                        put_address(&mut buf, *header_address);
                    }
                    IndexLocation::ExtensibleArray { header_address } => {
                        buf.extend_from_slice(&EA_PARAMS);
                        put_address(&mut buf, *header_address);
                    }
                    IndexLocation::BTreeV2 { header_address } => {
                        buf.extend_from_slice(&BT2_PARAMS);
                        put_address(&mut buf, *header_address);
                    }
                    IndexLocation::BTreeV1 { .. } => {}
                }
            }
        }
        buf
    }

    /// Decode a version 3 or version 4 layout message.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        let class = r.u8()?;
        match (version, class) {
            (3 | 4, CLASS_COMPACT) => {
                let size = r.u16()? as usize;
                Ok(DataLayout::Compact {
                    data: r.take(size)?.to_vec(),
                })
            }
            (3 | 4, CLASS_CONTIGUOUS) => Ok(DataLayout::Contiguous {
                address: r.address()?,
                size: r.u64()?,
            }),
            (3, CLASS_CHUNKED) => {
                let ndims = r.u8()? as usize;
                if ndims == 0 {
                    return Err(FormatError::InvalidChunkDimensions(
                        "layout records no dimensions".into(),
                    ));
                }
                let root_address = r.address()?;
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dims.push(u64::from(r.u32()?));
                }
                let element_size = dims.pop().unwrap_or(0) as u32;
                Ok(DataLayout::Chunked {
                    chunk_dims: dims,
                    element_size,
                    index: IndexLocation::BTreeV1 { root_address },
                })
            }
            (4, CLASS_CHUNKED) => Self::parse_chunked_v4(&mut r),
            (3 | 4, other) => Err(FormatError::UnsupportedLayout(format!(
                "layout class {other}"
            ))),
            (v, _) => Err(FormatError::UnsupportedLayout(format!(
                "layout message version {v}"
            ))),
        }
    }

    fn parse_chunked_v4(r: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let flags = r.u8()?;
        let ndims = r.u8()? as usize;
        let width = r.u8()? as usize;
        if ndims == 0 || !(1..=8).contains(&width) {
            return Err(FormatError::InvalidChunkDimensions(format!(
                "{ndims} dimensions of {width}-byte extents"
            )));
        }
        let mut dims = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            dims.push(r.uint(width)?);
        }
        let element_size = dims.pop().unwrap_or(0) as u32;
        let kind = ChunkIndexKind::from_discriminant(r.u8()?)?;
        let index = match kind {
            ChunkIndexKind::SingleChunk => {
                let filtered = if flags & FLAG_SINGLE_FILTERED != 0 {
                    Some((r.u64()?, r.u32()?))
                } else {
                    None
                };
                IndexLocation::SingleChunk {
                    address: r.address()?,
                    filtered,
                }
            }
            ChunkIndexKind::Implicit => IndexLocation::Implicit {
                base_address: r.address()?,
            },
            ChunkIndexKind::FixedArray => {
                r.skip(1)?;
                IndexLocation::FixedArray {
                    header_address: r.address()?,
                }
            }
            ChunkIndexKind::ExtensibleArray => {
                r.skip(EA_PARAMS.len())?;
                IndexLocation::ExtensibleArray {
                    header_address: r.address()?,
                }
            }
            ChunkIndexKind::BTreeV2 => {
                r.skip(BT2_PARAMS.len())?;
                IndexLocation::BTreeV2 {
                    header_address: r.address()?,
                }
            }
            ChunkIndexKind::BTreeV1 => {
                return Err(FormatError::UnsupportedLayout(
                    "v1 B-tree in a version 4 layout".into(),
                ))
            }
        };
        Ok(DataLayout::Chunked {
            chunk_dims: dims,
            element_size,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(index: IndexLocation) -> DataLayout {
        DataLayout::Chunked {
            chunk_dims: vec![4, 6],
            element_size: 8,
            index,
        }
    }

    #[test]
    fn every_index_kind_roundtrips() {
        let layouts = [
            chunked(IndexLocation::SingleChunk {
                address: Some(0x800),
                filtered: None,
            }),
            chunked(IndexLocation::SingleChunk {
                address: Some(0x800),
                filtered: Some((77, 0b10)),
            }),
            chunked(IndexLocation::Implicit {
                base_address: Some(4096),
            }),
            chunked(IndexLocation::FixedArray {
                header_address: Some(123),
            }),
            chunked(IndexLocation::ExtensibleArray {
                header_address: None,
            }),
            chunked(IndexLocation::BTreeV2 {
                header_address: Some(9),
            }),
            chunked(IndexLocation::BTreeV1 {
                root_address: Some(2048),
            }),
        ];
        for layout in &layouts {
            assert_eq!(&DataLayout::parse(&layout.serialize()).unwrap(), layout);
        }
    }

    #[test]
    fn btree_v1_uses_version_3() {
        let msg = chunked(IndexLocation::BTreeV1 { root_address: None }).serialize();
        assert_eq!(msg[0], 3);
        let msg = chunked(IndexLocation::FixedArray {
            header_address: None,
        })
        .serialize();
        assert_eq!(msg[0], 4);
    }

    #[test]
    fn discriminants_are_fixed() {
        assert_eq!(ChunkIndexKind::SingleChunk.discriminant(), Some(1));
        assert_eq!(ChunkIndexKind::Implicit.discriminant(), Some(2));
        assert_eq!(ChunkIndexKind::FixedArray.discriminant(), Some(3));
        assert_eq!(ChunkIndexKind::ExtensibleArray.discriminant(), Some(4));
        assert_eq!(ChunkIndexKind::BTreeV2.discriminant(), Some(5));
        for d in 1..=5 {
            let kind = ChunkIndexKind::from_discriminant(d).unwrap();
            assert_eq!(kind.discriminant(), Some(d));
        }
    }

    #[test]
    fn unknown_discriminant_is_unsupported() {
        let mut msg = chunked(IndexLocation::Implicit { base_address: None }).serialize();
        // ndims = 3 extents of 8 bytes after the 5-byte prefix
        msg[5 + 3 * 8] = 6;
        assert!(matches!(
            DataLayout::parse(&msg),
            Err(FormatError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn contiguous_and_compact() {
        let contiguous = DataLayout::Contiguous {
            address: None,
            size: 400,
        };
        assert_eq!(DataLayout::parse(&contiguous.serialize()).unwrap(), contiguous);
        let compact = DataLayout::Compact {
            data: vec![1, 2, 3],
        };
        assert_eq!(DataLayout::parse(&compact.serialize()).unwrap(), compact);
    }

    #[test]
    fn bad_version_is_unsupported() {
        assert!(matches!(
            DataLayout::parse(&[9, 2]),
            Err(FormatError::UnsupportedLayout(_))
        ));
    }
}
