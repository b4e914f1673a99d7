//! Dataspace shape and chunk-grid arithmetic.
//!
//! [`ChunkGrid`] owns the scaled chunk-grid dimensions
//! (`ceil(dataset_dim / chunk_dim)` per axis) and the row-major flattening
//! between scaled chunk coordinates and linear chunk indices.

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Marker for an unlimited maximum dimension.
pub const UNLIMITED: u64 = u64::MAX;

/// Logical shape of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataspace {
    /// Current dimension extents. Empty for a scalar.
    pub dims: Vec<u64>,
    /// Maximum extents, `None` when equal to `dims`. [`UNLIMITED`] marks an
    /// unlimited axis.
    pub max_dims: Option<Vec<u64>>,
}

impl Dataspace {
    /// A fixed-size simple dataspace.
    pub fn simple(dims: &[u64]) -> Self {
        Self {
            dims: dims.to_vec(),
            max_dims: None,
        }
    }

    /// A scalar (rank 0, one element) dataspace.
    pub fn scalar() -> Self {
        Self {
            dims: Vec::new(),
            max_dims: None,
        }
    }

    /// A dataspace with explicit maximum extents.
    pub fn with_max_dims(dims: &[u64], max_dims: &[u64]) -> Self {
        Self {
            dims: dims.to_vec(),
            max_dims: Some(max_dims.to_vec()),
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A scalar holds one element.
    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Dimensions with the scalar case widened to `[1]`.
    pub fn effective_dims(&self) -> Vec<u64> {
        if self.dims.is_empty() {
            vec![1]
        } else {
            self.dims.clone()
        }
    }

    /// Axes whose maximum extent is unlimited.
    pub fn unlimited_axes(&self) -> Vec<usize> {
        match &self.max_dims {
            Some(max) => max
                .iter()
                .enumerate()
                .filter(|(_, &m)| m == UNLIMITED)
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Encode as a dataspace message (version 2, 8-byte lengths).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.dims.len() * 16);
        buf.push(2);
        buf.push(self.dims.len() as u8);
        buf.push(if self.max_dims.is_some() { 0x01 } else { 0x00 });
        // 0 = scalar, 1 = simple
        buf.push(if self.dims.is_empty() { 0 } else { 1 });
        for &d in &self.dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        if let Some(max) = &self.max_dims {
            for &m in max {
                buf.extend_from_slice(&m.to_le_bytes());
            }
        }
        buf
    }

    /// Decode a dataspace message produced by [`Dataspace::serialize`].
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        ensure_len(data, 0, 4)?;
        if data[0] != 2 {
            return Err(FormatError::UnsupportedLayout(format!(
                "dataspace message version {}",
                data[0]
            )));
        }
        let rank = data[1] as usize;
        let has_max = data[2] & 0x01 != 0;
        let mut pos = 4;
        let read_dims = |pos: &mut usize| -> Result<Vec<u64>, FormatError> {
            ensure_len(data, *pos, rank * 8)?;
            let dims = data[*pos..*pos + rank * 8]
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect();
            *pos += rank * 8;
            Ok(dims)
        };
        let dims = read_dims(&mut pos)?;
        let max_dims = if has_max { Some(read_dims(&mut pos)?) } else { None };
        Ok(Self { dims, max_dims })
    }
}

fn ensure_len(data: &[u8], offset: usize, needed: usize) -> Result<(), FormatError> {
    match offset.checked_add(needed) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(FormatError::UnexpectedEof {
            expected: offset.saturating_add(needed),
            available: data.len(),
        }),
    }
}

/// Row-major strides (in elements) for a shape.
pub fn row_major_strides(dims: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Geometry of a chunked dataset: dataset extents, chunk extents and the
/// scaled grid between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    dataset_dims: Vec<u64>,
    chunk_dims: Vec<u64>,
    grid_dims: Vec<u64>,
    grid_strides: Vec<u64>,
}

impl ChunkGrid {
    /// Build the grid. Ranks must match and every chunk extent must be
    /// non-zero. A rank-0 dataset is treated as `[1]` with chunk `[1]`.
    pub fn new(dataset_dims: &[u64], chunk_dims: &[u64]) -> Result<Self, FormatError> {
        let (dataset_dims, chunk_dims) = if dataset_dims.is_empty() && chunk_dims.is_empty() {
            (vec![1], vec![1])
        } else {
            (dataset_dims.to_vec(), chunk_dims.to_vec())
        };
        if dataset_dims.len() != chunk_dims.len() {
            return Err(FormatError::InvalidChunkDimensions(format!(
                "chunk rank {} does not match dataset rank {}",
                chunk_dims.len(),
                dataset_dims.len()
            )));
        }
        if let Some(axis) = chunk_dims.iter().position(|&c| c == 0) {
            return Err(FormatError::InvalidChunkDimensions(format!(
                "chunk extent along axis {axis} is zero"
            )));
        }
        let grid_dims: Vec<u64> = dataset_dims
            .iter()
            .zip(&chunk_dims)
            .map(|(&d, &c)| d.div_ceil(c))
            .collect();
        let grid_strides = row_major_strides(&grid_dims);
        Ok(Self {
            dataset_dims,
            chunk_dims,
            grid_dims,
            grid_strides,
        })
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dataset_dims.len()
    }

    /// Dataset extents.
    pub fn dataset_dims(&self) -> &[u64] {
        &self.dataset_dims
    }

    /// Nominal chunk extents.
    pub fn chunk_dims(&self) -> &[u64] {
        &self.chunk_dims
    }

    /// Scaled chunk-grid extents.
    pub fn grid_dims(&self) -> &[u64] {
        &self.grid_dims
    }

    /// Total number of chunks in the grid.
    pub fn num_chunks(&self) -> u64 {
        self.grid_dims.iter().product()
    }

    /// Elements in one nominal (full) chunk.
    pub fn chunk_elements(&self) -> u64 {
        self.chunk_dims.iter().product()
    }

    /// Whether a scaled coordinate lies inside the grid.
    pub fn contains(&self, coord: &[u64]) -> bool {
        coord.len() == self.rank() && coord.iter().zip(&self.grid_dims).all(|(&c, &g)| c < g)
    }

    /// Row-major linear chunk index of a scaled coordinate.
    pub fn linear_index(&self, coord: &[u64]) -> Result<u64, FormatError> {
        if !self.contains(coord) {
            return Err(FormatError::ChunkOutOfGrid {
                coord: coord.to_vec(),
            });
        }
        Ok(coord.iter().zip(&self.grid_strides).map(|(&c, &s)| c * s).sum())
    }

    /// Inverse of [`ChunkGrid::linear_index`].
    pub fn coord_of(&self, linear: u64) -> Result<Vec<u64>, FormatError> {
        if linear >= self.num_chunks() {
            return Err(FormatError::ChunkOutOfGrid {
                coord: vec![linear],
            });
        }
        let mut remaining = linear;
        Ok(self
            .grid_strides
            .iter()
            .map(|&s| {
                let c = remaining / s;
                remaining %= s;
                c
            })
            .collect())
    }

    /// Scaled coordinate of the chunk holding an element coordinate.
    pub fn chunk_of(&self, element: &[u64]) -> Vec<u64> {
        element.iter().zip(&self.chunk_dims).map(|(&e, &c)| e / c).collect()
    }

    /// Element offset of a chunk's first element along each axis.
    pub fn element_offset(&self, coord: &[u64]) -> Vec<u64> {
        coord.iter().zip(&self.chunk_dims).map(|(&c, &d)| c * d).collect()
    }

    /// Valid (in-bounds) extent of a chunk along each axis. Smaller than the
    /// nominal chunk extent only for edge chunks.
    pub fn valid_extent(&self, coord: &[u64]) -> Vec<u64> {
        coord
            .iter()
            .zip(&self.chunk_dims)
            .zip(&self.dataset_dims)
            .map(|((&c, &chunk), &dim)| chunk.min(dim.saturating_sub(c * chunk)))
            .collect()
    }

    /// Whether a chunk is clipped by the dataset bound on any axis.
    pub fn is_edge_chunk(&self, coord: &[u64]) -> bool {
        self.valid_extent(coord)
            .iter()
            .zip(&self.chunk_dims)
            .any(|(v, c)| v < c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_dims_round_up() {
        let grid = ChunkGrid::new(&[10], &[4]).unwrap();
        assert_eq!(grid.grid_dims(), &[3]);
        assert_eq!(grid.num_chunks(), 3);

        let grid = ChunkGrid::new(&[5, 7], &[2, 7]).unwrap();
        assert_eq!(grid.grid_dims(), &[3, 1]);
    }

    #[test]
    fn linear_index_roundtrips_every_coordinate() {
        let grid = ChunkGrid::new(&[9, 10, 11], &[2, 3, 4]).unwrap();
        assert_eq!(grid.grid_dims(), &[5, 4, 3]);
        for linear in 0..grid.num_chunks() {
            let coord = grid.coord_of(linear).unwrap();
            assert_eq!(grid.linear_index(&coord).unwrap(), linear);
        }
    }

    #[test]
    fn linear_index_is_row_major() {
        let grid = ChunkGrid::new(&[4, 6], &[2, 2]).unwrap();
        assert_eq!(grid.linear_index(&[0, 0]).unwrap(), 0);
        assert_eq!(grid.linear_index(&[0, 2]).unwrap(), 2);
        assert_eq!(grid.linear_index(&[1, 0]).unwrap(), 3);
        assert_eq!(grid.linear_index(&[1, 2]).unwrap(), 5);
    }

    #[test]
    fn out_of_grid_is_rejected() {
        let grid = ChunkGrid::new(&[10], &[4]).unwrap();
        assert!(matches!(
            grid.linear_index(&[3]),
            Err(FormatError::ChunkOutOfGrid { .. })
        ));
        assert!(grid.coord_of(3).is_err());
    }

    #[test]
    fn edge_chunk_extent() {
        let grid = ChunkGrid::new(&[10], &[4]).unwrap();
        assert_eq!(grid.valid_extent(&[0]), vec![4]);
        assert_eq!(grid.valid_extent(&[2]), vec![2]);
        assert!(grid.is_edge_chunk(&[2]));
        assert!(!grid.is_edge_chunk(&[1]));
    }

    #[test]
    fn zero_chunk_extent_is_rejected() {
        assert!(matches!(
            ChunkGrid::new(&[10, 10], &[0, 5]),
            Err(FormatError::InvalidChunkDimensions(_))
        ));
        assert!(ChunkGrid::new(&[10], &[5, 5]).is_err());
    }

    #[test]
    fn scalar_grid_has_one_chunk() {
        let grid = ChunkGrid::new(&[], &[]).unwrap();
        assert_eq!(grid.num_chunks(), 1);
        assert_eq!(grid.linear_index(&[0]).unwrap(), 0);
    }

    #[test]
    fn dataspace_message_roundtrip() {
        let space = Dataspace::with_max_dims(&[3, 4], &[UNLIMITED, 4]);
        let parsed = Dataspace::parse(&space.serialize()).unwrap();
        assert_eq!(parsed, space);
        assert_eq!(parsed.unlimited_axes(), vec![0]);

        let scalar = Dataspace::scalar();
        assert_eq!(Dataspace::parse(&scalar.serialize()).unwrap(), scalar);
        assert_eq!(scalar.num_elements(), 1);
    }
}
