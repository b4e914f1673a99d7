//! Chunk-aligned transfer plans between a chunked file space and a dense
//! memory buffer.
//!
//! A [`TransferPlan`] pairs the i-th selected file element with the i-th
//! selected memory element. File-side runs are split at chunk boundaries
//! and grouped per chunk, ascending by linear chunk index, so a caller
//! can visit each touched chunk exactly once. Selections are validated
//! against the dataset extent, so edge chunks are only ever touched inside
//! their valid region.

use std::collections::BTreeMap;

use crate::dataspace::{row_major_strides, ChunkGrid};
use crate::error::FormatError;
use crate::selection::Selection;

/// Consecutive elements inside one chunk buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSegment {
    /// Element offset within the nominal (full-size) chunk buffer.
    pub chunk_offset: u64,
    /// Position of the first element in selection order.
    pub seq: u64,
    /// Number of elements.
    pub len: u64,
}

/// Everything a transfer touches in one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTransfer {
    pub linear_index: u64,
    pub coord: Vec<u64>,
    pub segments: Vec<ChunkSegment>,
}

impl ChunkTransfer {
    /// Elements transferred to or from this chunk.
    pub fn num_elements(&self) -> u64 {
        self.segments.iter().map(|s| s.len).sum()
    }
}

/// Contiguous memory stretch: `len` elements from `offset`, covering
/// selection positions `seq..seq + len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemoryRun {
    seq: u64,
    offset: u64,
    len: u64,
}

#[derive(Debug, Clone)]
pub struct TransferPlan {
    chunks: Vec<ChunkTransfer>,
    memory: Vec<MemoryRun>,
    memory_elements: u64,
    element_size: usize,
    num_elements: u64,
    exclusive: bool,
    bulk_copy: bool,
}

impl TransferPlan {
    /// Plan a transfer between `file_selection` over the grid's dataset
    /// space and `memory_selection` over a dense buffer of `memory_dims`.
    pub fn new(
        grid: &ChunkGrid,
        file_selection: &Selection,
        memory_dims: &[u64],
        memory_selection: &Selection,
        element_size: usize,
    ) -> Result<Self, FormatError> {
        let file_runs = file_selection.runs(grid.dataset_dims())?;
        let memory_runs = memory_selection.runs(memory_dims)?;

        let file_count: u64 = file_runs.iter().map(|r| r.len).sum();
        let memory_count: u64 = memory_runs.iter().map(|r| r.len).sum();
        if file_count != memory_count {
            return Err(FormatError::SelectionCountMismatch {
                file: file_count,
                memory: memory_count,
            });
        }

        let memory_strides = row_major_strides(memory_dims);
        let mut memory: Vec<MemoryRun> = Vec::with_capacity(memory_runs.len());
        let mut seq = 0u64;
        for run in &memory_runs {
            let offset: u64 = run.start.iter().zip(&memory_strides).map(|(c, s)| c * s).sum();
            match memory.last_mut() {
                Some(prev) if prev.offset + prev.len == offset => prev.len += run.len,
                _ => memory.push(MemoryRun {
                    seq,
                    offset,
                    len: run.len,
                }),
            }
            seq += run.len;
        }

        let chunk_dims = grid.chunk_dims();
        let chunk_strides = row_major_strides(chunk_dims);
        let last = grid.rank() - 1;
        let mut chunks: BTreeMap<u64, ChunkTransfer> = BTreeMap::new();
        let mut seq = 0u64;
        for run in &file_runs {
            let mut pos = run.start.clone();
            let mut remaining = run.len;
            while remaining > 0 {
                let coord = grid.chunk_of(&pos);
                let linear = grid.linear_index(&coord)?;
                let chunk_end = (coord[last] + 1) * chunk_dims[last];
                let len = remaining.min(chunk_end - pos[last]);
                let chunk_offset = pos
                    .iter()
                    .zip(&coord)
                    .zip(chunk_dims)
                    .zip(&chunk_strides)
                    .map(|(((&p, &c), &d), &s)| (p - c * d) * s)
                    .sum();
                chunks
                    .entry(linear)
                    .or_insert_with(|| ChunkTransfer {
                        linear_index: linear,
                        coord,
                        segments: Vec::new(),
                    })
                    .segments
                    .push(ChunkSegment {
                        chunk_offset,
                        seq,
                        len,
                    });
                pos[last] += len;
                seq += len;
                remaining -= len;
            }
        }

        Ok(Self {
            chunks: chunks.into_values().collect(),
            memory,
            memory_elements: memory_dims.iter().product(),
            element_size,
            num_elements: file_count,
            exclusive: !matches!(file_selection, Selection::Points(_)),
            bulk_copy: true,
        })
    }

    /// Copy whole contiguous pieces at once (the default) or element by
    /// element. Both produce identical results.
    pub fn with_bulk_copy(mut self, bulk_copy: bool) -> Self {
        self.bulk_copy = bulk_copy;
        self
    }

    /// Touched chunks, ascending by linear index.
    pub fn chunks(&self) -> &[ChunkTransfer] {
        &self.chunks
    }

    /// Total elements transferred.
    pub fn num_elements(&self) -> u64 {
        self.num_elements
    }

    /// Bytes the memory buffer must hold.
    pub fn memory_bytes(&self) -> usize {
        self.memory_elements as usize * self.element_size
    }

    /// Whether the transfer overwrites every valid element of `chunk`, so
    /// its previous contents need not be loaded.
    pub fn covers_chunk(&self, grid: &ChunkGrid, chunk: &ChunkTransfer) -> bool {
        self.exclusive
            && chunk.num_elements() == grid.valid_extent(&chunk.coord).iter().product::<u64>()
    }

    fn check_memory(&self, len: usize) -> Result<(), FormatError> {
        if len < self.memory_bytes() {
            return Err(FormatError::UnexpectedEof {
                expected: self.memory_bytes(),
                available: len,
            });
        }
        Ok(())
    }

    fn check_chunk(&self, grid: &ChunkGrid, len: usize) -> Result<(), FormatError> {
        let expected = grid.chunk_elements() as usize * self.element_size;
        if len != expected {
            return Err(FormatError::FilterError(format!(
                "chunk buffer holds {len} bytes, expected {expected}"
            )));
        }
        Ok(())
    }

    /// Copy `chunk`'s selected elements from its decoded buffer into `out`.
    pub fn read_chunk(
        &self,
        grid: &ChunkGrid,
        chunk: &ChunkTransfer,
        chunk_buf: &[u8],
        out: &mut [u8],
    ) -> Result<(), FormatError> {
        self.check_memory(out.len())?;
        self.check_chunk(grid, chunk_buf.len())?;
        self.for_each_piece(chunk, |chunk_at, mem_at, n| {
            self.copy(&chunk_buf[chunk_at..chunk_at + n], &mut out[mem_at..mem_at + n]);
        });
        Ok(())
    }

    /// Copy the caller's elements from `input` into `chunk`'s buffer.
    pub fn write_chunk(
        &self,
        grid: &ChunkGrid,
        chunk: &ChunkTransfer,
        chunk_buf: &mut [u8],
        input: &[u8],
    ) -> Result<(), FormatError> {
        self.check_memory(input.len())?;
        self.check_chunk(grid, chunk_buf.len())?;
        self.for_each_piece(chunk, |chunk_at, mem_at, n| {
            self.copy(&input[mem_at..mem_at + n], &mut chunk_buf[chunk_at..chunk_at + n]);
        });
        Ok(())
    }

    fn copy(&self, src: &[u8], dst: &mut [u8]) {
        if self.bulk_copy {
            dst.copy_from_slice(src);
        } else {
            let es = self.element_size.max(1);
            for (d, s) in dst.chunks_exact_mut(es).zip(src.chunks_exact(es)) {
                d.copy_from_slice(s);
            }
        }
    }

    /// Split each segment of `chunk` where the memory side stops being
    /// contiguous; calls `f(chunk_byte, memory_byte, byte_len)`.
    fn for_each_piece(&self, chunk: &ChunkTransfer, mut f: impl FnMut(usize, usize, usize)) {
        let es = self.element_size as u64;
        for seg in &chunk.segments {
            let mut seq = seg.seq;
            let mut chunk_off = seg.chunk_offset;
            let end = seg.seq + seg.len;
            let mut i = self.memory.partition_point(|m| m.seq + m.len <= seq);
            while seq < end {
                let Some(run) = self.memory.get(i) else { return };
                let mem_off = run.offset + (seq - run.seq);
                let n = (end - seq).min(run.seq + run.len - seq);
                f(
                    (chunk_off * es) as usize,
                    (mem_off * es) as usize,
                    (n * es) as usize,
                );
                seq += n;
                chunk_off += n;
                i += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
