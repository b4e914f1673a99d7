//! Hyperslab and point selections over an N-dimensional space.
//!
//! A [`Selection`] describes which elements of a space take part in a
//! transfer. Selected elements are visited in row-major order (point
//! selections in the order given), and that order pairs file-side and
//! memory-side elements one-to-one.
//!
//! # Example
//!
//! ```
//! use h5chunk_format::selection::Selection;
//!
//! // rows 20..30, columns 40..60 of a 100 x 100 dataset
//! let sel = Selection::slice(&[20..30, 40..60]);
//! assert_eq!(sel.num_elements(&[100, 100]), 200);
//! ```

use core::ops::Range;

use crate::error::FormatError;

/// Which elements of a space to access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The entire space.
    All,

    /// No elements.
    None,

    /// A regular hyperslab. Along dimension `d` it selects `count[d]`
    /// blocks of `block[d]` consecutive elements, the first starting at
    /// `start[d]` and each subsequent one `stride[d]` further on.
    Hyperslab {
        start: Vec<u64>,
        stride: Vec<u64>,
        count: Vec<u64>,
        block: Vec<u64>,
    },

    /// Individual elements, visited in the order given.
    Points(Vec<Vec<u64>>),
}

/// A stretch of consecutive selected elements along the fastest-varying
/// axis, starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub start: Vec<u64>,
    pub len: u64,
}

impl Selection {
    /// A stride-1 hyperslab from one range per dimension.
    pub fn slice(ranges: &[Range<u64>]) -> Self {
        let rank = ranges.len();
        Selection::Hyperslab {
            start: ranges.iter().map(|r| r.start).collect(),
            stride: vec![1; rank],
            count: ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect(),
            block: vec![1; rank],
        }
    }

    /// A general hyperslab.
    pub fn hyperslab(start: &[u64], stride: &[u64], count: &[u64], block: &[u64]) -> Self {
        Selection::Hyperslab {
            start: start.to_vec(),
            stride: stride.to_vec(),
            count: count.to_vec(),
            block: block.to_vec(),
        }
    }

    /// Number of selected elements in a space of shape `dims`.
    pub fn num_elements(&self, dims: &[u64]) -> u64 {
        match self {
            Selection::All => dims.iter().product(),
            Selection::None => 0,
            Selection::Hyperslab { count, block, .. } => {
                count.iter().zip(block).map(|(&c, &b)| c * b).product()
            }
            Selection::Points(pts) => pts.len() as u64,
        }
    }

    /// Rank implied by the selection itself, if any.
    pub fn rank(&self) -> Option<usize> {
        match self {
            Selection::All | Selection::None => Option::None,
            Selection::Hyperslab { start, .. } => Some(start.len()),
            Selection::Points(pts) => pts.first().map(Vec::len),
        }
    }

    /// Shape of a dense buffer holding the selected elements.
    pub fn output_shape(&self, dims: &[u64]) -> Vec<u64> {
        match self {
            Selection::All => dims.to_vec(),
            Selection::None => vec![0],
            Selection::Hyperslab { count, block, .. } => {
                count.iter().zip(block).map(|(&c, &b)| c * b).collect()
            }
            Selection::Points(pts) => vec![pts.len() as u64],
        }
    }

    /// Check rank, bounds and (for hyperslabs) that blocks do not overlap.
    pub fn validate(&self, dims: &[u64]) -> Result<(), FormatError> {
        match self {
            Selection::All | Selection::None => Ok(()),
            Selection::Hyperslab {
                start,
                stride,
                count,
                block,
            } => {
                for v in [start, stride, count, block] {
                    if v.len() != dims.len() {
                        return Err(FormatError::SelectionRankMismatch {
                            expected: dims.len(),
                            actual: v.len(),
                        });
                    }
                }
                for d in 0..dims.len() {
                    if count[d] == 0 || block[d] == 0 {
                        continue;
                    }
                    if count[d] > 1 && stride[d] < block[d] {
                        return Err(FormatError::OverlappingHyperslab { dim: d });
                    }
                    let end = (count[d] - 1)
                        .checked_mul(stride[d])
                        .and_then(|v| v.checked_add(start[d]))
                        .and_then(|v| v.checked_add(block[d]))
                        .unwrap_or(u64::MAX);
                    if end > dims[d] {
                        return Err(FormatError::SelectionOutOfBounds {
                            dim: d,
                            end,
                            extent: dims[d],
                        });
                    }
                }
                Ok(())
            }
            Selection::Points(pts) => {
                for p in pts {
                    if p.len() != dims.len() {
                        return Err(FormatError::SelectionRankMismatch {
                            expected: dims.len(),
                            actual: p.len(),
                        });
                    }
                    if let Some(d) = p.iter().zip(dims).position(|(&c, &n)| c >= n) {
                        return Err(FormatError::SelectionOutOfBounds {
                            dim: d,
                            end: p[d] + 1,
                            extent: dims[d],
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Validate against `dims`, then decompose into runs along the last
    /// axis in iteration order.
    pub fn runs(&self, dims: &[u64]) -> Result<Vec<Run>, FormatError> {
        self.validate(dims)?;
        let Some(last) = dims.len().checked_sub(1) else {
            // rank 0: a single element, selected unless `None`
            return Ok(match self {
                Selection::None => Vec::new(),
                _ => vec![Run {
                    start: Vec::new(),
                    len: 1,
                }],
            });
        };

        Ok(match self {
            Selection::None => Vec::new(),
            Selection::Points(pts) => pts
                .iter()
                .map(|p| Run {
                    start: p.clone(),
                    len: 1,
                })
                .collect(),
            Selection::All => {
                if dims.contains(&0) {
                    return Ok(Vec::new());
                }
                let axes: Vec<Vec<u64>> = dims[..last].iter().map(|&n| (0..n).collect()).collect();
                let mut runs = Vec::new();
                for_each_position(&axes, |outer| {
                    let mut start = outer.to_vec();
                    start.push(0);
                    runs.push(Run {
                        start,
                        len: dims[last],
                    });
                });
                runs
            }
            Selection::Hyperslab {
                start,
                stride,
                count,
                block,
            } => {
                if count.iter().zip(block).any(|(&c, &b)| c == 0 || b == 0) {
                    return Ok(Vec::new());
                }
                let axes: Vec<Vec<u64>> = (0..last)
                    .map(|d| axis_positions(start[d], stride[d], count[d], block[d]))
                    .collect();
                // adjacent blocks along the last axis merge into one run
                let inner: Vec<(u64, u64)> = if count[last] == 1 || stride[last] == block[last] {
                    vec![(start[last], count[last] * block[last])]
                } else {
                    (0..count[last])
                        .map(|b| (start[last] + b * stride[last], block[last]))
                        .collect()
                };
                let mut runs = Vec::new();
                for_each_position(&axes, |outer| {
                    for &(s, len) in &inner {
                        let mut start = outer.to_vec();
                        start.push(s);
                        runs.push(Run { start, len });
                    }
                });
                runs
            }
        })
    }
}

/// Selected indices along one axis of a hyperslab, ascending.
fn axis_positions(start: u64, stride: u64, count: u64, block: u64) -> Vec<u64> {
    (0..count)
        .flat_map(|b| {
            let first = start + b * stride;
            first..first + block
        })
        .collect()
}

/// Visit the cartesian product of `axes` in row-major order. With no axes
/// the callback runs once with an empty position.
fn for_each_position(axes: &[Vec<u64>], mut f: impl FnMut(&[u64])) {
    if axes.iter().any(Vec::is_empty) {
        return;
    }
    let mut cursor = vec![0usize; axes.len()];
    let mut position: Vec<u64> = axes.iter().map(|a| a[0]).collect();
    loop {
        f(&position);
        let mut d = axes.len();
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            cursor[d] += 1;
            if cursor[d] < axes[d].len() {
                position[d] = axes[d][cursor[d]];
                break;
            }
            cursor[d] = 0;
            position[d] = axes[d][0];
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
