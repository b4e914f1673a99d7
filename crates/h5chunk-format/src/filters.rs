//! Filter stages: deflate, shuffle, fletcher32.
//!
//! [`encode_chunk`] runs the pipeline forward and reports which stages
//! declined via the returned filter mask; [`decode_chunk`] runs it in
//! reverse, skipping every stage whose mask bit is set.

use tracing::warn;

use crate::error::FormatError;
use crate::filter_pipeline::{
    FilterDescription, FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE,
    MAX_FILTERS,
};

/// Default deflate level when the stage carries no client data.
const DEFAULT_DEFLATE_LEVEL: u32 = 6;

/// A chunk after forward filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Bytes to store on disk.
    pub data: Vec<u8>,
    /// Bit `i` set means stage `i` was skipped for this chunk.
    pub filter_mask: u32,
}

/// A resolved, executable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    Deflate { level: u32 },
    Shuffle,
    Fletcher32,
}

enum StageOutcome {
    Applied(Vec<u8>),
    Declined,
}

impl FilterStage {
    /// Resolve a pipeline entry. Unknown ids fail with `UnsupportedFilter`.
    pub fn from_description(desc: &FilterDescription) -> Result<Self, FormatError> {
        match desc.filter_id {
            FILTER_DEFLATE => Ok(FilterStage::Deflate {
                level: desc
                    .client_data
                    .first()
                    .copied()
                    .unwrap_or(DEFAULT_DEFLATE_LEVEL)
                    .min(9),
            }),
            FILTER_SHUFFLE => Ok(FilterStage::Shuffle),
            FILTER_FLETCHER32 => Ok(FilterStage::Fletcher32),
            other => Err(FormatError::UnsupportedFilter(other)),
        }
    }

    fn encode(&self, data: &[u8], element_size: usize) -> Result<StageOutcome, FormatError> {
        match self {
            FilterStage::Deflate { level } => {
                let compressed = deflate_compress(data, *level)?;
                if compressed.len() >= data.len() {
                    Ok(StageOutcome::Declined)
                } else {
                    Ok(StageOutcome::Applied(compressed))
                }
            }
            FilterStage::Shuffle => Ok(StageOutcome::Applied(shuffle(data, element_size)?)),
            FilterStage::Fletcher32 => {
                let mut out = Vec::with_capacity(data.len() + 4);
                out.extend_from_slice(data);
                out.extend_from_slice(&fletcher32(data).to_le_bytes());
                Ok(StageOutcome::Applied(out))
            }
        }
    }

    fn decode(
        &self,
        data: &[u8],
        element_size: usize,
        max_len: usize,
    ) -> Result<Vec<u8>, FormatError> {
        match self {
            FilterStage::Deflate { .. } => deflate_decompress(data, max_len),
            FilterStage::Shuffle => unshuffle(data, element_size),
            FilterStage::Fletcher32 => {
                if data.len() < 4 {
                    return Err(FormatError::FilterError(
                        "fletcher32: data shorter than its checksum".into(),
                    ));
                }
                let (payload, stored) = data.split_at(data.len() - 4);
                let expected = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
                let computed = fletcher32(payload);
                if expected != computed {
                    return Err(FormatError::ChecksumMismatch { expected, computed });
                }
                Ok(payload.to_vec())
            }
        }
    }
}

/// Run `data` through `pipeline` in forward order.
///
/// A stage that finds its output unprofitable, or an optional stage that
/// fails, passes its input through untouched and sets its mask bit. A
/// mandatory stage that fails aborts the encode.
pub fn encode_chunk(
    data: &[u8],
    pipeline: &FilterPipeline,
    element_size: usize,
) -> Result<EncodedChunk, FormatError> {
    check_stage_count(pipeline)?;
    let mut current = data.to_vec();
    let mut filter_mask = 0u32;

    for (i, desc) in pipeline.filters.iter().enumerate() {
        let outcome = FilterStage::from_description(desc)
            .and_then(|stage| stage.encode(&current, element_size));
        match outcome {
            Ok(StageOutcome::Applied(next)) => current = next,
            Ok(StageOutcome::Declined) => {
                warn!(filter_id = desc.filter_id, stage = i, "filter declined chunk");
                filter_mask |= 1 << i;
            }
            Err(e) if desc.is_optional() => {
                warn!(filter_id = desc.filter_id, stage = i, error = %e, "optional filter skipped");
                filter_mask |= 1 << i;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(EncodedChunk {
        data: current,
        filter_mask,
    })
}

/// Undo `pipeline` on stored chunk bytes, in reverse order, honoring
/// `filter_mask`. `size_hint` is the nominal decoded chunk size; a stage
/// decoding to much more than that fails instead of growing without bound.
pub fn decode_chunk(
    data: &[u8],
    pipeline: &FilterPipeline,
    filter_mask: u32,
    element_size: usize,
    size_hint: usize,
) -> Result<Vec<u8>, FormatError> {
    check_stage_count(pipeline)?;
    // no stage grows its input by more than a trailing checksum
    let max_len = size_hint.saturating_add(4 * pipeline.filters.len());
    let mut current = data.to_vec();
    for (i, desc) in pipeline.filters.iter().enumerate().rev() {
        if filter_mask & (1 << i) != 0 {
            continue;
        }
        let stage = FilterStage::from_description(desc)?;
        current = stage.decode(&current, element_size, max_len)?;
    }
    Ok(current)
}

/// The filter mask holds one bit per stage.
fn check_stage_count(pipeline: &FilterPipeline) -> Result<(), FormatError> {
    if pipeline.filters.len() > MAX_FILTERS {
        return Err(FormatError::FilterError(format!(
            "pipeline has {} filters, at most {MAX_FILTERS} are allowed",
            pipeline.filters.len()
        )));
    }
    Ok(())
}

#[cfg(feature = "deflate")]
fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, FormatError> {
    h5chunk_filters::deflate_compress(data, level).map_err(FormatError::CompressionError)
}

#[cfg(not(feature = "deflate"))]
fn deflate_compress(_data: &[u8], _level: u32) -> Result<Vec<u8>, FormatError> {
    Err(FormatError::UnsupportedFilter(FILTER_DEFLATE))
}

#[cfg(feature = "deflate")]
fn deflate_decompress(data: &[u8], max_len: usize) -> Result<Vec<u8>, FormatError> {
    h5chunk_filters::deflate_decompress(data, max_len).map_err(FormatError::DecompressionError)
}

#[cfg(not(feature = "deflate"))]
fn deflate_decompress(_data: &[u8], _max_len: usize) -> Result<Vec<u8>, FormatError> {
    Err(FormatError::UnsupportedFilter(FILTER_DEFLATE))
}

fn check_shuffle_len(data: &[u8], element_size: usize) -> Result<(), FormatError> {
    if data.len() % element_size != 0 {
        return Err(FormatError::FilterError(format!(
            "shuffle: {} bytes is not a whole number of {element_size}-byte elements",
            data.len()
        )));
    }
    Ok(())
}

/// Group byte `j` of every element together, for each `j`.
fn shuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>, FormatError> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    check_shuffle_len(data, element_size)?;
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, element) in data.chunks_exact(element_size).enumerate() {
        for (j, &byte) in element.iter().enumerate() {
            out[j * n + i] = byte;
        }
    }
    Ok(out)
}

fn unshuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>, FormatError> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    check_shuffle_len(data, element_size)?;
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (j, plane) in data.chunks_exact(n.max(1)).enumerate().take(element_size) {
        for (i, &byte) in plane.iter().enumerate() {
            out[i * element_size + j] = byte;
        }
    }
    Ok(out)
}

/// Fletcher-32 over big-endian 16-bit words; an odd trailing byte is the
/// high half of a final word.
pub fn fletcher32(data: &[u8]) -> u32 {
    // 360 words keep both sums below u32::MAX between reductions
    const BLOCK_BYTES: usize = 720;

    let (mut sum1, mut sum2) = (0u32, 0u32);
    for block in data.chunks(BLOCK_BYTES) {
        let mut words = block.chunks_exact(2);
        for w in &mut words {
            sum1 += u32::from(u16::from_be_bytes([w[0], w[1]]));
            sum2 += sum1;
        }
        if let [last] = words.remainder() {
            sum1 += u32::from(*last) << 8;
            sum2 += sum1;
        }
        sum1 %= 65535;
        sum2 %= 65535;
    }
    (sum2 << 16) | sum1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 256) as u8).collect()
    }

    // ---- individual stages ----

    #[test]
    fn shuffle_groups_byte_planes() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(shuffle(&data, 4).unwrap(), vec![1, 5, 2, 6, 3, 7, 4, 8]);
        assert_eq!(unshuffle(&shuffle(&data, 4).unwrap(), 4).unwrap(), data);
    }

    #[test]
    fn shuffle_rejects_ragged_input() {
        assert!(matches!(
            shuffle(&[1, 2, 3], 2),
            Err(FormatError::FilterError(_))
        ));
    }

    #[test]
    fn fletcher32_known_values() {
        assert_eq!(fletcher32(&[0; 16]), 0);
        // words 0x0102, 0x0300 -> sum1 = 0x0402, sum2 = 0x0102 + 0x0402
        assert_eq!(fletcher32(&[1, 2, 3]), (0x0504 << 16) | 0x0402);
    }

    #[test]
    fn fletcher32_spans_blocks() {
        let data: Vec<u8> = (0..5001u32).map(|i| (i * 7 % 256) as u8).collect();
        let (mut s1, mut s2) = (0u64, 0u64);
        for w in data.chunks(2) {
            let word = (u64::from(w[0]) << 8) | w.get(1).map_or(0, |&b| u64::from(b));
            s1 = (s1 + word) % 65535;
            s2 = (s2 + s1) % 65535;
        }
        assert_eq!(fletcher32(&data), ((s2 << 16) | s1) as u32);
    }

    // ---- pipelines ----

    #[test]
    fn every_combination_roundtrips() {
        let data: Vec<u8> = (0..1024u32).flat_map(|v| (v / 8).to_le_bytes()).collect();
        let pipelines = [
            FilterPipeline::new(),
            FilterPipeline::new().shuffle(),
            FilterPipeline::new().deflate(6),
            FilterPipeline::new().fletcher32(),
            FilterPipeline::new().shuffle().deflate(4),
            FilterPipeline::new().deflate(9).fletcher32(),
            FilterPipeline::new().shuffle().deflate(1).fletcher32(),
            FilterPipeline::new().fletcher32().shuffle(),
        ];
        for pl in &pipelines {
            let enc = encode_chunk(&data, pl, 4).unwrap();
            let dec = decode_chunk(&enc.data, pl, enc.filter_mask, 4, data.len()).unwrap();
            assert_eq!(dec, data, "pipeline {pl:?}");
        }
    }

    #[test]
    fn deflate_declines_incompressible_data() {
        // a tiny buffer always grows under zlib framing
        let data = [7u8, 1, 9];
        let pl = FilterPipeline::new().deflate(6);
        let enc = encode_chunk(&data, &pl, 1).unwrap();
        assert_eq!(enc.filter_mask, 0b1);
        assert_eq!(enc.data, data);
        assert_eq!(decode_chunk(&enc.data, &pl, enc.filter_mask, 1, 3).unwrap(), data);
    }

    #[test]
    fn compressible_data_has_empty_mask() {
        let data = vec![0u8; 4096];
        let pl = FilterPipeline::new().shuffle().deflate(6);
        let enc = encode_chunk(&data, &pl, 8).unwrap();
        assert_eq!(enc.filter_mask, 0);
        assert!(enc.data.len() < 100);
    }

    #[test]
    fn masked_stages_are_skipped_on_decode() {
        let data = ramp(64);
        let pl = FilterPipeline::new().shuffle().fletcher32();
        // every stage skipped: stored bytes are the raw payload
        let out = decode_chunk(&data, &pl, pl.all_skipped_mask(), 4, 64).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let data = ramp(100);
        let pl = FilterPipeline::new().fletcher32();
        let mut enc = encode_chunk(&data, &pl, 1).unwrap();
        enc.data[10] ^= 0xff;
        assert!(matches!(
            decode_chunk(&enc.data, &pl, enc.filter_mask, 1, 100),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn unknown_filter_fails() {
        let mut pl = FilterPipeline::new();
        pl.filters.push(FilterDescription {
            filter_id: 307,
            name: Some("bzip2".into()),
            flags: 0,
            client_data: vec![],
        });
        assert!(matches!(
            encode_chunk(&[1, 2], &pl, 1),
            Err(FormatError::UnsupportedFilter(307))
        ));
    }

    #[test]
    fn optional_unknown_filter_is_masked() {
        let mut pl = FilterPipeline::new().shuffle();
        pl.filters.push(FilterDescription {
            filter_id: 32000,
            name: Some("lzf".into()),
            flags: crate::filter_pipeline::FLAG_OPTIONAL,
            client_data: vec![],
        });
        let data = ramp(32);
        let enc = encode_chunk(&data, &pl, 2).unwrap();
        assert_eq!(enc.filter_mask, 0b10);
        assert_eq!(decode_chunk(&enc.data, &pl, enc.filter_mask, 2, 32).unwrap(), data);
    }

    #[test]
    fn oversized_inflate_is_rejected() {
        let pl = FilterPipeline::new().deflate(9);
        let enc = encode_chunk(&[0u8; 4096], &pl, 1).unwrap();
        assert_eq!(enc.filter_mask, 0);
        assert!(matches!(
            decode_chunk(&enc.data, &pl, 0, 1, 64),
            Err(FormatError::DecompressionError(_))
        ));
    }

    #[test]
    fn too_many_stages_are_rejected() {
        let mut pl = FilterPipeline::new();
        for _ in 0..=MAX_FILTERS {
            pl = pl.shuffle();
        }
        assert!(matches!(
            encode_chunk(&[1, 2, 3, 4], &pl, 2),
            Err(FormatError::FilterError(_))
        ));
        assert!(matches!(
            decode_chunk(&[1, 2, 3, 4], &pl, 0, 2, 4),
            Err(FormatError::FilterError(_))
        ));
    }
}
