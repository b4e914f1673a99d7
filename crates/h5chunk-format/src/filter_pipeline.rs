//! Filter pipeline description (message type 0x000B).
//!
//! A [`FilterPipeline`] is the ordered list of stages attached to a dataset
//! at creation. It is immutable afterwards; the per-chunk filter mask
//! records which of its stages were skipped for a given chunk.

use serde::{Deserialize, Serialize};

use crate::codec::ByteReader;
use crate::error::FormatError;

/// Well-known filter ids.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

/// Flag bit 0: the stage is optional and may be skipped on failure.
pub const FLAG_OPTIONAL: u16 = 0x0001;

/// The container supports at most 32 stages (one mask bit each).
pub const MAX_FILTERS: usize = 32;

/// Description of a single stage in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDescription {
    /// Filter identification value.
    pub filter_id: u16,
    /// Optional name (mandatory on disk for ids >= 256).
    pub name: Option<String>,
    /// Flags; bit 0 marks the stage optional.
    pub flags: u16,
    /// Stage parameters.
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    /// Whether the stage may be skipped when it fails during encode.
    pub fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }
}

/// An ordered list of filter stages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterPipeline {
    /// Ordered stages, in encode order.
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a byte-shuffle stage.
    pub fn shuffle(mut self) -> Self {
        self.filters.push(FilterDescription {
            filter_id: FILTER_SHUFFLE,
            name: None,
            flags: 0,
            client_data: Vec::new(),
        });
        self
    }

    /// Append a deflate stage at `level` (0-9). Deflate is optional so that
    /// incompressible chunks are stored raw with the stage's mask bit set.
    pub fn deflate(mut self, level: u32) -> Self {
        self.filters.push(FilterDescription {
            filter_id: FILTER_DEFLATE,
            name: None,
            flags: FLAG_OPTIONAL,
            client_data: vec![level.min(9)],
        });
        self
    }

    /// Append a Fletcher-32 checksum stage.
    pub fn fletcher32(mut self) -> Self {
        self.filters.push(FilterDescription {
            filter_id: FILTER_FLETCHER32,
            name: None,
            flags: 0,
            client_data: Vec::new(),
        });
        self
    }

    /// Whether no stage is configured.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Mask with one bit set per stage, i.e. "every stage skipped".
    pub fn all_skipped_mask(&self) -> u32 {
        match self.filters.len() {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }

    /// Encode as a version 2 pipeline message.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![2, self.filters.len() as u8];
        for f in &self.filters {
            buf.extend_from_slice(&f.filter_id.to_le_bytes());
            let name = f.name.as_deref().unwrap_or("");
            if f.filter_id >= 256 {
                buf.extend_from_slice(&(name.len() as u16 + 1).to_le_bytes());
            }
            buf.extend_from_slice(&f.flags.to_le_bytes());
            buf.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
            if f.filter_id >= 256 {
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
            }
            for v in &f.client_data {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }

    /// Decode a version 1 or version 2 pipeline message.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut cur = ByteReader::new(data);
        let version = cur.u8()?;
        let count = cur.u8()? as usize;
        if count > MAX_FILTERS {
            return Err(FormatError::FilterError(format!(
                "pipeline declares {count} filters, at most {MAX_FILTERS} are allowed"
            )));
        }
        match version {
            1 => cur.skip(6)?,
            2 => {}
            v => {
                return Err(FormatError::UnsupportedLayout(format!(
                    "filter pipeline message version {v}"
                )))
            }
        }

        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let filter_id = cur.u16()?;
            let name_len = if version == 1 || filter_id >= 256 {
                cur.u16()? as usize
            } else {
                0
            };
            let flags = cur.u16()?;
            let n_values = cur.u16()? as usize;
            let name = if name_len > 0 {
                let raw = cur.take(name_len)?;
                if version == 1 {
                    // v1 pads names to a multiple of eight
                    cur.skip(name_len.next_multiple_of(8) - name_len)?;
                }
                let trimmed = raw.split(|&b| b == 0).next().unwrap_or(raw);
                Some(String::from_utf8_lossy(trimmed).into_owned())
            } else {
                None
            };
            let mut client_data = Vec::with_capacity(n_values);
            for _ in 0..n_values {
                client_data.push(cur.u32()?);
            }
            if version == 1 && n_values % 2 == 1 {
                cur.skip(4)?;
            }
            filters.push(FilterDescription {
                filter_id,
                name,
                flags,
                client_data,
            });
        }
        Ok(Self { filters })
    }
}
