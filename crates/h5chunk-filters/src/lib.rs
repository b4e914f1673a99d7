//! Deflate (zlib) backends used by the h5chunk filter pipeline.
//!
//! - **Default**: `flate2` with its pure-Rust `miniz_oxide` backend.
//! - **`fast-deflate` feature**: `libdeflater`, roughly 2-3x faster on
//!   whole-chunk buffers because chunk sizes are known up front.

/// Decompress a zlib stream that must decode to at most `max_len` bytes.
///
/// `max_len` bounds the output allocation; a stream that would decode past
/// it is rejected before more memory is taken.
pub fn deflate_decompress(data: &[u8], max_len: usize) -> Result<Vec<u8>, String> {
    #[cfg(feature = "fast-deflate")]
    {
        libdeflater_backend::decompress(data, max_len)
    }
    #[cfg(not(feature = "fast-deflate"))]
    {
        flate2_backend::decompress(data, max_len)
    }
}

/// Compress `data` into a zlib stream at `level` (0-9).
pub fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
    #[cfg(feature = "fast-deflate")]
    {
        libdeflater_backend::compress(data, level)
    }
    #[cfg(not(feature = "fast-deflate"))]
    {
        flate2_backend::compress(data, level)
    }
}

/// Name of the backend selected at compile time.
pub fn deflate_backend() -> &'static str {
    if cfg!(feature = "fast-deflate") {
        "libdeflater"
    } else {
        "flate2"
    }
}

fn too_long(max_len: usize) -> String {
    format!("inflated data exceeds {max_len} bytes")
}

#[cfg(not(feature = "fast-deflate"))]
mod flate2_backend {
    use std::io::{Read, Write};

    pub(crate) fn decompress(data: &[u8], max_len: usize) -> Result<Vec<u8>, String> {
        let decoder = flate2::read::ZlibDecoder::new(data);
        let mut out = Vec::with_capacity(max_len);
        decoder
            .take(max_len as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| e.to_string())?;
        if out.len() > max_len {
            return Err(super::too_long(max_len));
        }
        Ok(out)
    }

    pub(crate) fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
        let mut encoder = flate2::write::ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2),
            flate2::Compression::new(level.min(9)),
        );
        encoder.write_all(data).map_err(|e| e.to_string())?;
        encoder.finish().map_err(|e| e.to_string())
    }
}

#[cfg(feature = "fast-deflate")]
mod libdeflater_backend {
    pub(crate) fn decompress(data: &[u8], max_len: usize) -> Result<Vec<u8>, String> {
        let mut decompressor = libdeflater::Decompressor::new();
        let mut out = vec![0u8; max_len];
        match decompressor.zlib_decompress(data, &mut out) {
            Ok(n) => {
                out.truncate(n);
                Ok(out)
            }
            Err(libdeflater::DecompressionError::InsufficientSpace) => Err(super::too_long(max_len)),
            Err(e) => Err(format!("libdeflater inflate error: {e:?}")),
        }
    }

    pub(crate) fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, String> {
        let lvl = libdeflater::CompressionLvl::new(level.clamp(1, 12) as i32)
            .map_err(|e| format!("libdeflater level error: {e:?}"))?;
        let mut compressor = libdeflater::Compressor::new(lvl);
        let mut out = vec![0u8; compressor.zlib_compress_bound(data.len())];
        let n = compressor
            .zlib_compress(data, &mut out)
            .map_err(|e| format!("libdeflater deflate error: {e:?}"))?;
        out.truncate(n);
        Ok(out)
    }
}
