//! Pluggable compression backend for section payloads.
//!
//! Each `.ap` section starts with a [`crate::header::SectionMeta`] byte whose
//! low bits carry the compression algorithm ID; this module defines the
//! `Compressor` trait and the algorithms known to this crate.

use crate::error::{ApError, Result};
use std::borrow::Cow;

/// Interface for section-payload compression algorithms.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Returns the unique ID stored in the section meta byte.
    /// 0 is reserved for No-Compression.
    fn id(&self) -> u8;

    /// Compresses the data.
    ///
    /// Returns a `Cow<[u8]>` which may borrow the input when no transformation
    /// is performed.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Decompresses the data.
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

/// A compressor that performs no compression (pass-through, ID 0).
#[derive(Debug, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn id(&self) -> u8 {
        0
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        // Zero-copy: return reference to input
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        // Zero-copy: return reference to the mapped section
        Ok(Cow::Borrowed(data))
    }
}

/// A compressor using the LZ4 algorithm (ID 1, feature `lz4_flex`).
#[cfg(feature = "lz4_flex")]
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4_flex")]
impl Compressor for Lz4Compressor {
    fn id(&self) -> u8 {
        1
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let vec = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| ApError::Compression(e.to_string()))?;
        Ok(Cow::Owned(vec))
    }
}

/// Decompresses a section body according to its algorithm ID.
///
/// Unknown IDs are a format-level error: the meta byte came from the file.
pub fn decompress_by_id(id: u8, data: &[u8]) -> Result<Cow<'_, [u8]>> {
    match id {
        0 => NoCompression.decompress(data),
        #[cfg(feature = "lz4_flex")]
        1 => Lz4Compressor.decompress(data),
        _ => Err(ApError::Compression(format!("Unknown algo id: {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_borrows() {
        let data = [1u8, 2, 3];
        let out = decompress_by_id(0, &data).expect("stored payload");
        assert_eq!(&*out, &data);
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn unknown_algorithm_is_an_error() {
        assert!(decompress_by_id(7, &[0u8; 4]).is_err());
    }

    #[cfg(feature = "lz4_flex")]
    #[test]
    fn lz4_round_trip() {
        let data = vec![42u8; 4096];
        let packed = Lz4Compressor.compress(&data).expect("compress");
        assert!(packed.len() < data.len());
        let unpacked = decompress_by_id(1, &packed).expect("decompress");
        assert_eq!(&*unpacked, &data[..]);
    }
}
