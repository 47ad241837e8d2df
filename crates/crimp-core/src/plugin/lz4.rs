use crate::plugin::{framing, Algorithm, AlgorithmMetadata};
use crate::{CancellationToken, CrimpError, Result};

pub const LZ4_MAGIC: [u8; 4] = *b"CRL4";

/// LZ4 block compression via `lz4_flex`.
///
/// Segments are compressed in parallel; the framing layer records each
/// segment's raw length, which the block decoder needs back.
pub struct Lz4Algorithm;

impl Algorithm for Lz4Algorithm {
    fn metadata(&self) -> AlgorithmMetadata {
        AlgorithmMetadata::new("lz4", "1.0.0", LZ4_MAGIC, 2400.0, 0.5)
    }

    fn compress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        framing::par_encode_segments(input, cancel, |chunk| Ok(lz4_flex::block::compress(chunk)))
    }

    fn decompress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        framing::decode_segments(input, cancel, |encoded, raw_len| {
            lz4_flex::block::decompress(encoded, raw_len)
                .map_err(|error| CrimpError::DecompressionError(error.to_string()))
        })
    }

    /// LZ4 handles arbitrary bytes at high speed, so it claims everything.
    fn detect(&self, _sample: &[u8]) -> bool {
        true
    }
}
