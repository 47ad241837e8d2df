use infer::MatcherType;

use crate::plugin::{framing, Algorithm, AlgorithmMetadata};
use crate::{CancellationToken, CrimpError, Result};

pub const STORE_MAGIC: [u8; 4] = *b"CRS0";

/// Passthrough algorithm: segments are copied verbatim.
///
/// This is the process-wide fallback, so it must stay infallible for any
/// input and finish in time proportional to the input size.
pub struct StoreAlgorithm;

impl Algorithm for StoreAlgorithm {
    fn metadata(&self) -> AlgorithmMetadata {
        AlgorithmMetadata::new("store", "1.0.0", STORE_MAGIC, 3800.0, 1.0)
    }

    fn compress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        framing::encode_segments(input, cancel, |chunk| Ok(chunk.to_vec()))
    }

    fn decompress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        framing::decode_segments(input, cancel, |encoded, raw_len| {
            if encoded.len() != raw_len {
                return Err(CrimpError::DecompressionError(format!(
                    "stored segment is {} bytes, expected {raw_len}",
                    encoded.len()
                )));
            }
            Ok(encoded.to_vec())
        })
    }

    /// Claims data that carries a known compressed-container signature;
    /// recompressing those wastes time for no gain.
    fn detect(&self, sample: &[u8]) -> bool {
        let Some(kind) = infer::get(sample) else {
            return false;
        };
        matches!(
            kind.matcher_type(),
            MatcherType::Archive | MatcherType::Audio | MatcherType::Image | MatcherType::Video
        )
    }
}
