use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::plugin::{framing, Algorithm, AlgorithmMetadata};
use crate::{CancellationToken, CrimpError, Result};

pub const DEFLATE_MAGIC: [u8; 4] = *b"CRDF";

const TEXT_SAMPLE_LIMIT: usize = 16 * 1024;
const UTF8_RATIO_THRESHOLD: f32 = 0.85;
const PRINTABLE_RATIO_THRESHOLD: f32 = 0.90;
const CONTROL_RATIO_THRESHOLD: f32 = 0.02;

/// DEFLATE compression via `flate2`, one raw deflate stream per segment.
///
/// Slower than LZ4 but denser, so it scores well under ratio-heavy weights
/// and its detector favors text-like input.
pub struct DeflateAlgorithm;

impl Algorithm for DeflateAlgorithm {
    fn metadata(&self) -> AlgorithmMetadata {
        AlgorithmMetadata::new("deflate", "1.0.0", DEFLATE_MAGIC, 180.0, 0.36)
    }

    fn compress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        framing::encode_segments(input, cancel, |chunk| {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(chunk)?;
            Ok(encoder.finish()?)
        })
    }

    fn decompress(&self, input: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        framing::decode_segments(input, cancel, |encoded, raw_len| {
            let mut decoded = Vec::with_capacity(raw_len);
            DeflateDecoder::new(encoded)
                .read_to_end(&mut decoded)
                .map_err(|error| CrimpError::DecompressionError(error.to_string()))?;
            Ok(decoded)
        })
    }

    fn detect(&self, sample: &[u8]) -> bool {
        is_text(sample)
    }
}

// Heuristics:
// - UTF-8 validity ratio over a bounded sample
// - Printable/whitespace ratio
// - Control-byte ratio (excluding common whitespace)
fn is_text(data: &[u8]) -> bool {
    let sample = &data[..data.len().min(TEXT_SAMPLE_LIMIT)];
    if sample.is_empty() {
        return false;
    }

    let utf8_ratio = match std::str::from_utf8(sample) {
        Ok(_) => 1.0,
        Err(err) => err.valid_up_to() as f32 / sample.len() as f32,
    };
    if utf8_ratio < UTF8_RATIO_THRESHOLD {
        return false;
    }

    let mut printable = 0usize;
    let mut control = 0usize;
    for &byte in sample {
        if byte.is_ascii_graphic() || byte.is_ascii_whitespace() {
            printable += 1;
        } else if byte.is_ascii_control() {
            control += 1;
        }
    }

    let len = sample.len() as f32;
    let printable_ratio = printable as f32 / len;
    let control_ratio = control as f32 / len;

    printable_ratio >= PRINTABLE_RATIO_THRESHOLD && control_ratio <= CONTROL_RATIO_THRESHOLD
}
