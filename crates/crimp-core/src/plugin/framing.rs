//! Segment framing shared by the bundled algorithms.
//!
//! Payloads are processed in fixed-size segments so cancellation can be
//! polled at segment boundaries and segments can be encoded in parallel.
//! Each segment is written as `raw_len: u32 LE, encoded_len: u32 LE` followed
//! by the encoded bytes. Empty input produces zero segments.

use rayon::prelude::*;

use crate::{CancellationToken, CrimpError, Result};

/// Maximum number of raw bytes per segment.
pub const SEGMENT_SIZE: usize = 128 * 1024;

/// Bytes of length prefix ahead of every encoded segment.
pub const SEGMENT_PREFIX: usize = 8;

/// Encodes `input` segment by segment on the calling thread.
///
/// The token is checked before each segment; an in-flight segment always
/// finishes before cancellation is honored.
pub fn encode_segments<F>(input: &[u8], cancel: &CancellationToken, mut encode: F) -> Result<Vec<u8>>
where
    F: FnMut(&[u8]) -> Result<Vec<u8>>,
{
    let mut out = Vec::with_capacity(input.len() / 2 + SEGMENT_PREFIX);
    for chunk in input.chunks(SEGMENT_SIZE) {
        if cancel.is_cancelled() {
            return Err(CrimpError::Cancelled);
        }
        let encoded = encode(chunk)?;
        push_segment(&mut out, chunk.len(), &encoded);
    }
    Ok(out)
}

/// Parallel variant of [`encode_segments`]; segment order is preserved.
/// Every worker checks the token before starting its segment.
pub fn par_encode_segments<F>(input: &[u8], cancel: &CancellationToken, encode: F) -> Result<Vec<u8>>
where
    F: Fn(&[u8]) -> Result<Vec<u8>> + Sync,
{
    let encoded: Vec<(usize, Vec<u8>)> = input
        .par_chunks(SEGMENT_SIZE)
        .map(|chunk| {
            if cancel.is_cancelled() {
                return Err(CrimpError::Cancelled);
            }
            Ok((chunk.len(), encode(chunk)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let total = encoded
        .iter()
        .map(|(_, bytes)| bytes.len() + SEGMENT_PREFIX)
        .sum();
    let mut out = Vec::with_capacity(total);
    for (raw_len, bytes) in &encoded {
        push_segment(&mut out, *raw_len, bytes);
    }
    Ok(out)
}

/// Walks the segment stream and decodes each segment with `decode`, which
/// receives the encoded bytes and the expected raw length.
pub fn decode_segments<F>(input: &[u8], cancel: &CancellationToken, mut decode: F) -> Result<Vec<u8>>
where
    F: FnMut(&[u8], usize) -> Result<Vec<u8>>,
{
    let mut out = Vec::with_capacity(input.len());
    let mut cursor = 0usize;
    while cursor < input.len() {
        if cancel.is_cancelled() {
            return Err(CrimpError::Cancelled);
        }
        if input.len() - cursor < SEGMENT_PREFIX {
            return Err(CrimpError::InvalidFormat("truncated segment prefix"));
        }
        let raw_len = u32::from_le_bytes([
            input[cursor],
            input[cursor + 1],
            input[cursor + 2],
            input[cursor + 3],
        ]) as usize;
        let encoded_len = u32::from_le_bytes([
            input[cursor + 4],
            input[cursor + 5],
            input[cursor + 6],
            input[cursor + 7],
        ]) as usize;
        cursor += SEGMENT_PREFIX;

        if raw_len > SEGMENT_SIZE {
            return Err(CrimpError::InvalidFormat("segment exceeds maximum size"));
        }
        let end = match cursor.checked_add(encoded_len) {
            Some(end) if end <= input.len() => end,
            _ => return Err(CrimpError::InvalidFormat("truncated segment payload")),
        };

        let decoded = decode(&input[cursor..end], raw_len)?;
        if decoded.len() != raw_len {
            return Err(CrimpError::DecompressionError(format!(
                "segment decoded to {} bytes, expected {raw_len}",
                decoded.len()
            )));
        }
        out.extend_from_slice(&decoded);
        cursor = end;
    }
    Ok(out)
}

fn push_segment(out: &mut Vec<u8>, raw_len: usize, encoded: &[u8]) {
    out.extend_from_slice(&(raw_len as u32).to_le_bytes());
    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    out.extend_from_slice(encoded);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_across_segment_boundary() {
        let token = CancellationToken::new();
        let input: Vec<u8> = (0..SEGMENT_SIZE + 100).map(|i| (i % 251) as u8).collect();

        let framed = encode_segments(&input, &token, |chunk| Ok(chunk.to_vec()))
            .expect("encode should succeed");
        let restored = decode_segments(&framed, &token, |encoded, _| Ok(encoded.to_vec()))
            .expect("decode should succeed");

        assert_eq!(restored, input);
        assert_eq!(framed.len(), input.len() + 2 * SEGMENT_PREFIX);
    }

    #[test]
    fn empty_input_produces_no_segments() {
        let token = CancellationToken::new();
        let framed =
            encode_segments(&[], &token, |chunk| Ok(chunk.to_vec())).expect("encode should succeed");
        assert!(framed.is_empty());

        let restored = decode_segments(&framed, &token, |encoded, _| Ok(encoded.to_vec()))
            .expect("decode should succeed");
        assert!(restored.is_empty());
    }

    #[test]
    fn parallel_encoding_matches_sequential() {
        let token = CancellationToken::new();
        let input: Vec<u8> = (0..3 * SEGMENT_SIZE + 17).map(|i| (i % 13) as u8).collect();

        let sequential = encode_segments(&input, &token, |chunk| Ok(chunk.to_vec()))
            .expect("encode should succeed");
        let parallel = par_encode_segments(&input, &token, |chunk| Ok(chunk.to_vec()))
            .expect("encode should succeed");

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn cancelled_token_stops_encoding() {
        let token = CancellationToken::new();
        token.cancel();
        let input = vec![0u8; SEGMENT_SIZE];
        let result = encode_segments(&input, &token, |chunk| Ok(chunk.to_vec()));
        assert!(matches!(result, Err(CrimpError::Cancelled)));
    }

    #[test]
    fn truncated_prefix_is_rejected() {
        let token = CancellationToken::new();
        let result = decode_segments(&[1, 0, 0], &token, |encoded, _| Ok(encoded.to_vec()));
        assert!(matches!(result, Err(CrimpError::InvalidFormat(_))));
    }

    #[test]
    fn overlong_segment_length_is_rejected() {
        let token = CancellationToken::new();
        let mut framed = Vec::new();
        framed.extend_from_slice(&4u32.to_le_bytes());
        framed.extend_from_slice(&u32::MAX.to_le_bytes());
        framed.extend_from_slice(&[0u8; 4]);
        let result = decode_segments(&framed, &token, |encoded, _| Ok(encoded.to_vec()));
        assert!(matches!(result, Err(CrimpError::InvalidFormat(_))));
    }
}
