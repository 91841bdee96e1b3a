use crate::frame::Frame;
use bytes::Bytes;
use std::cmp::min;

/// Splits a payload into slices of at most `chunk_size` bytes.
///
/// Concatenating the slices yields the payload exactly; a chunk-aligned
/// payload ends with a full-size slice, never an empty one.
pub fn split_into_chunks(payload: &[u8], chunk_size: usize) -> Vec<Bytes> {
    assert!(chunk_size >= 1, "chunk size must be at least 1");

    let mut chunks = Vec::with_capacity(payload.len().div_ceil(chunk_size));
    let mut pointer = 0;
    while pointer < payload.len() {
        let end = min(pointer + chunk_size, payload.len());
        chunks.push(Bytes::copy_from_slice(&payload[pointer..end]));
        pointer = end;
    }
    chunks
}

/// Wraps the chunks of a payload into the frame sequence of one logical
///  message: only the final frame carries the terminal flag. A payload that
///  fits a single chunk produces a single terminal frame.
pub fn frames_for_payload(payload: &[u8], chunk_size: usize) -> Vec<Frame> {
    let chunks = split_into_chunks(payload, chunk_size);
    let num_chunks = chunks.len();

    chunks.into_iter()
        .enumerate()
        .map(|(idx, chunk)| Frame::new(chunk, idx + 1 == num_chunks))
        .collect()
}
