//! Chunk arithmetic for large objects
//!
//! Splits a downloaded object into fixed-size chunks and reassembles an
//! arbitrary byte range from the chunks that cover it.

use crate::error::{ProxyError, Result};
use crate::models::{ByteRange, LargeObjectRecord};
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::debug;

/// Durable key of a large object's record
pub fn record_key(url: &str) -> String {
    format!("record:{}", url)
}

/// Durable key of one chunk of a large object
pub fn chunk_key(url: &str, index: u64) -> String {
    format!("chunk:{}:{}", index, url)
}

/// Object URL of a record key, `None` for any other key
pub fn url_from_record_key(key: &str) -> Option<&str> {
    key.strip_prefix("record:")
}

/// Split `data` into `chunk_size` pieces; the last one may be shorter
///
/// The pieces share the original buffer.
pub fn split_chunks(data: &Bytes, chunk_size: u64) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1) as usize;
    let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Indices of the chunks covering `range`
pub fn chunks_for_range(record: &LargeObjectRecord, range: &ByteRange) -> RangeInclusive<u64> {
    let first = range.start / record.chunk_size;
    let last = range.end / record.chunk_size;
    first..=last
}

/// Trim and concatenate covering chunks into exactly the bytes of `range`
///
/// `chunks` must contain every index returned by [`chunks_for_range`]; each
/// chunk must have the length the record implies for its index.
pub fn assemble_range(
    record: &LargeObjectRecord,
    range: &ByteRange,
    chunks: &BTreeMap<u64, Bytes>,
) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(range.size() as usize);

    for index in chunks_for_range(record, range) {
        let chunk = chunks.get(&index).ok_or_else(|| ProxyError::StateInconsistency {
            url: record.url.clone(),
            detail: format!("chunk {} missing during assembly", index),
        })?;

        let bounds = record.chunk_range(index).ok_or_else(|| {
            ProxyError::InternalError(format!("chunk index {} out of bounds", index))
        })?;
        if chunk.len() as u64 != bounds.size() {
            return Err(ProxyError::StateInconsistency {
                url: record.url.clone(),
                detail: format!(
                    "chunk {} has {} bytes, expected {}",
                    index,
                    chunk.len(),
                    bounds.size()
                ),
            });
        }

        // Offsets of the requested bytes within this chunk
        let from = range.start.max(bounds.start) - bounds.start;
        let to = range.end.min(bounds.end) - bounds.start;
        body.extend_from_slice(&chunk[from as usize..=to as usize]);
    }

    debug!(
        "Assembled {} bytes for {} range {}-{}",
        body.len(),
        record.url,
        range.start,
        range.end
    );
    Ok(body.freeze())
}
