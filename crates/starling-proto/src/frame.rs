//! Compression gate around binary frames.
//!
//! Bodies at or below the threshold are sent untouched; larger ones are
//! deflated (zlib). There is no compression flag on the wire — the receiver
//! tries inflate-then-validate and falls back to treating the body as raw
//! when inflation fails or the inflated length breaks the record-size rule.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::record::RECORD_SIZE;

/// Bodies at or below this many bytes bypass compression.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Wrap an outbound frame body for the wire.
///
/// Bodies `<= threshold` are returned byte-identical. If deflation fails
/// (it should not, short of allocation failure) the raw body is sent.
pub fn seal(body: &[u8], threshold: usize) -> Vec<u8> {
    if body.len() <= threshold {
        return body.to_vec();
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    if encoder.write_all(body).is_err() {
        return body.to_vec();
    }
    match encoder.finish() {
        Ok(compressed) => compressed,
        Err(_) => body.to_vec(),
    }
}

/// Unwrap an inbound frame body.
///
/// Tries zlib inflation first; accepts the result only when it is a whole
/// number of records. Anything else — inflation error, truncated stream,
/// invalid length — yields the original buffer untouched, treated as raw.
pub fn open(body: &[u8]) -> Vec<u8> {
    let mut decoder = ZlibDecoder::new(body);
    let mut inflated = Vec::new();
    match decoder.read_to_end(&mut inflated) {
        Ok(_) if inflated.len() % RECORD_SIZE == 0 => inflated,
        _ => body.to_vec(),
    }
}
