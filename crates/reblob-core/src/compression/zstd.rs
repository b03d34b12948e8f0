use std::io::Read;

use crate::format::pbf::ZSTD_LEVEL;
use crate::{ReblobError, Result};

pub fn apply(data: &[u8]) -> Result<Vec<u8>> {
    ::zstd::bulk::compress(data, ZSTD_LEVEL)
        .map_err(|err| ReblobError::CompressionError(format!("zstd encode failed: {err}")))
}

/// Decodes at most `cap` bytes of `data` into `out`.
pub fn reverse(data: &[u8], cap: u64, out: &mut Vec<u8>) -> Result<()> {
    let decode_failed =
        |err: std::io::Error| ReblobError::DecompressionError(format!("zstd decode failed: {err}"));
    ::zstd::stream::read::Decoder::new(data)
        .map_err(decode_failed)?
        .take(cap)
        .read_to_end(out)
        .map(|_| ())
        .map_err(decode_failed)
}
