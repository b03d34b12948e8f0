use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::format::pbf::ZLIB_LEVEL;
use crate::{ReblobError, Result};

pub fn apply(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        flate2::Compression::new(ZLIB_LEVEL),
    );
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|err| ReblobError::CompressionError(format!("zlib encode failed: {err}")))
}

/// Inflates at most `cap` bytes of `data` into `out`.
pub fn reverse(data: &[u8], cap: u64, out: &mut Vec<u8>) -> Result<()> {
    ZlibDecoder::new(data)
        .take(cap)
        .read_to_end(out)
        .map(|_| ())
        .map_err(|err| ReblobError::DecompressionError(format!("zlib decode failed: {err}")))
}
