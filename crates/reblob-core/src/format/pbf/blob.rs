use prost::Message;

use crate::compression::{apply_compression, reverse_compression};
use crate::types::Compression;
use crate::{ReblobError, Result};

use super::MAX_BLOB_PAYLOAD_SIZE;
use super::messages::{Blob, blob};

/// Wraps `payload` in an encoded blob compressed with `algo`.
///
/// The encoded blob is appended to `out`.
pub fn encode_blob(payload: &[u8], algo: Compression, out: &mut Vec<u8>) -> Result<()> {
    let raw_size = i32::try_from(payload.len()).map_err(|_| {
        ReblobError::format(format!("block payload of {} bytes is too large", payload.len()))
    })?;

    let blob = match algo {
        Compression::Raw => Blob {
            raw_size: None,
            data: Some(blob::Data::Raw(payload.to_vec())),
        },
        Compression::Zlib => Blob {
            raw_size: Some(raw_size),
            data: Some(blob::Data::ZlibData(apply_compression(payload, algo)?)),
        },
        Compression::Zstd => Blob {
            raw_size: Some(raw_size),
            data: Some(blob::Data::ZstdData(apply_compression(payload, algo)?)),
        },
    };

    out.reserve(blob.encoded_len());
    blob.encode(out)?;
    Ok(())
}

/// Decodes an encoded blob and appends its uncompressed payload to `out`.
///
/// Returns the scheme the blob was stored with.
pub fn decode_blob(bytes: &[u8], out: &mut Vec<u8>) -> Result<Compression> {
    let blob = Blob::decode(bytes)
        .map_err(|err| ReblobError::from(err).with_context("decoding blob"))?;

    let (algo, data) = match blob.data {
        Some(blob::Data::Raw(data)) => {
            out.extend_from_slice(&data);
            return Ok(Compression::Raw);
        }
        Some(blob::Data::ZlibData(data)) => (Compression::Zlib, data),
        Some(blob::Data::ZstdData(data)) => (Compression::Zstd, data),
        Some(blob::Data::LzmaData(_)) => return Err(unsupported("lzma")),
        Some(blob::Data::Lz4Data(_)) => return Err(unsupported("lz4")),
        Some(blob::Data::ObsoleteBzip2Data(_)) => return Err(unsupported("bzip2")),
        None => return Err(ReblobError::format("blob carries no data")),
    };

    let raw_size = blob
        .raw_size
        .ok_or_else(|| ReblobError::format("compressed blob does not declare its raw size"))?;
    let raw_size = usize::try_from(raw_size)
        .map_err(|_| ReblobError::format(format!("negative blob raw size {raw_size}")))?;
    if raw_size > MAX_BLOB_PAYLOAD_SIZE {
        return Err(ReblobError::format(format!(
            "blob raw size {raw_size} exceeds the {MAX_BLOB_PAYLOAD_SIZE} byte limit"
        )));
    }

    let start = out.len();
    out.reserve(raw_size);
    reverse_compression(&data, algo, raw_size, out)?;
    let actual = out.len() - start;
    if actual > raw_size {
        return Err(ReblobError::format(format!(
            "blob declares {raw_size} raw bytes but decompresses to more"
        )));
    }
    if actual != raw_size {
        return Err(ReblobError::format(format!(
            "blob declares {raw_size} raw bytes but {actual} were decompressed"
        )));
    }
    Ok(algo)
}

fn unsupported(scheme: &str) -> ReblobError {
    ReblobError::format(format!("unsupported blob compression '{scheme}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_blob_omits_raw_size() {
        let mut encoded = Vec::new();
        encode_blob(b"payload", Compression::Raw, &mut encoded).expect("encode");
        let blob = Blob::decode(encoded.as_slice()).expect("decode");
        assert_eq!(blob.raw_size, None);
        assert_eq!(blob.data, Some(blob::Data::Raw(b"payload".to_vec())));
    }

    #[test]
    fn zstd_blob_declares_raw_size() {
        let payload = vec![7u8; 4096];
        let mut encoded = Vec::new();
        encode_blob(&payload, Compression::Zstd, &mut encoded).expect("encode");

        let mut restored = Vec::new();
        let algo = decode_blob(&encoded, &mut restored).expect("decode");
        assert_eq!(algo, Compression::Zstd);
        assert_eq!(restored, payload);
    }

    #[test]
    fn raw_size_mismatch_is_a_format_error() {
        let blob = Blob {
            raw_size: Some(10),
            data: Some(blob::Data::ZlibData(
                apply_compression(b"abc", Compression::Zlib).expect("compress"),
            )),
        };
        let mut out = Vec::new();
        let err = decode_blob(&blob.encode_to_vec(), &mut out).expect_err("mismatch");
        assert!(matches!(err, ReblobError::InvalidFormat(_)));
    }

    #[test]
    fn inflation_stops_at_declared_raw_size() {
        let blob = Blob {
            raw_size: Some(16),
            data: Some(blob::Data::ZlibData(
                apply_compression(&vec![0u8; 8 << 20], Compression::Zlib).expect("compress"),
            )),
        };
        let mut out = Vec::new();
        let err = decode_blob(&blob.encode_to_vec(), &mut out).expect_err("overrun");
        assert!(matches!(err, ReblobError::InvalidFormat(_)));
        assert!(out.len() <= 17, "inflated {} bytes", out.len());
    }

    #[test]
    fn lz4_blobs_are_rejected() {
        let blob = Blob {
            raw_size: Some(3),
            data: Some(blob::Data::Lz4Data(vec![1, 2, 3])),
        };
        let mut out = Vec::new();
        let err = decode_blob(&blob.encode_to_vec(), &mut out).expect_err("lz4");
        assert!(err.to_string().contains("lz4"));
    }
}
