use std::time::Instant;

use crate::telemetry::{self, tags};
use crate::types::Compression;
use crate::Result;

pub mod zlib;
pub mod zstd;

/// Compresses `data` with `algo`.
///
/// [`Compression::Raw`] returns a plain copy.
pub fn apply_compression(data: &[u8], algo: Compression) -> Result<Vec<u8>> {
    let start = Instant::now();

    let result = match algo {
        Compression::Raw => Ok(data.to_vec()),
        Compression::Zlib => zlib::apply(data),
        Compression::Zstd => zstd::apply(data),
    };

    if let Ok(ref compressed) = result {
        let elapsed_us = telemetry::elapsed_us(start);
        telemetry::record_histogram(tags::METRIC_COMPRESSION_APPLY_LATENCY_US, elapsed_us);
        tracing::trace!(
            target: tags::TARGET_WRITER,
            algo = algo.as_str(),
            input_bytes = data.len(),
            output_bytes = compressed.len(),
            elapsed_us,
            "compression applied"
        );
    }

    result
}

/// Decompresses `data` with `algo`, appending the result to `out`.
///
/// `out` is usually a pooled buffer, so it is not cleared first. At most
/// `limit + 1` bytes are produced, so a caller comparing the appended length
/// against `limit` sees an overrun without inflating the whole stream.
pub fn reverse_compression(
    data: &[u8],
    algo: Compression,
    limit: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let start = Instant::now();
    let before = out.len();

    let result = match algo {
        Compression::Raw => {
            let take = data.len().min(limit.saturating_add(1));
            out.extend_from_slice(&data[..take]);
            Ok(())
        }
        Compression::Zlib => zlib::reverse(data, read_cap(limit), out),
        Compression::Zstd => zstd::reverse(data, read_cap(limit), out),
    };

    if result.is_ok() {
        let elapsed_us = telemetry::elapsed_us(start);
        telemetry::record_histogram(tags::METRIC_COMPRESSION_REVERSE_LATENCY_US, elapsed_us);
        tracing::trace!(
            target: tags::TARGET_READER,
            algo = algo.as_str(),
            input_bytes = data.len(),
            output_bytes = out.len() - before,
            elapsed_us,
            "compression reversed"
        );
    }

    result
}

fn read_cap(limit: usize) -> u64 {
    u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"highway=residential;name=Main Street;"
            .iter()
            .copied()
            .cycle()
            .take(16 * 1024)
            .collect()
    }

    #[test]
    fn every_scheme_restores_its_input() {
        let data = sample();
        for algo in Compression::ALL {
            let compressed = apply_compression(&data, algo).expect("compress");
            let mut restored = Vec::new();
            reverse_compression(&compressed, algo, data.len(), &mut restored).expect("decompress");
            assert_eq!(restored, data, "{algo}");
        }
    }

    #[test]
    fn compressed_schemes_shrink_repetitive_input() {
        let data = sample();
        for algo in [Compression::Zlib, Compression::Zstd] {
            let compressed = apply_compression(&data, algo).expect("compress");
            assert!(compressed.len() < data.len() / 4, "{algo}");
        }
    }

    #[test]
    fn garbage_fails_to_decompress() {
        let mut out = Vec::new();
        assert!(reverse_compression(b"not compressed", Compression::Zlib, 64, &mut out).is_err());
        out.clear();
        assert!(reverse_compression(b"not compressed", Compression::Zstd, 64, &mut out).is_err());
    }

    #[test]
    fn output_stops_one_byte_past_the_limit() {
        let data = vec![0u8; 1 << 20];
        for algo in Compression::ALL {
            let compressed = apply_compression(&data, algo).expect("compress");
            let mut out = Vec::new();
            reverse_compression(&compressed, algo, 100, &mut out).expect("decompress");
            assert_eq!(out.len(), 101, "{algo}");
        }
    }
}
