use std::time::Duration;

use crate::types::Compression;
use crate::{ReblobError, Result};

/// Smallest accepted size cap for merged blocks.
pub const MIN_BLOB_SIZE: usize = 1024;
/// Largest accepted size cap for merged blocks.
pub const MAX_BLOB_SIZE: usize = 32 * 1024 * 1024;
/// Size cap used when none is given.
pub const DEFAULT_BLOB_SIZE: usize = 16 * 1024 * 1024;

/// Knobs for a reblob run.
///
/// Worker counts default to the number of CPUs. The queue and pool sizes only
/// bound memory use; they never change the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReblobOptions {
    /// Upper bound on the serialized size of a merged data block.
    pub max_blob_size: usize,
    /// Compression applied to written data blocks.
    pub compression: Compression,
    /// Threads decoding input frames.
    pub decode_workers: usize,
    /// Threads serializing and compressing output frames.
    pub encode_workers: usize,
    /// Results each stage may hold before its producer blocks.
    pub queue_depth: usize,
    /// Idle byte buffers kept for reuse.
    pub buffer_pool_size: usize,
    /// Idle decoded blocks kept for reuse.
    pub block_pool_size: usize,
}

impl Default for ReblobOptions {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            max_blob_size: DEFAULT_BLOB_SIZE,
            compression: Compression::default(),
            decode_workers: workers,
            encode_workers: workers,
            queue_depth: workers * 4,
            buffer_pool_size: workers * 8,
            block_pool_size: workers * 8,
        }
    }
}

impl ReblobOptions {
    /// Uses `workers` threads for both decoding and encoding and scales the
    /// queue depth along with it.
    pub fn with_workers(mut self, workers: usize) -> Self {
        let workers = workers.max(1);
        self.decode_workers = workers;
        self.encode_workers = workers;
        self.queue_depth = workers * 4;
        self
    }

    pub fn with_max_blob_size(mut self, max_blob_size: usize) -> Self {
        self.max_blob_size = max_blob_size;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOB_SIZE..=MAX_BLOB_SIZE).contains(&self.max_blob_size) {
            return Err(ReblobError::InvalidConfig(format!(
                "size must lie between {MIN_BLOB_SIZE} and {MAX_BLOB_SIZE} bytes, got {}",
                self.max_blob_size
            )));
        }
        if self.decode_workers == 0 || self.encode_workers == 0 {
            return Err(ReblobError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(ReblobError::InvalidConfig(
                "queue depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses a byte size with an optional binary suffix.
///
/// Accepts a decimal integer followed by nothing, `k`/`K` (KiB) or `m`/`M`
/// (MiB). Range checks are left to [`ReblobOptions::validate`].
pub fn parse_size(input: &str) -> Result<usize> {
    let trimmed = input.trim();
    let (digits, multiplier) = match trimmed.as_bytes().last() {
        Some(b'k' | b'K') => (&trimmed[..trimmed.len() - 1], 1024usize),
        Some(b'm' | b'M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        _ => (trimmed, 1),
    };

    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(ReblobError::InvalidConfig(format!(
            "invalid size '{input}', expected a number with optional k or M suffix"
        )));
    }

    digits
        .parse::<usize>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(|| ReblobError::InvalidConfig(format!("size '{input}' is too large")))
}

/// Totals of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    /// Frames read from the input, header included.
    pub frames_read: u64,
    /// Data blocks read from the input.
    pub blocks_in: u64,
    /// Data blocks written to the output.
    pub blocks_out: u64,
    /// Input blocks that alone exceeded the size cap.
    pub oversized_blocks: u64,
    /// Bytes written to the output file.
    pub bytes_written: u64,
    pub elapsed: Duration,
}

impl RunStats {
    /// Average number of input blocks folded into each output block.
    pub fn merge_ratio(&self) -> f64 {
        if self.blocks_out == 0 {
            0.0
        } else {
            self.blocks_in as f64 / self.blocks_out as f64
        }
    }
}
