//! Coalesces the data blocks of OpenStreetMap PBF files.
//!
//! Small blocks are merged into larger ones under a size cap. String tables
//! are folded together and every string reference is renumbered, so the
//! output carries exactly the entities of the input in the same order.

pub mod buffer;
pub mod compression;
pub mod core;
pub mod error;
pub mod format;
pub mod merge;
pub mod pipeline;
pub mod telemetry;
pub mod types;

pub use buffer::{BufferPool, ObjectPool, PoolMetricsSnapshot, Pooled, PooledBuffer, Recycle};
pub use crate::core::{OrderedPool, OrderedPoolSnapshot};
pub use error::ReblobError;
pub use format::pbf::{BlockPool, BlockReader, BlockWriter, FrameHeader, PooledBlock, WriteStats};
pub use merge::{AccumulatorStats, BlockAccumulator, StringIndex};
pub use pipeline::{
    DEFAULT_BLOB_SIZE, MAX_BLOB_SIZE, MIN_BLOB_SIZE, ReblobOptions, ReblobPipeline, RunStats,
    parse_size, reblob,
};
pub use types::{Block, BlockKind, Compression, DecodedBlock, Result};
