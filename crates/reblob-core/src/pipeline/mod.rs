//! End-to-end rewrite of a PBF file.

mod reblob;
mod types;

pub use reblob::{ReblobPipeline, reblob};
pub use types::{
    DEFAULT_BLOB_SIZE, MAX_BLOB_SIZE, MIN_BLOB_SIZE, ReblobOptions, RunStats, parse_size,
};
