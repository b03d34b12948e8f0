//! OSM PBF container format.
//!
//! A file is a sequence of frames. Each frame is a 4-byte big-endian length,
//! an encoded [`BlobHeader`] of that length, and an encoded [`Blob`] whose
//! length the header declares. The first frame carries the [`HeaderBlock`];
//! every later one carries a [`PrimitiveBlock`].

mod blob;
mod consts;
mod features;
mod headers;
pub mod messages;
mod reader;
mod writer;

pub use blob::{decode_blob, encode_blob};
pub use consts::{
    FEATURE_DENSE_NODES, FEATURE_HISTORICAL_INFORMATION, FEATURE_OSM_SCHEMA,
    FRAME_LENGTH_PREFIX_SIZE, MAX_BLOB_PAYLOAD_SIZE, MAX_FRAME_HEADER_SIZE, SUPPORTED_FEATURES,
    ZLIB_LEVEL, ZSTD_LEVEL,
};
pub use features::validate_required_features;
pub use headers::FrameHeader;
pub use messages::{
    Blob, BlobHeader, BlockPool, HeaderBlock, PooledBlock, PrimitiveBlock, PrimitiveGroup,
    StringTable,
};
pub use reader::BlockReader;
pub use writer::{BlockWriter, WriteStats};
