/// Upper bound (exclusive) on the encoded size of a frame header.
pub const MAX_FRAME_HEADER_SIZE: usize = 64 * 1024;
/// Upper bound (exclusive) on the uncompressed size of a block payload.
pub const MAX_BLOB_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Width of the big-endian length prefix in front of every frame header.
pub const FRAME_LENGTH_PREFIX_SIZE: usize = 4;

pub const FEATURE_OSM_SCHEMA: &str = "OsmSchema-V0.6";
pub const FEATURE_DENSE_NODES: &str = "DenseNodes";
pub const FEATURE_HISTORICAL_INFORMATION: &str = "HistoricalInformation";

/// Required features this tool can carry through without loss.
pub const SUPPORTED_FEATURES: [&str; 3] = [
    FEATURE_OSM_SCHEMA,
    FEATURE_DENSE_NODES,
    FEATURE_HISTORICAL_INFORMATION,
];

/// Zlib level used for data blocks.
pub const ZLIB_LEVEL: u32 = 9;
/// Zstd level used for data blocks.
pub const ZSTD_LEVEL: i32 = 11;
