use std::fmt;
use std::str::FromStr;

use crate::error::ReblobError;
use crate::format::pbf::{FrameHeader, HeaderBlock, PooledBlock};

pub type Result<T> = std::result::Result<T, ReblobError>;

/// Compression scheme applied to the payload of written data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Payload stored uncompressed.
    Raw,
    /// Deflate with a zlib wrapper at the best compression level.
    #[default]
    Zlib,
    /// Zstandard.
    Zstd,
}

impl Compression {
    pub const ALL: [Compression; 3] = [Compression::Raw, Compression::Zlib, Compression::Zstd];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = ReblobError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(Self::Raw),
            "zlib" => Ok(Self::Zlib),
            "zstd" => Ok(Self::Zstd),
            other => Err(ReblobError::InvalidConfig(format!(
                "unknown compression '{other}', expected one of raw, zlib, zstd"
            ))),
        }
    }
}

/// Type tag carried by every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// File level metadata, `"OSMHeader"`.
    Header,
    /// Entity data, `"OSMData"`.
    Data,
}

impl BlockKind {
    pub const HEADER_TAG: &'static str = "OSMHeader";
    pub const DATA_TAG: &'static str = "OSMData";

    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Header => Self::HEADER_TAG,
            Self::Data => Self::DATA_TAG,
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            Self::HEADER_TAG => Ok(Self::Header),
            Self::DATA_TAG => Ok(Self::Data),
            other => Err(ReblobError::UnexpectedBlock(other.to_string())),
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Decoded contents of one frame.
#[derive(Debug)]
pub enum Block {
    Header(HeaderBlock),
    /// Data blocks stay checked out of the block pool until they are written
    /// or their contents have been merged elsewhere.
    Data(PooledBlock),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Header(_) => BlockKind::Header,
            Self::Data(_) => BlockKind::Data,
        }
    }
}

/// A frame read from the input together with its decoded block.
#[derive(Debug)]
pub struct DecodedBlock {
    /// Position of the frame in the input file, starting at zero.
    pub index: usize,
    pub header: FrameHeader,
    pub block: Block,
}

impl DecodedBlock {
    pub fn kind(&self) -> BlockKind {
        self.block.kind()
    }
}
