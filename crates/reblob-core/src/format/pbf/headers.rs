use std::io::{self, Read, Write};

use prost::Message;

use crate::types::BlockKind;
use crate::{ReblobError, Result};

use super::messages::BlobHeader;
use super::{FRAME_LENGTH_PREFIX_SIZE, MAX_FRAME_HEADER_SIZE};

/// Header of one frame: what kind of block follows and how long its payload
/// is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub block_type: String,
    pub data_size: usize,
    pub index_data: Option<Vec<u8>>,
}

impl FrameHeader {
    pub fn new(kind: BlockKind, data_size: usize) -> Self {
        Self {
            block_type: kind.as_tag().to_string(),
            data_size,
            index_data: None,
        }
    }

    pub fn kind(&self) -> Result<BlockKind> {
        BlockKind::from_tag(&self.block_type)
    }

    /// Reads the length prefix and the header that follows it.
    ///
    /// Returns `Ok(None)` when the reader is exhausted exactly at a frame
    /// boundary. Running out of input anywhere else is an I/O error.
    pub fn read<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut prefix = [0u8; FRAME_LENGTH_PREFIX_SIZE];
        if !read_prefix(reader, &mut prefix)? {
            return Ok(None);
        }

        let header_len = u32::from_be_bytes(prefix) as usize;
        if header_len >= MAX_FRAME_HEADER_SIZE {
            return Err(ReblobError::format(format!(
                "frame header of {header_len} bytes exceeds the {MAX_FRAME_HEADER_SIZE} byte limit"
            )));
        }

        let mut bytes = vec![0u8; header_len];
        reader
            .read_exact(&mut bytes)
            .map_err(|err| ReblobError::from(err).with_context("reading frame header"))?;
        Self::decode(&bytes).map(Some)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = BlobHeader::decode(bytes)
            .map_err(|err| ReblobError::from(err).with_context("decoding frame header"))?;
        let data_size = usize::try_from(header.datasize).map_err(|_| {
            ReblobError::format(format!("negative frame payload size {}", header.datasize))
        })?;
        Ok(Self {
            block_type: header.r#type,
            data_size,
            index_data: header.indexdata,
        })
    }

    /// Encodes the header without its length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let datasize = i32::try_from(self.data_size).map_err(|_| {
            ReblobError::format(format!(
                "frame payload of {} bytes does not fit the header",
                self.data_size
            ))
        })?;
        let header = BlobHeader {
            r#type: self.block_type.clone(),
            indexdata: self.index_data.clone(),
            datasize,
        };
        Ok(header.encode_to_vec())
    }

    /// Writes the length prefix followed by the encoded header. Returns the
    /// number of bytes written.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let bytes = self.encode()?;
        if bytes.len() >= MAX_FRAME_HEADER_SIZE {
            return Err(ReblobError::format(format!(
                "frame header of {} bytes exceeds the {MAX_FRAME_HEADER_SIZE} byte limit",
                bytes.len()
            )));
        }
        writer.write_all(&(bytes.len() as u32).to_be_bytes())?;
        writer.write_all(&bytes)?;
        Ok(FRAME_LENGTH_PREFIX_SIZE + bytes.len())
    }
}

/// Fills `prefix`, distinguishing a clean end of input from a short read.
fn read_prefix<R: Read>(reader: &mut R, prefix: &mut [u8]) -> Result<bool> {
    let mut filled = 0usize;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(ReblobError::from(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "input ends inside a frame length prefix",
                )));
            }
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}
