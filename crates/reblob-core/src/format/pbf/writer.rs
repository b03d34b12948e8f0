use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use prost::Message;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::core::OrderedPool;
use crate::telemetry::{self, tags};
use crate::types::{Block, BlockKind, Compression};
use crate::{ReblobError, Result};

use super::blob::encode_blob;
use super::headers::FrameHeader;

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// A complete frame ready to be appended to the output.
struct EncodedFrame {
    kind: BlockKind,
    raw_size: usize,
    bytes: PooledBuffer,
}

/// A block queued for encoding, with the index bytes its frame header carries.
struct OutgoingBlock {
    block: Block,
    index_data: Option<Vec<u8>>,
}

type EncodePool = OrderedPool<OutgoingBlock, EncodedFrame>;

/// Totals reported by [`BlockWriter::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub frames: u64,
    pub header_frames: u64,
    pub data_frames: u64,
    /// Bytes written to the output, framing included.
    pub bytes_written: u64,
    /// Serialized size of the written blocks before compression.
    pub raw_bytes: u64,
}

/// Encodes blocks on a worker pool and writes the frames in submission order.
///
/// The header block is always stored raw; data blocks use the configured
/// compression. The first block written must be the header block.
pub struct BlockWriter {
    pool: Arc<EncodePool>,
    sink: Option<JoinHandle<Result<WriteStats>>>,
    header_written: bool,
}

impl BlockWriter {
    /// Creates `path` and starts the encode workers.
    ///
    /// Fails if `path` already exists.
    pub fn create(
        path: impl AsRef<Path>,
        compression: Compression,
        workers: usize,
        queue_depth: usize,
        buffers: Arc<BufferPool>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| {
                ReblobError::from(err).with_context(format!("creating {}", path.display()))
            })?;
        Self::from_writer(
            BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            compression,
            workers,
            queue_depth,
            buffers,
        )
    }

    /// Starts the encode workers writing to `output`.
    pub fn from_writer<W>(
        output: W,
        compression: Compression,
        workers: usize,
        queue_depth: usize,
        buffers: Arc<BufferPool>,
    ) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let pool = Arc::new(OrderedPool::new(
            "encode",
            workers,
            queue_depth,
            move |outgoing: OutgoingBlock| encode_frame(outgoing, compression, &buffers),
        )?);

        let sink_pool = Arc::clone(&pool);
        let sink = thread::Builder::new()
            .name("pbf-sink".to_string())
            .spawn(move || run_sink(output, &sink_pool))
            .map_err(|err| ReblobError::from(err).with_context("spawning frame sink"))?;

        Ok(Self {
            pool,
            sink: Some(sink),
            header_written: false,
        })
    }

    /// Queues `block` for encoding and writing.
    ///
    /// Blocks while the encode queue is full. If writing has already failed,
    /// returns that failure.
    pub fn write(&mut self, block: Block) -> Result<()> {
        self.write_with_index(block, None)
    }

    /// Like [`write`](Self::write), but stores `index_data` in the frame's
    /// blob header. Used to carry an input frame's index bytes over unchanged.
    pub fn write_with_index(&mut self, block: Block, index_data: Option<Vec<u8>>) -> Result<()> {
        match (block.kind(), self.header_written) {
            (BlockKind::Header, true) => {
                return Err(ReblobError::format("header block written twice"));
            }
            (BlockKind::Data, false) => {
                return Err(ReblobError::format(
                    "data block written before the header block",
                ));
            }
            (BlockKind::Header, false) => self.header_written = true,
            (BlockKind::Data, true) => {}
        }

        match self.pool.submit(OutgoingBlock { block, index_data }) {
            Ok(()) => Ok(()),
            Err(err) if err.is_pool_stopped() => Err(self.sink_failure()),
            Err(err) => Err(err),
        }
    }

    /// Waits for every queued block to be written and flushes the output.
    pub fn finish(mut self) -> Result<WriteStats> {
        self.pool.stop();
        let stats = self.join_sink()?;
        self.pool.join()?;
        tracing::debug!(
            target: tags::TARGET_WRITER,
            frames = stats.frames,
            bytes_written = stats.bytes_written,
            "writer finished"
        );
        Ok(stats)
    }

    /// Stops writing and drops every block not yet picked up by a worker.
    pub fn abort(&mut self) {
        self.pool.stop();
        self.pool.discard_pending();
    }

    fn join_sink(&mut self) -> Result<WriteStats> {
        match self.sink.take() {
            Some(sink) => sink.join().unwrap_or_else(|_| {
                Err(ReblobError::Other(anyhow::anyhow!("frame sink panicked")))
            }),
            None => Err(ReblobError::PoolStopped),
        }
    }

    fn sink_failure(&mut self) -> ReblobError {
        match self.join_sink() {
            Err(err) => err,
            Ok(_) => ReblobError::PoolStopped,
        }
    }
}

impl Drop for BlockWriter {
    fn drop(&mut self) {
        self.abort();
        if let Some(sink) = self.sink.take() {
            let _ = sink.join();
        }
    }
}

fn run_sink<W: Write>(output: W, pool: &EncodePool) -> Result<WriteStats> {
    let result = drain_frames(output, pool);
    if let Err(ref err) = result {
        tracing::debug!(target: tags::TARGET_WRITER, error = %err, "writer failed");
        pool.stop();
        pool.discard_pending();
    }
    result
}

fn drain_frames<W: Write>(mut output: W, pool: &EncodePool) -> Result<WriteStats> {
    let mut stats = WriteStats::default();

    while let Some(frame) = pool.next() {
        let frame = frame?;
        output
            .write_all(&frame.bytes)
            .map_err(|err| ReblobError::from(err).with_context("writing frame"))?;

        let frame_len = frame.bytes.len() as u64;
        stats.frames += 1;
        stats.bytes_written += frame_len;
        stats.raw_bytes += frame.raw_size as u64;
        match frame.kind {
            BlockKind::Header => stats.header_frames += 1,
            BlockKind::Data => stats.data_frames += 1,
        }
        telemetry::increment_counter(tags::METRIC_WRITER_FRAME_COUNT, 1);
        telemetry::increment_counter(tags::METRIC_WRITER_PAYLOAD_BYTES, frame_len);
    }

    output
        .flush()
        .map_err(|err| ReblobError::from(err).with_context("flushing output"))?;
    Ok(stats)
}

fn encode_frame(
    outgoing: OutgoingBlock,
    compression: Compression,
    buffers: &BufferPool,
) -> Result<EncodedFrame> {
    let OutgoingBlock { block, index_data } = outgoing;
    let kind = block.kind();
    let mut raw = buffers.acquire();
    let compression = match &block {
        Block::Header(header) => {
            raw.reserve(header.encoded_len());
            header.encode(&mut *raw)?;
            Compression::Raw
        }
        Block::Data(data) => {
            raw.reserve(data.encoded_len());
            data.encode(&mut *raw)?;
            compression
        }
    };
    // Returns a data block to its pool.
    drop(block);

    let mut payload = buffers.acquire();
    encode_blob(&raw, compression, &mut payload)?;

    let mut bytes = buffers.acquire();
    let mut header = FrameHeader::new(kind, payload.len());
    header.index_data = index_data;
    header.write(&mut *bytes)?;
    bytes.extend_from_slice(&payload);

    Ok(EncodedFrame {
        kind,
        raw_size: raw.len(),
        bytes,
    })
}
