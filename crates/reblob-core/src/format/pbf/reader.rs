use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use prost::Message;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::core::OrderedPool;
use crate::telemetry::{self, lock_unpoisoned, tags};
use crate::types::{Block, BlockKind, DecodedBlock};
use crate::{ReblobError, Result};

use super::blob::decode_blob;
use super::headers::FrameHeader;
use super::messages::{BlockPool, HeaderBlock};
use super::MAX_BLOB_PAYLOAD_SIZE;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// A frame as it sits on disk, before decompression.
struct RawFrame {
    index: usize,
    header: FrameHeader,
    payload: PooledBuffer,
}

type DecodePool = OrderedPool<RawFrame, DecodedBlock>;

/// Streams decoded blocks out of a PBF file in file order.
///
/// A feeder thread splits the input into frames and hands them to a pool of
/// decode workers. Iterating the reader yields the decoded blocks in the order
/// their frames appear in the input. The first error ends the stream: it is
/// yielded once and every later call returns `None`.
pub struct BlockReader {
    pool: Arc<DecodePool>,
    feeder: Option<JoinHandle<()>>,
    feeder_error: Arc<Mutex<Option<ReblobError>>>,
    blocks_read: usize,
    finished: bool,
}

impl BlockReader {
    /// Opens `path` and starts decoding it on `workers` threads.
    pub fn open(
        path: impl AsRef<Path>,
        workers: usize,
        queue_depth: usize,
        buffers: Arc<BufferPool>,
        blocks: Arc<BlockPool>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            ReblobError::from(err).with_context(format!("opening {}", path.display()))
        })?;
        Self::from_reader(
            BufReader::with_capacity(READ_BUFFER_SIZE, file),
            workers,
            queue_depth,
            buffers,
            blocks,
        )
    }

    /// Starts decoding frames read from `input`.
    pub fn from_reader<R>(
        input: R,
        workers: usize,
        queue_depth: usize,
        buffers: Arc<BufferPool>,
        blocks: Arc<BlockPool>,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let decode_buffers = Arc::clone(&buffers);
        let pool = Arc::new(OrderedPool::new(
            "decode",
            workers,
            queue_depth,
            move |frame: RawFrame| decode_frame(frame, &decode_buffers, &blocks),
        )?);

        let feeder_error = Arc::new(Mutex::new(None));
        let feeder_pool = Arc::clone(&pool);
        let feeder_slot = Arc::clone(&feeder_error);
        let feeder = thread::Builder::new()
            .name("pbf-feeder".to_string())
            .spawn(move || run_feeder(input, feeder_pool, buffers, feeder_slot))
            .map_err(|err| ReblobError::from(err).with_context("spawning frame feeder"))?;

        Ok(Self {
            pool,
            feeder: Some(feeder),
            feeder_error,
            blocks_read: 0,
            finished: false,
        })
    }

    /// Number of blocks handed out so far.
    pub fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    /// Stops decoding and drops every frame not yet picked up by a worker.
    pub fn abort(&mut self) {
        self.finished = true;
        self.pool.stop();
        self.pool.discard_pending();
    }
}

impl Iterator for BlockReader {
    type Item = Result<DecodedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.pool.next() {
            Some(Ok(block)) => {
                self.blocks_read += 1;
                Some(Ok(block))
            }
            Some(Err(err)) => {
                self.abort();
                Some(Err(err))
            }
            None => {
                self.finished = true;
                lock_unpoisoned(&self.feeder_error).take().map(Err)
            }
        }
    }
}

impl Drop for BlockReader {
    fn drop(&mut self) {
        self.abort();
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
    }
}

/// Stops the pool when the feeder exits, even by unwinding, so the consumer
/// never waits on frames that will not come.
struct StopOnExit<'a>(&'a DecodePool);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

fn run_feeder<R: Read>(
    mut input: R,
    pool: Arc<DecodePool>,
    buffers: Arc<BufferPool>,
    error_slot: Arc<Mutex<Option<ReblobError>>>,
) {
    let _stop = StopOnExit(&pool);
    let mut index = 0usize;

    loop {
        match read_frame(&mut input, index, &buffers) {
            Ok(Some(frame)) => {
                let payload_bytes = frame.payload.len() as u64;
                if let Err(err) = pool.submit(frame) {
                    if !err.is_pool_stopped() {
                        *lock_unpoisoned(&error_slot) = Some(err);
                    }
                    return;
                }
                telemetry::increment_counter(tags::METRIC_READER_FRAME_COUNT, 1);
                telemetry::increment_counter(tags::METRIC_READER_PAYLOAD_BYTES, payload_bytes);
                index += 1;
            }
            Ok(None) => {
                tracing::debug!(target: tags::TARGET_READER, frames = index, "end of input");
                return;
            }
            Err(err) => {
                tracing::debug!(
                    target: tags::TARGET_READER,
                    frame = index,
                    error = %err,
                    "frame read failed"
                );
                *lock_unpoisoned(&error_slot) = Some(err.with_context(format!("frame {index}")));
                return;
            }
        }
    }
}

fn read_frame<R: Read>(
    input: &mut R,
    index: usize,
    buffers: &BufferPool,
) -> Result<Option<RawFrame>> {
    let Some(header) = FrameHeader::read(input)? else {
        return Ok(None);
    };

    if header.data_size > MAX_BLOB_PAYLOAD_SIZE {
        return Err(ReblobError::format(format!(
            "frame payload of {} bytes exceeds the {MAX_BLOB_PAYLOAD_SIZE} byte limit",
            header.data_size
        )));
    }

    let mut payload = buffers.acquire();
    payload.resize(header.data_size, 0);
    input
        .read_exact(&mut payload)
        .map_err(|err| ReblobError::from(err).with_context("reading frame payload"))?;

    tracing::trace!(
        target: tags::TARGET_READER,
        frame = index,
        block_type = %header.block_type,
        data_size = header.data_size,
        "frame read"
    );

    Ok(Some(RawFrame {
        index,
        header,
        payload,
    }))
}

fn decode_frame(
    frame: RawFrame,
    buffers: &BufferPool,
    blocks: &BlockPool,
) -> Result<DecodedBlock> {
    let RawFrame {
        index,
        header,
        payload,
    } = frame;

    let kind = header.kind()?;
    let mut raw = buffers.acquire();
    decode_blob(&payload, &mut raw)
        .map_err(|err| err.with_context(format!("frame {index}")))?;
    drop(payload);

    let block = match kind {
        BlockKind::Header => Block::Header(
            HeaderBlock::decode(raw.as_slice())
                .map_err(|err| ReblobError::from(err).with_context(format!("frame {index}")))?,
        ),
        BlockKind::Data => {
            let mut block = blocks.acquire();
            block
                .merge(raw.as_slice())
                .map_err(|err| ReblobError::from(err).with_context(format!("frame {index}")))?;
            Block::Data(block)
        }
    };

    Ok(DecodedBlock {
        index,
        header,
        block,
    })
}
