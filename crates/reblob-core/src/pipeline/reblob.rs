use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::BufferPool;
use crate::format::pbf::{BlockPool, BlockReader, BlockWriter, validate_required_features};
use crate::merge::BlockAccumulator;
use crate::types::{Block, BlockKind, DecodedBlock};
use crate::{ReblobError, Result};

use super::types::{ReblobOptions, RunStats};

const BUFFER_CAPACITY: usize = 256 * 1024;

/// Rewrites a PBF file with its data blocks coalesced.
///
/// Owns the buffer and block pools shared by the reader and the writer, so a
/// pipeline reused for several runs also reuses their allocations.
pub struct ReblobPipeline {
    options: ReblobOptions,
    buffers: Arc<BufferPool>,
    blocks: Arc<BlockPool>,
}

impl ReblobPipeline {
    pub fn new(options: ReblobOptions) -> Result<Self> {
        options.validate()?;
        let buffers = Arc::new(BufferPool::new(BUFFER_CAPACITY, options.buffer_pool_size));
        let blocks = Arc::new(BlockPool::new(0, options.block_pool_size));
        Ok(Self {
            options,
            buffers,
            blocks,
        })
    }

    pub fn options(&self) -> &ReblobOptions {
        &self.options
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    pub fn block_pool(&self) -> &Arc<BlockPool> {
        &self.blocks
    }

    /// Reads `input` and writes the coalesced file to `output`.
    ///
    /// `output` must not exist yet. If the run fails after `output` was
    /// created, the partial file is removed before the error is returned.
    pub fn run(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<RunStats> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let started_at = Instant::now();

        if output.exists() {
            return Err(ReblobError::InvalidConfig(format!(
                "output file {} already exists",
                output.display()
            )));
        }

        let mut reader = BlockReader::open(
            input,
            self.options.decode_workers,
            self.options.queue_depth,
            Arc::clone(&self.buffers),
            Arc::clone(&self.blocks),
        )?;

        let header = match read_header(&mut reader) {
            Ok(header) => header,
            Err(err) => {
                reader.abort();
                return Err(err);
            }
        };

        let mut guard = OutputGuard::new(output);
        let mut writer = BlockWriter::create(
            output,
            self.options.compression,
            self.options.encode_workers,
            self.options.queue_depth,
            Arc::clone(&self.buffers),
        )?;
        guard.arm();

        let mut accumulator = BlockAccumulator::new(self.options.max_blob_size);
        let mut stats = RunStats::default();

        if let Err(err) = pump(header, &mut reader, &mut accumulator, &mut writer, &mut stats) {
            reader.abort();
            writer.abort();
            drop(writer);
            return Err(err);
        }

        let written = writer.finish()?;
        guard.disarm();

        let merged = accumulator.stats();
        stats.frames_read = reader.blocks_read() as u64;
        stats.blocks_out = written.data_frames;
        stats.oversized_blocks = merged.oversized_inputs;
        stats.bytes_written = written.bytes_written;
        stats.elapsed = started_at.elapsed();

        tracing::info!(
            blocks_in = stats.blocks_in,
            blocks_out = stats.blocks_out,
            bytes_written = stats.bytes_written,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "reblob finished"
        );
        Ok(stats)
    }
}

/// Runs a pipeline built from `options` once.
pub fn reblob(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &ReblobOptions,
) -> Result<RunStats> {
    ReblobPipeline::new(options.clone())?.run(input, output)
}

/// Reads the first block, which must be the header block, and checks the
/// features it requires.
fn read_header(reader: &mut BlockReader) -> Result<DecodedBlock> {
    let first = reader
        .next()
        .ok_or_else(|| ReblobError::format("input contains no blocks"))??;

    match &first.block {
        Block::Header(header) => {
            validate_required_features(&header)?;
            tracing::debug!(
                required = ?header.required_features,
                optional = ?header.optional_features,
                writingprogram = header.writingprogram.as_deref().unwrap_or(""),
                "header block accepted"
            );
            Ok(first)
        }
        Block::Data(_) => Err(ReblobError::format(format!(
            "first block is {}, expected {}",
            BlockKind::Data,
            BlockKind::Header
        ))),
    }
}

fn pump(
    header: DecodedBlock,
    reader: &mut BlockReader,
    accumulator: &mut BlockAccumulator,
    writer: &mut BlockWriter,
    stats: &mut RunStats,
) -> Result<()> {
    writer.write_with_index(header.block, header.header.index_data)?;

    for decoded in reader.by_ref() {
        let DecodedBlock { index, block, .. } = decoded?;
        match block {
            Block::Data(block) => {
                stats.blocks_in += 1;
                if let Some(finished) = accumulator.push(block)? {
                    writer.write(Block::Data(finished))?;
                }
            }
            Block::Header(_) => {
                return Err(ReblobError::UnexpectedBlock(BlockKind::Header.to_string())
                    .with_context(format!("frame {index}")));
            }
        }
    }

    if let Some(finished) = accumulator.finish() {
        writer.write(Block::Data(finished))?;
    }
    Ok(())
}

/// Removes the output file on drop unless the run completed.
struct OutputGuard {
    path: PathBuf,
    armed: bool,
}

impl OutputGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: false,
        }
    }

    fn arm(&mut self) {
        self.armed = true;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed partial output"),
            Err(err) => tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "could not remove partial output"
            ),
        }
    }
}
