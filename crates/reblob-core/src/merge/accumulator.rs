use prost::encoding::{self, encoded_len_varint, key_len};

use crate::format::pbf::{PooledBlock, PrimitiveBlock, PrimitiveGroup};
use crate::telemetry::{self, tags};
use crate::Result;

use super::{StringIndex, merge};

const MIB: f64 = 1024.0 * 1024.0;

/// Counters kept by a [`BlockAccumulator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    /// Blocks folded into an existing target.
    pub merged: u64,
    /// Merges refused because encoding parameters differ.
    pub rejected_incompatible: u64,
    /// Merges undone because the result would exceed the size cap.
    pub rejected_oversize: u64,
    /// Blocks handed back as finished.
    pub flushed: u64,
    /// Input blocks that alone exceeded the size cap.
    pub oversized_inputs: u64,
}

/// Coalesces a stream of data blocks into blocks no larger than a size cap.
///
/// Every pushed block is either folded into the current target or, when that
/// is not possible, replaces it; the replaced target is returned as finished.
/// Output order follows input order.
pub struct BlockAccumulator {
    max_blob_size: usize,
    target: Option<MergeTarget>,
    stats: AccumulatorStats,
}

impl BlockAccumulator {
    pub fn new(max_blob_size: usize) -> Self {
        Self {
            max_blob_size,
            target: None,
            stats: AccumulatorStats::default(),
        }
    }

    pub fn max_blob_size(&self) -> usize {
        self.max_blob_size
    }

    pub fn stats(&self) -> AccumulatorStats {
        self.stats
    }

    /// Serialized size of the current target, if any.
    pub fn pending_size(&self) -> Option<usize> {
        self.target.as_ref().map(MergeTarget::size)
    }

    /// Adds `candidate` to the accumulation.
    ///
    /// Returns the previous target when `candidate` could not be merged into
    /// it. The candidate then becomes the new target.
    pub fn push(&mut self, candidate: PooledBlock) -> Result<Option<PooledBlock>> {
        let Some(target) = self.target.as_mut() else {
            self.start(candidate);
            return Ok(None);
        };

        let snapshot = target.snapshot();
        let merged = match merge(&mut target.block, &mut target.index, &candidate) {
            Ok(merged) => merged,
            Err(err) => {
                target.rollback(snapshot);
                return Err(err);
            }
        };

        if !merged {
            self.stats.rejected_incompatible += 1;
            telemetry::increment_counter(tags::METRIC_MERGE_REJECTED_INCOMPATIBLE_COUNT, 1);
            tracing::debug!(
                target: tags::TARGET_MERGE,
                "encoding parameters differ, starting a new block"
            );
            return Ok(self.replace(candidate));
        }

        target.sizes.extend(&target.block, &snapshot);
        let size = target.size();
        if size > self.max_blob_size {
            target.rollback(snapshot);
            self.stats.rejected_oversize += 1;
            telemetry::increment_counter(tags::METRIC_MERGE_REJECTED_OVERSIZE_COUNT, 1);
            tracing::debug!(
                target: tags::TARGET_MERGE,
                size,
                max = self.max_blob_size,
                "merge would exceed the size cap, starting a new block"
            );
            return Ok(self.replace(candidate));
        }

        target.sources += 1;
        self.stats.merged += 1;
        telemetry::increment_counter(tags::METRIC_MERGE_ACCEPTED_COUNT, 1);
        Ok(None)
    }

    /// Returns the current target, leaving the accumulator empty.
    pub fn finish(&mut self) -> Option<PooledBlock> {
        let target = self.target.take()?;
        Some(self.flush(target))
    }

    fn start(&mut self, block: PooledBlock) {
        let target = MergeTarget::new(block);
        let size = target.size();
        if size > self.max_blob_size {
            self.stats.oversized_inputs += 1;
            telemetry::increment_counter(tags::METRIC_MERGE_OVERSIZED_INPUT_COUNT, 1);
            tracing::warn!(
                target: tags::TARGET_MERGE,
                size,
                max = self.max_blob_size,
                "block already exceeds the size cap, passing it through unmerged"
            );
        }
        self.target = Some(target);
    }

    fn replace(&mut self, candidate: PooledBlock) -> Option<PooledBlock> {
        let finished = self.target.take().map(|target| self.flush(target));
        self.start(candidate);
        finished
    }

    fn flush(&mut self, target: MergeTarget) -> PooledBlock {
        let size = target.size();
        self.stats.flushed += 1;
        telemetry::increment_counter(tags::METRIC_MERGE_FLUSHED_COUNT, 1);
        telemetry::record_histogram(tags::METRIC_MERGE_BLOCK_BYTES, size as u64);
        tracing::info!(
            target: tags::TARGET_MERGE,
            sources = target.sources,
            groups = target.block.primitivegroup.len(),
            strings = target.block.stringtable.s.len(),
            "writing block of {:.2} MiB",
            size as f64 / MIB
        );
        target.block
    }
}

/// The block currently being grown, with the state scoped to it.
struct MergeTarget {
    block: PooledBlock,
    index: Option<StringIndex>,
    sizes: SizeCache,
    sources: usize,
}

/// Lengths of the target before a merge attempt.
struct Snapshot {
    strings: usize,
    groups: usize,
    strings_len: usize,
    groups_len: usize,
}

impl MergeTarget {
    fn new(block: PooledBlock) -> Self {
        let sizes = SizeCache::measure(&block);
        Self {
            block,
            index: None,
            sizes,
            sources: 1,
        }
    }

    fn size(&self) -> usize {
        self.sizes.block_len(&self.block)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            strings: self.block.stringtable.s.len(),
            groups: self.block.primitivegroup.len(),
            strings_len: self.sizes.strings_len,
            groups_len: self.sizes.groups_len,
        }
    }

    fn rollback(&mut self, snapshot: Snapshot) {
        let strings = &mut self.block.stringtable.s;
        if strings.len() > snapshot.strings {
            match self.index.as_mut() {
                Some(index) => {
                    for value in strings.drain(snapshot.strings..) {
                        index.forget(&value);
                    }
                }
                None => strings.truncate(snapshot.strings),
            }
        }
        self.block.primitivegroup.truncate(snapshot.groups);
        self.sizes.group_lens.truncate(snapshot.groups);
        self.sizes.strings_len = snapshot.strings_len;
        self.sizes.groups_len = snapshot.groups_len;
    }
}

/// Memoized encoded lengths of a target's strings and groups.
///
/// Growing the target only measures what was appended since the last
/// snapshot.
#[derive(Debug, Default)]
struct SizeCache {
    /// Encoded length of the string table's body.
    strings_len: usize,
    /// Encoded length of each group field, key and length prefix included.
    group_lens: Vec<usize>,
    groups_len: usize,
}

impl SizeCache {
    fn measure(block: &PrimitiveBlock) -> Self {
        let mut cache = Self::default();
        cache.add_strings(&block.stringtable.s);
        for group in &block.primitivegroup {
            cache.add_group(group);
        }
        cache
    }

    fn extend(&mut self, block: &PrimitiveBlock, since: &Snapshot) {
        self.add_strings(&block.stringtable.s[since.strings..]);
        for group in &block.primitivegroup[since.groups..] {
            self.add_group(group);
        }
    }

    fn add_strings(&mut self, values: &[Vec<u8>]) {
        self.strings_len += values
            .iter()
            .map(|value| encoding::bytes::encoded_len(1, value))
            .sum::<usize>();
    }

    fn add_group(&mut self, group: &PrimitiveGroup) {
        let len = encoding::message::encoded_len(2, group);
        self.group_lens.push(len);
        self.groups_len += len;
    }

    /// Equals `block.encoded_len()` as long as the cache is in sync with it.
    fn block_len(&self, block: &PrimitiveBlock) -> usize {
        let stringtable =
            key_len(1) + encoded_len_varint(self.strings_len as u64) + self.strings_len;
        let params = block
            .granularity
            .map_or(0, |value| encoding::int32::encoded_len(17, &value))
            + block
                .date_granularity
                .map_or(0, |value| encoding::int32::encoded_len(18, &value))
            + block
                .lat_offset
                .map_or(0, |value| encoding::int64::encoded_len(19, &value))
            + block
                .lon_offset
                .map_or(0, |value| encoding::int64::encoded_len(20, &value));
        stringtable + self.groups_len + params
    }
}
