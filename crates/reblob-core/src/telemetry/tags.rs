/// Tracing target for buffer and block pool events.
pub const TARGET_POOL: &str = "reblob::pool";
/// Tracing target for ordered worker pool events.
pub const TARGET_WORKER: &str = "reblob::worker";
/// Tracing target for container reading.
pub const TARGET_READER: &str = "reblob::reader";
/// Tracing target for container writing.
pub const TARGET_WRITER: &str = "reblob::writer";
/// Tracing target for block merging.
pub const TARGET_MERGE: &str = "reblob::merge";

pub const METRIC_POOL_ACQUIRE_CREATED_COUNT: &str = "reblob.pool.acquire.created.count";
pub const METRIC_POOL_ACQUIRE_RECYCLED_COUNT: &str = "reblob.pool.acquire.recycled.count";
pub const METRIC_POOL_RECYCLE_DROPPED_COUNT: &str = "reblob.pool.recycle.dropped.count";

pub const METRIC_WORKER_TASK_COUNT: &str = "reblob.worker.task.count";
pub const METRIC_WORKER_TASK_FAILED_COUNT: &str = "reblob.worker.task.failed.count";
pub const METRIC_WORKER_TASK_DISCARDED_COUNT: &str = "reblob.worker.task.discarded.count";
pub const METRIC_WORKER_TASK_LATENCY_US: &str = "reblob.worker.task.latency_us";

pub const METRIC_READER_FRAME_COUNT: &str = "reblob.reader.frame.count";
pub const METRIC_READER_PAYLOAD_BYTES: &str = "reblob.reader.payload.bytes";
pub const METRIC_WRITER_FRAME_COUNT: &str = "reblob.writer.frame.count";
pub const METRIC_WRITER_PAYLOAD_BYTES: &str = "reblob.writer.payload.bytes";

pub const METRIC_COMPRESSION_APPLY_LATENCY_US: &str = "reblob.compression.apply.latency_us";
pub const METRIC_COMPRESSION_REVERSE_LATENCY_US: &str = "reblob.compression.reverse.latency_us";

pub const METRIC_MERGE_ACCEPTED_COUNT: &str = "reblob.merge.accepted.count";
pub const METRIC_MERGE_REJECTED_INCOMPATIBLE_COUNT: &str = "reblob.merge.rejected.incompatible.count";
pub const METRIC_MERGE_REJECTED_OVERSIZE_COUNT: &str = "reblob.merge.rejected.oversize.count";
pub const METRIC_MERGE_FLUSHED_COUNT: &str = "reblob.merge.flushed.count";
pub const METRIC_MERGE_OVERSIZED_INPUT_COUNT: &str = "reblob.merge.oversized_input.count";
pub const METRIC_MERGE_BLOCK_BYTES: &str = "reblob.merge.block.bytes";
