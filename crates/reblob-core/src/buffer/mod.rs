mod pool;

pub use pool::{
    BufferPool, ObjectPool, PoolMetricsSnapshot, Pooled, PooledBuffer, Recycle,
};
