use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::telemetry::{self, tags};

/// A value that can be handed back to an [`ObjectPool`] and reused.
pub trait Recycle: Default + Send + 'static {
    /// Allocates a fresh value for a pool whose default capacity is `capacity`.
    fn allocate(capacity: usize) -> Self {
        let _ = capacity;
        Self::default()
    }

    /// Drops the contents of the value while keeping its allocations.
    fn recycle(&mut self);
}

impl Recycle for Vec<u8> {
    fn allocate(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    fn recycle(&mut self) {
        self.clear();
    }
}

/// A bounded free list of reusable values.
///
/// Values are handed out wrapped in a [`Pooled`] guard that owns the value
/// exclusively. Dropping the guard clears the value and returns it to the pool,
/// so a value can only ever be returned once and cannot be touched after it was
/// returned.
///
/// # Example
/// ```
/// use reblob_core::BufferPool;
///
/// let pool = BufferPool::new(4096, 100);
/// let buffer = pool.acquire();
/// // use buffer...
/// drop(buffer); // returns to pool automatically
/// ```
#[derive(Debug)]
pub struct ObjectPool<T: Recycle> {
    recycler: Sender<T>,
    receiver: Receiver<T>,
    default_capacity: usize,
    max_items: usize,
    metrics: Arc<PoolMetricsInner>,
}

/// Pool of raw byte buffers used for frame payloads and encode scratch space.
pub type BufferPool = ObjectPool<Vec<u8>>;
/// A byte buffer checked out of a [`BufferPool`].
pub type PooledBuffer = Pooled<Vec<u8>>;

impl<T: Recycle> ObjectPool<T> {
    /// Creates a new pool.
    ///
    /// # Arguments
    /// * `default_capacity` - Capacity hint passed to [`Recycle::allocate`]
    /// * `max_items` - Maximum number of idle values kept in the pool
    pub fn new(default_capacity: usize, max_items: usize) -> Self {
        let max_items = max_items.max(1);
        let (tx, rx) = bounded(max_items);
        Self {
            recycler: tx,
            receiver: rx,
            default_capacity,
            max_items,
            metrics: Arc::new(PoolMetricsInner::default()),
        }
    }

    /// Acquires a value from the pool.
    ///
    /// Returns a recycled value if available, otherwise allocates a new one.
    pub fn acquire(&self) -> Pooled<T> {
        let value = match self.receiver.try_recv() {
            Ok(value) => {
                self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                telemetry::increment_counter(tags::METRIC_POOL_ACQUIRE_RECYCLED_COUNT, 1);
                value
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.metrics.created.fetch_add(1, Ordering::Relaxed);
                telemetry::increment_counter(tags::METRIC_POOL_ACQUIRE_CREATED_COUNT, 1);
                T::allocate(self.default_capacity)
            }
        };

        Pooled::new(value, self.recycler.clone(), Arc::clone(&self.metrics))
    }

    /// Wraps a value that was allocated elsewhere so it returns to this pool
    /// when dropped.
    pub fn adopt(&self, value: T) -> Pooled<T> {
        Pooled::new(value, self.recycler.clone(), Arc::clone(&self.metrics))
    }

    /// Returns a snapshot of the current pool metrics.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            created: self.metrics.created.load(Ordering::Relaxed),
            recycled: self.metrics.recycled.load(Ordering::Relaxed),
            dropped: self.metrics.dropped.load(Ordering::Relaxed),
        }
    }

    /// Number of idle values currently waiting in the pool.
    pub fn idle(&self) -> usize {
        self.receiver.len()
    }

    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }
}

/// A snapshot of pool metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolMetricsSnapshot {
    /// Number of values allocated by the pool
    pub created: usize,
    /// Number of values handed out again after being returned
    pub recycled: usize,
    /// Number of returned values dropped because the pool was full
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    created: AtomicUsize,
    recycled: AtomicUsize,
    dropped: AtomicUsize,
}

/// A value checked out of an [`ObjectPool`].
///
/// Implements `Deref` and `DerefMut` for transparent access to the value.
#[derive(Debug)]
pub struct Pooled<T: Recycle> {
    value: T,
    recycler: Sender<T>,
    metrics: Arc<PoolMetricsInner>,
}

impl<T: Recycle> Pooled<T> {
    fn new(value: T, recycler: Sender<T>, metrics: Arc<PoolMetricsInner>) -> Self {
        Self {
            value,
            recycler,
            metrics,
        }
    }
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        let mut value = std::mem::take(&mut self.value);
        value.recycle();
        if let Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) =
            self.recycler.try_send(value)
        {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            telemetry::increment_counter(tags::METRIC_POOL_RECYCLE_DROPPED_COUNT, 1);
            tracing::trace!(
                target: tags::TARGET_POOL,
                op = "recycle",
                result = "dropped",
                "pooled value dropped instead of recycled"
            );
        }
    }
}
