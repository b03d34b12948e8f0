//! Lightweight in-process metrics.
//!
//! Counters and histograms are kept in a process-wide registry keyed by the
//! static names in [`tags`]. Nothing is exported automatically; callers take a
//! [`snapshot`] when they want to report.
//!
//! The registry only exists with the `telemetry` feature. Without it the
//! recording functions compile to nothing and [`snapshot`] is always empty.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub mod tags;

/// Histogram summary captured in telemetry snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistogramSnapshot {
    /// Total number of samples recorded.
    pub count: u64,
    /// Sum of all sample values.
    pub total: u64,
    /// Minimum sample value observed.
    pub min: u64,
    /// Maximum sample value observed.
    pub max: u64,
    /// Arithmetic mean of all sample values.
    pub mean: f64,
}

/// In-memory view of collected telemetry metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl TelemetrySnapshot {
    /// Returns the value of a counter if it exists.
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    /// Returns the snapshot of a histogram if it exists.
    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.get(name).copied()
    }
}

/// Converts elapsed time since `started_at` to microseconds, clamped to `u64::MAX`.
#[inline]
pub fn elapsed_us(started_at: Instant) -> u64 {
    duration_to_us(started_at.elapsed())
}

#[inline]
pub fn duration_to_us(duration: Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}

/// Increments a named counter by `value`.
#[inline]
pub fn increment_counter(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::increment_counter(name, value);

    let _ = (name, value);
}

/// Records a histogram sample.
#[inline]
pub fn record_histogram(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::record_histogram(name, value);

    let _ = (name, value);
}

/// Returns a point-in-time snapshot of all collected telemetry.
pub fn snapshot() -> TelemetrySnapshot {
    #[cfg(feature = "telemetry")]
    {
        return registry::snapshot();
    }

    #[cfg(not(feature = "telemetry"))]
    {
        TelemetrySnapshot::default()
    }
}

/// Clears in-memory telemetry state.
pub fn reset() {
    #[cfg(feature = "telemetry")]
    registry::reset();
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(feature = "telemetry")]
mod registry {
    use std::collections::BTreeMap;
    use std::sync::{Mutex, OnceLock};

    use super::{HistogramSnapshot, TelemetrySnapshot, lock_unpoisoned};

    #[derive(Debug, Clone, Copy, Default)]
    struct HistogramAggregate {
        count: u64,
        total: u64,
        min: u64,
        max: u64,
    }

    impl HistogramAggregate {
        fn record(&mut self, value: u64) {
            if self.count == 0 {
                self.min = value;
                self.max = value;
            } else {
                self.min = self.min.min(value);
                self.max = self.max.max(value);
            }

            self.count = self.count.saturating_add(1);
            self.total = self.total.saturating_add(value);
        }

        fn snapshot(&self) -> HistogramSnapshot {
            let mean = if self.count == 0 {
                0.0
            } else {
                self.total as f64 / self.count as f64
            };

            HistogramSnapshot {
                count: self.count,
                total: self.total,
                min: self.min,
                max: self.max,
                mean,
            }
        }
    }

    #[derive(Default)]
    struct Store {
        counters: Mutex<BTreeMap<&'static str, u64>>,
        histograms: Mutex<BTreeMap<&'static str, HistogramAggregate>>,
    }

    fn store() -> &'static Store {
        static STORE: OnceLock<Store> = OnceLock::new();
        STORE.get_or_init(Store::default)
    }

    pub(super) fn increment_counter(name: &'static str, value: u64) {
        let mut counters = lock_unpoisoned(&store().counters);
        let entry = counters.entry(name).or_insert(0);
        *entry = entry.saturating_add(value);
    }

    pub(super) fn record_histogram(name: &'static str, value: u64) {
        let mut histograms = lock_unpoisoned(&store().histograms);
        histograms.entry(name).or_default().record(value);
    }

    pub(super) fn snapshot() -> TelemetrySnapshot {
        let counters = lock_unpoisoned(&store().counters)
            .iter()
            .map(|(name, value)| ((*name).to_owned(), *value))
            .collect();

        let histograms = lock_unpoisoned(&store().histograms)
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.snapshot()))
            .collect();

        TelemetrySnapshot {
            counters,
            histograms,
        }
    }

    pub(super) fn reset() {
        lock_unpoisoned(&store().counters).clear();
        lock_unpoisoned(&store().histograms).clear();
    }
}

#[cfg(all(test, not(feature = "telemetry")))]
mod tests {
    use super::*;

    #[test]
    fn recording_is_a_no_op_without_the_feature() {
        increment_counter(tags::METRIC_READER_FRAME_COUNT, 3);
        record_histogram(tags::METRIC_MERGE_BLOCK_BYTES, 1024);
        assert_eq!(snapshot(), TelemetrySnapshot::default());
    }
}
