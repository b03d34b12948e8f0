use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};

use crate::telemetry::{self, lock_unpoisoned, tags};
use crate::{ReblobError, Result};

/// Handle to the result of one submitted item.
type Completion<O> = Receiver<Result<O>>;

struct Job<I, O> {
    seq: usize,
    input: I,
    done: Sender<Result<O>>,
}

/// Bounded out-of-order execution with in-order delivery.
///
/// Items handed to [`submit`](Self::submit) are processed by a fixed set of
/// worker threads in whatever order they get picked up. Every submission also
/// enqueues a completion handle; [`next`](Self::next) consumes those handles
/// strictly in submission order, so results come back in the order their
/// inputs went in even when later items finish first.
///
/// At most `capacity` completion handles may be waiting for a consumer. Once
/// that limit is reached, `submit` blocks until `next` catches up or the pool
/// is stopped.
///
/// The pool expects one submitting thread and one consuming thread. Both may
/// share it through an `Arc`.
pub struct OrderedPool<I, O> {
    stage: &'static str,
    num_workers: usize,
    capacity: usize,
    jobs_tx: Mutex<Option<Sender<Job<I, O>>>>,
    jobs_rx: Receiver<Job<I, O>>,
    pending_tx: Mutex<Option<Sender<Completion<O>>>>,
    pending_rx: Receiver<Completion<O>>,
    // Never sent on; dropping the sender wakes submitters blocked on backpressure.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    accepting: AtomicBool,
    counters: Arc<PoolCounters>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    discarded: AtomicUsize,
}

/// Task counters of an [`OrderedPool`] at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderedPoolSnapshot {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub discarded: usize,
}

impl<I, O> OrderedPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Spawns `num_workers` threads running `processor`.
    ///
    /// `stage` names the worker threads and labels log events.
    pub fn new<F>(
        stage: &'static str,
        num_workers: usize,
        capacity: usize,
        processor: F,
    ) -> Result<Self>
    where
        F: Fn(I) -> Result<O> + Send + Sync + 'static,
    {
        let num_workers = num_workers.max(1);
        let capacity = capacity.max(1);
        let (jobs_tx, jobs_rx) = unbounded();
        let (pending_tx, pending_rx) = bounded(capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let counters = Arc::new(PoolCounters::default());
        let processor = Arc::new(processor);

        let mut worker_handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let worker_jobs = jobs_rx.clone();
            let worker_processor = Arc::clone(&processor);
            let worker_counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("{stage}-{worker_id}"))
                .spawn(move || {
                    run_worker_loop(
                        stage,
                        worker_id,
                        worker_jobs,
                        worker_processor,
                        worker_counters,
                    );
                })
                .map_err(|err| {
                    ReblobError::from(err).with_context(format!("spawning {stage} worker"))
                })?;
            worker_handles.push(handle);
        }

        tracing::debug!(
            target: tags::TARGET_WORKER,
            stage,
            num_workers,
            capacity,
            "ordered pool started"
        );

        Ok(Self {
            stage,
            num_workers,
            capacity,
            jobs_tx: Mutex::new(Some(jobs_tx)),
            jobs_rx,
            pending_tx: Mutex::new(Some(pending_tx)),
            pending_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            accepting: AtomicBool::new(true),
            counters,
            worker_handles: Mutex::new(worker_handles),
        })
    }

    /// Queues `input` for processing.
    ///
    /// Blocks while `capacity` results are already waiting to be consumed.
    /// Fails with [`ReblobError::PoolStopped`] once [`stop`](Self::stop) has
    /// been called, including when the stop happens while blocked.
    pub fn submit(&self, input: I) -> Result<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ReblobError::PoolStopped);
        }
        let pending_tx = lock_unpoisoned(&self.pending_tx)
            .clone()
            .ok_or(ReblobError::PoolStopped)?;
        let jobs_tx = lock_unpoisoned(&self.jobs_tx)
            .clone()
            .ok_or(ReblobError::PoolStopped)?;

        let (done_tx, done_rx) = bounded(1);
        select! {
            send(pending_tx, done_rx) -> sent => sent.map_err(|_| ReblobError::PoolStopped)?,
            recv(self.shutdown_rx) -> _ => return Err(ReblobError::PoolStopped),
        }

        let seq = self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        jobs_tx
            .send(Job {
                seq,
                input,
                done: done_tx,
            })
            .map_err(|_| ReblobError::PoolStopped)
    }

    /// Returns the result of the oldest submission not yet returned.
    ///
    /// Blocks until that item has been processed. Items dropped by
    /// [`discard_pending`](Self::discard_pending) are skipped. Returns `None`
    /// once the pool is stopped and every remaining result has been handed out.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Option<Result<O>> {
        while let Ok(completion) = self.pending_rx.recv() {
            if let Ok(result) = completion.recv() {
                return Some(result);
            }
        }
        None
    }

    /// Stops accepting new work.
    ///
    /// Work already submitted is still processed and delivered by
    /// [`next`](Self::next).
    pub fn stop(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            tracing::debug!(target: tags::TARGET_WORKER, stage = self.stage, "ordered pool stopped");
        }
        lock_unpoisoned(&self.jobs_tx).take();
        lock_unpoisoned(&self.pending_tx).take();
        lock_unpoisoned(&self.shutdown_tx).take();
    }

    /// Drops every item that no worker has picked up yet.
    ///
    /// Items already being processed run to completion. Returns the number of
    /// discarded items.
    pub fn discard_pending(&self) -> usize {
        let mut discarded = 0usize;
        while let Ok(job) = self.jobs_rx.try_recv() {
            drop(job);
            discarded += 1;
        }
        if discarded > 0 {
            self.counters
                .discarded
                .fetch_add(discarded, Ordering::AcqRel);
            telemetry::increment_counter(
                tags::METRIC_WORKER_TASK_DISCARDED_COUNT,
                discarded as u64,
            );
            tracing::debug!(
                target: tags::TARGET_WORKER,
                stage = self.stage,
                discarded,
                "discarded pending work"
            );
        }
        discarded
    }

    /// Stops the pool and waits for all worker threads to exit.
    pub fn join(&self) -> Result<()> {
        self.stop();
        let handles: Vec<_> = lock_unpoisoned(&self.worker_handles).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                return Err(ReblobError::Other(anyhow::anyhow!(
                    "{} worker thread panicked",
                    self.stage
                )));
            }
        }
        Ok(())
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> OrderedPoolSnapshot {
        OrderedPoolSnapshot {
            submitted: self.counters.submitted.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
            discarded: self.counters.discarded.load(Ordering::Acquire),
        }
    }
}

impl<I, O> Drop for OrderedPool<I, O> {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::Release);
        lock_unpoisoned(&self.jobs_tx).take();
        lock_unpoisoned(&self.pending_tx).take();
        lock_unpoisoned(&self.shutdown_tx).take();
        while self.jobs_rx.try_recv().is_ok() {}
        for handle in lock_unpoisoned(&self.worker_handles).drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_worker_loop<I, O, F>(
    stage: &'static str,
    worker_id: usize,
    jobs: Receiver<Job<I, O>>,
    processor: Arc<F>,
    counters: Arc<PoolCounters>,
) where
    F: Fn(I) -> Result<O> + Send + Sync,
{
    for Job { seq, input, done } in jobs.iter() {
        let started_at = Instant::now();
        let result = match catch_unwind(AssertUnwindSafe(|| processor(input))) {
            Ok(result) => result,
            Err(_) => Err(ReblobError::Other(anyhow::anyhow!(
                "{stage} worker panicked while processing item {seq}"
            ))),
        };
        let elapsed_us = telemetry::elapsed_us(started_at);

        counters.completed.fetch_add(1, Ordering::AcqRel);
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_COUNT, 1);
        telemetry::record_histogram(tags::METRIC_WORKER_TASK_LATENCY_US, elapsed_us);
        if result.is_err() {
            counters.failed.fetch_add(1, Ordering::AcqRel);
            telemetry::increment_counter(tags::METRIC_WORKER_TASK_FAILED_COUNT, 1);
        }
        tracing::trace!(
            target: tags::TARGET_WORKER,
            stage,
            worker_id,
            seq,
            elapsed_us,
            ok = result.is_ok(),
            "task finished"
        );

        // The consumer may already have given up on this result.
        let _ = done.send(result);
    }
}
