//! Self-monitoring counters for the collection pipeline
//!
//! Tracks how many points each collector emitted or lost and how each sink
//! is doing, so failures that are deliberately non-fatal stay visible.

use crate::collectors::ReadStats;
use crate::queue::OutputQueue;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Cumulative counters for one collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorCounters {
    /// Number of read cycles performed
    pub reads: u64,
    /// Points accepted by the output queue
    pub points_emitted: u64,
    /// Per-processor samples that could not be read or parsed
    pub sample_failures: u64,
    /// Points that were built but never reached the queue
    pub points_dropped: u64,
}

/// Cumulative counters for one sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkCounters {
    pub points_written: u64,
    pub write_failures: u64,
    pub flush_failures: u64,
}

/// Point-in-time copy of all pipeline counters
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub collectors: BTreeMap<String, CollectorCounters>,
    pub sinks: BTreeMap<String, SinkCounters>,
    /// Points suppressed by exclude_metrics before reaching any sink
    pub excluded_points: u64,
    /// Points evicted from the watched queue under `DropOldest`
    pub queue_evicted_points: u64,
    pub timestamp: DateTime<Utc>,
}

impl PipelineMetrics {
    /// Points lost between collectors and the dispatcher
    ///
    /// Covers points each collector saw rejected plus queued points evicted
    /// later, which no collector can observe.
    pub fn total_points_dropped(&self) -> u64 {
        self.collectors
            .values()
            .map(|c| c.points_dropped)
            .sum::<u64>()
            + self.queue_evicted_points
    }
}

/// Thread-safe counter registry shared by the manager and the dispatcher
#[derive(Debug, Default)]
pub struct PipelineMonitor {
    collectors: Mutex<BTreeMap<String, CollectorCounters>>,
    sinks: Mutex<BTreeMap<String, SinkCounters>>,
    excluded_points: AtomicU64,
    queue: Mutex<Option<OutputQueue>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one collector read cycle
    pub fn record_read(&self, collector: &str, stats: &ReadStats) {
        let mut collectors = lock(&self.collectors);
        let counters = collectors.entry(collector.to_string()).or_default();
        counters.reads += 1;
        counters.points_emitted += stats.points_emitted;
        counters.sample_failures += stats.sample_failures;
        counters.points_dropped += stats.points_dropped;
    }

    /// Record the result of one sink write
    pub fn record_sink_write(&self, sink: &str, success: bool) {
        let mut sinks = lock(&self.sinks);
        let counters = sinks.entry(sink.to_string()).or_default();
        if success {
            counters.points_written += 1;
        } else {
            counters.write_failures += 1;
        }
    }

    pub fn record_sink_flush_failure(&self, sink: &str) {
        lock(&self.sinks)
            .entry(sink.to_string())
            .or_default()
            .flush_failures += 1;
    }

    /// Include the queue's evictions in subsequent snapshots
    pub fn watch_queue(&self, queue: &OutputQueue) {
        *lock(&self.queue) = Some(queue.clone());
    }

    pub fn record_excluded_point(&self) {
        self.excluded_points.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters
    pub fn collect_metrics(&self) -> PipelineMetrics {
        debug!("Collecting pipeline self-monitoring metrics");
        PipelineMetrics {
            collectors: lock(&self.collectors).clone(),
            sinks: lock(&self.sinks).clone(),
            excluded_points: self.excluded_points.load(Ordering::Relaxed),
            queue_evicted_points: lock(&self.queue)
                .as_ref()
                .map_or(0, OutputQueue::evicted_points),
            timestamp: Utc::now(),
        }
    }
}
