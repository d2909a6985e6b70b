//! Dispatch loop forwarding queued points to every registered sink
//!
//! Sinks fail independently: a write error is logged with the sink name,
//! counted, and the point still goes to the remaining sinks.

use crate::error::QueueError;
use crate::metric::MetricPoint;
use crate::monitoring::PipelineMonitor;
use crate::queue::OutputQueue;
use crate::sinks::Sink;
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shortest accepted interval between two timed flushes
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Fans points out to a heterogeneous set of sinks
pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
    excluded_metrics: BTreeSet<String>,
    monitor: Arc<PipelineMonitor>,
}

impl Dispatcher {
    pub fn new(monitor: Arc<PipelineMonitor>) -> Self {
        Self {
            sinks: Vec::new(),
            excluded_metrics: BTreeSet::new(),
            monitor,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        info!("Registered sink '{}'", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Metric names that are never forwarded to any sink
    pub fn set_excluded_metrics(&mut self, names: impl IntoIterator<Item = String>) {
        self.excluded_metrics = names.into_iter().collect();
        if !self.excluded_metrics.is_empty() {
            debug!("Excluding metrics: {:?}", self.excluded_metrics);
        }
    }

    /// Forward one point to every sink
    ///
    /// Returns the number of sinks that accepted the point.
    pub fn dispatch(&mut self, point: &MetricPoint) -> usize {
        if self.excluded_metrics.contains(point.name()) {
            self.monitor.record_excluded_point();
            return 0;
        }

        let mut accepted = 0;
        for sink in &mut self.sinks {
            match sink.write(point) {
                Ok(()) => {
                    accepted += 1;
                    self.monitor.record_sink_write(sink.name(), true);
                }
                Err(e) => {
                    error!(
                        "Sink '{}' failed to write '{}': {}",
                        sink.name(),
                        point.name(),
                        e
                    );
                    self.monitor.record_sink_write(sink.name(), false);
                }
            }
        }
        accepted
    }

    /// Flush every sink, logging failures per sink
    pub fn flush_all(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                warn!("Sink '{}' failed to flush: {}", sink.name(), e);
                self.monitor.record_sink_flush_failure(sink.name());
            }
        }
    }

    pub fn close_all(&mut self) {
        for sink in &mut self.sinks {
            sink.close();
        }
    }

    /// Drain `queue` until it is closed and empty
    ///
    /// Sinks are flushed every `flush_interval` (at least
    /// `MIN_FLUSH_INTERVAL`) and once more at the end, then closed.
    pub fn run(&mut self, queue: &OutputQueue, flush_interval: Duration) {
        let flush_interval = flush_interval.max(MIN_FLUSH_INTERVAL);
        info!(
            "Dispatcher running with {} sinks, flush interval {:?}",
            self.sinks.len(),
            flush_interval
        );

        let mut last_flush = Instant::now();
        loop {
            let wait = flush_interval.saturating_sub(last_flush.elapsed());
            match queue.pop_timeout(wait) {
                Ok(Some(point)) => {
                    self.dispatch(&point);
                }
                Ok(None) => {}
                Err(QueueError::Closed) => break,
                Err(e) => {
                    error!("Dispatcher stopped on queue error: {}", e);
                    break;
                }
            }

            if last_flush.elapsed() >= flush_interval {
                self.flush_all();
                last_flush = Instant::now();
            }
        }

        self.flush_all();
        self.close_all();
        info!("Dispatcher stopped");
    }

    /// Run the dispatch loop on a background thread
    pub fn spawn(mut self, queue: OutputQueue, flush_interval: Duration) -> JoinHandle<()> {
        thread::spawn(move || self.run(&queue, flush_interval))
    }
}
