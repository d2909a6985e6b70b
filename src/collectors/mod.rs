/// CPU frequency collector sampling one thread per physical core
pub mod cpufreq_collector;

/// Timer driven scheduler invoking every registered collector
pub mod manager;

pub use cpufreq_collector::CpuFreqCollector;
pub use manager::CollectorManager;

use crate::error::CollectorError;
use crate::queue::OutputQueue;
use std::time::Duration;

/// Lifecycle state of a collector instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Uninitialized,
    Initialized,
    Closed,
}

/// Outcome counters of a single read cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Points accepted by the output queue
    pub points_emitted: u64,
    /// Samples that failed to read or parse and were skipped
    pub sample_failures: u64,
    /// Points that failed construction or were rejected by the queue
    pub points_dropped: u64,
}

/// A metric source with an explicit `init -> read* -> close` lifecycle
///
/// Implementations must make `init` idempotent and must turn `read` into a
/// silent no-op when not initialized. Calls on one instance are never
/// concurrent; the scheduler serializes them.
pub trait Collector: Send {
    /// Stable collector name, also used as the `source` meta entry
    fn name(&self) -> &str;

    /// Parse configuration and prepare for sampling
    ///
    /// `config` is a JSON object; `Value::Null` selects all defaults.
    fn init(&mut self, config: &serde_json::Value) -> Result<(), CollectorError>;

    /// Sample once and push the resulting points onto `output`
    fn read(&mut self, interval: Duration, output: &OutputQueue) -> ReadStats;

    /// Stop sampling; subsequent reads become no-ops until the next `init`
    fn close(&mut self);

    fn state(&self) -> CollectorState;

    /// Whether `read` may run concurrently with other collectors' reads
    fn is_parallel(&self) -> bool {
        false
    }

    /// Metric names the dispatch layer must not forward
    fn excluded_metrics(&self) -> &[String] {
        &[]
    }
}
