/// Error types for the collection pipeline
pub mod error;

/// Metric point value type
pub mod metric;

/// CPU topology discovery
pub mod topology;

/// Typed configuration objects
pub mod config;

/// Bounded output queue between collectors and sinks
pub mod queue;

/// Metric collectors and their scheduler
pub mod collectors;

/// Sink contract and implementations
pub mod sinks;

/// Dispatch loop feeding sinks from the output queue
pub mod dispatch;

/// Pipeline self-monitoring counters
pub mod monitoring;

// Re-export commonly used types
pub use collectors::{Collector, CollectorManager, CpuFreqCollector};
pub use dispatch::Dispatcher;
pub use error::{CollectorError, MetricError, QueueError, SinkError};
pub use metric::MetricPoint;
pub use queue::OutputQueue;
pub use sinks::Sink;
