use crate::collectors::{Collector, CollectorState, ReadStats};
use crate::config::{parse_collector_config, CpuFreqConfig};
use crate::error::CollectorError;
use crate::metric::{Labels, MetricPoint};
use crate::queue::OutputQueue;
use crate::topology::{parse_attribute, CpuTopology, ProcessorTopologyEntry, TopologyBuilder};
use chrono::Utc;
use log::{debug, error, info};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the emitted metric
pub const CPUFREQ_METRIC: &str = "cpufreq";

const COLLECTOR_NAME: &str = "CpuFreqCollector";

/// Current CPU frequency collector
///
/// Discovers the processor topology once during `init` and then samples
/// `scaling_cur_freq` of every primary hardware thread on each read. Hyper-thread
/// siblings share a frequency domain with their primary thread and are
/// skipped. The kernel reports kHz; points carry Hz.
#[derive(Debug)]
pub struct CpuFreqCollector {
    /// Discovers the topology on first init
    builder: TopologyBuilder,
    /// Lifecycle state
    state: CollectorState,
    /// Topology snapshot, kept across close so a later init can reuse it
    topology: Option<CpuTopology>,
    /// Parsed collector configuration
    config: CpuFreqConfig,
    /// Constant meta attached to every point
    meta: Labels,
}

impl Default for CpuFreqCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuFreqCollector {
    /// Create a collector reading from `/sys/devices/system/cpu`
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use hwmetrics::collectors::{Collector, CpuFreqCollector};
    /// use hwmetrics::queue::OutputQueue;
    /// use std::time::Duration;
    ///
    /// let queue = OutputQueue::default();
    /// let mut collector = CpuFreqCollector::new();
    /// collector.init(&serde_json::Value::Null)?;
    /// collector.read(Duration::from_secs(10), &queue);
    /// # Ok::<(), hwmetrics::CollectorError>(())
    /// ```
    pub fn new() -> Self {
        Self::with_builder(TopologyBuilder::default())
    }

    /// Create a collector reading from a different device tree root
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::with_builder(TopologyBuilder::new(root))
    }

    fn with_builder(builder: TopologyBuilder) -> Self {
        Self {
            builder,
            state: CollectorState::Uninitialized,
            topology: None,
            config: CpuFreqConfig::default(),
            meta: Labels::new(),
        }
    }

    /// Topology discovered by the last successful init
    pub fn topology(&self) -> Option<&CpuTopology> {
        self.topology.as_ref()
    }

    pub fn config(&self) -> &CpuFreqConfig {
        &self.config
    }

    /// Read the live frequency of one processor in Hz
    fn sample(entry: &ProcessorTopologyEntry) -> Result<i64, CollectorError> {
        let khz = parse_attribute(&entry.sample_path)
            .map_err(|reason| CollectorError::sample_read(&entry.sample_path, reason))?;
        khz.checked_mul(1000).ok_or_else(|| {
            CollectorError::sample_read(
                &entry.sample_path,
                format!("frequency {} kHz overflows when converted to Hz", khz),
            )
        })
    }
}

impl Collector for CpuFreqCollector {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn init(&mut self, config: &serde_json::Value) -> Result<(), CollectorError> {
        if self.state == CollectorState::Initialized {
            debug!("{} already initialized, skipping init", COLLECTOR_NAME);
            return Ok(());
        }

        let config: CpuFreqConfig = parse_collector_config(config)?;

        let topology = match self.topology.take() {
            Some(topology) => {
                debug!("{} reusing topology from previous init", COLLECTOR_NAME);
                topology
            }
            None => self.builder.build()?,
        };

        info!(
            "{} initialized: {} physical packages, {} CPUs, {} non-hyper-threading CPUs",
            COLLECTOR_NAME,
            topology.num_physical_packages(),
            topology.len(),
            topology.num_non_hyper_thread_processors()
        );

        self.meta = [
            ("source", COLLECTOR_NAME),
            ("group", "CPU"),
            ("unit", "Hz"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        self.config = config;
        self.topology = Some(topology);
        self.state = CollectorState::Initialized;
        Ok(())
    }

    fn read(&mut self, _interval: Duration, output: &OutputQueue) -> ReadStats {
        let mut stats = ReadStats::default();
        if self.state != CollectorState::Initialized {
            return stats;
        }
        let Some(topology) = self.topology.as_ref() else {
            return stats;
        };

        let now = Utc::now();
        for entry in topology.primary_threads() {
            let value = match Self::sample(entry) {
                Ok(value) => value,
                Err(e) => {
                    error!("{} read(): {}", COLLECTOR_NAME, e);
                    stats.sample_failures += 1;
                    continue;
                }
            };

            let point = match MetricPoint::with_value(
                CPUFREQ_METRIC,
                entry.tags.clone(),
                self.meta.clone(),
                value,
                now,
            ) {
                Ok(point) => point,
                Err(e) => {
                    error!("{} read(): {}", COLLECTOR_NAME, CollectorError::from(e));
                    stats.points_dropped += 1;
                    continue;
                }
            };

            match output.push(point) {
                Ok(()) => stats.points_emitted += 1,
                Err(e) => {
                    debug!(
                        "{} read(): point for cpu{} not queued: {}",
                        COLLECTOR_NAME, entry.processor_id, e
                    );
                    stats.points_dropped += 1;
                }
            }
        }

        stats
    }

    fn close(&mut self) {
        if self.state == CollectorState::Initialized {
            debug!("{} closed", COLLECTOR_NAME);
            self.state = CollectorState::Closed;
        }
    }

    fn state(&self) -> CollectorState {
        self.state
    }

    fn is_parallel(&self) -> bool {
        true
    }

    fn excluded_metrics(&self) -> &[String] {
        &self.config.exclude_metrics
    }
}
