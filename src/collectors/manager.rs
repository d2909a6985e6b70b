use crate::collectors::{Collector, ReadStats};
use crate::config::ManagerConfig;
use crate::error::CollectorError;
use crate::monitoring::PipelineMonitor;
use crate::queue::OutputQueue;
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type SharedCollector = Arc<Mutex<Box<dyn Collector>>>;

/// Longest uninterrupted sleep, so `stop` stays responsive
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Runs registered collectors on a fixed interval
///
/// Parallel-safe collectors each get their own thread. All other collectors
/// share one thread and are read one after another. Every collector sits
/// behind its own mutex, so two reads of the same instance never overlap.
pub struct CollectorManager {
    /// Scheduling settings
    config: ManagerConfig,
    /// Successfully initialized collectors
    collectors: Vec<SharedCollector>,
    /// Counters shared with the dispatcher
    monitor: Arc<PipelineMonitor>,
    /// Shared flag controlling the collector threads
    running: Arc<Mutex<bool>>,
    /// Handles of the collector threads
    thread_handles: Vec<JoinHandle<()>>,
}

impl CollectorManager {
    pub fn new(config: ManagerConfig, monitor: Arc<PipelineMonitor>) -> Self {
        Self {
            config,
            collectors: Vec::new(),
            monitor,
            running: Arc::new(Mutex::new(false)),
            thread_handles: Vec::new(),
        }
    }

    /// Initialize a collector and schedule it if that succeeds
    ///
    /// # Errors
    ///
    /// Returns the collector's init error; the collector is then dropped
    /// and never read.
    pub fn register(
        &mut self,
        mut collector: Box<dyn Collector>,
        config: &serde_json::Value,
    ) -> Result<(), CollectorError> {
        if let Err(e) = collector.init(config) {
            error!("Failed to initialize {}: {}", collector.name(), e);
            return Err(e);
        }
        info!(
            "Registered {} (parallel: {})",
            collector.name(),
            collector.is_parallel()
        );
        self.collectors.push(Arc::new(Mutex::new(collector)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Union of every registered collector's exclude_metrics list
    pub fn excluded_metrics(&self) -> BTreeSet<String> {
        self.collectors
            .iter()
            .flat_map(|c| {
                let collector = c.lock().unwrap_or_else(PoisonError::into_inner);
                collector.excluded_metrics().to_vec()
            })
            .collect()
    }

    /// Read every collector once on the calling thread
    pub fn read_all(&self, output: &OutputQueue) {
        for collector in &self.collectors {
            read_one(collector, self.config.interval(), output, &self.monitor);
        }
    }

    /// Start the collector threads
    ///
    /// Calling `start` on a running manager is a no-op.
    pub fn start(&mut self, output: OutputQueue) {
        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if *running {
                info!("CollectorManager already running, skipping start");
                return;
            }
            *running = true;
        }

        self.monitor.watch_queue(&output);
        let interval = self.config.interval();
        let (parallel, serial): (Vec<_>, Vec<_>) = self.collectors.iter().cloned().partition(|c| {
            c.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_parallel()
        });

        let mut groups: Vec<Vec<SharedCollector>> = parallel.into_iter().map(|c| vec![c]).collect();
        if !serial.is_empty() {
            groups.push(serial);
        }

        for group in groups {
            let output = output.clone();
            let running = Arc::clone(&self.running);
            let monitor = Arc::clone(&self.monitor);
            debug!("Spawning collector thread for {} collectors", group.len());
            self.thread_handles.push(thread::spawn(move || {
                collector_thread(group, interval, output, running, monitor);
            }));
        }

        info!(
            "CollectorManager started {} threads with interval {:?}",
            self.thread_handles.len(),
            interval
        );
    }

    /// Stop the collector threads and close every collector
    ///
    /// A read blocked on a full queue under the `Block` policy only returns
    /// once the queue is drained or closed, so keep the consumer running
    /// (or close the queue) while stopping.
    pub fn stop(&mut self) {
        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            *running = false;
        }

        for handle in self.thread_handles.drain(..) {
            if handle.join().is_err() {
                error!("Failed to join collector thread");
            }
        }

        for collector in &self.collectors {
            collector
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .close();
        }
        debug!("CollectorManager stopped");
    }

    pub fn is_running(&self) -> bool {
        is_running(&self.running)
    }
}

impl Drop for CollectorManager {
    fn drop(&mut self) {
        if !self.thread_handles.is_empty() {
            self.stop();
        }
    }
}

fn is_running(running: &Mutex<bool>) -> bool {
    *running.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_one(
    collector: &SharedCollector,
    interval: Duration,
    output: &OutputQueue,
    monitor: &PipelineMonitor,
) -> ReadStats {
    let mut collector = collector.lock().unwrap_or_else(PoisonError::into_inner);
    let stats = collector.read(interval, output);
    if stats.sample_failures > 0 || stats.points_dropped > 0 {
        warn!(
            "{} lost points this interval: {} sample failures, {} dropped",
            collector.name(),
            stats.sample_failures,
            stats.points_dropped
        );
    }
    monitor.record_read(collector.name(), &stats);
    stats
}

fn collector_thread(
    group: Vec<SharedCollector>,
    interval: Duration,
    output: OutputQueue,
    running: Arc<Mutex<bool>>,
    monitor: Arc<PipelineMonitor>,
) {
    while is_running(&running) {
        let tick = Instant::now();
        for collector in &group {
            read_one(collector, interval, &output, &monitor);
        }

        let deadline = tick + interval;
        while is_running(&running) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::CollectorState;
    use crate::metric::{Labels, MetricPoint};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Collector emitting one point per read and tracking overlapping reads
    struct CountingCollector {
        name: String,
        parallel: bool,
        fail_init: bool,
        state: CollectorState,
        reads: Arc<AtomicUsize>,
        in_read: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        exclude: Vec<String>,
    }

    impl CountingCollector {
        fn new(name: &str, parallel: bool) -> Self {
            Self {
                name: name.to_string(),
                parallel,
                fail_init: false,
                state: CollectorState::Uninitialized,
                reads: Arc::new(AtomicUsize::new(0)),
                in_read: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
                exclude: Vec::new(),
            }
        }
    }

    impl Collector for CountingCollector {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&mut self, config: &serde_json::Value) -> Result<(), CollectorError> {
            if self.fail_init {
                return Err(CollectorError::Discovery("nothing here".to_string()));
            }
            if let Some(list) = config.get("exclude_metrics").and_then(|v| v.as_array()) {
                self.exclude = list
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            }
            self.state = CollectorState::Initialized;
            Ok(())
        }

        fn read(&mut self, _interval: Duration, output: &OutputQueue) -> ReadStats {
            if self.state != CollectorState::Initialized {
                return ReadStats::default();
            }
            if self.in_read.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            let point =
                MetricPoint::with_value(&self.name, Labels::new(), Labels::new(), 1i64, Utc::now())
                    .unwrap();
            let emitted = u64::from(output.push(point).is_ok());
            self.in_read.store(false, Ordering::SeqCst);
            ReadStats {
                points_emitted: emitted,
                ..ReadStats::default()
            }
        }

        fn close(&mut self) {
            self.state = CollectorState::Closed;
        }

        fn state(&self) -> CollectorState {
            self.state
        }

        fn is_parallel(&self) -> bool {
            self.parallel
        }

        fn excluded_metrics(&self) -> &[String] {
            &self.exclude
        }
    }

    fn manager(interval_ms: u64) -> (CollectorManager, Arc<PipelineMonitor>) {
        let monitor = Arc::new(PipelineMonitor::new());
        (
            CollectorManager::new(ManagerConfig { interval_ms }, Arc::clone(&monitor)),
            monitor,
        )
    }

    #[test]
    fn test_failed_init_is_not_scheduled() {
        let (mut manager, _) = manager(10);
        let mut collector = CountingCollector::new("broken", true);
        collector.fail_init = true;

        assert!(manager
            .register(Box::new(collector), &serde_json::Value::Null)
            .is_err());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_read_all_records_stats() {
        let (mut manager, monitor) = manager(10);
        manager
            .register(
                Box::new(CountingCollector::new("a", true)),
                &serde_json::Value::Null,
            )
            .unwrap();
        manager
            .register(
                Box::new(CountingCollector::new("b", false)),
                &serde_json::Value::Null,
            )
            .unwrap();

        let queue = OutputQueue::default();
        manager.read_all(&queue);
        manager.read_all(&queue);

        assert_eq!(queue.len(), 4);
        let metrics = monitor.collect_metrics();
        assert_eq!(metrics.collectors["a"].reads, 2);
        assert_eq!(metrics.collectors["b"].points_emitted, 2);
    }

    #[test]
    fn test_excluded_metrics_union() {
        let (mut manager, _) = manager(10);
        manager
            .register(
                Box::new(CountingCollector::new("a", true)),
                &json!({"exclude_metrics": ["x", "y"]}),
            )
            .unwrap();
        manager
            .register(
                Box::new(CountingCollector::new("b", true)),
                &json!({"exclude_metrics": ["y", "z"]}),
            )
            .unwrap();

        let excluded: Vec<String> = manager.excluded_metrics().into_iter().collect();
        assert_eq!(excluded, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_start_stop_runs_and_closes_collectors() {
        let (mut manager, _) = manager(5);
        let parallel = CountingCollector::new("parallel", true);
        let serial_a = CountingCollector::new("serial_a", false);
        let serial_b = CountingCollector::new("serial_b", false);
        let reads = [
            Arc::clone(&parallel.reads),
            Arc::clone(&serial_a.reads),
            Arc::clone(&serial_b.reads),
        ];
        let overlapped = Arc::clone(&parallel.overlapped);

        for collector in [parallel, serial_a, serial_b] {
            manager
                .register(Box::new(collector), &serde_json::Value::Null)
                .unwrap();
        }

        let queue = OutputQueue::default();
        manager.start(queue.clone());
        manager.start(queue.clone());
        assert!(manager.is_running());
        thread::sleep(Duration::from_millis(100));
        manager.stop();
        assert!(!manager.is_running());

        for count in &reads {
            assert!(count.load(Ordering::SeqCst) >= 1);
        }
        assert!(!overlapped.load(Ordering::SeqCst));
        for collector in &manager.collectors {
            assert_eq!(collector.lock().unwrap().state(), CollectorState::Closed);
        }

        // Nothing is read after stop
        let total: usize = reads.iter().map(|r| r.load(Ordering::SeqCst)).sum();
        thread::sleep(Duration::from_millis(30));
        let after: usize = reads.iter().map(|r| r.load(Ordering::SeqCst)).sum();
        assert_eq!(total, after);
    }

    #[test]
    fn test_started_manager_reports_queue_evictions() {
        use crate::config::{OverflowPolicy, QueueConfig};

        let (mut manager, monitor) = manager(1);
        manager
            .register(
                Box::new(CountingCollector::new("a", true)),
                &serde_json::Value::Null,
            )
            .unwrap();

        let queue = OutputQueue::new(QueueConfig {
            capacity: 1,
            overflow_policy: OverflowPolicy::DropOldest,
        });
        manager.start(queue.clone());
        thread::sleep(Duration::from_millis(50));
        manager.stop();

        let metrics = monitor.collect_metrics();
        assert!(metrics.queue_evicted_points >= 1);
        assert_eq!(metrics.queue_evicted_points, queue.evicted_points());
        assert_eq!(metrics.total_points_dropped(), queue.evicted_points());
    }
}
