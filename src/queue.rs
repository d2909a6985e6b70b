//! Bounded multi-producer / multi-consumer queue of metric points
//!
//! Collectors push, the dispatch loop pops. What happens on a full queue is
//! decided by the configured `OverflowPolicy`; every point discarded by the
//! policy is counted and visible through `dropped_points()`.

use crate::config::{OverflowPolicy, QueueConfig};
use crate::error::QueueError;
use crate::metric::MetricPoint;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct QueueState {
    items: VecDeque<MetricPoint>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

/// Cloneable handle to a shared bounded point queue
#[derive(Debug, Clone)]
pub struct OutputQueue {
    shared: Arc<Shared>,
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl OutputQueue {
    /// Create a queue from its configuration; a capacity of 0 is raised to 1
    pub fn new(config: QueueConfig) -> Self {
        let capacity = config.capacity.max(1);
        debug!(
            "Creating output queue with capacity {} and overflow policy {:?}",
            capacity, config.overflow_policy
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
                policy: config.overflow_policy,
                dropped: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a point, applying the overflow policy when the queue is full
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Full` when the point was discarded under
    /// `DropNewest`, and `QueueError::Closed` once the queue is closed.
    pub fn push(&self, point: MetricPoint) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }

        if state.items.len() >= self.shared.capacity {
            match self.shared.policy {
                OverflowPolicy::Block => {
                    while state.items.len() >= self.shared.capacity && !state.closed {
                        state = self
                            .shared
                            .not_full
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    if state.closed {
                        return Err(QueueError::Closed);
                    }
                }
                OverflowPolicy::DropNewest => {
                    self.record_drop();
                    return Err(QueueError::Full);
                }
                OverflowPolicy::DropOldest => {
                    state.items.pop_front();
                    self.shared.evicted.fetch_add(1, Ordering::Relaxed);
                    self.record_drop();
                }
            }
        }

        state.items.push_back(point);
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    fn record_drop(&self) {
        let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if total.is_power_of_two() {
            warn!("Output queue full, {} points dropped so far", total);
        }
    }

    /// Wait for the next point
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub fn pop(&self) -> Option<MetricPoint> {
        let mut state = self.lock();
        loop {
            if let Some(point) = state.items.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Some(point);
            }
            if state.closed {
                return None;
            }
            state = self
                .shared
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait at most `timeout` for the next point
    ///
    /// Returns `Err(QueueError::Closed)` once the queue is closed and
    /// drained, and `Ok(None)` if the timeout elapsed first. A timeout too
    /// large to represent as a deadline waits without limit.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<MetricPoint>, QueueError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.pop().map(Some).ok_or(QueueError::Closed);
        };
        let mut state = self.lock();
        loop {
            if let Some(point) = state.items.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Ok(Some(point));
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .shared
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take the next point without waiting
    pub fn try_pop(&self) -> Option<MetricPoint> {
        let point = self.lock().items.pop_front();
        if point.is_some() {
            self.shared.not_full.notify_one();
        }
        point
    }

    /// Close the queue; queued points can still be drained
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            debug!("Closing output queue with {} points pending", state.items.len());
            state.closed = true;
        }
        drop(state);
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.shared.policy
    }

    /// Total number of points discarded by the overflow policy
    pub fn dropped_points(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Queued points evicted under `DropOldest`
    ///
    /// Unlike `DropNewest` rejections these are invisible to the producer,
    /// whose push still succeeds.
    pub fn evicted_points(&self) -> u64 {
        self.shared.evicted.load(Ordering::Relaxed)
    }
}
