use crate::checksum::PacketOutcome;
use std::collections::VecDeque;

/// Rolling window of recent packet outcomes.
///
/// Only the reader worker touches it, so there is no locking.
#[derive(Debug, Clone)]
pub struct FailureRateMonitor {
    window: VecDeque<PacketOutcome>,
    capacity: usize,
    failures: usize,
}

impl FailureRateMonitor {
    /// Creates an empty window. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        FailureRateMonitor {
            window: VecDeque::with_capacity(capacity),
            capacity,
            failures: 0,
        }
    }

    /// Pushes an outcome, evicting the oldest one once the window is full.
    pub fn record(&mut self, outcome: PacketOutcome) {
        if self.window.len() == self.capacity {
            if let Some(PacketOutcome::Fail) = self.window.pop_front() {
                self.failures -= 1;
            }
        }
        if outcome == PacketOutcome::Fail {
            self.failures += 1;
        }
        self.window.push_back(outcome);
    }

    /// Failure percentage over the current window, 0 when nothing was recorded.
    pub fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        100.0 * self.failures as f64 / self.window.len() as f64
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
