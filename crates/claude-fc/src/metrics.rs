use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cumulative bookkeeping across every backend call made on behalf of a caller.
///
/// The accumulator is owned by the caller and lent to each turn, so two
/// conversations never share latencies unless the caller merges them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Seconds spent waiting on each completion, oldest first
    pub response_times: Vec<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_response_time(&mut self, elapsed: Duration) -> f64 {
        let seconds = elapsed.as_secs_f64();
        self.response_times.push(seconds);
        seconds
    }

    /// Append another accumulator's history after ours
    pub fn merge(&mut self, other: Metrics) {
        self.response_times.extend(other.response_times);
    }

    pub fn total_response_time(&self) -> f64 {
        self.response_times.iter().sum()
    }

    pub fn calls(&self) -> usize {
        self.response_times.len()
    }
}
