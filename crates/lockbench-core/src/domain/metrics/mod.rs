//! Aggregate counters for throughput, deadlocks and waiting
//!
//! This module provides:
//! - Task completion and deadlock counts
//! - The completed-task snapshot used by the stall test
//! - Current and cumulative waiting time across the population
//! - Completion rate as a percentage of the population

use serde::{Deserialize, Serialize};

use crate::domain::process::Process;

/// Point-in-time copy of the aggregate counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tasks_completed: u64,
    pub deadlocks_detected: u64,
    pub timeouts: u64,
    pub forced_releases: u64,
    pub total_wait_time: u64,
    pub average_wait_time: f64,
    pub cumulative_wait_time: u64,
    pub completion_rate: f64,
}

/// Running aggregate over the whole simulation
#[derive(Debug, Clone)]
pub struct Metrics {
    population: usize,
    tasks_completed: u64,
    deadlocks_detected: u64,
    last_tasks_completed: u64,
    timeouts: u64,
    forced_releases: u64,
    total_wait_time: u64,
    cumulative_wait_time: u64,
}

impl Metrics {
    /// Create empty counters for a population of `population` processes
    pub fn new(population: usize) -> Self {
        Self {
            population,
            tasks_completed: 0,
            deadlocks_detected: 0,
            last_tasks_completed: 0,
            timeouts: 0,
            forced_releases: 0,
            total_wait_time: 0,
            cumulative_wait_time: 0,
        }
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    pub fn deadlocks_detected(&self) -> u64 {
        self.deadlocks_detected
    }

    /// Completed-task count at the previous detector check
    pub fn last_tasks_completed(&self) -> u64 {
        self.last_tasks_completed
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn forced_releases(&self) -> u64 {
        self.forced_releases
    }

    /// Sum of current waiting times
    pub fn total_wait_time(&self) -> u64 {
        self.total_wait_time
    }

    /// Current waiting time averaged over the population
    pub fn average_wait_time(&self) -> f64 {
        if self.population == 0 {
            return 0.0;
        }
        self.total_wait_time as f64 / self.population as f64
    }

    /// Sum of all waiting ever accumulated, including surrendered attempts
    pub fn cumulative_wait_time(&self) -> u64 {
        self.cumulative_wait_time
    }

    /// Completed tasks as a percentage of the population
    ///
    /// Exceeds 100 under a continuous workload once processes start repeat
    /// tasks.
    pub fn completion_rate(&self) -> f64 {
        if self.population == 0 {
            return 0.0;
        }
        self.tasks_completed as f64 / self.population as f64 * 100.0
    }

    pub fn record_completion(&mut self) {
        self.tasks_completed += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_deadlock(&mut self) {
        self.deadlocks_detected += 1;
    }

    pub fn record_forced_releases(&mut self, units: usize) {
        self.forced_releases += units as u64;
    }

    /// Whether no task completed since the previous check
    pub fn is_stalled(&self) -> bool {
        self.tasks_completed == self.last_tasks_completed
    }

    /// Remember the current completed-task count for the next stall test
    pub fn mark_checked(&mut self) {
        self.last_tasks_completed = self.tasks_completed;
    }

    /// Recompute waiting totals from the process arena
    pub fn refresh_wait(&mut self, processes: &[Process]) {
        self.total_wait_time = processes.iter().map(Process::waiting_time).sum();
        self.cumulative_wait_time = processes.iter().map(Process::total_waited).sum();
    }

    /// Copy the counters out for display
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_completed: self.tasks_completed,
            deadlocks_detected: self.deadlocks_detected,
            timeouts: self.timeouts,
            forced_releases: self.forced_releases,
            total_wait_time: self.total_wait_time,
            average_wait_time: self.average_wait_time(),
            cumulative_wait_time: self.cumulative_wait_time,
            completion_rate: self.completion_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_rate() {
        let mut metrics = Metrics::new(4);
        assert_eq!(metrics.completion_rate(), 0.0);

        metrics.record_completion();
        assert_eq!(metrics.completion_rate(), 25.0);

        for _ in 0..7 {
            metrics.record_completion();
        }
        assert_eq!(metrics.completion_rate(), 200.0);
    }

    #[test]
    fn test_stall_tracking() {
        let mut metrics = Metrics::new(2);
        assert!(metrics.is_stalled());

        metrics.record_completion();
        assert!(!metrics.is_stalled());

        metrics.mark_checked();
        assert!(metrics.is_stalled());
        assert_eq!(metrics.last_tasks_completed(), 1);
    }

    #[test]
    fn test_wait_averages_over_population() {
        use crate::domain::locking::ProcessId;

        let mut metrics = Metrics::new(3);
        let processes: Vec<Process> = (0..3).map(|i| Process::new(ProcessId(i))).collect();
        metrics.refresh_wait(&processes);
        assert_eq!(metrics.total_wait_time(), 0);
        assert_eq!(metrics.average_wait_time(), 0.0);
    }

    #[test]
    fn test_snapshot_copies_counters() {
        let mut metrics = Metrics::new(2);
        metrics.record_completion();
        metrics.record_deadlock();
        metrics.record_timeout();
        metrics.record_forced_releases(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_completed, 1);
        assert_eq!(snap.deadlocks_detected, 1);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.forced_releases, 3);
        assert_eq!(snap.completion_rate, 50.0);
    }

    #[test]
    fn test_empty_population_is_safe() {
        let metrics = Metrics::new(0);
        assert_eq!(metrics.completion_rate(), 0.0);
        assert_eq!(metrics.average_wait_time(), 0.0);
    }
}
