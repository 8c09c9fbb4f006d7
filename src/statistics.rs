// File: statistics.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::Serialize;
use std::time::{Duration, Instant};

/// Request/response counters of one scheduler. "Burst" figures cover the
/// current `run()` cycle, "total" figures everything since the last reset.
#[derive(Debug, Clone)]
pub struct Statistics {
    request_count: u64,
    response_count: u64,
    time_out_count: u64,
    total_response_time: Duration,
    burst_response_time: Duration,
    burst_response_count: u64,
    started: Option<Instant>,
    burst_started: Option<Instant>,
    max_concurrency: usize,
    original_max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub request_count: u64,
    pub response_count: u64,
    pub time_out_count: u64,
    pub total_responses_per_second: f64,
    pub burst_responses_per_second: f64,
    pub total_average_response_time: f64,
    pub burst_average_response_time: f64,
    pub burst_response_count: u64,
    pub burst_runtime: f64,
    pub max_concurrency: usize,
    pub original_max_concurrency: usize,
    pub queue_size: usize,
}

impl Statistics {
    pub fn new(max_concurrency: usize) -> Statistics {
        Statistics {
            request_count: 0,
            response_count: 0,
            time_out_count: 0,
            total_response_time: Duration::ZERO,
            burst_response_time: Duration::ZERO,
            burst_response_count: 0,
            started: None,
            burst_started: None,
            max_concurrency,
            original_max_concurrency: max_concurrency,
        }
    }

    pub fn add_request(&mut self) {
        self.request_count += 1;
    }

    pub fn add_response(&mut self, time: Duration, timed_out: bool) {
        self.response_count += 1;
        self.burst_response_count += 1;
        self.total_response_time += time;
        self.burst_response_time += time;
        if timed_out {
            self.time_out_count += 1;
        }
    }

    pub fn start_burst(&mut self) {
        let now = Instant::now();
        self.started.get_or_insert(now);
        self.burst_started = Some(now);
        self.burst_response_time = Duration::ZERO;
        self.burst_response_count = 0;
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn response_count(&self) -> u64 {
        self.response_count
    }

    pub fn time_out_count(&self) -> u64 {
        self.time_out_count
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn set_max_concurrency(&mut self, max_concurrency: usize) {
        self.max_concurrency = max_concurrency;
    }

    pub fn original_max_concurrency(&self) -> usize {
        self.original_max_concurrency
    }

    pub fn burst_runtime(&self) -> Duration {
        self.burst_started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn total_runtime(&self) -> Duration {
        self.started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn burst_average_response_time(&self) -> f64 {
        average(self.burst_response_time, self.burst_response_count)
    }

    pub fn total_average_response_time(&self) -> f64 {
        average(self.total_response_time, self.response_count)
    }

    pub fn burst_responses_per_second(&self) -> f64 {
        rate(self.burst_response_count, self.burst_runtime())
    }

    pub fn total_responses_per_second(&self) -> f64 {
        rate(self.response_count, self.total_runtime())
    }

    pub fn snapshot(&self, queue_size: usize) -> StatisticsSnapshot {
        StatisticsSnapshot {
            request_count: self.request_count,
            response_count: self.response_count,
            time_out_count: self.time_out_count,
            total_responses_per_second: self.total_responses_per_second(),
            burst_responses_per_second: self.burst_responses_per_second(),
            total_average_response_time: self.total_average_response_time(),
            burst_average_response_time: self.burst_average_response_time(),
            burst_response_count: self.burst_response_count,
            burst_runtime: self.burst_runtime().as_secs_f64(),
            max_concurrency: self.max_concurrency,
            original_max_concurrency: self.original_max_concurrency,
            queue_size,
        }
    }

    pub fn reset(&mut self) {
        *self = Statistics::new(self.original_max_concurrency);
    }
}

// Seconds, to match how the rates are reported.
fn average(sum: Duration, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    sum.as_secs_f64() / count as f64
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if count == 0 || seconds <= f64::EPSILON {
        return 0.0;
    }
    count as f64 / seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = Statistics::new(20);
        stats.add_request();
        stats.add_request();
        stats.start_burst();
        stats.add_response(Duration::from_millis(100), false);
        stats.add_response(Duration::from_millis(300), true);

        assert_eq!(stats.request_count(), 2);
        assert_eq!(stats.response_count(), 2);
        assert_eq!(stats.time_out_count(), 1);
        assert!((stats.total_average_response_time() - 0.2).abs() < 1e-9);
        assert!((stats.burst_average_response_time() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_burst_resets_between_runs() {
        let mut stats = Statistics::new(5);
        stats.start_burst();
        stats.add_response(Duration::from_millis(50), false);
        stats.start_burst();

        let snapshot = stats.snapshot(3);
        assert_eq!(snapshot.burst_response_count, 0);
        assert_eq!(snapshot.response_count, 1);
        assert_eq!(snapshot.burst_average_response_time, 0.0);
        assert_eq!(snapshot.queue_size, 3);
    }

    #[test]
    fn test_empty_rates_are_zero() {
        let stats = Statistics::new(1);
        assert_eq!(stats.total_responses_per_second(), 0.0);
        assert_eq!(stats.burst_responses_per_second(), 0.0);
        assert_eq!(stats.total_average_response_time(), 0.0);
    }

    #[test]
    fn test_reset_keeps_original_concurrency() {
        let mut stats = Statistics::new(20);
        stats.set_max_concurrency(4);
        stats.add_request();
        stats.reset();

        assert_eq!(stats.request_count(), 0);
        assert_eq!(stats.max_concurrency(), 20);
        assert_eq!(stats.original_max_concurrency(), 20);
    }
}
