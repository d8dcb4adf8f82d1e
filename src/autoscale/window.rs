//! Scaling samples and the sliding window that holds them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One utilization sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingMetrics {
    pub current_instances: usize,
    /// Percent, 0-100.
    pub cpu_utilization: f64,
    /// Percent, 0-100.
    pub memory_utilization: f64,
    pub requests_per_second: f64,
    pub average_response_time_ms: f64,
    pub timestamp: Instant,
}

/// Samples newer than `span`, oldest first.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    samples: VecDeque<ScalingMetrics>,
    span: Duration,
}

impl MetricsWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            span,
        }
    }

    /// Append a sample and evict everything older than the window allows.
    pub fn push(&mut self, sample: ScalingMetrics) {
        let newest = sample.timestamp;
        self.samples.push_back(sample);
        while let Some(oldest) = self.samples.front() {
            if newest.duration_since(oldest.timestamp) > self.span {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&ScalingMetrics> {
        self.samples.back()
    }

    /// The `n` most recent samples, or `None` if fewer are held.
    pub fn recent(&self, n: usize) -> Option<impl Iterator<Item = &ScalingMetrics>> {
        if n == 0 || self.samples.len() < n {
            return None;
        }
        Some(self.samples.iter().skip(self.samples.len() - n))
    }

    /// Mean of `field` over the `n` most recent samples.
    pub fn recent_mean(&self, n: usize, field: impl Fn(&ScalingMetrics) -> f64) -> Option<f64> {
        let total: f64 = self.recent(n)?.map(field).sum();
        Some(total / n as f64)
    }

    /// Mean of `field` over the whole window.
    pub fn mean(&self, field: impl Fn(&ScalingMetrics) -> f64) -> Option<f64> {
        self.recent_mean(self.samples.len(), field)
    }
}

#[cfg(test)]
pub(crate) fn sample(at: Instant, cpu: f64, memory: f64) -> ScalingMetrics {
    ScalingMetrics {
        current_instances: 2,
        cpu_utilization: cpu,
        memory_utilization: memory,
        requests_per_second: 10.0,
        average_response_time_ms: 25.0,
        timestamp: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_based_eviction() {
        let start = Instant::now();
        let mut window = MetricsWindow::new(Duration::from_secs(300));

        for minute in 0..=5 {
            window.push(sample(start + Duration::from_secs(minute * 60), 50.0, 50.0));
        }
        // t=0 is exactly 300s old: kept
        assert_eq!(window.len(), 6);

        window.push(sample(start + Duration::from_secs(360), 50.0, 50.0));
        assert_eq!(window.len(), 6);
        assert_eq!(window.samples.front().unwrap().timestamp, start + Duration::from_secs(60));
    }

    #[test]
    fn test_recent_mean() {
        let start = Instant::now();
        let mut window = MetricsWindow::new(Duration::from_secs(300));
        for (i, cpu) in [10.0, 20.0, 60.0, 70.0, 80.0].iter().enumerate() {
            window.push(sample(start + Duration::from_secs(i as u64), *cpu, 0.0));
        }

        assert_eq!(window.recent_mean(3, |m| m.cpu_utilization), Some(70.0));
        assert_eq!(window.recent_mean(5, |m| m.cpu_utilization), Some(48.0));
        assert_eq!(window.recent_mean(6, |m| m.cpu_utilization), None);
        assert_eq!(window.mean(|m| m.cpu_utilization), Some(48.0));
    }

    #[test]
    fn test_empty_window() {
        let window = MetricsWindow::new(Duration::from_secs(60));
        assert!(window.is_empty());
        assert!(window.mean(|m| m.cpu_utilization).is_none());
        assert!(window.latest().is_none());
    }
}
