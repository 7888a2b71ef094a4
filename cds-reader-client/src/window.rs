//! Fixed-size sliding windows of recent per-node measurements.
//!
//! Follows `proxmox_http`'s rate limiter in keeping a small bounded history
//! rather than an unbounded log, the same style as its `RateLimiter`
//! token-bucket; here the history is a literal ring buffer since the score
//! formula needs the actual samples, not just a running rate.

use std::collections::VecDeque;

/// A bounded FIFO of `f64` samples with a fixed capacity.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        SlidingWindow {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// `true` if the window is full (at least one sample) and every sample is zero.
    pub fn all_zero(&self) -> bool {
        !self.samples.is_empty() && self.samples.iter().all(|&s| s == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_is_none_when_empty() {
        let w = SlidingWindow::new(3);
        assert_eq!(w.mean(), None);
    }

    #[test]
    fn evicts_oldest_sample_past_capacity() {
        let mut w = SlidingWindow::new(2);
        w.push(1.0);
        w.push(2.0);
        w.push(3.0);
        assert_eq!(w.len(), 2);
        assert_eq!(w.mean(), Some(2.5));
    }

    #[test]
    fn all_zero_detects_uniformly_failing_window() {
        let mut w = SlidingWindow::new(3);
        w.push(0.0);
        w.push(0.0);
        assert!(w.all_zero());
        w.push(1.0);
        assert!(!w.all_zero());
    }
}
