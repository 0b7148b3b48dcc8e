//! # Throughput queue
//!
//! A ring buffer of per-second packet counts, used to derive a per-neighbour
//! liveness timeout (the "longest likely packet inter-arrival time", PIAT).

use std::collections::VecDeque;

/// One second's worth of packet arrivals.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    second_epoch: i64,
    count: u64,
}

/// Sliding window of per-second arrival counts for one neighbour.
pub struct ThroughputQueue {
    buckets: VecDeque<Bucket>,
    capacity: usize,
    max_piat: f64,
    confidence: f64,
}

impl ThroughputQueue {
    pub fn new(capacity_secs: u32, max_piat: f64, confidence: f64) -> Self {
        Self {
            buckets: VecDeque::with_capacity(capacity_secs.max(1) as usize),
            capacity: capacity_secs.max(1) as usize,
            max_piat,
            confidence,
        }
    }

    /// Records one packet arrival at simulation time `t` (seconds).
    pub fn record(&mut self, t: f64) {
        let epoch = t.floor() as i64;
        match self.buckets.back_mut() {
            Some(tail) if tail.second_epoch == epoch => tail.count += 1,
            _ => {
                self.buckets.push_back(Bucket { second_epoch: epoch, count: 1 });
                while self.buckets.len() > self.capacity {
                    self.buckets.pop_front();
                }
            }
        }
    }

    /// Estimates the longest likely inter-arrival time given the recorded
    /// history, clamped to `max_piat`. Exponential-interarrival quantile:
    /// `p_quantile = -ln(1 - confidence) / lambda`.
    pub fn estimate_piat(&self) -> f64 {
        if self.buckets.len() < 2 {
            return self.max_piat;
        }
        // exclude the open tail bucket, per spec
        let closed = self.buckets.len() - 1;
        let total: u64 = self.buckets.iter().take(closed).map(|b| b.count).sum();
        let lambda = total as f64 / closed as f64;
        if lambda <= 0.0 {
            return self.max_piat;
        }
        let piat = -(1.0 - self.confidence).ln() / lambda;
        piat.min(self.max_piat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_buckets_returns_max_piat() {
        let mut q = ThroughputQueue::new(10, 5.0, 0.9999);
        assert_eq!(q.estimate_piat(), 5.0);
        q.record(0.1);
        assert_eq!(q.estimate_piat(), 5.0);
    }

    #[test]
    fn record_opens_new_bucket_on_second_boundary() {
        let mut q = ThroughputQueue::new(10, 100.0, 0.9999);
        q.record(0.1);
        q.record(0.5);
        q.record(1.2);
        assert_eq!(q.buckets.len(), 2);
        assert_eq!(q.buckets[0].count, 2);
        assert_eq!(q.buckets[1].count, 1);
    }

    #[test]
    fn estimate_excludes_open_tail_bucket() {
        let mut q = ThroughputQueue::new(10, 100.0, 0.9999);
        for _ in 0..10 {
            q.record(0.0);
        }
        q.record(1.0); // opens tail, should not count toward lambda
        let piat = q.estimate_piat();
        // lambda = 10/1 = 10 -> piat = -ln(0.0001)/10
        let expected = -(0.0001f64).ln() / 10.0;
        assert!((piat - expected).abs() < 1e-9);
    }

    #[test]
    fn estimate_is_clamped_to_max_piat() {
        let mut q = ThroughputQueue::new(10, 0.01, 0.9999);
        for s in 0..5 {
            q.record(s as f64);
        }
        assert_eq!(q.estimate_piat(), 0.01);
    }

    #[test]
    fn ring_buffer_evicts_oldest_bucket_past_capacity() {
        let mut q = ThroughputQueue::new(3, 100.0, 0.9999);
        for s in 0..5 {
            q.record(s as f64);
        }
        assert_eq!(q.buckets.len(), 3);
        assert_eq!(q.buckets.front().unwrap().second_epoch, 2);
    }
}
