//! # Resequencing queue (consumer)
//!
//! Restores in-order delivery of capsules arriving out of order across
//! multiple subpaths, bounded by a fixed hold time and queue depth. Two
//! views of the same bounded set are kept: a min-heap by `dataID` for
//! in-order release and a FIFO by arrival time for timeout-driven expiry,
//! grounded in the original's `RntpResequenceQueue` (`generic-consumer.cpp`).
//!
//! This module is pure: it takes arrivals and `now()` calls and returns
//! the items to deliver, rather than calling back into an application or
//! scheduler itself — the caller (`rntp-node`'s consumer loop, or the
//! in-memory harness) owns delivery and timer wiring.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

#[derive(Debug, Clone)]
struct Entry<T> {
    data_id: u32,
    arrive_time: f64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data_id == other.data_id
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    // reversed so `BinaryHeap` (a max-heap) acts as a min-heap by data_id
    fn cmp(&self, other: &Self) -> Ordering {
        other.data_id.cmp(&self.data_id)
    }
}

pub struct ResequenceQueue<T> {
    size: usize,
    max_wait_time: f64,
    last_data_id: i64,
    q_seq: BinaryHeap<Entry<T>>,
    q_time: VecDeque<(u32, f64)>,
}

impl<T: Clone> ResequenceQueue<T> {
    pub fn new(size: usize, max_wait_time: f64) -> Self {
        Self { size, max_wait_time, last_data_id: -1, q_seq: BinaryHeap::new(), q_time: VecDeque::new() }
    }

    /// `receiveData`: processes one arrival, returning everything it
    /// deems deliverable right now, in delivery order.
    pub fn receive(&mut self, data_id: u32, now: f64, payload: T) -> Vec<(u32, T)> {
        let mut delivered = Vec::new();

        if self.last_data_id == -1 {
            delivered.push((data_id, payload));
            self.last_data_id = data_id as i64;
            return delivered;
        }
        if data_id as i64 == self.last_data_id + 1 {
            delivered.push((data_id, payload));
            self.last_data_id = data_id as i64;
            return delivered;
        }

        if self.q_seq.len() == self.size {
            if let Some(popped) = self.q_seq.pop() {
                self.last_data_id = popped.data_id as i64;
                delivered.push((popped.data_id, popped.payload));
            }
        }

        self.q_seq.push(Entry { data_id, arrive_time: now, payload: payload.clone() });
        self.q_time.push_back((data_id, now));

        delivered.extend(self.release(now));
        delivered
    }

    /// `releaseQueue`: pops everything immediately contiguous with
    /// `last_data_id`, then expires anything older than `max_wait_time`,
    /// force-delivering up to (and including) the highest expired
    /// `dataID` — sacrificing order for liveness (§7).
    pub fn release(&mut self, now: f64) -> Vec<(u32, T)> {
        let mut delivered = Vec::new();

        while let Some(top) = self.q_seq.peek() {
            if top.data_id as i64 == self.last_data_id + 1 {
                let e = self.q_seq.pop().unwrap();
                self.last_data_id = e.data_id as i64;
                delivered.push((e.data_id, e.payload));
            } else {
                break;
            }
        }

        if self.q_seq.is_empty() {
            return delivered;
        }

        let mut max_expired: Option<u32> = None;
        while let Some(&(id, arrive_time)) = self.q_time.front() {
            if arrive_time <= now - self.max_wait_time {
                self.q_time.pop_front();
                max_expired = Some(max_expired.map_or(id, |m| m.max(id)));
            } else {
                break;
            }
        }
        let Some(cutoff) = max_expired else { return delivered };

        // skip policy: flush every held element up to the expired cutoff,
        // in ascending data_id order, regardless of contiguity.
        let mut rest = Vec::new();
        while let Some(top) = self.q_seq.peek() {
            if top.data_id <= cutoff {
                let e = self.q_seq.pop().unwrap();
                self.last_data_id = e.data_id as i64;
                rest.push((e.data_id, e.payload));
            } else {
                break;
            }
        }
        delivered.extend(rest);
        delivered
    }

    /// Delay until the next auto-dequeue timer should fire, i.e. the
    /// oldest held arrival's expiry instant. `None` when the queue is
    /// empty (no timer needed).
    pub fn next_auto_dequeue_delay(&self, now: f64) -> Option<f64> {
        self.q_time.front().map(|&(_, arrive_time)| (arrive_time + self.max_wait_time - now).max(0.0))
    }

    pub fn len(&self) -> usize {
        self.q_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q_seq.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_arrivals_deliver_immediately() {
        let mut q: ResequenceQueue<u32> = ResequenceQueue::new(10, 5.0);
        assert_eq!(q.receive(0, 0.0, 0), vec![(0, 0)]);
        assert_eq!(q.receive(1, 0.1, 1), vec![(1, 1)]);
    }

    #[test]
    fn out_of_order_holds_then_releases_contiguously() {
        let mut q: ResequenceQueue<u32> = ResequenceQueue::new(10, 5.0);
        assert_eq!(q.receive(0, 0.0, 0), vec![(0, 0)]);
        assert_eq!(q.receive(1, 0.1, 1), vec![(1, 1)]);
        assert_eq!(q.receive(3, 0.2, 3), vec![]); // held, waiting for 2
        assert_eq!(q.receive(4, 0.3, 4), vec![]);
        assert_eq!(q.receive(5, 0.4, 5), vec![]);
        assert!(q.len() == 3);
    }

    #[test]
    fn scenario_skips_lost_packet_after_max_wait_time() {
        let mut q: ResequenceQueue<u32> = ResequenceQueue::new(10, 2.0);
        q.receive(0, 0.0, 0);
        q.receive(1, 0.1, 1);
        q.receive(3, 0.2, 3);
        q.receive(4, 0.3, 4);
        q.receive(5, 0.4, 5);
        // nothing expired yet
        assert_eq!(q.release(1.0), vec![]);
        // past 0.2 + 2.0 = 2.2: dataIDs 3 and 4 (arrive_time <= cutoff) expire
        // and flush together, since the flush walks q_seq up to the *highest*
        // expired dataID, not just the one that aged out.
        let out = q.release(2.3);
        assert_eq!(out, vec![(3, 3), (4, 4)]);
        assert_eq!(q.len(), 1); // 5 is still held, it hasn't aged out yet

        // a later auto-dequeue firing (rescheduled for 5's own expiry,
        // 0.4 + 2.0 = 2.4) flushes the rest.
        let out2 = q.release(2.41);
        assert_eq!(out2, vec![(5, 5)]);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn full_queue_force_delivers_oldest_by_data_id() {
        let mut q: ResequenceQueue<u32> = ResequenceQueue::new(2, 100.0);
        q.receive(0, 0.0, 0);
        q.receive(5, 0.1, 5);
        q.receive(4, 0.2, 4);
        // q_seq is full (size=2) with {4,5}; a third out-of-order arrival
        // forces out the minimum (4) to make room, which then makes 5
        // contiguous and releases it too.
        let out = q.receive(9, 0.3, 9);
        assert_eq!(out, vec![(4, 4), (5, 5)]);
    }
}
