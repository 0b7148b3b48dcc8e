//! # Capsule queue
//!
//! Per-transport FIFO of capsules awaiting send. An element can be
//! "hidden" (transiently popped for an in-flight send, still counted in
//! the buffer so a timeout can find and restore it) without losing its
//! place in line. `dataIDsInBuffer` makes containment checks O(1) instead
//! of scanning the whole buffer on every arriving duplicate.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendCode {
    FromProducer,
    FromPreviousHop,
    ForRetrying,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapsuleToSend {
    pub data_id: u32,
    pub node_ids: Vec<u32>,
    pub payload: Vec<u8>,
    pub n_times_retried: u32,
    pub code: SendCode,
    pub hidden: bool,
}

#[derive(Debug, Default)]
pub struct CapsuleQueue {
    buffer: VecDeque<CapsuleToSend>,
    n_hidden: usize,
    ids_in_buffer: HashSet<u32>,
}

impl CapsuleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: CapsuleToSend) {
        self.ids_in_buffer.insert(element.data_id);
        self.buffer.push_back(element);
    }

    pub fn contains(&self, data_id: u32) -> bool {
        self.ids_in_buffer.contains(&data_id)
    }

    /// First non-hidden element, without removing or hiding it.
    pub fn front(&self) -> Option<&CapsuleToSend> {
        self.buffer.iter().find(|e| !e.hidden)
    }

    /// Hides the first non-hidden element (marks it in-flight) and returns
    /// it. The element stays in the buffer so a retry timeout can find it
    /// again via [`Self::restore`].
    pub fn transiently_pop_front(&mut self) -> Option<&CapsuleToSend> {
        let idx = self.buffer.iter().position(|e| !e.hidden)?;
        let e = &mut self.buffer[idx];
        e.hidden = true;
        self.n_hidden += 1;
        Some(&self.buffer[idx])
    }

    /// Un-hides the element with `data_id`, updating its retry bookkeeping
    /// for the next send attempt.
    pub fn restore(&mut self, data_id: u32, n_times_retried: u32, code: SendCode) -> bool {
        if let Some(e) = self.buffer.iter_mut().find(|e| e.data_id == data_id) {
            e.hidden = false;
            e.n_times_retried = n_times_retried;
            e.code = code;
            self.n_hidden = self.n_hidden.saturating_sub(1);
            true
        } else {
            false
        }
    }

    /// Fully erases the element with `data_id` (e.g. on ack).
    pub fn remove(&mut self, data_id: u32) -> Option<CapsuleToSend> {
        let idx = self.buffer.iter().position(|e| e.data_id == data_id)?;
        let e = self.buffer.remove(idx)?;
        if e.hidden {
            self.n_hidden = self.n_hidden.saturating_sub(1);
        }
        self.ids_in_buffer.remove(&data_id);
        Some(e)
    }

    pub fn count_elements(&self) -> usize {
        self.buffer.len() - self.n_hidden
    }

    pub fn n_hidden_elements(&self) -> usize {
        self.n_hidden
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// `nodeID,simTime,bufferSize,nHidden` per the original's `logBuffer`.
    pub fn log_line(&self, node_id: u32, sim_time: f64) -> String {
        format!("{},{},{},{}", node_id, sim_time, self.buffer.len(), self.n_hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(data_id: u32) -> CapsuleToSend {
        CapsuleToSend { data_id, node_ids: vec![], payload: vec![], n_times_retried: 0, code: SendCode::FromProducer, hidden: false }
    }

    #[test]
    fn count_elements_excludes_hidden() {
        let mut q = CapsuleQueue::new();
        q.push(elem(1));
        q.push(elem(2));
        assert_eq!(q.count_elements(), 2);
        q.transiently_pop_front();
        assert_eq!(q.count_elements(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn restore_unhides_and_updates_retry_bookkeeping() {
        let mut q = CapsuleQueue::new();
        q.push(elem(1));
        q.transiently_pop_front();
        assert!(q.restore(1, 2, SendCode::ForRetrying));
        let e = q.front().unwrap();
        assert_eq!(e.n_times_retried, 2);
        assert_eq!(e.code, SendCode::ForRetrying);
        assert!(!e.hidden);
    }

    #[test]
    fn remove_clears_containment_and_hidden_count() {
        let mut q = CapsuleQueue::new();
        q.push(elem(1));
        q.transiently_pop_front();
        assert!(q.contains(1));
        q.remove(1);
        assert!(!q.contains(1));
        assert_eq!(q.n_hidden_elements(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn front_skips_hidden_elements_in_order() {
        let mut q = CapsuleQueue::new();
        q.push(elem(1));
        q.push(elem(2));
        q.transiently_pop_front(); // hides 1
        assert_eq!(q.front().unwrap().data_id, 2);
    }
}
