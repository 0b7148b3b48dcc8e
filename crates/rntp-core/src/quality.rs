//! # Channel-quality table
//!
//! One [`ChannelQualityState`] per neighbour that has ever sent this node a
//! tagged packet: an EWMA-smoothed SNR plus a throughput-derived liveness
//! timeout. The table only tracks the smoothed value and the pending
//! timer; propagating a new sample into the route table and notifying the
//! congestion controllers of "channel waken" is the caller's job (it needs
//! the [`crate::route::RouteTable`] and the per-transport state this module
//! doesn't know about) — see `transport.rs`.

use crate::throughput::ThroughputQueue;
use crate::types::QUALITY_BROKEN;
use std::collections::HashMap;

pub struct ChannelQualityState {
    pub from_node_id: u32,
    pub quality_smooth: f64,
    throughput: ThroughputQueue,
    pub timer_event: Option<crate::scheduler::EventId>,
}

/// Outcome of [`QualityTable::update`], telling the caller what follow-up
/// work (route propagation, congestion-waken notification) is needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateOutcome {
    pub smoothed_quality: f64,
    pub liveness_timeout: f64,
    /// `false` on a neighbour's very first sample, `true` on every later
    /// one. The source notifies "channel waken" unconditionally on a
    /// non-first sample and leaves idempotency to the congestion
    /// controller's own `window == 0` guard (see `congestion.rs`); this
    /// flag is exactly that "non-first" condition.
    pub is_repeat_sample: bool,
}

pub struct QualityTable {
    entries: HashMap<u32, ChannelQualityState>,
    alpha: f64,
    throughput_queue_size_secs: u32,
    piat_confidence: f64,
    max_piat_secs: f64,
}

impl QualityTable {
    pub fn new(alpha: f64, throughput_queue_size_secs: u32, piat_confidence: f64, max_piat_secs: f64) -> Self {
        Self { entries: HashMap::new(), alpha, throughput_queue_size_secs, piat_confidence, max_piat_secs }
    }

    /// `updateChannelQuality` (§4.3, steps 1-2). The caller is responsible
    /// for (re)scheduling `timer_event` for `liveness_timeout` seconds and
    /// storing the returned `EventId` via [`Self::set_timer`]; this keeps
    /// the table free of a `Scheduler` dependency.
    pub fn update(&mut self, from_node_id: u32, snr: f64, now: f64) -> UpdateOutcome {
        let is_repeat_sample = self.entries.contains_key(&from_node_id);
        let entry = self.entries.entry(from_node_id).or_insert_with(|| ChannelQualityState {
            from_node_id,
            quality_smooth: snr,
            throughput: ThroughputQueue::new(self.throughput_queue_size_secs, self.max_piat_secs, self.piat_confidence),
            timer_event: None,
        });

        if is_repeat_sample {
            entry.quality_smooth = (1.0 - self.alpha) * entry.quality_smooth + self.alpha * snr;
        }
        entry.throughput.record(now);
        let liveness_timeout = if is_repeat_sample { entry.throughput.estimate_piat() } else { self.max_piat_secs };

        UpdateOutcome { smoothed_quality: entry.quality_smooth, liveness_timeout, is_repeat_sample }
    }

    pub fn set_timer(&mut self, from_node_id: u32, id: crate::scheduler::EventId) {
        if let Some(e) = self.entries.get_mut(&from_node_id) {
            e.timer_event = Some(id);
        }
    }

    pub fn take_timer(&mut self, from_node_id: u32) -> Option<crate::scheduler::EventId> {
        self.entries.get_mut(&from_node_id).and_then(|e| e.timer_event.take())
    }

    /// Marks a neighbour broken (its timer fired). Does not itself touch
    /// the route table — the caller threads this through
    /// `RouteTable::update_routes_with_quality(from, self_id, QUALITY_BROKEN)`.
    pub fn mark_broken(&mut self, from_node_id: u32) {
        if let Some(e) = self.entries.get_mut(&from_node_id) {
            e.quality_smooth = QUALITY_BROKEN;
            e.timer_event = None;
        }
    }

    pub fn get(&self, from_node_id: u32) -> Option<&ChannelQualityState> {
        self.entries.get(&from_node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_creates_entry_unsmoothed() {
        let mut t = QualityTable::new(0.125, 10, 0.9999, 5.0);
        let out = t.update(1, 20.0, 0.0);
        assert_eq!(out.smoothed_quality, 20.0);
        assert!(!out.is_repeat_sample);
        assert_eq!(out.liveness_timeout, 5.0); // max_piat on first sample
    }

    #[test]
    fn repeat_sample_applies_ewma() {
        let mut t = QualityTable::new(0.5, 10, 0.9999, 5.0);
        t.update(1, 10.0, 0.0);
        let out = t.update(1, 20.0, 1.0);
        assert_eq!(out.smoothed_quality, 15.0); // 0.5*10 + 0.5*20
        assert!(out.is_repeat_sample);
    }

    #[test]
    fn mark_broken_sets_sentinel_and_clears_timer() {
        let mut t = QualityTable::new(0.125, 10, 0.9999, 5.0);
        t.update(1, 20.0, 0.0);
        t.set_timer(1, crate::scheduler::EventId(7));
        t.mark_broken(1);
        assert_eq!(t.get(1).unwrap().quality_smooth, QUALITY_BROKEN);
        assert!(t.get(1).unwrap().timer_event.is_none());
    }
}
