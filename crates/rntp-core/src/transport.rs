//! # Transport state machine
//!
//! Per-`(consumerID, prefix)` state: the congestion window, the capsule
//! send queue, and bookkeeping for outstanding per-hop sends. This module
//! holds the data and the small pieces of logic that don't need a `Face`
//! or `Scheduler` at all (arrival-direction classification, hashing,
//! downstream-set bookkeeping); the orchestration that sends packets and
//! sets timers lives in `node.rs`'s `Strategy`, which is the thing that
//! actually owns a `Face`, a `Scheduler` and the route/quality tables this
//! state machine consults.

use crate::capsule_queue::CapsuleQueue;
use crate::congestion::CongestionController;
use crate::scheduler::EventId;
use crate::types::{CapsuleArrivalDirection, NODE_NONE};
use std::collections::{HashMap, HashSet};

/// `hash(prefix, consumerID)`, the transport key. The original hashes a
/// `"prefix|consumerID"` string; a `(String, u32)` tuple is the same key
/// without the string-formatting detour.
pub type TransportKey = (String, u32);

pub fn transport_key(prefix: &str, consumer_id: u32) -> TransportKey {
    (prefix.to_string(), consumer_id)
}

/// Per-outstanding-capsule bookkeeping: which retry timer to cancel on
/// ack, and which downstream neighbours we've actually sent this dataID
/// to (so a duplicate downstream ack can be told apart from a fresh one).
#[derive(Debug, Clone)]
pub struct SendCapState {
    pub send_event_id: Option<EventId>,
    pub send_times: u32,
    pub downstream_node_ids: HashSet<u32>,
}

impl SendCapState {
    pub fn new() -> Self {
        Self { send_event_id: None, send_times: 0, downstream_node_ids: HashSet::new() }
    }
}

impl Default for SendCapState {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one InterestBroadcast nonce this transport has already re-
/// propagated, for duplicate suppression independent of the visited-node
/// list (a node can see the same wave twice via different subpaths).
#[derive(Debug, Clone, Copy)]
pub struct ReceivedInterestBroadcastState {
    pub recv_time: f64,
    pub nonce: u32,
}

pub struct TransportStates {
    pub prefix: String,
    pub consumer_id: u32,
    pub congestion: CongestionController,
    pub capsule_queue: CapsuleQueue,
    pub send_cap_states: HashMap<u32, SendCapState>,
    /// `(dataID, nextHopID)` pairs already sent, for dup-send suppression.
    pub sent_data_id_and_next_hops: HashSet<(u32, u32)>,
    pub received_interest_broadcasts: Vec<ReceivedInterestBroadcastState>,
}

impl TransportStates {
    pub fn new(prefix: &str, consumer_id: u32, init_window: u32, init_threshold: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            consumer_id,
            congestion: CongestionController::new(init_window, init_threshold),
            capsule_queue: CapsuleQueue::new(),
            send_cap_states: HashMap::new(),
            sent_data_id_and_next_hops: HashSet::new(),
            received_interest_broadcasts: Vec::new(),
        }
    }

    /// `hashDataIDAndNextHopID`: packs `(nextHopID << 32) | dataID`. Kept
    /// for parity with the original's cache key even though this crate
    /// indexes by the `(u32, u32)` tuple directly everywhere else.
    pub fn hash_data_id_and_next_hop(data_id: u32, next_hop_id: u32) -> u64 {
        ((next_hop_id as u64) << 32) | data_id as u64
    }

    pub fn already_sent(&self, data_id: u32, next_hop_id: u32) -> bool {
        self.sent_data_id_and_next_hops.contains(&(data_id, next_hop_id))
    }

    pub fn mark_sent(&mut self, data_id: u32, next_hop_id: u32) {
        self.sent_data_id_and_next_hops.insert((data_id, next_hop_id));
    }
}

/// Node immediately before `self_node_id` in `node_ids`, or `None` if
/// `self_node_id` is absent or first. `getNextHop` in the original.
pub fn next_hop(node_ids: &[u32], self_node_id: u32) -> Option<u32> {
    let idx = node_ids.iter().position(|&id| id == self_node_id)?;
    if idx == 0 {
        None
    } else {
        Some(node_ids[idx - 1])
    }
}

/// Every node strictly before `self_node_id` in `node_ids` (the
/// downstream side of the path). `addDownStreamNodes` in the original.
pub fn downstream_nodes(node_ids: &[u32], self_node_id: u32) -> HashSet<u32> {
    let mut out = HashSet::new();
    for &id in node_ids {
        if id == self_node_id {
            break;
        }
        out.insert(id);
    }
    out
}

/// Classifies where a Capsule arrived from, relative to `self_node_id`'s
/// position in its `node_ids` path.
///
/// Per §9 open question (a): when `self_node_id` is absent from
/// `node_ids` (this capsule was never routed through us directly), the
/// original falls back to "do we have *any* route at all for this
/// (consumer, prefix)?" — regardless of whether that route has anything
/// to do with `trans_hop_node_id`. That can spuriously classify a
/// legitimate cross-path capsule as `FromDownstream`; kept as-is per the
/// design decision (§9), to be revisited only if property (6) in the
/// testable-properties section is observed to fail.
pub fn check_capsule_arrival_direction(
    node_ids: &[u32],
    self_node_id: u32,
    trans_hop_node_id: u32,
    has_any_route_for_pair: bool,
) -> Option<CapsuleArrivalDirection> {
    if node_ids.is_empty() {
        return Some(CapsuleArrivalDirection::FromProducer);
    }
    match node_ids.iter().position(|&id| id == self_node_id) {
        Some(self_idx) => match node_ids.iter().position(|&id| id == trans_hop_node_id) {
            Some(hop_idx) if hop_idx > self_idx => Some(CapsuleArrivalDirection::FromDownstream),
            Some(hop_idx) if hop_idx < self_idx => Some(CapsuleArrivalDirection::FromUpstream),
            _ => None,
        },
        None => {
            if has_any_route_for_pair {
                Some(CapsuleArrivalDirection::FromDownstream)
            } else {
                None
            }
        }
    }
}

/// `next_hop_id` for [`crate::congestion::CongestionController::on_ack_timeout`]'s
/// "was there a route" distinction: `None` means no route (stall), `Some`
/// means a route exists (halve).
pub fn has_route(next_hop_id: Option<u32>) -> bool {
    next_hop_id.is_some() && next_hop_id != Some(NODE_NONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_hop_is_the_node_before_self() {
        assert_eq!(next_hop(&[2, 1, 0], 1), Some(2));
        assert_eq!(next_hop(&[2, 1, 0], 2), None);
        assert_eq!(next_hop(&[2, 1, 0], 9), None);
    }

    #[test]
    fn downstream_nodes_stops_at_self() {
        let set = downstream_nodes(&[2, 1, 0, 5], 0);
        assert!(set.contains(&2));
        assert!(set.contains(&1));
        assert!(!set.contains(&0));
        assert!(!set.contains(&5));
    }

    #[test]
    fn arrival_direction_downstream_when_hop_is_further_from_producer() {
        // path producer(2) -> 1 -> self(0); a hop index greater than self's
        // means the transmitting node is between self and the consumer.
        let dir = check_capsule_arrival_direction(&[2, 1, 0, 9], 1, 9, false);
        assert_eq!(dir, Some(CapsuleArrivalDirection::FromDownstream));
    }

    #[test]
    fn arrival_direction_upstream_when_hop_is_closer_to_producer() {
        let dir = check_capsule_arrival_direction(&[2, 1, 0], 1, 2, false);
        assert_eq!(dir, Some(CapsuleArrivalDirection::FromUpstream));
    }

    #[test]
    fn arrival_direction_falls_back_to_route_presence_when_self_absent() {
        assert_eq!(
            check_capsule_arrival_direction(&[5, 6], 1, 5, true),
            Some(CapsuleArrivalDirection::FromDownstream)
        );
        assert_eq!(check_capsule_arrival_direction(&[5, 6], 1, 5, false), None);
    }

    #[test]
    fn empty_node_ids_means_from_producer() {
        assert_eq!(check_capsule_arrival_direction(&[], 1, 5, false), Some(CapsuleArrivalDirection::FromProducer));
    }
}
