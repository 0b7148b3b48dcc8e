//! # Discovery engine
//!
//! Builds the redundant, jittered copies of one InterestBroadcast flood.
//! A single nonce is drawn and shared by every copy; each copy gets its
//! own independent send delay so simultaneous local broadcasts at
//! different nodes don't collide in lockstep.

use crate::messages::InterestBroadcastMsg;
use rand::Rng;

pub struct PropagationPlan {
    pub nonce: u32,
    /// One `(delay_secs, message)` pair per scheduled copy.
    pub sends: Vec<(f64, InterestBroadcastMsg)>,
}

/// `propagateInterests`/`propagateInterestsAsync` (§4.8): constructs
/// `interest_send_times` copies of the same broadcast, each independently
/// jittered in `[0, interest_contention_time_secs)`.
#[allow(clippy::too_many_arguments)]
pub fn propagate_interests(
    producer_prefix: &str,
    hop_count: u32,
    consumer_node_id: u32,
    trans_hop_node_id: u32,
    end: bool,
    visited_node_ids: Vec<u32>,
    channel_qualities: Vec<f64>,
    interest_send_times: u32,
    interest_contention_time_secs: f64,
    rng: &mut impl Rng,
) -> PropagationPlan {
    let nonce = rng.random::<u32>();
    let mut sends = Vec::with_capacity(interest_send_times as usize);
    for _ in 0..interest_send_times {
        let delay = if interest_contention_time_secs > 0.0 {
            rng.random_range(0.0..interest_contention_time_secs)
        } else {
            0.0
        };
        sends.push((
            delay,
            InterestBroadcastMsg {
                producer_prefix: producer_prefix.to_string(),
                hop_count,
                consumer_node_id,
                trans_hop_node_id,
                nonce,
                end,
                visited_node_ids: visited_node_ids.clone(),
                channel_qualities: channel_qualities.clone(),
            },
        ));
    }
    PropagationPlan { nonce, sends }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn all_copies_share_one_nonce() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = propagate_interests("/p", 0, 0xFFFFFFFF, 3, false, vec![3], vec![], 4, 1.0, &mut rng);
        assert_eq!(plan.sends.len(), 4);
        assert!(plan.sends.iter().all(|(_, m)| m.nonce == plan.nonce));
    }

    #[test]
    fn delays_are_within_contention_window() {
        let mut rng = StdRng::seed_from_u64(11);
        let plan = propagate_interests("/p", 1, 0, 5, false, vec![5], vec![1.0], 3, 0.5, &mut rng);
        for (delay, _) in &plan.sends {
            assert!(*delay >= 0.0 && *delay < 0.5);
        }
    }

    #[test]
    fn zero_contention_time_yields_zero_delay() {
        let mut rng = StdRng::seed_from_u64(1);
        let plan = propagate_interests("/p", 0, 0, 0, true, vec![0], vec![], 1, 0.0, &mut rng);
        assert_eq!(plan.sends[0].0, 0.0);
    }
}
