//! # Congestion controller
//!
//! One instance per [`crate::transport`] `TransportStates`. A plain
//! TCP-like slow-start / AIMD window, not the workspace's BBRv3-style
//! controller — the wireless ad-hoc substrate here has no bottleneck
//! bandwidth estimate to feed a delivery-rate model, only per-hop acks and
//! timeouts, so the simpler scheme is what the original strategy actually
//! runs.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionController {
    pub window: i64,
    pub threshold: i64,
    init_window: i64,
    init_threshold: i64,
}

impl CongestionController {
    pub fn new(init_window: u32, init_threshold: u32) -> Self {
        Self {
            window: init_window as i64,
            threshold: init_threshold as i64,
            init_window: init_window as i64,
            init_threshold: init_threshold as i64,
        }
    }

    /// Slow start while `1 <= window < threshold` (doubles), congestion
    /// avoidance otherwise (`window += 1`, `threshold += 1`).
    pub fn on_ack_received(&mut self) {
        if self.window >= 1 && self.window < self.threshold {
            self.window *= 2;
        } else {
            self.window += 1;
            self.threshold += 1;
        }
    }

    /// A timeout with a viable route halves both (minimum 1 each); a
    /// timeout with no route at all stalls the transport (`window = 0`).
    pub fn on_ack_timeout(&mut self, has_route: bool) {
        if !has_route {
            self.window = 0;
            return;
        }
        self.window = (self.window / 2).max(1);
        self.threshold = (self.threshold / 2).max(1);
    }

    /// Restores the initial window/threshold, but only if the transport
    /// was actually stalled (`window == 0`) — an idempotent no-op
    /// otherwise, which is what lets the caller notify this on every
    /// repeat channel-quality sample rather than only on a genuine
    /// broken-to-alive transition (see `quality.rs`).
    pub fn on_channel_waken(&mut self) {
        if self.window == 0 {
            self.window = self.init_window;
            self.threshold = self.init_threshold;
        }
    }

    /// `nodeID,simTime,reason,window,slowStartThres,queueCount` per the
    /// original's congestion-control log.
    pub fn log_line(&self, node_id: u32, sim_time: f64, reason: &str, queue_count: usize) -> String {
        format!("{},{},{},{},{},{}", node_id, sim_time, reason, self.window, self.threshold, queue_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_doubles_window_until_threshold() {
        let mut c = CongestionController::new(1, 16);
        for _ in 0..32 {
            c.on_ack_received();
        }
        // doubles while window < threshold=16: 1,2,4,8,16 (4 acks: 1->2->4->8->16)
        // then congestion avoidance (+1,+1) for the remaining 28 acks
        assert_eq!(c.window, 16 + 28);
        assert_eq!(c.threshold, 16 + 28);
    }

    #[test]
    fn timeout_with_route_halves_with_floor_one() {
        let mut c = CongestionController::new(20, 16);
        c.on_ack_timeout(true);
        assert_eq!(c.window, 10);
        assert_eq!(c.threshold, 8);
    }

    #[test]
    fn timeout_without_route_stalls_window() {
        let mut c = CongestionController::new(20, 16);
        c.on_ack_timeout(false);
        assert_eq!(c.window, 0);
    }

    #[test]
    fn channel_waken_only_restores_when_stalled() {
        let mut c = CongestionController::new(4, 16);
        c.on_ack_timeout(false);
        assert_eq!(c.window, 0);
        c.on_channel_waken();
        assert_eq!(c.window, 4);
        assert_eq!(c.threshold, 16);

        // not stalled: waken is a no-op
        c.window = 7;
        c.on_channel_waken();
        assert_eq!(c.window, 7);
    }

    #[test]
    fn halving_floors_at_one_not_zero() {
        let mut c = CongestionController::new(1, 1);
        c.on_ack_timeout(true);
        assert_eq!(c.window, 1);
        assert_eq!(c.threshold, 1);
    }
}
