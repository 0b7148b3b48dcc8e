//! # Echo beacon
//!
//! A one-hop liveness beacon. Its only state is a monotonically
//! increasing sequence number; the actual send (building an [`EchoMsg`],
//! writing the log line, rescheduling) is orchestrated by the node
//! strategy since it needs the `Face` and `Scheduler`.

use rand::Rng;

#[derive(Debug, Default)]
pub struct EchoBeacon {
    seq_num: u32,
}

impl EchoBeacon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence number for the next echo and advances it.
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.seq_num;
        self.seq_num += 1;
        seq
    }

    /// Uniform random delay in `(0, echo_period]` for the beacon's first
    /// tick, so beacons across a network don't all fire in lockstep.
    pub fn initial_delay(echo_period_secs: f64, rng: &mut impl Rng) -> f64 {
        if echo_period_secs <= 0.0 {
            return 0.0;
        }
        rng.random_range(f64::EPSILON..=echo_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let mut b = EchoBeacon::new();
        assert_eq!(b.next_seq(), 0);
        assert_eq!(b.next_seq(), 1);
        assert_eq!(b.next_seq(), 2);
    }

    #[test]
    fn initial_delay_is_within_period() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let d = EchoBeacon::initial_delay(2.0, &mut rng);
            assert!(d > 0.0 && d <= 2.0);
        }
    }
}
