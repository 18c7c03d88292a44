/// Round-trip time estimation and the sender-side clock.
///
/// Classic smoothed estimator:
///   srtt   = (1 - ALPHA) * srtt + ALPHA * sample
///   rttvar = (1 - BETA) * rttvar + BETA * |srtt - sample|
///   rto    = srtt + max(G, K * rttvar)
///
/// All values are milliseconds.

use std::time::{Duration, Instant};

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;
const K: f64 = 4.0;
const G: f64 = 0.1;

/// Snapshot of the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttEstimate {
    pub srtt: f64,
    pub rttvar: f64,
    pub rto: f64,
}

impl RttEstimate {
    /// The state assumed before any sample: `(rtt, rtt / 2)`.
    pub fn initial(rtt_ms: f64) -> Self {
        let rttvar = rtt_ms / 2.0;
        Self {
            srtt: rtt_ms,
            rttvar,
            rto: rtt_ms + G.max(K * rttvar),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RttEstimator {
    estimate: Option<RttEstimate>,
    samples: u64,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one RTT sample and return the updated estimate.
    pub fn update(&mut self, sample_ms: f64) -> RttEstimate {
        self.samples += 1;
        let next = match self.estimate {
            None => RttEstimate::initial(sample_ms),
            Some(prev) => {
                let srtt = (1.0 - ALPHA) * prev.srtt + ALPHA * sample_ms;
                let rttvar = (1.0 - BETA) * prev.rttvar + BETA * (srtt - sample_ms).abs();
                RttEstimate {
                    srtt,
                    rttvar,
                    rto: srtt + G.max(K * rttvar),
                }
            }
        };
        self.estimate = Some(next);
        next
    }

    pub fn estimate(&self) -> Option<RttEstimate> {
        self.estimate
    }

    /// Current estimate, or the initial state derived from `default_rtt`.
    pub fn estimate_or(&self, default_rtt: Duration) -> RttEstimate {
        self.estimate
            .unwrap_or_else(|| RttEstimate::initial(default_rtt.as_secs_f64() * 1000.0))
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

/// Monotonic session clock producing 32-bit microsecond send times.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Microseconds since the clock started, wrapping every ~71.6 minutes.
    pub fn now_micros(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }

    /// RTT in milliseconds for a frame stamped with `send_time`.
    pub fn rtt_since(&self, send_time: u32) -> f64 {
        rtt_millis(self.now_micros(), send_time)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// `(now - send_time) mod 2^32` microseconds, as milliseconds.
///
/// Correct across one wrap of the 32-bit clock.
pub fn rtt_millis(now_micros: u32, send_time: u32) -> f64 {
    now_micros.wrapping_sub(send_time) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initializes() {
        let mut est = RttEstimator::new();
        assert!(est.estimate().is_none());
        let e = est.update(40.0);
        assert_eq!(e.srtt, 40.0);
        assert_eq!(e.rttvar, 20.0);
        assert_eq!(e.rto, 40.0 + 80.0);
        assert_eq!(est.sample_count(), 1);
    }

    #[test]
    fn second_sample_uses_updated_srtt_for_variance() {
        let mut est = RttEstimator::new();
        est.update(100.0);
        let e = est.update(20.0);
        // srtt = 0.875 * 100 + 0.125 * 20 = 90
        assert!((e.srtt - 90.0).abs() < 1e-9);
        // rttvar = 0.75 * 50 + 0.25 * |90 - 20| = 37.5 + 17.5 = 55
        assert!((e.rttvar - 55.0).abs() < 1e-9);
        assert!((e.rto - (90.0 + 220.0)).abs() < 1e-9);
    }

    #[test]
    fn constant_samples_converge() {
        let mut est = RttEstimator::new();
        est.update(250.0);
        for _ in 0..500 {
            est.update(30.0);
        }
        let e = est.estimate().unwrap();
        assert!((e.srtt - 30.0).abs() < 1e-6, "srtt = {}", e.srtt);
        assert!(e.rttvar < 1e-6, "rttvar = {}", e.rttvar);
        // floor g dominates once the variance has vanished
        assert!((e.rto - 30.1).abs() < 1e-6);
    }

    #[test]
    fn default_estimate_before_samples() {
        let est = RttEstimator::new();
        let e = est.estimate_or(Duration::from_millis(100));
        assert_eq!(e.srtt, 100.0);
        assert_eq!(e.rttvar, 50.0);
        assert_eq!(e.rto, 300.0);
    }

    #[test]
    fn rtt_survives_clock_wrap() {
        assert_eq!(rtt_millis(5_000, 2_000), 3.0);
        // send just before the wrap, receive just after
        let send = u32::MAX - 999;
        assert_eq!(rtt_millis(1_000, send), 2.0);
    }
}
