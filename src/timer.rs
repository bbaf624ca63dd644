//! Retransmission-timeout estimation.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  [`RetransmitTimer`] tracks that bound.
//!
//! RTO is computed using a variant of Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! and doubles on each consecutive timeout (exponential back-off) up to a
//! configurable maximum.  Estimates never drop below a configurable floor,
//! so a near-zero loopback RTT cannot trigger a burst of spurious
//! retransmissions.  The timer itself holds no deadlines; callers add
//! [`RetransmitTimer::rto`] to a segment's transmit time.

use std::time::Duration;

/// Smoothed RTO estimator for one connection.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    /// Current RTO, updated after each RTT sample or back-off.
    current_rto: Duration,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Duration,
}

impl RetransmitTimer {
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            initial_rto,
            min_rto,
            max_rto,
            current_rto: initial_rto.min(max_rto),
            srtt: None,
            rttvar: Duration::ZERO,
        }
    }

    /// The timeout currently in force.
    pub fn rto(&self) -> Duration {
        self.current_rto
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2,  RTO = SRTT + 4·RTTVAR.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = self.rttvar * 3 / 4 + diff / 4;
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
        }
        self.reset();
    }

    /// Double the RTO on retransmit timeout (exponential back-off, RFC 6298 §5.5).
    ///
    /// Capped at the configured maximum.
    pub fn back_off(&mut self) {
        self.current_rto = (self.current_rto * 2).min(self.max_rto);
    }

    /// Restore the RTO from the current SRTT / RTTVAR estimates.
    ///
    /// Falls back to the initial RTO before the first RTT sample.
    pub fn reset(&mut self) {
        self.current_rto = match self.srtt {
            Some(srtt) => (srtt + self.rttvar * 4).max(self.min_rto),
            None => self.initial_rto,
        }
        .min(self.max_rto);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> RetransmitTimer {
        RetransmitTimer::new(
            Duration::from_millis(1000),
            Duration::from_millis(10),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn starts_at_initial_rto() {
        assert_eq!(timer().rto(), Duration::from_millis(1000));
    }

    #[test]
    fn back_off_doubles_and_caps() {
        let mut t = timer();
        t.back_off();
        assert_eq!(t.rto(), Duration::from_secs(2));
        for _ in 0..10 {
            t.back_off();
        }
        assert_eq!(t.rto(), Duration::from_secs(60));
    }

    #[test]
    fn first_sample_sets_srtt_plus_four_var() {
        let mut t = timer();
        t.record_rtt_sample(Duration::from_millis(100));
        // 100 + 4 * 50
        assert_eq!(t.rto(), Duration::from_millis(300));
    }

    #[test]
    fn reset_undoes_back_off() {
        let mut t = timer();
        t.record_rtt_sample(Duration::from_millis(100));
        t.back_off();
        t.back_off();
        assert_eq!(t.rto(), Duration::from_millis(1200));
        t.reset();
        assert_eq!(t.rto(), Duration::from_millis(300));
    }

    #[test]
    fn estimate_respects_floor() {
        let mut t = timer();
        t.record_rtt_sample(Duration::from_micros(50));
        assert_eq!(t.rto(), Duration::from_millis(10));
    }

    #[test]
    fn stable_samples_shrink_variance() {
        let mut t = timer();
        for _ in 0..20 {
            t.record_rtt_sample(Duration::from_millis(100));
        }
        assert!(t.rto() < Duration::from_millis(150));
        assert!(t.rto() >= Duration::from_millis(100));
    }
}
