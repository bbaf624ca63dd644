//! Tunable protocol parameters.
//!
//! Every constant the protocol depends on lives here so that the CLI and the
//! tests can override it.  [`Config::default`] carries the standard values:
//! a 536-byte segment and a 3072-byte receive window.

use std::time::Duration;

use crate::segment::HEADER_LEN;

/// Maximum segment size in bytes, header included.
pub const DEFAULT_MSS: usize = 536;

/// Advertised receive window in bytes.
pub const DEFAULT_WINDOW: u16 = 3072;

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest datagram the protocol will build, header included.
    pub mss: usize,
    /// Receive window this side advertises.
    pub window: u16,
    /// Upper bound on locally buffered unacknowledged bytes, independent of
    /// what the peer advertises.
    pub send_capacity: usize,
    /// RTO before any round-trip sample is available.
    pub initial_rto: Duration,
    /// Floor for an RTO estimated from round-trip samples.
    pub min_rto: Duration,
    /// Ceiling for the RTO after repeated back-off.
    pub max_rto: Duration,
    /// Retransmissions of the oldest data segment without progress before
    /// the connection is aborted.
    pub max_retries: u32,
    /// Retransmissions of a SYN or SYN+ACK before the open is refused.
    pub handshake_retries: u32,
    /// How long TIME-WAIT keeps re-acknowledging a retransmitted FIN.
    pub linger: Duration,
    /// Longest the event loop sleeps when no timer is armed.
    pub poll_interval: Duration,
    /// Depth of the queue between the application handle and the event loop.
    pub app_queue_depth: usize,
    /// Fixed initial sequence number; `None` draws a random one.
    pub initial_seq: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            window: DEFAULT_WINDOW,
            send_capacity: DEFAULT_WINDOW as usize,
            initial_rto: Duration::from_millis(1000),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(60),
            max_retries: 6,
            handshake_retries: 6,
            linger: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            app_queue_depth: 64,
            initial_seq: None,
        }
    }
}

impl Config {
    /// Largest payload a single segment may carry under this configuration,
    /// before the peer's window is taken into account.
    pub fn max_payload(&self) -> usize {
        self.mss.saturating_sub(HEADER_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = Config::default();
        assert_eq!(c.mss, 536);
        assert_eq!(c.window, 3072);
        assert_eq!(c.max_payload(), 536 - HEADER_LEN);
    }

    #[test]
    fn tiny_mss_yields_zero_payload() {
        let c = Config {
            mss: 4,
            ..Config::default()
        };
        assert_eq!(c.max_payload(), 0);
    }
}
