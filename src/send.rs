//! Send-side sliding window.
//!
//! [`SendWindow`] buffers every segment that has been transmitted but not yet
//! covered by a cumulative ACK, assigns sequence numbers, and decides when the
//! oldest outstanding segment must be retransmitted.
//!
//! # Protocol contract
//!
//! - Unacknowledged bytes never exceed `min(peer_window, send_capacity)`.
//! - ACKs are **cumulative**: `ack = K` retires every segment whose data ends
//!   at or before `K`.  Segments are never partially retired.
//! - On timeout only the **oldest** unacknowledged segment is retransmitted,
//!   byte-for-byte identical to its first transmission.
//! - A FIN occupies exactly one sequence number and is retransmitted like data.
//!
//! This module only manages state; all socket I/O is the caller's responsibility.

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::Config;
use crate::error::{ConnError, SendError};
use crate::segment::{flags, Header, Segment, HEADER_LEN};
use crate::seq::seq_le;
use crate::timer::RetransmitTimer;

/// A transmitted segment awaiting acknowledgement.
///
/// The payload buffer is owned here and freed when the descriptor is retired.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Header as first transmitted; retransmissions reuse it unchanged.
    pub header: Header,
    pub payload: Vec<u8>,
    /// Total number of times this segment has been transmitted.
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

impl Descriptor {
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    pub fn is_fin(&self) -> bool {
        self.header.flags & flags::FIN != 0
    }

    /// Sequence space occupied: payload bytes plus one for a FIN.
    pub fn length(&self) -> u32 {
        self.payload.len() as u32 + u32::from(self.is_fin())
    }

    /// First sequence number after this segment.
    pub fn end(&self) -> u32 {
        self.seq().wrapping_add(self.length())
    }

    fn to_segment(&self) -> Segment {
        Segment {
            header: self.header,
            payload: self.payload.clone(),
        }
    }
}

/// Send-side state for one connection.
///
/// # Sequence-number layout
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// Sequence number of the oldest unacknowledged byte (left window edge).
    send_base: u32,
    /// Sequence number for the next new segment.
    next_seq: u32,
    /// Window most recently advertised by the peer.
    peer_window: u16,
    /// Local cap on buffered unacknowledged bytes.
    capacity: usize,
    mss: usize,
    /// Bytes (and FIN) currently in flight.
    in_flight: usize,
    /// Outstanding segments ordered by sequence number (front = oldest).
    window: VecDeque<Descriptor>,
    timer: RetransmitTimer,
    /// Retransmission deadline of the oldest outstanding segment.
    deadline: Option<Instant>,
    /// Consecutive timeouts without the left edge advancing.
    retries: u32,
    max_retries: u32,
    fin_queued: bool,
    fin_acked: bool,
}

impl SendWindow {
    /// `seq_start` is the first data sequence number (`ISN + 1`).
    pub fn new(seq_start: u32, config: &Config) -> Self {
        Self {
            send_base: seq_start,
            next_seq: seq_start,
            peer_window: 0,
            capacity: config.send_capacity,
            mss: config.mss,
            in_flight: 0,
            window: VecDeque::new(),
            timer: RetransmitTimer::new(config.initial_rto, config.min_rto, config.max_rto),
            deadline: None,
            retries: 0,
            max_retries: config.max_retries,
            fin_queued: false,
            fin_acked: false,
        }
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    /// Next sequence number this side will assign.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn peer_window(&self) -> u16 {
        self.peer_window
    }

    pub fn set_peer_window(&mut self, window: u16) {
        self.peer_window = window;
    }

    /// Bytes sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn has_unacked(&self) -> bool {
        !self.window.is_empty()
    }

    pub fn fin_acked(&self) -> bool {
        self.fin_acked
    }

    /// Largest payload one [`submit`](Self::submit) call accepts:
    /// `min(mss, peer_window) - HEADER_LEN`, never below one byte while the
    /// peer's window is open.
    pub fn max_payload(&self) -> usize {
        let limit = self.mss.min(usize::from(self.peer_window));
        match limit.checked_sub(HEADER_LEN) {
            Some(n) if n > 0 => n,
            _ if self.peer_window > 0 && self.mss > HEADER_LEN => 1,
            _ => 0,
        }
    }

    /// Window space left for new bytes.
    ///
    /// With a closed peer window and nothing in flight a single probe byte
    /// is allowed so that a window update cannot be missed forever.
    pub fn available(&self) -> usize {
        let limit = usize::from(self.peer_window).min(self.capacity);
        if limit == 0 && self.in_flight == 0 {
            return 1;
        }
        limit.saturating_sub(self.in_flight)
    }

    /// Payload bound for one segment, counting the zero-window probe byte.
    ///
    /// An `mss` that leaves no room after the header allows nothing at all.
    fn segment_limit(&self) -> usize {
        if self.mss <= HEADER_LEN {
            return 0;
        }
        self.max_payload().max(1)
    }

    /// Bytes the next `submit` call may carry.
    pub fn writable(&self) -> usize {
        if self.fin_queued {
            return 0;
        }
        self.segment_limit().min(self.available())
    }

    /// Accept application bytes as one new segment.
    ///
    /// Assigns the next sequence number, records the descriptor, arms the
    /// retransmission deadline if the window was idle, and returns the
    /// segment to transmit.  `ack` and `window` are the receive side's
    /// current values, piggybacked on the data.
    pub fn submit(
        &mut self,
        data: &[u8],
        ack: u32,
        window: u16,
        now: Instant,
    ) -> Result<Segment, SendError> {
        if self.fin_queued {
            return Err(SendError::Closed);
        }
        let limit = self.segment_limit();
        if data.len() > limit {
            return Err(SendError::Oversized {
                len: data.len(),
                limit,
            });
        }
        let available = self.available();
        if data.len() > available {
            return Err(SendError::WindowFull {
                len: data.len(),
                available,
            });
        }

        let header = Header {
            seq: self.next_seq,
            ack,
            flags: flags::ACK,
            window,
        };
        Ok(self.record(header, data.to_vec(), now))
    }

    /// Append a FIN after all submitted data.
    ///
    /// The FIN is not subject to the peer's window.
    pub fn queue_fin(&mut self, ack: u32, window: u16, now: Instant) -> Result<Segment, SendError> {
        if self.fin_queued {
            return Err(SendError::Closed);
        }
        self.fin_queued = true;
        let header = Header {
            seq: self.next_seq,
            ack,
            flags: flags::FIN | flags::ACK,
            window,
        };
        Ok(self.record(header, Vec::new(), now))
    }

    fn record(&mut self, header: Header, payload: Vec<u8>, now: Instant) -> Segment {
        let entry = Descriptor {
            header,
            payload,
            tx_count: 1,
            sent_at: now,
        };
        let segment = entry.to_segment();
        self.next_seq = entry.end();
        self.in_flight += entry.length() as usize;
        self.window.push_back(entry);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timer.rto());
        }
        segment
    }

    /// Process a cumulative ACK and the window advertised with it.
    ///
    /// Retires every descriptor whose data ends at or before `ack`, advances
    /// `send_base`, and returns the number of retired descriptors.  ACKs that
    /// fall outside `[send_base, next_seq]` are ignored entirely; in-range
    /// ACKs that do not advance still update the peer's window.
    pub fn on_ack(&mut self, ack: u32, window: u16, now: Instant) -> usize {
        if !seq_le(self.send_base, ack) || !seq_le(ack, self.next_seq) {
            return 0;
        }
        self.peer_window = window;

        let mut retired = 0usize;
        let mut sample = None;
        while let Some(front) = self.window.front() {
            if !seq_le(front.end(), ack) {
                break;
            }
            if front.tx_count == 1 {
                sample = Some(now.saturating_duration_since(front.sent_at));
            }
            if front.is_fin() {
                self.fin_acked = true;
            }
            self.send_base = front.end();
            self.in_flight -= front.length() as usize;
            self.window.pop_front();
            retired += 1;
        }

        if retired > 0 {
            match sample {
                Some(rtt) => self.timer.record_rtt_sample(rtt),
                None => self.timer.reset(),
            }
            self.retries = 0;
            self.deadline = self
                .window
                .front()
                .map(|_| now + self.timer.rto());
        }
        retired
    }

    /// Retransmit the oldest segment if its deadline has passed.
    ///
    /// Returns `Ok(None)` when nothing is due, the identical segment when a
    /// retransmission is due, and [`ConnError::DeliveryFailure`] once the
    /// retry budget is spent without progress.
    pub fn on_timeout(&mut self, now: Instant) -> Result<Option<Segment>, ConnError> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        if now < deadline {
            return Ok(None);
        }
        let Some(oldest) = self.window.front_mut() else {
            self.deadline = None;
            return Ok(None);
        };

        if self.retries >= self.max_retries {
            return Err(ConnError::DeliveryFailure);
        }
        self.retries += 1;
        oldest.tx_count += 1;
        oldest.sent_at = now;
        let segment = oldest.to_segment();

        self.timer.back_off();
        self.deadline = Some(now + self.timer.rto());
        Ok(Some(segment))
    }

    /// When [`on_timeout`](Self::on_timeout) next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Iterate over outstanding descriptors, oldest first.
    pub fn outstanding(&self) -> impl Iterator<Item = &Descriptor> {
        self.window.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            initial_rto: Duration::from_millis(100),
            max_retries: 3,
            ..Config::default()
        }
    }

    fn window(start: u32) -> SendWindow {
        let mut w = SendWindow::new(start, &config());
        w.set_peer_window(3072);
        w
    }

    #[test]
    fn initial_state() {
        let w = window(100);
        assert_eq!(w.send_base(), 100);
        assert_eq!(w.next_seq(), 100);
        assert!(!w.has_unacked());
        assert_eq!(w.in_flight(), 0);
        assert_eq!(w.max_payload(), 536 - HEADER_LEN);
        assert_eq!(w.next_deadline(), None);
    }

    #[test]
    fn submit_assigns_sequence_and_arms_timer() {
        let now = Instant::now();
        let mut w = window(0);
        let seg = w.submit(&[1, 2, 3], 77, 3072, now).unwrap();

        assert_eq!(seg.header.seq, 0);
        assert_eq!(seg.header.ack, 77);
        assert_eq!(seg.payload, vec![1, 2, 3]);
        assert_eq!(w.next_seq(), 3);
        assert_eq!(w.in_flight(), 3);
        assert_eq!(w.next_deadline(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn oversized_submit_is_rejected_not_truncated() {
        let mut w = window(0);
        let data = vec![0u8; 600];
        let err = w.submit(&data, 0, 0, Instant::now()).unwrap_err();
        assert_eq!(
            err,
            SendError::Oversized {
                len: 600,
                limit: 520
            }
        );
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn max_payload_follows_small_peer_window() {
        let mut w = window(0);
        w.set_peer_window(100);
        assert_eq!(w.max_payload(), 100 - HEADER_LEN);
        w.set_peer_window(8);
        assert_eq!(w.max_payload(), 1);
    }

    #[test]
    fn mss_without_payload_room_accepts_nothing() {
        let mut w = SendWindow::new(
            0,
            &Config {
                mss: 10,
                ..config()
            },
        );
        w.set_peer_window(3072);
        assert_eq!(w.max_payload(), 0);
        assert_eq!(w.writable(), 0);
        let err = w.submit(b"x", 0, 0, Instant::now()).unwrap_err();
        assert_eq!(err, SendError::Oversized { len: 1, limit: 0 });
        assert_eq!(w.in_flight(), 0);

        // Zero-window probing still needs room for a byte after the header.
        w.set_peer_window(0);
        assert_eq!(w.writable(), 0);
    }

    #[test]
    fn full_window_refuses_more() {
        let now = Instant::now();
        let mut w = window(0);
        w.set_peer_window(1000);
        w.submit(&[0u8; 500], 0, 0, now).unwrap();
        w.submit(&[0u8; 500], 0, 0, now).unwrap();
        assert_eq!(w.available(), 0);
        assert_eq!(w.writable(), 0);
        assert_eq!(
            w.submit(&[0u8; 1], 0, 0, now),
            Err(SendError::WindowFull {
                len: 1,
                available: 0
            })
        );

        // An ACK frees capacity again.
        w.on_ack(500, 1000, now);
        assert_eq!(w.available(), 500);
    }

    #[test]
    fn cumulative_ack_retires_multiple() {
        let now = Instant::now();
        let mut w = window(0);
        for _ in 0..3 {
            w.submit(&[0u8; 5], 0, 0, now).unwrap();
        }
        assert_eq!(w.on_ack(15, 3072, now), 3);
        assert_eq!(w.send_base(), 15);
        assert!(!w.has_unacked());
        assert_eq!(w.next_deadline(), None);
    }

    #[test]
    fn ack_inside_segment_does_not_partially_retire() {
        let now = Instant::now();
        let mut w = window(0);
        w.submit(&[0u8; 10], 0, 0, now).unwrap();
        w.submit(&[0u8; 10], 0, 0, now).unwrap();

        assert_eq!(w.on_ack(15, 3072, now), 1);
        assert_eq!(w.send_base(), 10);
        assert_eq!(w.in_flight(), 10);
    }

    #[test]
    fn duplicate_and_out_of_range_acks_ignored() {
        let now = Instant::now();
        let mut w = window(1000);
        w.submit(&[0u8; 5], 0, 0, now).unwrap();

        assert_eq!(w.on_ack(1005, 3072, now), 1);
        assert_eq!(w.on_ack(1005, 3072, now), 0);
        assert_eq!(w.on_ack(999, 3072, now), 0);
        assert_eq!(w.on_ack(5000, 3072, now), 0);
        assert_eq!(w.send_base(), 1005);
    }

    #[test]
    fn timeout_retransmits_oldest_unchanged() {
        let t0 = Instant::now();
        let mut w = window(0);
        let first = w.submit(b"abc", 9, 3072, t0).unwrap();
        w.submit(b"def", 9, 3072, t0).unwrap();

        assert_eq!(w.on_timeout(t0 + Duration::from_millis(50)).unwrap(), None);

        let again = w
            .on_timeout(t0 + Duration::from_millis(100))
            .unwrap()
            .expect("retransmission due");
        assert_eq!(again, first);
        assert_eq!(w.outstanding().next().unwrap().tx_count, 2);
        // Backed off to 200ms from the retransmission.
        assert_eq!(
            w.next_deadline(),
            Some(t0 + Duration::from_millis(300))
        );
    }

    #[test]
    fn retry_budget_exhaustion_is_delivery_failure() {
        let mut now = Instant::now();
        let mut w = window(0);
        w.submit(b"x", 0, 0, now).unwrap();

        for _ in 0..3 {
            now = w.next_deadline().unwrap();
            assert!(w.on_timeout(now).unwrap().is_some());
        }
        now = w.next_deadline().unwrap();
        assert!(matches!(w.on_timeout(now), Err(ConnError::DeliveryFailure)));
    }

    #[test]
    fn progress_resets_retry_budget() {
        let mut now = Instant::now();
        let mut w = window(0);
        w.submit(b"a", 0, 0, now).unwrap();
        w.submit(b"b", 0, 0, now).unwrap();
        for _ in 0..3 {
            now = w.next_deadline().unwrap();
            w.on_timeout(now).unwrap();
        }
        w.on_ack(1, 3072, now);
        now = w.next_deadline().unwrap();
        assert!(w.on_timeout(now).unwrap().is_some());
    }

    #[test]
    fn fin_consumes_one_sequence_number() {
        let now = Instant::now();
        let mut w = window(10);
        w.submit(b"hi", 0, 0, now).unwrap();
        let fin = w.queue_fin(0, 0, now).unwrap();
        assert_eq!(fin.header.seq, 12);
        assert_eq!(w.next_seq(), 13);
        assert_eq!(w.submit(b"late", 0, 0, now), Err(SendError::Closed));

        w.on_ack(12, 3072, now);
        assert!(!w.fin_acked());
        w.on_ack(13, 3072, now);
        assert!(w.fin_acked());
    }

    #[test]
    fn seq_wrap_around() {
        let start = u32::MAX - 5;
        let now = Instant::now();
        let mut w = window(start);
        w.submit(&[0u8; 10], 0, 0, now).unwrap();

        let expected_ack = start.wrapping_add(10);
        assert_eq!(w.on_ack(expected_ack, 3072, now), 1);
        assert_eq!(w.send_base(), expected_ack);
    }

    #[test]
    fn zero_window_allows_single_probe_byte() {
        let now = Instant::now();
        let mut w = window(0);
        w.set_peer_window(0);
        assert_eq!(w.available(), 1);
        w.submit(b"p", 0, 0, now).unwrap();
        assert_eq!(w.available(), 0);
    }
}
