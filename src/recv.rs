//! Receive-side sliding window.
//!
//! [`RecvWindow`] classifies each inbound segment against the next expected
//! sequence number (`RCV.NXT`):
//!
//! - **in-order** (`seq == RCV.NXT`): delivered immediately, then any buffered
//!   segments that have become contiguous are delivered too;
//! - **out-of-order** within `[RCV.NXT, RCV.NXT + capacity)`: buffered by `seq`;
//! - **duplicate** (entirely below `RCV.NXT`): discarded;
//! - **outside the window**: discarded without an acknowledgement.
//!
//! After every classification except the last the caller sends a
//! **cumulative ACK** containing [`ack_number`](RecvWindow::ack_number).
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::BTreeMap;

use crate::seq::{in_window, seq_le, seq_lt};

/// How an inbound segment was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    InOrder,
    Buffered,
    Duplicate,
    OutOfWindow,
}

impl Classification {
    /// Every class except out-of-window is answered with an ACK.
    pub fn needs_ack(self) -> bool {
        self != Classification::OutOfWindow
    }
}

/// Result of [`RecvWindow::on_segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub class: Classification,
    /// Contiguous bytes now ready for the application, in order.
    pub delivered: Vec<u8>,
    /// The peer's FIN became in-order during this call.
    pub fin: bool,
}

/// A segment held back until the gap before it is filled.
#[derive(Debug, Clone)]
struct Pending {
    payload: Vec<u8>,
    is_fin: bool,
}

impl Pending {
    fn length(&self) -> u32 {
        self.payload.len() as u32 + u32::from(self.is_fin)
    }
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct RecvWindow {
    /// Next expected sequence number (`RCV.NXT`).
    expected: u32,
    /// Receive window this side advertises when nothing is buffered.
    capacity: u16,
    /// Out-of-order segments keyed by their starting sequence number.
    buffered: BTreeMap<u32, Pending>,
    buffered_bytes: usize,
    fin_received: bool,
}

impl RecvWindow {
    /// `expected` is the first sequence number expected from the peer; after
    /// a completed handshake this is `peer_isn + 1`.
    pub fn new(expected: u32, capacity: u16) -> Self {
        Self {
            expected,
            capacity,
            buffered: BTreeMap::new(),
            buffered_bytes: 0,
            fin_received: false,
        }
    }

    /// Re-anchor the window once the peer's initial sequence number is known.
    pub fn synchronize(&mut self, expected: u32) {
        self.expected = expected;
        self.buffered.clear();
        self.buffered_bytes = 0;
    }

    /// Cumulative ACK number to place in the next outbound segment.
    pub fn ack_number(&self) -> u32 {
        self.expected
    }

    /// Advertised window: capacity minus bytes parked out of order.
    pub fn window_size(&self) -> u16 {
        let free = usize::from(self.capacity).saturating_sub(self.buffered_bytes);
        free as u16
    }

    /// Bytes currently held out of order.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    /// Classify an inbound segment and deliver whatever became contiguous.
    pub fn on_segment(&mut self, seq: u32, mut payload: Vec<u8>, is_fin: bool) -> Outcome {
        let length = payload.len() as u32 + u32::from(is_fin);
        let end = seq.wrapping_add(length);

        if self.fin_received || length == 0 || seq_le(end, self.expected) {
            return self.outcome(Classification::Duplicate);
        }

        if seq_lt(seq, self.expected) {
            // Straddles the left edge: keep only the new bytes.
            let skip = self.expected.wrapping_sub(seq) as usize;
            payload.drain(..skip.min(payload.len()));
            return self.deliver(payload, is_fin);
        }

        if seq == self.expected {
            return self.deliver(payload, is_fin);
        }

        // Acceptance is judged against the full window, not what is left of
        // it: parked segments must not push the right edge back.
        let span = u32::from(self.capacity);
        if !in_window(seq, self.expected, span) {
            log::trace!(
                "[recv] seq={} outside window [{}, +{})",
                seq,
                self.expected,
                span
            );
            return self.outcome(Classification::OutOfWindow);
        }

        // Trim anything past the right edge; a trimmed FIN is dropped with it.
        let right_edge = self.expected.wrapping_add(span);
        let room = right_edge.wrapping_sub(seq) as usize;
        let is_fin = if payload.len() >= room {
            payload.truncate(room);
            false
        } else {
            is_fin
        };

        let pending = Pending { payload, is_fin };
        self.buffered_bytes += pending.payload.len();
        if let Some(old) = self.buffered.insert(seq, pending) {
            self.buffered_bytes -= old.payload.len();
        }
        self.outcome(Classification::Buffered)
    }

    fn deliver(&mut self, payload: Vec<u8>, is_fin: bool) -> Outcome {
        let mut out = self.outcome(Classification::InOrder);
        self.expected = self.expected.wrapping_add(payload.len() as u32);
        out.delivered = payload;
        if is_fin {
            self.accept_fin(&mut out);
        }
        self.drain_contiguous(&mut out);
        out
    }

    /// Deliver buffered segments that now start at or before `expected`.
    fn drain_contiguous(&mut self, out: &mut Outcome) {
        while !self.fin_received {
            let expected = self.expected;
            let Some(seq) = self.buffered.keys().copied().find(|&k| seq_le(k, expected)) else {
                break;
            };
            let Some(pending) = self.buffered.remove(&seq) else {
                break;
            };
            self.buffered_bytes -= pending.payload.len();

            let end = seq.wrapping_add(pending.length());
            if seq_le(end, expected) {
                continue;
            }
            let skip = (expected.wrapping_sub(seq) as usize).min(pending.payload.len());
            out.delivered.extend_from_slice(&pending.payload[skip..]);
            self.expected = self
                .expected
                .wrapping_add((pending.payload.len() - skip) as u32);
            if pending.is_fin {
                self.accept_fin(out);
            }
        }
    }

    fn accept_fin(&mut self, out: &mut Outcome) {
        self.expected = self.expected.wrapping_add(1);
        self.fin_received = true;
        out.fin = true;
        // Nothing after a FIN can ever be delivered.
        self.buffered.clear();
        self.buffered_bytes = 0;
    }

    fn outcome(&self, class: Classification) -> Outcome {
        Outcome {
            class,
            delivered: Vec::new(),
            fin: false,
        }
    }
}
