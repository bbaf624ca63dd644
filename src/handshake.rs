//! Connection setup and teardown handlers.
//!
//! These are the parts of [`Context`] that move the FSM through the
//! three-way handshake and the FIN exchange:
//!
//! ```text
//!  active:   SYN ──────────▶            passive:  ◀────────── SYN
//!            ◀────────── SYN+ACK                  SYN+ACK ──────────▶
//!            ACK ──────────▶                      ◀────────── ACK
//! ```
//!
//! The last SYN or SYN+ACK is retransmitted with exponential back-off until
//! answered; once `Config::handshake_retries` retransmissions go unanswered
//! the open fails with [`ConnError::ConnectionRefused`].  Control segments
//! that the current state does not expect are dropped.

use std::time::Instant;

use crate::context::{Context, HandshakeRetry, Role};
use crate::error::ConnError;
use crate::segment::{flags, Segment};
use crate::state::{ConnectionState, Transition};

impl Context {
    /// Start the connection: send a SYN (active) or start listening (passive).
    ///
    /// Calling `open` more than once has no effect.
    pub fn open(&mut self, now: Instant) {
        if self.opened {
            return;
        }
        self.opened = true;
        match self.role {
            Role::Active => {
                self.transition(Transition::Connect);
                let syn = Segment::control(self.iss, 0, flags::SYN, self.recv.window_size());
                log::debug!("[hs] → SYN seq={}", self.iss);
                self.arm_handshake(syn, now);
            }
            Role::Passive => {
                self.transition(Transition::Listen);
            }
        }
    }

    /// Application close request for the sending direction.
    ///
    /// Sends a FIN after all queued data when established (or after the peer
    /// already closed); abandons an unfinished handshake; otherwise ignored.
    pub fn close(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Established | ConnectionState::CloseWait => {
                let fin = match self.send.queue_fin(
                    self.recv.ack_number(),
                    self.recv.window_size(),
                    now,
                ) {
                    Ok(fin) => fin,
                    Err(e) => {
                        log::debug!("[hs] close ignored: {e}");
                        return;
                    }
                };
                log::debug!("[hs] → FIN seq={}", fin.header.seq);
                self.transition(Transition::Close);
                self.outbox.push_back(fin);
            }
            ConnectionState::Listen | ConnectionState::SynSent | ConnectionState::SynReceived => {
                self.handshake = None;
                self.transition(Transition::Close);
            }
            _ => log::trace!("[hs] close ignored in {}", self.state),
        }
    }

    /// Handle a segment while the handshake is in progress.
    pub(crate) fn on_handshake_segment(&mut self, segment: Segment, now: Instant) {
        let expected_ack = self.iss.wrapping_add(1);
        match self.state {
            ConnectionState::Listen if segment.is_syn() && !segment.is_ack() => {
                self.learn_peer(&segment);
                self.transition(Transition::SynArrived);
                let syn_ack = Segment::control(
                    self.iss,
                    self.recv.ack_number(),
                    flags::SYN | flags::ACK,
                    self.recv.window_size(),
                );
                log::debug!(
                    "[hs] ← SYN seq={}; → SYN+ACK seq={} ack={}",
                    segment.header.seq,
                    self.iss,
                    self.recv.ack_number()
                );
                self.arm_handshake(syn_ack, now);
            }
            ConnectionState::SynSent
                if segment.is_syn() && segment.is_ack() && segment.header.ack == expected_ack =>
            {
                self.learn_peer(&segment);
                self.transition(Transition::SynAckArrived);
                self.handshake = None;
                self.queue_ack();
                log::info!(
                    "[hs] established (active) iss={} irs={} peer_window={}",
                    self.iss,
                    segment.header.seq,
                    segment.header.window
                );
            }
            ConnectionState::SynReceived
                if segment.is_syn() && !segment.is_ack() && Some(segment.header.seq) == self.irs =>
            {
                // Our SYN+ACK was lost; answer the retransmitted SYN at once.
                if let Some(retry) = &self.handshake {
                    self.outbox.push_back(retry.segment.clone());
                }
            }
            ConnectionState::SynReceived
                if !segment.is_syn() && segment.is_ack() && segment.header.ack == expected_ack =>
            {
                self.send.set_peer_window(segment.header.window);
                self.transition(Transition::SynAcked);
                self.handshake = None;
                log::info!(
                    "[hs] established (passive) iss={} irs={:?} peer_window={}",
                    self.iss,
                    self.irs,
                    segment.header.window
                );
                // The final ACK may be piggybacked on the first data.
                if !segment.payload.is_empty() || segment.is_fin() {
                    self.on_synchronized_segment(segment, now);
                }
            }
            _ => log::trace!(
                "[hs] dropping flags={:#04x} in {}",
                segment.header.flags,
                self.state
            ),
        }
    }

    /// Retransmit the pending SYN / SYN+ACK if its deadline passed.
    pub(crate) fn on_handshake_tick(&mut self, now: Instant) {
        let Some(retry) = self.handshake.as_mut() else {
            return;
        };
        if now < retry.deadline {
            return;
        }
        if retry.retries >= self.config.handshake_retries {
            self.fail(ConnError::ConnectionRefused);
            return;
        }
        retry.retries += 1;
        retry.rto = (retry.rto * 2).min(self.config.max_rto);
        retry.deadline = now + retry.rto;
        log::warn!(
            "[hs] no answer in {}; retransmitting (attempt {})",
            self.state,
            retry.retries
        );
        let segment = retry.segment.clone();
        self.outbox.push_back(segment);
    }

    /// The peer's FIN became in-order.
    pub(crate) fn on_fin_arrived(&mut self, now: Instant) {
        log::debug!("[hs] ← FIN in {}", self.state);
        if self.transition(Transition::FinArrived) {
            self.enter_time_wait(now);
        }
    }

    /// An ACK covering our FIN arrived.
    pub(crate) fn on_fin_acked(&mut self, now: Instant) {
        log::debug!("[hs] ← ACK of FIN in {}", self.state);
        if self.transition(Transition::FinAcked) {
            self.enter_time_wait(now);
            if self.state == ConnectionState::Closed {
                log::info!("[hs] connection closed");
            }
        }
    }

    fn enter_time_wait(&mut self, now: Instant) {
        if self.state == ConnectionState::TimeWait {
            self.linger_deadline = Some(now + self.config.linger);
        }
    }

    fn learn_peer(&mut self, segment: &Segment) {
        self.irs = Some(segment.header.seq);
        self.recv.synchronize(segment.header.seq.wrapping_add(1));
        self.send.set_peer_window(segment.header.window);
    }

    fn arm_handshake(&mut self, segment: Segment, now: Instant) {
        let rto = self.config.initial_rto;
        self.outbox.push_back(segment.clone());
        self.handshake = Some(HandshakeRetry {
            segment,
            deadline: now + rto,
            rto,
            retries: 0,
        });
    }
}
