//! Per-connection state and the synchronous handlers that mutate it.
//!
//! A [`Context`] owns everything one connection knows: the FSM state, both
//! sliding windows, the pending handshake retransmission, and two output
//! queues.  Handlers never perform I/O.  Segments to transmit accumulate in
//! the outbox and application-visible events in the delivery queue; the
//! event loop in [`crate::connection`] drains both after every call.
//!
//! The handshake and teardown handlers live in [`crate::handshake`]; this
//! module routes inbound segments and runs the data path.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::Config;
use crate::error::{ConnError, SendError};
use crate::recv::RecvWindow;
use crate::segment::{flags, Segment};
use crate::send::SendWindow;
use crate::state::{ConnectionState, Transition};

/// Which side of the handshake this context plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the SYN.
    Active,
    /// Waits for a SYN.
    Passive,
}

/// Something the application must be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// In-order stream bytes.
    Data(Vec<u8>),
    /// The peer closed its sending direction; no more data will follow.
    EndOfStream,
}

/// The last SYN or SYN+ACK, kept for retransmission.
#[derive(Debug)]
pub(crate) struct HandshakeRetry {
    pub(crate) segment: Segment,
    pub(crate) deadline: Instant,
    pub(crate) rto: Duration,
    pub(crate) retries: u32,
}

/// All state of one connection.  Owned by exactly one event loop.
#[derive(Debug)]
pub struct Context {
    pub(crate) config: Config,
    pub(crate) role: Role,
    pub(crate) state: ConnectionState,
    /// Our initial sequence number.
    pub(crate) iss: u32,
    /// The peer's initial sequence number, once known.
    pub(crate) irs: Option<u32>,
    pub(crate) send: SendWindow,
    pub(crate) recv: RecvWindow,
    pub(crate) handshake: Option<HandshakeRetry>,
    pub(crate) linger_deadline: Option<Instant>,
    /// Set by `open`; distinguishes the initial `Closed` from the final one.
    pub(crate) opened: bool,
    pub(crate) outbox: VecDeque<Segment>,
    pub(crate) deliveries: VecDeque<Delivery>,
    pub(crate) error: Option<ConnError>,
}

impl Context {
    /// Build a context in [`ConnectionState::Closed`].
    ///
    /// The initial sequence number is random unless `config.initial_seq`
    /// pins it.
    pub fn new(config: Config, role: Role) -> Self {
        let iss = config
            .initial_seq
            .unwrap_or_else(|| rand::rng().random());
        let send = SendWindow::new(iss.wrapping_add(1), &config);
        let recv = RecvWindow::new(0, config.window);
        Self {
            config,
            role,
            state: ConnectionState::Closed,
            iss,
            irs: None,
            send,
            recv,
            handshake: None,
            linger_deadline: None,
            opened: false,
            outbox: VecDeque::new(),
            deliveries: VecDeque::new(),
            error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn iss(&self) -> u32 {
        self.iss
    }

    pub fn irs(&self) -> Option<u32> {
        self.irs
    }

    /// Next sequence number this side will assign.
    pub fn local_next_seq(&self) -> u32 {
        self.send.next_seq()
    }

    /// Next sequence number expected from the peer.
    pub fn peer_expected_seq(&self) -> u32 {
        self.recv.ack_number()
    }

    /// Window this side currently advertises.
    pub fn local_window(&self) -> u16 {
        self.recv.window_size()
    }

    /// Window the peer last advertised.
    pub fn peer_window(&self) -> u16 {
        self.send.peer_window()
    }

    pub fn send_window(&self) -> &SendWindow {
        &self.send
    }

    pub fn recv_window(&self) -> &RecvWindow {
        &self.recv
    }

    pub fn is_established(&self) -> bool {
        self.state.is_synchronized()
    }

    /// `true` once the connection has run to completion or failed.
    pub fn is_closed(&self) -> bool {
        self.opened && self.state == ConnectionState::Closed
    }

    pub fn error(&self) -> Option<&ConnError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<ConnError> {
        self.error.take()
    }

    /// Segments waiting to be transmitted, oldest first.
    pub fn take_outbox(&mut self) -> VecDeque<Segment> {
        std::mem::take(&mut self.outbox)
    }

    /// Application events produced since the last call, in order.
    pub fn take_deliveries(&mut self) -> VecDeque<Delivery> {
        std::mem::take(&mut self.deliveries)
    }

    /// Bytes the next [`write`](Self::write) may carry.
    pub fn writable(&self) -> usize {
        if !self.state.can_send() {
            return 0;
        }
        self.send.writable()
    }

    /// Hand application bytes to the send window as one segment.
    pub fn write(&mut self, data: &[u8], now: Instant) -> Result<usize, SendError> {
        if !self.state.can_send() {
            return Err(SendError::Closed);
        }
        let segment =
            self.send
                .submit(data, self.recv.ack_number(), self.recv.window_size(), now)?;
        log::debug!(
            "[ctx] → DATA seq={} len={} in_flight={}",
            segment.header.seq,
            data.len(),
            self.send.in_flight()
        );
        self.outbox.push_back(segment);
        Ok(data.len())
    }

    /// Decode a raw datagram and process it; malformed input is dropped.
    pub fn on_datagram(&mut self, bytes: &[u8], now: Instant) {
        match Segment::decode(bytes) {
            Ok(segment) => self.on_segment(segment, now),
            Err(e) => log::trace!("[ctx] dropping malformed datagram: {e}"),
        }
    }

    /// Route one decoded segment according to the current state.
    pub fn on_segment(&mut self, segment: Segment, now: Instant) {
        log::trace!(
            "[ctx] ← seq={} ack={} flags={:#04x} win={} len={} in {}",
            segment.header.seq,
            segment.header.ack,
            segment.header.flags,
            segment.header.window,
            segment.payload.len(),
            self.state
        );
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Listen
            | ConnectionState::SynSent
            | ConnectionState::SynReceived => self.on_handshake_segment(segment, now),
            _ => self.on_synchronized_segment(segment, now),
        }
    }

    /// Data path for every state after the handshake.
    pub(crate) fn on_synchronized_segment(&mut self, segment: Segment, now: Instant) {
        if segment.is_syn() {
            // A retransmitted SYN or SYN+ACK means our final ACK was lost.
            if Some(segment.header.seq) == self.irs {
                self.queue_ack();
            }
            return;
        }
        if !segment.is_ack() {
            log::trace!("[ctx] dropping segment without ACK");
            return;
        }

        let fin_was_acked = self.send.fin_acked();
        let retired = self
            .send
            .on_ack(segment.header.ack, segment.header.window, now);
        if retired > 0 {
            log::debug!(
                "[ctx] ← ACK ack={} retired={} in_flight={}",
                segment.header.ack,
                retired,
                self.send.in_flight()
            );
        }
        if !fin_was_acked && self.send.fin_acked() {
            self.on_fin_acked(now);
        }

        if segment.payload.is_empty() && !segment.is_fin() {
            return;
        }

        let seq = segment.header.seq;
        let is_fin = segment.is_fin();
        let outcome = self.recv.on_segment(seq, segment.payload, is_fin);
        log::debug!(
            "[ctx] ← DATA seq={} {:?} delivered={} ack={}",
            seq,
            outcome.class,
            outcome.delivered.len(),
            self.recv.ack_number()
        );
        if !outcome.delivered.is_empty() {
            self.deliveries.push_back(Delivery::Data(outcome.delivered));
        }
        if outcome.fin {
            self.deliveries.push_back(Delivery::EndOfStream);
            self.on_fin_arrived(now);
        } else if self.state == ConnectionState::TimeWait {
            // The peer did not see our last ACK; stay around a little longer.
            self.linger_deadline = Some(now + self.config.linger);
        }
        if outcome.class.needs_ack() {
            self.queue_ack();
        }
    }

    /// Fire every timer whose deadline has passed.
    pub fn on_tick(&mut self, now: Instant) {
        self.on_handshake_tick(now);
        if self.state == ConnectionState::Closed {
            return;
        }

        match self.send.on_timeout(now) {
            Ok(Some(segment)) => {
                log::warn!(
                    "[ctx] timeout; retransmitting seq={} len={}",
                    segment.header.seq,
                    segment.payload.len()
                );
                self.outbox.push_back(segment);
            }
            Ok(None) => {}
            Err(e) => self.fail(e),
        }

        if let Some(deadline) = self.linger_deadline {
            if now >= deadline {
                self.linger_deadline = None;
                self.transition(Transition::LingerElapsed);
            }
        }
    }

    /// Earliest instant at which [`on_tick`](Self::on_tick) has work to do.
    pub fn poll_deadline(&self) -> Option<Instant> {
        [
            self.handshake.as_ref().map(|h| h.deadline),
            self.send.next_deadline(),
            self.linger_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Record a terminal error and drop to `Closed`.
    ///
    /// Only the first error is kept.
    pub fn fail(&mut self, error: ConnError) {
        log::warn!("[ctx] aborting in {}: {error}", self.state);
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.handshake = None;
        self.linger_deadline = None;
        self.transition(Transition::Abort);
    }

    /// Apply `event` through the transition table.
    ///
    /// Returns `false`, leaving the state untouched, when the pair is not in
    /// the table.
    pub(crate) fn transition(&mut self, event: Transition) -> bool {
        match self.state.next(event) {
            Some(next) => {
                if next != self.state {
                    log::debug!("[ctx] {} --{:?}--> {}", self.state, event, next);
                }
                self.state = next;
                true
            }
            None => {
                log::trace!("[ctx] ignoring {:?} in {}", event, self.state);
                false
            }
        }
    }

    /// Pure ACK reflecting the current send and receive state.
    pub(crate) fn ack_segment(&self) -> Segment {
        Segment::control(
            self.send.next_seq(),
            self.recv.ack_number(),
            flags::ACK,
            self.recv.window_size(),
        )
    }

    pub(crate) fn queue_ack(&mut self) {
        let ack = self.ack_segment();
        self.outbox.push_back(ack);
    }
}
