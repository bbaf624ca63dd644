//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a connection can occupy and the single
//! table of legal transitions.  The handshake and teardown handlers never
//! assign a state directly; they ask [`ConnectionState::next`] and drop the
//! triggering segment when the pair is not in the table.
//!
//! ```text
//!  Closed ──open──▶ SynSent ──SYN+ACK──▶ Established ◀──ACK── SynReceived ◀──SYN── Listen
//!                                          │      │
//!                                   close  │      │ FIN
//!                                          ▼      ▼
//!                                  FinWait1      CloseWait
//!                        FIN-ack ╱      ╲ FIN        │ close
//!                               ▼        ▼           ▼
//!                        FinWait2      Closing     LastAck
//!                              ╲ FIN     ╱ FIN-ack    │ FIN-ack
//!                               ▼       ▼             ▼
//!                               TimeWait ──linger──▶ Closed
//! ```

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// Passive side waiting for a SYN.
    Listen,
    /// SYN has been sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received; SYN+ACK sent; waiting for ACK.
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// Local FIN sent, not yet acknowledged.
    FinWait1,
    /// Local FIN acknowledged; waiting for the peer's FIN.
    FinWait2,
    /// Peer's FIN received; local close pending.
    CloseWait,
    /// Both sides sent FIN before either was acknowledged.
    Closing,
    /// Local FIN sent after the peer's; waiting for its ACK.
    LastAck,
    /// Both FINs exchanged; re-acknowledging stray FIN retransmissions.
    TimeWait,
}

/// Inputs that drive the FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Application requested an active open.
    Connect,
    /// Application requested a passive open.
    Listen,
    /// A SYN arrived.
    SynArrived,
    /// A SYN+ACK acknowledging our SYN arrived.
    SynAckArrived,
    /// An ACK covering our SYN arrived.
    SynAcked,
    /// The application asked to close its sending direction.
    Close,
    /// The peer's FIN became in-order.
    FinArrived,
    /// An ACK covering our FIN arrived.
    FinAcked,
    /// The TIME-WAIT linger elapsed.
    LingerElapsed,
    /// A fatal error was recorded.
    Abort,
}

impl ConnectionState {
    /// Look up the state reached from `self` on `event`.
    ///
    /// Returns `None` for pairs the protocol does not expect; the caller
    /// drops the input and stays put.
    pub fn next(self, event: Transition) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Transition as T;

        let next = match (self, event) {
            (_, T::Abort) => Closed,

            (Closed, T::Connect) => SynSent,
            (Closed, T::Listen) => Listen,
            (Listen, T::SynArrived) => SynReceived,
            (SynSent, T::SynAckArrived) => Established,
            (SynReceived, T::SynAcked) => Established,
            (Listen | SynSent | SynReceived, T::Close) => Closed,

            (Established, T::Close) => FinWait1,
            (Established, T::FinArrived) => CloseWait,
            (CloseWait, T::Close) => LastAck,

            (FinWait1, T::FinAcked) => FinWait2,
            (FinWait1, T::FinArrived) => Closing,
            (FinWait2, T::FinArrived) => TimeWait,
            (Closing, T::FinAcked) => TimeWait,
            (LastAck, T::FinAcked) => Closed,
            (TimeWait, T::LingerElapsed) => Closed,

            _ => return None,
        };
        Some(next)
    }

    /// `true` once both sides have exchanged initial sequence numbers.
    pub fn is_synchronized(self) -> bool {
        !matches!(
            self,
            ConnectionState::Closed
                | ConnectionState::Listen
                | ConnectionState::SynSent
                | ConnectionState::SynReceived
        )
    }

    /// `true` while the local application may still queue bytes.
    pub fn can_send(self) -> bool {
        matches!(self, ConnectionState::Established | ConnectionState::CloseWait)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynReceived => "SYN_RCVD",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait1 => "FIN_WAIT_1",
            ConnectionState::FinWait2 => "FIN_WAIT_2",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::LastAck => "LAST_ACK",
            ConnectionState::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}
