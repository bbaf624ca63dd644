//! Error types.
//!
//! Only [`ConnError`] ever reaches the application.  [`DecodeError`] is
//! absorbed by the receive path (noise on the channel is dropped) and
//! [`SendError`] is handled by the event loop before it can surface.

use std::io;

use thiserror::Error;

/// Reasons a raw datagram is not a valid segment.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram of {0} bytes is shorter than the header")]
    TooShort(usize),
    #[error("header length field {0} is out of range")]
    BadOffset(u16),
    #[error("checksum verification failed")]
    Checksum,
}

/// Reasons the send window refuses application bytes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("{len} bytes exceed the per-segment limit of {limit}")]
    Oversized { len: usize, limit: usize },
    #[error("{len} bytes exceed the {available} bytes of window left")]
    WindowFull { len: usize, available: usize },
    #[error("the sending direction is already closed")]
    Closed,
}

/// Terminal connection errors surfaced to the application.
#[derive(Error, Debug)]
pub enum ConnError {
    /// The handshake retry budget ran out without an answer.
    #[error("connection refused: no handshake response")]
    ConnectionRefused,
    /// A data segment exhausted its retransmission budget.
    #[error("delivery failure: retransmission budget exhausted")]
    DeliveryFailure,
    /// The underlying channel refused a datagram.
    #[error("transmit error: {0}")]
    Transmit(#[source] io::Error),
    /// The underlying channel failed while receiving.
    #[error("receive error: {0}")]
    Receive(#[source] io::Error),
    /// The connection was aborted earlier; the stream is unusable.
    #[error("broken stream")]
    Broken,
    /// The application already closed its sending direction.
    #[error("stream closed for writing")]
    Closed,
}
