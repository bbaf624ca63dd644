//! `stcp`: a TCP-like reliable byte stream over an unreliable datagram
//! channel.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  commands / deliveries  ┌──────────────────────────┐
//!  │    Stream    │◀───────────────────────▶│  event loop (tokio task) │
//!  └──────────────┘                         └────────────┬─────────────┘
//!                                                        │ owns
//!                                  ┌─────────────────────▼─────────────────────┐
//!                                  │                 Context                   │
//!                                  │  state FSM · SendWindow · RecvWindow      │
//!                                  └─────────────────────┬─────────────────────┘
//!                                                        │ encoded segments
//!                                  ┌─────────────────────▼─────────────────────┐
//!                                  │  Datagram: UDP Socket | simulator Link    │
//!                                  └───────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]    : wire format (serialise / deserialise, checksum)
//! - [`seq`]        : wrap-around sequence-number comparisons
//! - [`state`]      : finite-state-machine types and transition table
//! - [`send`]       : outbound sliding window and retransmission
//! - [`recv`]       : inbound classification and reassembly
//! - [`timer`]      : adaptive retransmission timeout
//! - [`context`]    : per-connection state and data-path handlers
//! - [`handshake`]  : connection setup and teardown handlers
//! - [`connection`] : event loop and async application handle
//! - [`socket`]     : datagram transport trait and UDP socket
//! - [`simulator`]  : lossy/reordering in-memory network for testing
//! - [`config`]     : tunable protocol parameters
//! - [`error`]      : error types

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod handshake;
pub mod recv;
pub mod segment;
pub mod send;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::Config;
pub use connection::{Connection, Stream};
pub use error::ConnError;
pub use socket::{Datagram, Socket};
