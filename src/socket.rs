//! Datagram transport abstraction.
//!
//! The event loop talks to the network through [`Datagram`], which moves
//! whole datagrams and nothing else.  [`Socket`] implements it on top of
//! `tokio::net::UdpSocket`; [`crate::simulator::Link`] implements it in
//! memory for tests.  All protocol logic lives elsewhere; this module owns
//! only byte I/O.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::OnceLock;

use tokio::net::UdpSocket;

/// Largest datagram the transports will hand back.
pub const MAX_DATAGRAM: usize = 65_535;

/// An unreliable, message-oriented channel to exactly one peer.
///
/// Implementations may drop, duplicate or reorder datagrams but never split
/// or merge them.  Both methods take `&self` so the transport can be shared.
pub trait Datagram: Send + Sync + 'static {
    /// Send one datagram to the peer.
    fn send(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Wait for the next datagram from the peer and copy it into `buf`.
    ///
    /// Must be cancel-safe: the event loop races it against timers.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// A UDP socket bound to one peer.
///
/// An active opener names the peer up front with [`with_peer`](Self::with_peer).
/// A passive opener leaves it unset; the first datagram received fixes the
/// peer and everything from other addresses is ignored afterwards.
#[derive(Debug)]
pub struct Socket {
    inner: UdpSocket,
    local_addr: SocketAddr,
    peer: OnceLock<SocketAddr>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port; the resolved
    /// address is available from [`local_addr`](Self::local_addr).
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[socket] bound {local_addr}");
        Ok(Self {
            inner,
            local_addr,
            peer: OnceLock::new(),
        })
    }

    /// Bind an ephemeral port of the right address family and target `peer`.
    pub async fn connect_to(peer: SocketAddr) -> io::Result<Self> {
        let any: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        Ok(Self::bind(any).await?.with_peer(peer))
    }

    /// Fix the peer address.  Has no effect if a peer is already known.
    pub fn with_peer(self, peer: SocketAddr) -> Self {
        let _ = self.peer.set(peer);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The peer, once known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.get().copied()
    }
}

impl Datagram for Socket {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let peer = self
            .peer()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "peer address not known yet"))?;
        self.inner.send_to(buf, peer).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (n, from) = self.inner.recv_from(buf).await?;
            let peer = *self.peer.get_or_init(|| {
                log::info!("[socket] {} locked onto peer {from}", self.local_addr);
                from
            });
            if from == peer {
                return Ok(n);
            }
            log::trace!("[socket] ignoring {n} bytes from stranger {from}");
        }
    }
}
