//! In-memory lossy network for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`pair`] builds two connected [`Link`]s that implement
//! [`Datagram`] and apply a configurable fault model on every send:
//!
//! | Fault        | Description                                          |
//! |--------------|------------------------------------------------------|
//! | Packet loss  | Drop a datagram with probability `loss_rate`.        |
//! | Duplication  | Deliver a datagram twice.                            |
//! | Reordering   | Hold a datagram back by `reorder_delay`, letting     |
//! |              | later datagrams overtake it.                         |
//! | Corruption   | Flip one random bit; the checksum must catch it.     |
//!
//! Each link draws from its own `StdRng` seeded from `seed`, so a failing
//! run can be replayed.  A link whose peer is gone swallows sends and never
//! receives again, like a UDP socket whose peer went away.

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::Datagram;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is held back.
    pub reorder_rate: f64,
    /// Extra delay applied to held-back datagrams.
    pub reorder_delay: Duration,
    /// Probability that one bit of a datagram is flipped.
    pub corrupt_rate: f64,
    /// RNG seed; the two directions use `seed` and `seed + 1`.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(20),
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

/// What the fault model decided for one datagram.
#[derive(Debug, Default)]
struct Fate {
    lost: bool,
    copies: usize,
    delayed: bool,
    flip_bit: Option<usize>,
}

/// One end of a simulated channel.
#[derive(Debug)]
pub struct Link {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
}

/// Build two connected endpoints sharing one fault model.
pub fn pair(config: SimulatorConfig) -> (Link, Link) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let a = Link {
        tx: a_tx,
        rx: tokio::sync::Mutex::new(a_rx),
        rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
        config: config.clone(),
    };
    let b = Link {
        tx: b_tx,
        rx: tokio::sync::Mutex::new(b_rx),
        rng: Mutex::new(StdRng::seed_from_u64(config.seed.wrapping_add(1))),
        config,
    };
    (a, b)
}

impl Link {
    fn roll(&self, len: usize) -> Fate {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let c = &self.config;
        if rng.random_bool(c.loss_rate) {
            return Fate {
                lost: true,
                ..Fate::default()
            };
        }
        Fate {
            lost: false,
            copies: if rng.random_bool(c.duplicate_rate) { 2 } else { 1 },
            delayed: rng.random_bool(c.reorder_rate),
            flip_bit: (len > 0 && rng.random_bool(c.corrupt_rate))
                .then(|| rng.random_range(0..len * 8)),
        }
    }
}

impl Datagram for Link {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let fate = self.roll(buf.len());
        if fate.lost {
            log::trace!("[sim] dropped {} bytes", buf.len());
            return Ok(buf.len());
        }

        let mut bytes = buf.to_vec();
        if let Some(bit) = fate.flip_bit {
            log::trace!("[sim] flipping bit {bit}");
            bytes[bit / 8] ^= 1 << (bit % 8);
        }
        if fate.copies > 1 {
            log::trace!("[sim] duplicating {} bytes", buf.len());
        }

        for _ in 0..fate.copies {
            let copy = bytes.clone();
            if fate.delayed {
                let tx = self.tx.clone();
                let delay = self.config.reorder_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(copy);
                });
            } else {
                // A closed peer behaves like an unreachable host: silence.
                let _ = self.tx.send(copy);
            }
        }
        Ok(buf.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            None => std::future::pending().await,
        }
    }
}
