//! End-to-end stream tests over the in-memory simulator.
//!
//! Both endpoints run as separate tokio tasks talking through a
//! [`simulator::pair`], with and without injected faults.  Every test checks
//! that the receiver sees exactly the bytes the sender wrote and that both
//! sides finish cleanly.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use stcp::context::{Context, Role};
use stcp::simulator::{self, SimulatorConfig};
use stcp::socket::MAX_DATAGRAM;
use stcp::{Config, ConnError, Connection, Datagram};

/// Timers scaled down for an in-process channel, with enough retries to
/// ride out heavy loss.
fn lossy_tolerant() -> Config {
    Config {
        initial_rto: Duration::from_millis(30),
        min_rto: Duration::from_millis(10),
        max_rto: Duration::from_millis(100),
        max_retries: 40,
        handshake_retries: 40,
        linger: Duration::from_secs(1),
        poll_interval: Duration::from_millis(20),
        ..Config::default()
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Send `data` from a client to a server over a simulated link and return
/// what the server read.
async fn transfer(sim: SimulatorConfig, config: Config, data: Vec<u8>) -> Vec<u8> {
    let (client_link, server_link) = simulator::pair(sim);

    let server_config = config.clone();
    let server = tokio::spawn(async move {
        let mut stream = Connection::accept(server_link, server_config).await?;
        let got = stream.read_to_end().await?;
        stream.finish().await?;
        Ok::<_, ConnError>(got)
    });

    let client = tokio::spawn(async move {
        let mut stream = Connection::connect(client_link, config).await?;
        stream.write(&data).await?;
        stream.finish().await
    });

    let (server, client) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(server, client)
    })
    .await
    .expect("transfer timed out");
    client.unwrap().expect("client failed");
    server.unwrap().expect("server failed")
}

#[tokio::test]
async fn clean_link_delivers_stream() {
    let data = payload(20_000);
    let got = transfer(SimulatorConfig::default(), lossy_tolerant(), data.clone()).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn lossy_link_delivers_stream() {
    let sim = SimulatorConfig {
        loss_rate: 0.1,
        seed: 7,
        ..SimulatorConfig::default()
    };
    let data = payload(12_000);
    let got = transfer(sim, lossy_tolerant(), data.clone()).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn reordering_and_duplication_are_hidden() {
    let sim = SimulatorConfig {
        reorder_rate: 0.2,
        reorder_delay: Duration::from_millis(15),
        duplicate_rate: 0.2,
        seed: 42,
        ..SimulatorConfig::default()
    };
    let data = payload(12_000);
    let got = transfer(sim, lossy_tolerant(), data.clone()).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn corrupted_datagrams_are_discarded_and_recovered() {
    let sim = SimulatorConfig {
        corrupt_rate: 0.1,
        seed: 3,
        ..SimulatorConfig::default()
    };
    let data = payload(8_000);
    let got = transfer(sim, lossy_tolerant(), data.clone()).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn small_window_and_segment_still_deliver() {
    let config = Config {
        mss: 64,
        window: 200,
        send_capacity: 200,
        ..lossy_tolerant()
    };
    let data = payload(5_000);
    let got = transfer(SimulatorConfig::default(), config, data.clone()).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn both_directions_carry_data() {
    let (a, b) = simulator::pair(SimulatorConfig {
        loss_rate: 0.05,
        seed: 11,
        ..SimulatorConfig::default()
    });
    let request = payload(3_000);
    let reply: Vec<u8> = payload(4_000).into_iter().rev().collect();

    let expected_request = request.clone();
    let server_reply = reply.clone();
    let server = tokio::spawn(async move {
        let mut stream = Connection::accept(b, lossy_tolerant()).await?;
        let got = stream.read_to_end().await?;
        stream.write(&server_reply).await?;
        stream.finish().await?;
        Ok::<_, ConnError>(got)
    });

    let mut client = Connection::connect(a, lossy_tolerant()).await.unwrap();
    client.write(&request).await.unwrap();
    client.close().await.unwrap();
    let got_reply = client.read_to_end().await.unwrap();
    client.finish().await.unwrap();

    assert_eq!(got_reply, reply);
    assert_eq!(server.await.unwrap().unwrap(), expected_request);
}

#[tokio::test]
async fn vanished_peer_aborts_with_delivery_failure() {
    let (a, b) = simulator::pair(SimulatorConfig::default());

    // Drive the passive side by hand through the handshake, then drop the
    // link so nothing the client sends afterwards is ever answered.
    let server = tokio::spawn(async move {
        let mut ctx = Context::new(Config::default(), Role::Passive);
        ctx.open(Instant::now());
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !ctx.is_established() {
            let n = b.recv(&mut buf).await.unwrap();
            ctx.on_datagram(&buf[..n], Instant::now());
            for segment in ctx.take_outbox() {
                b.send(&segment.encode()).await.unwrap();
            }
        }
    });

    let config = Config {
        initial_rto: Duration::from_millis(10),
        min_rto: Duration::from_millis(10),
        max_rto: Duration::from_millis(20),
        max_retries: 3,
        ..Config::default()
    };
    let mut client = Connection::connect(a, config).await.unwrap();
    server.await.unwrap();

    client.write(b"into the void").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), client.finish())
        .await
        .expect("abort not detected");
    assert!(matches!(result, Err(ConnError::DeliveryFailure)));
}

/// A link whose outbound side can be cut while the connection is running.
struct Severable {
    inner: simulator::Link,
    cut: Arc<AtomicBool>,
}

impl Datagram for Severable {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.cut.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link cut"));
        }
        self.inner.send(buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }
}

#[tokio::test]
async fn transport_send_failure_aborts_with_transmit_error() {
    let (a, b) = simulator::pair(SimulatorConfig::default());
    let server = tokio::spawn(async move {
        let mut stream = Connection::accept(b, lossy_tolerant()).await?;
        stream.read_to_end().await
    });

    let cut = Arc::new(AtomicBool::new(false));
    let link = Severable {
        inner: a,
        cut: Arc::clone(&cut),
    };
    let mut client = Connection::connect(link, lossy_tolerant()).await.unwrap();

    cut.store(true, Ordering::SeqCst);
    client.write(b"never leaves").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), client.finish())
        .await
        .expect("send failure not surfaced");
    match result {
        Err(ConnError::Transmit(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("expected a transmit error, got {other:?}"),
    }
    server.abort();
}
