//! Entry point for `stcp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing) and stdio plumbing.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use stcp::config::{DEFAULT_MSS, DEFAULT_WINDOW};
use stcp::segment::HEADER_LEN;
use stcp::{Config, Connection, Socket};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept one connection and copy the received stream to stdout.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Connect to a server and send stdin over the connection.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
    },
}

/// Protocol knobs shared by both modes.
#[derive(Args)]
struct Tuning {
    /// Maximum segment size in bytes, header included.
    #[arg(long, global = true, default_value_t = DEFAULT_MSS)]
    mss: usize,
    /// Receive window to advertise, in bytes.
    #[arg(long, global = true, default_value_t = DEFAULT_WINDOW)]
    window: u16,
    /// Initial retransmission timeout in milliseconds.
    #[arg(long = "rto-ms", global = true, default_value_t = 1000)]
    rto_ms: u64,
    /// Retransmissions without progress before giving up.
    #[arg(long, global = true, default_value_t = 6)]
    retries: u32,
}

impl Tuning {
    fn config(&self) -> anyhow::Result<Config> {
        anyhow::ensure!(
            self.mss > HEADER_LEN,
            "--mss {} leaves no room for payload after the {HEADER_LEN}-byte header",
            self.mss
        );
        Ok(Config {
            mss: self.mss,
            window: self.window,
            send_capacity: usize::from(self.window),
            initial_rto: Duration::from_millis(self.rto_ms),
            max_retries: self.retries,
            handshake_retries: self.retries,
            ..Config::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.config()?;

    match cli.mode {
        Mode::Server { bind } => serve(bind, config).await,
        Mode::Client { server } => send_stdin(server, config).await,
    }
}

async fn serve(bind: SocketAddr, config: Config) -> anyhow::Result<()> {
    let socket = Socket::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    log::info!("Listening on {}", socket.local_addr());

    let mut stream = Connection::accept(socket, config)
        .await
        .context("accepting connection")?;

    let mut stdout = tokio::io::stdout();
    let mut total = 0usize;
    while let Some(bytes) = stream.read().await? {
        total += bytes.len();
        stdout.write_all(&bytes).await?;
    }
    stdout.flush().await?;

    stream.finish().await.context("closing connection")?;
    log::info!("Received {total} bytes");
    Ok(())
}

async fn send_stdin(server: SocketAddr, config: Config) -> anyhow::Result<()> {
    let socket = Socket::connect_to(server).await.context("binding client socket")?;
    log::info!("Connecting from {} to {server}", socket.local_addr());

    let mut stream = Connection::connect(socket, config)
        .await
        .with_context(|| format!("connecting to {server}"))?;

    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0usize;
    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n;
        stream.write(&buf[..n]).await?;
    }

    stream.finish().await.context("closing connection")?;
    log::info!("Sent {total} bytes");
    Ok(())
}
