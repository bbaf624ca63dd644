//! Async connection handle and the per-connection event loop.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  write / close                 read / read_to_end
//!      ▼                                      ▲
//!  ┌─────────────────┐               ┌────────┴────────┐
//!  │ commands (mpsc) │               │ deliveries (mpsc)│
//!  └────────┬────────┘               └────────▲────────┘
//!           │          event_loop task        │
//!           └──────▶  ┌──────────────┐  ──────┘
//!                     │   Context    │  (sans-IO handlers)
//!                     └──────┬───────┘
//!                            │ outbox / raw datagrams
//!                     ┌──────▼───────┐
//!                     │ T: Datagram  │  (UDP socket or simulator link)
//!                     └──────────────┘
//! ```
//!
//! The event loop is the only owner of the [`Context`].  It multiplexes
//! inbound datagrams, application commands, and timer deadlines with
//! `tokio::select!`, calls the matching synchronous handler, and then
//! flushes whatever the handler queued.  The application talks to it
//! exclusively through the two channels inside [`Stream`].

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::context::{Context, Delivery, Role};
use crate::error::ConnError;
use crate::socket::{Datagram, MAX_DATAGRAM};

/// Requests from the application to the event loop.
#[derive(Debug)]
enum Command {
    /// Bytes to send; never longer than one segment's payload.
    Write(Vec<u8>),
    /// Close the sending direction once everything before it is sent.
    Close,
}

/// Entry points for opening a connection over a [`Datagram`] transport.
pub struct Connection;

impl Connection {
    /// Active open: send a SYN and resolve once the handshake completes.
    ///
    /// Fails with [`ConnError::ConnectionRefused`] when the peer never
    /// answers within the handshake retry budget.
    pub async fn connect<T: Datagram>(transport: T, config: Config) -> Result<Stream, ConnError> {
        Self::open(transport, config, Role::Active).await
    }

    /// Passive open: wait for a SYN and resolve once the handshake completes.
    pub async fn accept<T: Datagram>(transport: T, config: Config) -> Result<Stream, ConnError> {
        Self::open(transport, config, Role::Passive).await
    }

    async fn open<T: Datagram>(transport: T, config: Config, role: Role) -> Result<Stream, ConnError> {
        let chunk = config.max_payload().max(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.app_queue_depth.max(1));
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let ctx = Context::new(config, role);
        let handle = tokio::spawn(event_loop(ctx, transport, cmd_rx, data_tx, ready_tx));

        if ready_rx.await.is_err() {
            // The loop ended before synchronizing; its result says why.
            return Err(match handle.await {
                Ok(Err(e)) => e,
                _ => ConnError::ConnectionRefused,
            });
        }
        Ok(Stream {
            commands: cmd_tx,
            deliveries: data_rx,
            handle,
            chunk,
            eof: false,
            write_closed: false,
        })
    }
}

/// Application handle for one established connection.
///
/// Dropping the handle without calling [`close`](Self::close) closes the
/// sending direction implicitly; the event loop keeps running until the
/// teardown completes.
#[derive(Debug)]
pub struct Stream {
    commands: mpsc::Sender<Command>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    handle: JoinHandle<Result<(), ConnError>>,
    /// Largest payload per command.
    chunk: usize,
    eof: bool,
    write_closed: bool,
}

impl Stream {
    /// Queue `data` for reliable, in-order delivery.
    ///
    /// Waits while the application queue is full.  Returns once every byte
    /// has been handed to the event loop, not when the peer acknowledged it.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnError> {
        if self.write_closed {
            return Err(ConnError::Closed);
        }
        for piece in data.chunks(self.chunk) {
            self.commands
                .send(Command::Write(piece.to_vec()))
                .await
                .map_err(|_| ConnError::Broken)?;
        }
        Ok(())
    }

    /// Next run of in-order bytes; `Ok(None)` once the peer has closed.
    ///
    /// Returns [`ConnError::Broken`] if the connection was aborted; the
    /// cause is reported by [`finish`](Self::finish).
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, ConnError> {
        if self.eof {
            return Ok(None);
        }
        match self.deliveries.recv().await {
            Some(Delivery::Data(bytes)) => Ok(Some(bytes)),
            Some(Delivery::EndOfStream) => {
                self.eof = true;
                Ok(None)
            }
            None => Err(ConnError::Broken),
        }
    }

    /// Read until the peer closes, returning everything it sent.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, ConnError> {
        let mut out = Vec::new();
        while let Some(bytes) = self.read().await? {
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    /// Close the sending direction after all previously written bytes.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        if self.write_closed {
            return Ok(());
        }
        self.write_closed = true;
        self.commands
            .send(Command::Close)
            .await
            .map_err(|_| ConnError::Broken)
    }

    /// Close if needed, then wait for the connection to finish.
    ///
    /// Resolves when both directions are closed, or with the error that
    /// aborted the connection.
    pub async fn finish(mut self) -> Result<(), ConnError> {
        if let Err(e) = self.close().await {
            log::debug!("[conn] close before finish: {e}");
        }
        drop(self.commands);
        self.handle.await.unwrap_or(Err(ConnError::Broken))
    }
}

/// Drive one connection until it reaches its final `Closed` state.
async fn event_loop<T: Datagram>(
    mut ctx: Context,
    transport: T,
    mut commands: mpsc::Receiver<Command>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    ready: oneshot::Sender<()>,
) -> Result<(), ConnError> {
    let mut ready = Some(ready);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    // Bytes taken from the application but not yet accepted by the window.
    let mut staged: Vec<u8> = Vec::new();
    let mut close_requested = false;
    let mut close_sent = false;

    ctx.open(Instant::now());

    loop {
        // ── Feed staged bytes and a pending close into the context ──────
        let now = Instant::now();
        while !staged.is_empty() {
            let n = ctx.writable().min(staged.len());
            if n == 0 {
                break;
            }
            match ctx.write(&staged[..n], now) {
                Ok(_) => {
                    staged.drain(..n);
                }
                Err(e) => {
                    log::warn!("[conn] discarding {} staged bytes: {e}", staged.len());
                    staged.clear();
                }
            }
        }
        if close_requested && !close_sent && staged.is_empty() {
            close_sent = true;
            ctx.close(now);
        }

        // ── Flush everything the handlers produced ──────────────────────
        for segment in ctx.take_outbox() {
            if let Err(e) = transport.send(&segment.encode()).await {
                ctx.fail(ConnError::Transmit(e));
                break;
            }
        }
        for delivery in ctx.take_deliveries() {
            // The application may have dropped its handle; keep going.
            let _ = deliveries.send(delivery);
        }

        if ready.is_some()
            && (ctx.state().is_synchronized() || (ctx.is_closed() && ctx.error().is_none()))
        {
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }
        }
        if ctx.is_closed() {
            break;
        }

        // ── Wait for the next event ─────────────────────────────────────
        let deadline = ctx
            .poll_deadline()
            .unwrap_or_else(|| Instant::now() + ctx.config().poll_interval);
        let accepting = !close_requested && staged.is_empty() && ctx.writable() > 0;

        tokio::select! {
            biased;

            received = transport.recv(&mut buf) => match received {
                Ok(n) => ctx.on_datagram(&buf[..n], Instant::now()),
                Err(e) => ctx.fail(ConnError::Receive(e)),
            },

            command = commands.recv(), if accepting => match command {
                Some(Command::Write(bytes)) => staged = bytes,
                Some(Command::Close) | None => close_requested = true,
            },

            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
        }

        ctx.on_tick(Instant::now());
    }

    match ctx.take_error() {
        Some(e) => {
            log::warn!("[conn] {:?} connection aborted: {e}", ctx.role());
            Err(e)
        }
        None => {
            log::info!("[conn] {:?} connection closed", ctx.role());
            Ok(())
        }
    }
}
