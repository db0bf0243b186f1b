//! Connection Handler Module
//!
//! Each client gets its own handler task that runs a strict request/reply
//! loop. A reply is always flushed before the next request is read.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, ConnectionHandler spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────────┐
//!    │      Main Loop                       │
//!    │                                      │
//!    │  wait for bytes  ◄──── or shutdown ──┼──> 3.
//!    │        │                             │
//!    │        ▼                             │
//!    │  decode request head                 │
//!    │        │                             │
//!    │        ▼                             │
//!    │  dispatch (runs to completion)       │
//!    │        │                             │
//!    │        ▼                             │
//!    │  flush reply buffer                  │
//!    │        │                             │
//!    │   [Loop back]                        │
//!    └──────────────────────────────────────┘
//!        │
//!        ▼
//! 3. QUIT / shutdown / client gone / error: socket closed
//! ```
//!
//! Shutdown closes an idle connection at once. A request that has started is
//! still answered, unless the client stalls in the middle of sending it for
//! longer than [`SHUTDOWN_GRACE`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::commands::{CommandError, CommandRegistry, Outcome};
use crate::connection::deadline::{DrainDeadline, SHUTDOWN_GRACE};
use crate::protocol::{decode_request, ProtocolError, ReplyBuffer, Request};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Why a connection ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A command (QUIT) asked to close
    Quit,
    /// The server is shutting down
    Shutdown,
    /// The client closed its side between requests
    ClientDisconnected,
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Malformed request
    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    /// A command handler failed
    #[error("Command {command} failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: CommandError,
    },
}

impl ConnectionError {
    /// True if a read was cut off by the shutdown grace period.
    pub fn is_drain_timeout(&self) -> bool {
        let io_error = match self {
            ConnectionError::IoError(e) => Some(e),
            ConnectionError::ProtocolError(ProtocolError::Io(e)) => Some(e),
            ConnectionError::CommandFailed {
                source: CommandError::Protocol(ProtocolError::Io(e)),
                ..
            } => Some(e),
            _ => None,
        };
        io_error.is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
    }
}

/// Serves a single client connection.
pub struct ConnectionHandler {
    /// Connection number, used in logs and handed to requests
    id: u64,

    /// Client's address (for logging)
    addr: SocketAddr,

    reader: BufReader<DrainDeadline<OwnedReadHalf>>,
    writer: OwnedWriteHalf,

    /// Replies of the current request, flushed once per cycle
    reply: ReplyBuffer,

    /// The command registry (shared, read-only)
    registry: Arc<CommandRegistry>,

    /// Cancelled when the server stops
    shutdown: CancellationToken,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        id: u64,
        registry: Arc<CommandRegistry>,
        shutdown: CancellationToken,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = stream.into_split();
        Self {
            id,
            addr,
            reader: BufReader::with_capacity(
                INITIAL_BUFFER_SIZE,
                DrainDeadline::new(read_half, shutdown.clone(), SHUTDOWN_GRACE),
            ),
            writer: write_half,
            reply: ReplyBuffer::new(),
            registry,
            shutdown,
            stats,
        }
    }

    /// Runs the connection until it is closed, then releases the socket.
    pub async fn run(mut self) -> Result<CloseReason, ConnectionError> {
        info!(client_id = self.id, peer = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(reason) => {
                info!(client_id = self.id, peer = %self.addr, reason = ?reason, "Client closed")
            }
            Err(ConnectionError::IoError(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(client_id = self.id, peer = %self.addr, "Connection reset by client")
            }
            Err(e) if e.is_drain_timeout() => {
                info!(client_id = self.id, peer = %self.addr, "Dropped client stalled mid-request during shutdown")
            }
            Err(ConnectionError::CommandFailed { command, source }) => {
                error!(client_id = self.id, command = %command, error = %source, "Handle command failed")
            }
            Err(e) => warn!(client_id = self.id, peer = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The read-dispatch-flush loop.
    async fn main_loop(&mut self) -> Result<CloseReason, ConnectionError> {
        loop {
            // Wait for the start of the next request. Reads inside a request
            // are bounded by the drain deadline instead.
            let eof = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(CloseReason::Shutdown),
                ready = self.reader.fill_buf() => ready.map(|buf| buf.is_empty())?,
            };
            if eof {
                return Ok(CloseReason::ClientDisconnected);
            }

            let line = match decode_request(&mut self.reader).await {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(ProtocolError::ConnectionClosed) => return Ok(CloseReason::ClientDisconnected),
                Err(e) => return Err(e.into()),
            };

            let mut request = Request::new(self.id, line, &mut self.reader, &mut self.reply);
            let command = request.name().to_owned();
            trace!(client_id = self.id, command = %command, args = request.arg_count(), "Dispatching");

            let outcome = self.registry.dispatch(&mut request).await;
            self.stats.command_processed();

            match outcome {
                Ok(Outcome::Continue) => self.flush().await?,
                Ok(Outcome::Close) => {
                    let _ = self.flush().await;
                    return Ok(CloseReason::Quit);
                }
                Err(source) => {
                    let _ = self.flush().await;
                    return Err(ConnectionError::CommandFailed { command, source });
                }
            }
        }
    }

    /// Writes the buffered reply to the socket.
    async fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.reply.is_empty() {
            return Ok(());
        }

        let bytes = self.reply.take();
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client_id = self.id, bytes = bytes.len(), "Sent reply");
        Ok(())
    }
}
