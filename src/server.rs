//! Connection Server
//!
//! Accepts sockets and runs one [`ConnectionHandler`] task per connection.
//!
//! ## Lifecycle
//!
//! ```text
//!   Server::new(listener)      QUIT registered
//!          │
//!          ▼
//!   register_command(..)       registry filled, read-only afterwards
//!          │
//!          ▼
//!   serve()  ── Running ──>  accept loop, one tracked task per socket
//!          │
//!   graceful_stop()
//!          │
//!          ▼
//!   Draining: listener dropped, idle connections close,
//!             in-flight requests finish and are answered,
//!             clients stalled mid-request are cut off after SHUTDOWN_GRACE
//!          │
//!          ▼
//!   Stopped: every connection task has ended
//! ```
//!
//! A server is not restartable once stopped.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::commands::{Arity, Command, CommandRegistry, QuitCommand, RegistryError};
use crate::connection::{ConnectionHandler, ConnectionStats};

/// Client ids are assigned from here upwards.
pub const FIRST_CLIENT_ID: u64 = 3;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    DuplicateCommand(#[from] RegistryError),

    #[error("server has already been served or stopped")]
    AlreadyServed,

    #[error("commands cannot be registered while connections are open")]
    RegistryInUse,

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// A key-value protocol server bound to one listener.
pub struct Server {
    /// Taken by `serve()`; `None` once serving has started or the server stopped
    listener: Mutex<Option<TcpListener>>,

    registry: Arc<CommandRegistry>,

    next_client_id: AtomicU64,

    /// Cancelled by `graceful_stop()`
    shutdown: CancellationToken,

    /// Counts the accept loop and every connection task
    tracker: TaskTracker,

    stats: Arc<ConnectionStats>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("commands", &self.registry.len())
            .field("stopping", &self.shutdown.is_cancelled())
            .field("tasks", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server on `listener` with `QUIT` already registered.
    pub fn new(listener: TcpListener) -> Self {
        let mut registry = CommandRegistry::new();
        // A fresh registry has no names yet
        let _ = registry.register("QUIT", Command::new(Arity::exactly(0), QuitCommand));

        Self {
            listener: Mutex::new(Some(listener)),
            registry: Arc::new(registry),
            next_client_id: AtomicU64::new(FIRST_CLIENT_ID),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Adds a command. Fails if `name` is already taken.
    pub fn register_command(&mut self, name: &str, command: Command) -> Result<(), ServerError> {
        let registry = Arc::get_mut(&mut self.registry).ok_or(ServerError::RegistryInUse)?;
        registry.register(name, command)?;
        debug!(command = %name.to_ascii_uppercase(), "Registered command");
        Ok(())
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Accepts connections until [`graceful_stop`](Self::graceful_stop) is
    /// called or accepting fails.
    ///
    /// Returns `Ok(())` when stopped. The listener is closed before this
    /// returns in both cases.
    pub async fn serve(&self) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ServerError::AlreadyServed)?;

        // Keeps `graceful_stop()` waiting until the listener is gone
        let guard = self.tracker.token();

        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Accepting connections"),
            Err(_) => info!("Accepting connections"),
        }

        let result = self.accept_loop(&listener).await;

        drop(listener);
        drop(guard);
        info!("Stopped accepting connections");
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed, server stopping");
                        return Err(ServerError::Accept(e));
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            let handler = ConnectionHandler::new(
                stream,
                peer,
                id,
                Arc::clone(&self.registry),
                self.shutdown.child_token(),
                Arc::clone(&self.stats),
            );

            self.tracker.spawn(async move {
                // The handler logs its own outcome
                let _ = handler.run().await;
            });
        }
    }

    /// Stops accepting, lets every connection finish its current request,
    /// and waits until all of them have closed.
    pub async fn graceful_stop(&self) {
        info!(
            active = self.stats.active_connections.load(Ordering::Relaxed),
            "Graceful stop requested"
        );

        self.shutdown.cancel();
        // Never served: release the port here
        drop(
            self.listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        self.tracker.close();
        self.tracker.wait().await;

        info!(
            served = self.stats.connections_accepted.load(Ordering::Relaxed),
            "All connections drained"
        );
    }
}

/// Accept errors caused by a single peer rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
