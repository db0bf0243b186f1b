//! kvwire server binary
//!
//! Binds the listener, registers the string commands and serves until
//! Ctrl+C or SIGTERM, then drains every connection before exiting.

use anyhow::Context;
use kvwire::commands::register_string_commands;
use kvwire::server::Server;
use kvwire::storage::{ExpiringStore, NUM_SHARDS};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: kvwire::DEFAULT_HOST.to_string(),
            port: kvwire::DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        config.port = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("kvwire version {}", kvwire::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
kvwire - A RESP-style key-value subset server

USAGE:
    kvwire [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>    Port to listen on (default: 6380)
    -v, --version        Print version information
        --help           Print this help message

COMMANDS:
    GET key
    SET key value [NX|XX] [EX seconds|PX milliseconds]
    QUIT

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=kvwire=debug
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
kvwire v{}
──────────────────────────────────────────────────────────────
Listening on {}
Use Ctrl+C to shutdown gracefully.
"#,
        kvwire::VERSION,
        config.bind_address()
    );
}

/// The signals that start a graceful stop: Ctrl+C, plus SIGTERM on Unix.
struct StopSignals {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl StopSignals {
    /// SIGTERM is hooked here, before serving starts, so a failure stops
    /// start-up instead of leaving a server that cannot be stopped.
    fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    /// Waits for the first stop signal and returns its name.
    async fn recv(&mut self) -> io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = signal::ctrl_c() => result.map(|()| "SIGINT"),
                _ = self.terminate.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            signal::ctrl_c().await.map(|()| "Ctrl+C")
        }
    }
}

/// Drains `server` once a stop signal arrives.
///
/// If waiting for signals fails the server is drained anyway and the error
/// is returned.
async fn stop_on_signal(mut signals: StopSignals, server: Arc<Server>) -> io::Result<()> {
    let received = signals.recv().await;
    match &received {
        Ok(name) => info!(signal = *name, "Shutdown signal received, stopping server..."),
        Err(e) => error!(error = %e, "Failed to wait for shutdown signals, stopping server"),
    }
    server.graceful_stop().await;
    received.map(|_| ())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    print_banner(&config);

    // The store is shared by every connection
    let store = Arc::new(ExpiringStore::new());
    info!(shards = NUM_SHARDS, "Store initialized");

    let mut server = Server::new(listener);
    register_string_commands(&mut server, store)?;
    let server = Arc::new(server);

    // A stop signal starts the drain; serve() returns once the listener is closed
    let signals = StopSignals::install().context("failed to install signal handlers")?;
    let stop = tokio::spawn(stop_on_signal(signals, Arc::clone(&server)));

    if let Err(e) = server.serve().await {
        stop.abort();
        server.graceful_stop().await;
        return Err(e.into());
    }

    stop.await?.context("failed to wait for shutdown signals")?;
    info!("Server stopped");
    Ok(())
}
