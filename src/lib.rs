//! # kvwire - A RESP-Style Key-Value Subset Server
//!
//! kvwire speaks a line-oriented request/reply protocol over TCP. Clients send
//! counted (multi-bulk) or inline commands, and the server replies with typed
//! reply tokens. Only a small command subset is provided (`GET`, `SET`,
//! `QUIT`); the registry is open for more.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              kvwire                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Registry   │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────────────────────┐   ┌──────────────────────────────────┐ │
//! │  │  Protocol codec             │   │  Handlers + FlagSet              │ │
//! │  │  decode_request / Request   │   └───────────────┬──────────────────┘ │
//! │  │  ReplyBuffer                │                   ▼                    │
//! │  └─────────────────────────────┘   ┌──────────────────────────────────┐ │
//! │                                    │  ExpiringStore (64 RwLock shards)│ │
//! │                                    └──────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvwire::commands::register_string_commands;
//! use kvwire::server::Server;
//! use kvwire::storage::ExpiringStore;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:6380").await?;
//!
//!     let mut server = Server::new(listener);
//!     register_string_commands(&mut server, Arc::new(ExpiringStore::new()))?;
//!
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: request decoding, argument streaming and reply encoding
//! - [`commands`]: registry, dispatch, flag parser and the string commands
//! - [`storage`]: sharded store with lazy per-key expiry
//! - [`connection`]: the per-client serving loop
//! - [`server`]: accept loop and graceful shutdown
//!
//! ## Design Highlights
//!
//! ### Streaming Arguments
//!
//! Only the command name is decoded up front. Handlers pull their arguments
//! from the connection on demand, and the dispatcher drains whatever a
//! handler leaves unread.
//!
//! ### Lazy Expiry
//!
//! Expired keys are removed when they are next read. There is no background
//! sweeper.

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{register_string_commands, Arity, Command, CommandHandler, Outcome};
pub use connection::ConnectionStats;
pub use protocol::{ProtocolError, ReplyBuffer, Request};
pub use server::{Server, ServerError};
pub use storage::ExpiringStore;

/// The default port kvwire listens on
pub const DEFAULT_PORT: u16 = 6380;

/// The default host kvwire binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of kvwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
