//! Connection Handler Module
//!
//! Manages individual client connections. Each connection is served by its
//! own async task, spawned by the [`Server`](crate::server::Server).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Server accept loop                      │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ spawn task (tracked)
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Decode head │───>│  Dispatch   │───>│ Flush reply │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod deadline;
pub mod handler;

pub use deadline::{DrainDeadline, SHUTDOWN_GRACE};
pub use handler::{CloseReason, ConnectionError, ConnectionHandler, ConnectionStats};
