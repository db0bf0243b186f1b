//! Command Processing Module
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Request decoder │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandRegistry │  lookup + arity check
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌─────────────┐
//! │ CommandHandler  │─────>│  FlagSet    │  optional modifiers
//! └────────┬────────┘      └─────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ExpiringStore   │  (storage module)
//! └─────────────────┘
//! ```

pub mod flags;
pub mod handler;
pub mod registry;

pub use flags::{FlagError, FlagParser, FlagSet};
pub use handler::{register_string_commands, string_commands, GetCommand, QuitCommand, SetCommand};
pub use registry::{
    Arity, Command, CommandError, CommandHandler, CommandRegistry, HandlerFuture, Outcome,
    RegistryError,
};
