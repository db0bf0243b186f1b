//! Storage Module
//!
//! A thread-safe, sharded key-value store with lazy TTL expiry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExpiringStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expired keys are only removed when a read or a conditional write finds
//! them. Nothing sweeps the store in the background.

pub mod engine;

pub use engine::{Entry, ExpiringStore, SetCondition, NUM_SHARDS};
