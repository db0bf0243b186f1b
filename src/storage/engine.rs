//! Sharded Expiring Store
//!
//! The key space is split across a fixed number of shards, each guarded by
//! its own `RwLock`. Readers of different shards never contend, and readers
//! of the same shard only block each other when a write is in progress.
//!
//! ## Expiry
//!
//! Every entry may carry an absolute expiration instant. Expiration is lazy:
//! it is only observed when a key is touched, and an expired entry is evicted
//! by the read that finds it. There is no background sweep.

use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards in the store.
///
/// A power of two keeps the distribution even for the default hasher.
pub const NUM_SHARDS: usize = 64;

/// A stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The payload, returned byte-for-byte on reads
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates an entry that never expires.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates an entry that expires `ttl` from now.
    ///
    /// A TTL too large to be represented as an instant never expires.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// Checks whether this entry has expired as of `now`.
    ///
    /// A read at exactly the expiration instant already sees the entry as gone.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Precondition for a conditional store, as used by `SET NX` / `SET XX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Store unconditionally
    #[default]
    Always,
    /// Store only if the key is absent (or expired)
    IfAbsent,
    /// Store only if the key is present and live
    IfPresent,
}

#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    // A panic while holding a shard lock cannot leave a map half-updated, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Concurrent key-value store with lazy per-key expiration.
///
/// Built explicitly and shared through an `Arc`, so every server (and every
/// test) owns an independent instance.
///
/// # Example
///
/// ```
/// use kvwire::storage::ExpiringStore;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let store = ExpiringStore::new();
///
/// store.store(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(store.load(b"name"), Some(Bytes::from("Ariz")));
///
/// store.store_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert!(store.load(b"session").is_some());
/// ```
pub struct ExpiringStore {
    shards: Vec<Shard>,

    /// Statistics: number of entries evicted because they had expired
    expired_count: AtomicU64,
}

impl std::fmt::Debug for ExpiringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringStore")
            .field("shards", &self.shards.len())
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ExpiringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiringStore {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Returns the value for `key`, or `None` if it is absent or expired.
    ///
    /// An expired entry is removed as a side effect.
    pub fn load(&self, key: &[u8]) -> Option<Bytes> {
        let shard = self.shard(key);

        // Fast path under the read lock
        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: re-check under the write lock, another writer may have
        // replaced the entry in between.
        let mut data = shard.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Stores `value` under `key` without expiry, clearing any previous TTL.
    pub fn store(&self, key: Bytes, value: Bytes) {
        self.shard(&key).write().insert(key, Entry::new(value));
    }

    /// Stores `value` under `key`, expiring `ttl` from now.
    ///
    /// The expiration instant is fixed here and never refreshed by reads.
    pub fn store_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) {
        self.shard(&key)
            .write()
            .insert(key, Entry::with_ttl(value, ttl));
    }

    /// Stores `value` under `key` if `condition` holds.
    ///
    /// The presence check and the write happen under the same shard lock, so
    /// two concurrent `IfAbsent` stores on one key have exactly one winner.
    ///
    /// # Returns
    ///
    /// Returns `true` if the value was stored.
    pub fn store_if(
        &self,
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> bool {
        let mut data = self.shard(&key).write();

        let present = match data.get(&key) {
            Some(entry) if entry.is_expired() => {
                data.remove(&key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(_) => true,
            None => false,
        };

        let allowed = match condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !present,
            SetCondition::IfPresent => present,
        };
        if !allowed {
            return false;
        }

        let entry = match ttl {
            Some(ttl) => Entry::with_ttl(value, ttl),
            None => Entry::new(value),
        };
        data.insert(key, entry);
        true
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries evicted by lazy expiry so far.
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }
}
