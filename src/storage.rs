//! In-memory keyspace storage.
//!
//! Provides a thread-safe key-value store with:
//! - Unconditional insert-or-replace (last write wins)
//! - Lock sharding: keys are partitioned by hash across N independently
//!   locked shards, so operations on disjoint keys do not contend
//! - Per-key linearizability: conflicting accesses serialize on the
//!   owning shard's lock, so a reader sees either a fully written prior
//!   value or a later one, never a mixture

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, trace};

/// Sharded in-memory keyspace
pub struct Store {
    /// One independently locked map per shard
    shards: Vec<RwLock<HashMap<String, String>>>,
    /// Approximate bytes held in keys and values
    memory_used: AtomicU64,
    /// Completed put operations
    puts: AtomicU64,
    /// Completed get operations
    gets: AtomicU64,
    /// Get operations that found a value
    hits: AtomicU64,
}

impl Store {
    /// Create a new store with the given shard count (minimum 1)
    pub fn new(shard_count: usize) -> Arc<Self> {
        let shard_count = shard_count.max(1);
        info!(shards = shard_count, "Initializing keyspace store");
        Arc::new(Self {
            shards: (0..shard_count).map(|_| RwLock::new(HashMap::new())).collect(),
            memory_used: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        })
    }

    /// Pick the shard owning a key
    fn shard(&self, key: &str) -> &RwLock<HashMap<String, String>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Insert or replace the value for a key. Last write wins.
    pub fn put(&self, key: String, value: String) {
        let entry_size = (key.len() + value.len()) as u64;
        let key_len = key.len() as u64;
        trace!(key = %key, bytes = value.len(), "put");

        let mut map = self.shard(&key).write().unwrap();
        let replaced = map.insert(key, value);
        drop(map);

        self.memory_used.fetch_add(entry_size, Ordering::Relaxed);
        if let Some(old) = replaced {
            self.memory_used
                .fetch_sub(key_len + old.len() as u64, Ordering::Relaxed);
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value for a key, or `None` if absent
    pub fn get(&self, key: &str) -> Option<String> {
        let map = self.shard(key).read().unwrap();
        let value = map.get(key).cloned();
        drop(map);

        self.gets.fetch_add(1, Ordering::Relaxed);
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }

    /// True when no keys are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of store counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.len(),
            memory_used: self.memory_used.load(Ordering::Relaxed) as usize,
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: usize,
    pub memory_used: usize,
    pub puts: u64,
    pub gets: u64,
    pub hits: u64,
}
