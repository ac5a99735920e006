// Path: crates/qkd-module/src/stash.rs
//! The stash (§4.5, §3): two partitions of locally buffered keys pending
//! alignment with the peer. `out_of_sync` holds keys received locally but
//! not yet acknowledged by the peer, subject to a TTL (I3); `in_sync` holds
//! keys acknowledged on both sides, eligible for the next `pick()`.
//!
//! (I1) a key id is unique within a stash at all times. (I2) a key is in at
//! most one partition; the `out_of_sync -> in_sync` transition is one-way
//! within a pairing epoch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use qkd_types::KeyRecord;

struct OutOfSyncEntry {
    key: KeyRecord,
    stashed_at: Instant,
}

/// Tracks keys awaiting peer acknowledgement (`out_of_sync`) and keys ready
/// for processing (`in_sync`), indexed by key id.
pub struct Stash {
    out_of_sync: HashMap<u64, OutOfSyncEntry>,
    /// Insertion order is preserved so intersection during sync stays
    /// order-preserving (§4.5 ordering guarantee).
    in_sync_order: Vec<u64>,
    in_sync: HashMap<u64, KeyRecord>,
    ttl: Duration,
}

impl Stash {
    pub fn new(ttl: Duration) -> Self {
        Self { out_of_sync: HashMap::new(), in_sync_order: Vec::new(), in_sync: HashMap::new(), ttl }
    }

    /// (I1) A fresh key enters `out_of_sync`. Ids already present in either
    /// partition are rejected by the caller's own uniqueness discipline;
    /// this simply overwrites, mirroring "exclusively owned" semantics.
    pub fn push_out_of_sync(&mut self, key: KeyRecord) {
        let id = key.id();
        self.out_of_sync.insert(id, OutOfSyncEntry { key, stashed_at: Instant::now() });
    }

    /// (I2) Moves a key from `out_of_sync` to `in_sync`, one-way.
    pub fn promote(&mut self, id: u64) -> bool {
        if let Some(entry) = self.out_of_sync.remove(&id) {
            self.in_sync.insert(id, entry.key);
            self.in_sync_order.push(id);
            true
        } else {
            false
        }
    }

    /// (I3) Evicts out-of-sync keys older than the TTL, silently.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.out_of_sync.len();
        self.out_of_sync.retain(|_, entry| entry.stashed_at.elapsed() <= ttl);
        before - self.out_of_sync.len()
    }

    /// Ids currently in the `in_sync` partition, in promotion order.
    pub fn in_sync_ids(&self) -> &[u64] {
        &self.in_sync_order
    }

    pub fn contains_in_sync(&self, id: u64) -> bool {
        self.in_sync.contains_key(&id)
    }

    pub fn contains_out_of_sync(&self, id: u64) -> bool {
        self.out_of_sync.contains_key(&id)
    }

    /// Removes and returns the `in_sync` key with `id`, consumed by
    /// `process()`.
    pub fn take(&mut self, id: u64) -> Option<KeyRecord> {
        let key = self.in_sync.remove(&id)?;
        self.in_sync_order.retain(|&x| x != id);
        Some(key)
    }

    pub fn is_empty(&self) -> bool {
        self.out_of_sync.is_empty() && self.in_sync.is_empty()
    }

    pub fn out_of_sync_len(&self) -> usize {
        self.out_of_sync.len()
    }
}
