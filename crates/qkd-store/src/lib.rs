// Path: crates/qkd-store/src/lib.rs
//! # QKD Post-Processing Store Crate Lints
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # QKD Post-Processing Key Store
//!
//! The core only consumes [`qkd_api::KeyStore`] (§1: a flat-file or memory
//! key database is an external collaborator; only its interface is
//! constrained here). This crate provides the two backends small enough to
//! live in-tree: `null://`, which rejects every operation, and `ram://`,
//! a volatile in-memory map useful for development and tests. A
//! production `file://` backend (mmap-backed, §6) is expected to live
//! alongside the deployment's other external collaborators and need only
//! implement [`qkd_api::KeyStore`].

use std::collections::HashMap;

use qkd_api::error::{ConfigError, TransportError};
use qkd_api::store::KeyStore;
use qkd_types::KeyRecord;

/// `null://`: the identity store. Every operation fails; `len()` is always
/// zero.
#[derive(Debug, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl KeyStore for NullStore {
    fn get(&self, _id: u64) -> Result<Option<KeyRecord>, TransportError> {
        Err(TransportError::NotReady("null:// store accepts no operations".to_string()))
    }

    fn put(&mut self, _key: &KeyRecord) -> Result<(), TransportError> {
        Err(TransportError::NotReady("null:// store accepts no operations".to_string()))
    }

    fn remove(&mut self, _id: u64) -> Result<(), TransportError> {
        Err(TransportError::NotReady("null:// store accepts no operations".to_string()))
    }

    fn len(&self) -> usize {
        0
    }
}

/// `ram://[size]`: a volatile in-memory key store, optionally capped.
pub struct RamStore {
    keys: HashMap<u64, KeyRecord>,
    capacity: Option<usize>,
}

impl RamStore {
    pub fn new(capacity: Option<usize>) -> Self {
        Self { keys: HashMap::new(), capacity }
    }

    /// Parses the `ram://[size]` form of the key-store URL grammar (§6).
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let rest = url
            .strip_prefix("ram://")
            .ok_or_else(|| ConfigError::UnknownScheme(url.to_string()))?;
        if rest.is_empty() {
            return Ok(Self::new(None));
        }
        let size: usize = rest
            .parse()
            .map_err(|_| ConfigError::MalformedNumber { key: "key_store_url".to_string(), value: rest.to_string() })?;
        Ok(Self::new(Some(size)))
    }
}

impl KeyStore for RamStore {
    fn get(&self, id: u64) -> Result<Option<KeyRecord>, TransportError> {
        Ok(self.keys.get(&id).cloned())
    }

    fn put(&mut self, key: &KeyRecord) -> Result<(), TransportError> {
        if let Some(cap) = self.capacity {
            if self.keys.len() >= cap && !self.keys.contains_key(&key.id()) {
                return Err(TransportError::NotReady(format!("ram store at capacity ({cap})")));
            }
        }
        self.keys.insert(key.id(), key.clone());
        Ok(())
    }

    fn remove(&mut self, id: u64) -> Result<(), TransportError> {
        self.keys.remove(&id);
        Ok(())
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Parses the `<null|ram>://...` forms of the key-store URL grammar (§6)
/// and constructs the matching backend.
pub fn from_url(url: &str) -> Result<Box<dyn KeyStore>, ConfigError> {
    if url.starts_with("null://") {
        return Ok(Box::new(NullStore::new()));
    }
    if url.starts_with("ram://") {
        return Ok(Box::new(RamStore::from_url(url)?));
    }
    Err(ConfigError::UnknownScheme(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_store_rejects_everything() {
        let mut store = NullStore::new();
        assert!(store.get(1).is_err());
        assert!(store.put(&KeyRecord::new(1, vec![1])).is_err());
        assert!(store.remove(1).is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn ram_store_put_get_remove_round_trip() {
        let mut store = RamStore::new(None);
        let key = KeyRecord::new(5, vec![1, 2, 3]);
        store.put(&key).unwrap();
        assert_eq!(store.len(), 1);
        let fetched = store.get(5).unwrap().unwrap();
        assert_eq!(fetched.data(), &[1, 2, 3]);
        store.remove(5).unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.get(5).unwrap().is_none());
    }

    #[test]
    fn ram_store_enforces_capacity() {
        let mut store = RamStore::new(Some(1));
        store.put(&KeyRecord::new(1, vec![])).unwrap();
        assert!(store.put(&KeyRecord::new(2, vec![])).is_err());
    }

    #[test]
    fn from_url_dispatches_by_scheme() {
        assert!(from_url("null://").is_ok());
        assert!(from_url("ram://").is_ok());
        assert!(from_url("ram://16").is_ok());
        assert!(from_url("tcp://host:1").is_err());
    }
}
