//! Bounded memo of fingerprint → identity resolutions.
//!
//! Inserts past capacity are rejected rather than evicting: a full cache
//! stops growing until it is cleared (gallery reload) or the process restarts.
//! A miss is always a plain fallback to full matching.

use crate::types::{Fingerprint, Identity};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Outcome of [`MatchCache::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheInsert {
    Inserted,
    /// Fingerprint already cached; the existing entry is kept.
    AlreadyPresent,
    /// Cache is at capacity (or disabled with capacity 0).
    Rejected,
}

pub struct MatchCache {
    capacity: usize,
    entries: Mutex<HashMap<Fingerprint, Identity>>,
}

impl MatchCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Identity> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned()
    }

    pub fn insert(&self, fingerprint: Fingerprint, identity: Identity) -> CacheInsert {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&fingerprint) {
            return CacheInsert::AlreadyPresent;
        }
        if entries.len() >= self.capacity {
            return CacheInsert::Rejected;
        }
        entries.insert(fingerprint, identity);
        CacheInsert::Inserted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
