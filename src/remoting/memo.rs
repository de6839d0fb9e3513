//! Memoized results of remote operations.
//!
//! Entries are keyed by a SHA-256 digest of the request fingerprint (the
//! request minus its correlation id). A map, flat map or zip memoizes the handle
//! of the dataset it produced; a sketch memoizes its accumulated value.

use super::protocol::Payload;
use crate::handle::Handle;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

pub type MemoKey = [u8; 32];

pub fn digest(fingerprint: &[u8]) -> MemoKey {
    let mut key = [0; 32];
    key.copy_from_slice(&Sha256::digest(fingerprint));
    key
}

#[derive(Clone, Debug)]
struct MemoEntry {
    payload: Payload,
    /// Dataset the payload refers to, if any. The entry is stale once that
    /// dataset leaves the handle table.
    dataset: Option<Handle>,
}

#[derive(Default)]
pub struct MemoTable {
    entries: DashMap<MemoKey, MemoEntry>,
}

impl MemoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: MemoKey, payload: Payload) {
        let dataset = match &payload {
            Payload::Handle(h) => Some(*h),
            _ => None,
        };
        self.entries.insert(key, MemoEntry { payload, dataset });
    }

    /// Look up `key`, evicting it if it refers to a dataset for which `alive`
    /// returns false.
    pub fn lookup(&self, key: &MemoKey, alive: impl Fn(Handle) -> bool) -> Option<Payload> {
        let entry = self.entries.get(key)?.value().clone();
        if let Some(handle) = entry.dataset {
            if !alive(handle) {
                tracing::debug!(%handle, "evicting memoized result for deleted dataset");
                self.entries.remove(key);
                return None;
            }
        }
        Some(entry.payload)
    }

    /// Drop everything; returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
