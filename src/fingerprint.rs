//! Fingerprinter and HistoryStore.

use std::collections::VecDeque;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::types::{Fingerprint, HistoryEntry, Request};

/// Default bound on entries kept per fingerprint.
pub const MAX_HISTORY: usize = 200;
/// Default retention window in seconds.
pub const RETENTION_WINDOW: u64 = 3600;

/// Stateless, deterministic. Excludes volatile fields (extra headers, body,
/// timestamp) so the same client is stably identified across requests.
/// `user_agent` is case-normalized and the address is lowercased before
/// hashing.
pub fn fingerprint(req: &Request) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(req.source_address.to_lowercase().as_bytes());
    hasher.update(b"\0");
    hasher.update(req.user_agent.to_lowercase().as_bytes());
    hasher.update(b"\0");
    hasher.update(req.session_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Fingerprint(out)
}

/// Content hash stored in a `HistoryEntry` in place of the raw body, to
/// bound memory.
pub fn content_hash(req: &Request) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(req.endpoint.as_bytes());
    for (k, v) in &req.query_params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }
    hasher.update(&req.body);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Sharded map fingerprint → bounded deque: one writer per
/// fingerprint at a time (enforced by `dashmap`'s per-shard locking),
/// readers take a consistent snapshot (a clone of the deque) under the same
/// lock and release it before returning, so detectors never observe a
/// history mutated mid-read.
#[derive(Default)]
pub struct HistoryStore {
    shards: DashMap<Fingerprint, VecDeque<HistoryEntry>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }

    /// Appends `entry`, then trims both the count and retention-window
    /// bounds before returning. Constant-time amortized.
    pub fn append(&self, fp: Fingerprint, entry: HistoryEntry) {
        let mut deque = self.shards.entry(fp).or_default();
        let now = entry.timestamp;
        deque.push_back(entry);

        while deque.len() > MAX_HISTORY {
            deque.pop_front();
        }
        while let Some(front) = deque.front() {
            if now.saturating_sub(front.timestamp) > RETENTION_WINDOW {
                deque.pop_front();
            } else {
                break;
            }
        }
    }

    /// A consistent snapshot of the fingerprint's current history, oldest
    /// first. Empty if the fingerprint has never been seen.
    pub fn snapshot(&self, fp: Fingerprint) -> Vec<HistoryEntry> {
        self.shards
            .get(&fp)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Garbage-collects a fingerprint's entry once its history has fully
    /// aged out (lifecycle: "garbage-collected when empty after full
    /// retention").
    pub fn evict_if_stale(&self, fp: Fingerprint, now: u64) {
        let should_remove = self
            .shards
            .get(&fp)
            .map(|d| {
                d.back()
                    .map(|e| now.saturating_sub(e.timestamp) > RETENTION_WINDOW)
                    .unwrap_or(true)
            })
            .unwrap_or(false);
        if should_remove {
            self.shards.remove(&fp);
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn req(ua: &str, addr: &str, session: &str) -> Request {
        Request {
            timestamp: 0,
            source_address: addr.to_string(),
            user_agent: ua.to_string(),
            endpoint: "/x".to_string(),
            query_params: vec![],
            headers: BTreeMap::new(),
            body: vec![],
            session_id: session.to_string(),
        }
    }

    #[test]
    fn same_identity_fields_produce_same_fingerprint() {
        let a = req("Mozilla/5.0", "1.2.3.4", "sess-1");
        let b = req("MOZILLA/5.0", "1.2.3.4", "sess-1");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn differing_session_changes_fingerprint() {
        let a = req("Mozilla/5.0", "1.2.3.4", "sess-1");
        let b = req("Mozilla/5.0", "1.2.3.4", "sess-2");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn history_store_bounds_length() {
        let store = HistoryStore::new();
        let fp = fingerprint(&req("ua", "addr", "s"));
        for i in 0..(MAX_HISTORY + 50) {
            store.append(
                fp,
                HistoryEntry {
                    timestamp: i as u64,
                    endpoint: "/x".to_string(),
                    content_hash: [0u8; 32],
                    size: 0,
                },
            );
        }
        let snap = store.snapshot(fp);
        assert!(snap.len() <= MAX_HISTORY);
    }

    #[test]
    fn history_store_bounds_retention_window() {
        let store = HistoryStore::new();
        let fp = fingerprint(&req("ua", "addr", "s"));
        store.append(
            fp,
            HistoryEntry {
                timestamp: 0,
                endpoint: "/x".to_string(),
                content_hash: [0u8; 32],
                size: 0,
            },
        );
        store.append(
            fp,
            HistoryEntry {
                timestamp: RETENTION_WINDOW + 10,
                endpoint: "/x".to_string(),
                content_hash: [0u8; 32],
                size: 0,
            },
        );
        let snap = store.snapshot(fp);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].timestamp, RETENTION_WINDOW + 10);
    }
}
