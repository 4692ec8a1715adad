//! ReputationTable. Sharded map with LRU eviction at
//! `MAX_REPUTATIONS`.
//!
//! Decay policy (Open Question, resolved in DESIGN.md): lazy linear
//! decay of 1 point per 10 minutes of idleness, computed from
//! `last_update` on every access rather than via a background timer.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::{Fingerprint, Reputation};

pub const MAX_REPUTATIONS: usize = 100_000;
const DECAY_INTERVAL_SECS: u64 = 600;

/// Adjustment applied to a fingerprint's reputation after a SafetyFilter or
/// Orchestrator outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationAdjustment {
    ConfirmedAttack,
    ConfirmedBenign,
    Block,
    Countermeasures,
    Allow,
}

impl ReputationAdjustment {
    fn delta(self) -> i32 {
        match self {
            ReputationAdjustment::ConfirmedAttack => -10,
            ReputationAdjustment::ConfirmedBenign => 1,
            ReputationAdjustment::Block => -10,
            ReputationAdjustment::Countermeasures => -5,
            ReputationAdjustment::Allow => 1,
        }
    }
}

fn decay(rep: Reputation, now: u64) -> Reputation {
    let idle = now.saturating_sub(rep.last_update);
    if idle == 0 || rep.score == 0 {
        return rep;
    }
    let steps = (idle / DECAY_INTERVAL_SECS) as i32;
    if steps == 0 {
        return rep;
    }
    let decayed = if rep.score > 0 {
        (rep.score - steps).max(0)
    } else {
        (rep.score + steps).min(0)
    };
    Reputation {
        score: decayed,
        last_update: now,
    }
}

/// Single mutex guarding an LRU map. `lru::LruCache` has no internal
/// sharding, so one mutex is sufficient here — reputation lookups are O(1)
/// hashmap operations, not the hot path `HistoryStore` is.
pub struct ReputationTable {
    inner: Mutex<LruCache<Fingerprint, Reputation>>,
}

impl ReputationTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_REPUTATIONS).expect("MAX_REPUTATIONS > 0"),
            )),
        }
    }

    /// Current (decayed) reputation for `fp`, creating a fresh `0` entry if
    /// unseen.
    pub fn get(&self, fp: Fingerprint, now: u64) -> Reputation {
        let mut guard = self.inner.lock();
        let rep = guard
            .get_or_insert(fp, || Reputation::fresh(now))
            .to_owned();
        let decayed = decay(rep, now);
        guard.put(fp, decayed);
        decayed
    }

    pub fn adjust(&self, fp: Fingerprint, adjustment: ReputationAdjustment, now: u64) -> Reputation {
        let mut guard = self.inner.lock();
        let current = guard
            .get_or_insert(fp, || Reputation::fresh(now))
            .to_owned();
        let decayed = decay(current, now);
        let new_score = Reputation::clamp_score(decayed.score + adjustment.delta());
        let updated = Reputation {
            score: new_score,
            last_update: now,
        };
        guard.put(fp, updated);
        updated
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for ReputationTable {
    fn default() -> Self {
        Self::new()
    }
}
